//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::LoomSettings;

/// `~/.loom`, or `/tmp/.loom` when `HOME` is unset.
pub fn loom_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".loom")
}

pub fn settings_path() -> PathBuf {
    loom_home().join("settings.json")
}

/// Resolve a configured path: absolute paths are kept, relative ones live under `~/.loom`.
pub fn resolve_path(configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        loom_home().join(path)
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<LoomSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<LoomSettings> {
    let defaults = serde_json::to_value(LoomSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: LoomSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

fn validate(settings: &LoomSettings) -> Result<()> {
    if settings.orchestrator.max_auto_turns == 0 {
        return Err(SettingsError::InvalidValue(
            "orchestrator.maxAutoTurns must be at least 1".into(),
        ));
    }
    if settings.orchestrator.coordinator_agent.trim().is_empty() {
        return Err(SettingsError::InvalidValue(
            "orchestrator.coordinatorAgent must not be empty".into(),
        ));
    }
    Ok(())
}

/// Apply `LOOM_*` overrides. Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut LoomSettings) {
    if let Some(v) = read_env_string("LOOM_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u64("LOOM_PORT", 1, 65_535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = read_env_string("LOOM_MODEL") {
        settings.llm.default_model = v;
    }
    if let Some(v) = read_env_string("LOOM_LLM_BASE_URL") {
        settings.llm.base_url = v;
    }
    if let Some(v) = read_env_u64("LOOM_MAX_AUTO_TURNS", 1, 1_000) {
        settings.orchestrator.max_auto_turns = v as u32;
    }
    if let Some(v) = read_env_u64("LOOM_TURN_TIMEOUT_MS", 1_000, 3_600_000) {
        settings.orchestrator.turn_timeout_ms = v;
    }
    if let Some(v) = read_env_string("LOOM_AGENTS_FILE") {
        settings.paths.agents_file = Some(v);
    }
    if let Some(v) = read_env_string("LOOM_DATABASE") {
        settings.paths.database = v;
    }
    if let Some(v) = read_env_string("LOOM_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("LOOM_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}
