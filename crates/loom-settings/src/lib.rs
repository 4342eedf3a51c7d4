//! # loom-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`LoomSettings::default()`]
//! 2. **User file**: `~/.loom/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `LOOM_*` overrides (highest priority)

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_from_path, loom_home, resolve_path, settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = LoomSettings::default();
        assert_eq!(settings.server.port, 9191);
        assert_eq!(settings.orchestrator.coordinator_agent, "coordinator");
        assert_eq!(settings.orchestrator.max_auto_turns, 12);
        assert_eq!(settings.llm.provider, "anthropic");
        assert!(settings.paths.agents_file.is_none());
    }

    #[test]
    fn deep_merge_re_exported() {
        let merged = deep_merge(serde_json::json!({"x": 1}), serde_json::json!({"y": 2}));
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }
}
