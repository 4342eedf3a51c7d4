use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoomSettings {
    pub server: ServerSettings,
    pub orchestrator: OrchestratorSettings,
    pub llm: LlmSettings,
    pub paths: PathSettings,
    pub logging: LoggingSettings,
}

/// Headless API server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Upper bound on one HTTP request, including every turn it drives.
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9191,
            request_timeout_secs: 600,
        }
    }
}

/// Turn-loop limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Agent bound to every graph's root task.
    pub coordinator_agent: String,
    /// LLM calls allowed between two human messages.
    pub max_auto_turns: u32,
    pub turn_timeout_ms: u64,
    /// Extra attempts after a turn deadline expires.
    pub turn_retries: u32,
    pub tool_timeout_ms: u64,
    pub max_tool_output_bytes: usize,
    /// Extra `{placeholder}` values available to every role instruction.
    pub context_values: BTreeMap<String, String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            coordinator_agent: "coordinator".to_string(),
            max_auto_turns: 12,
            turn_timeout_ms: 120_000,
            turn_retries: 1,
            tool_timeout_ms: 60_000,
            max_tool_output_bytes: 64 * 1024,
            context_values: BTreeMap::new(),
        }
    }
}

/// LLM boundary settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmSettings {
    pub provider: String,
    pub default_model: String,
    pub base_url: String,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            default_model: "claude-sonnet-4-20250514".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

/// Filesystem locations. Relative paths resolve against `~/.loom`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathSettings {
    /// JSON array of agent definitions. Built-in agents are used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents_file: Option<String>,
    pub database: String,
    pub log_database: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            agents_file: None,
            database: "database/graphs.db".to_string(),
            log_database: "database/logs.db".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Persist warn+ events to the log database.
    pub persist_warnings: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            persist_warnings: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(LoomSettings::default()).unwrap();
        assert!(json["orchestrator"]["maxAutoTurns"].is_number());
        assert!(json["server"]["requestTimeoutSecs"].is_number());
        assert!(json["paths"].get("agentsFile").is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: LoomSettings =
            serde_json::from_str(r#"{"orchestrator": {"maxAutoTurns": 3}}"#).unwrap();
        assert_eq!(settings.orchestrator.max_auto_turns, 3);
        assert_eq!(settings.orchestrator.coordinator_agent, "coordinator");
        assert_eq!(settings.server.port, 9191);
    }
}
