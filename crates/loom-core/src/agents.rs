use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPERATURE: f64 = 0.2;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// A named role: instruction template, model settings, and the tools and
/// delegates a task bound to it is allowed to use.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    /// Template text. `{placeholder}` tokens are filled at prompt time.
    pub role_instruction: String,
    /// Empty means "use the configured default model".
    #[serde(default)]
    pub default_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub tool_names: BTreeSet<String>,
    /// Shown to other agents that may delegate to this one.
    #[serde(default)]
    pub description: String,
    /// Agents a task bound to this agent may hand work to.
    #[serde(default)]
    pub delegates: Vec<String>,
    /// Prompt with the whole task-family history instead of the task's own slice.
    #[serde(default)]
    pub family_context: bool,
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, role_instruction: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role_instruction: role_instruction.into(),
            default_model: String::new(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            tool_names: BTreeSet::new(),
            description: String::new(),
            delegates: Vec::new(),
            family_context: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_names = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delegates<I, S>(mut self, delegates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.delegates = delegates.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Resolve the model for a call, falling back to the configured default.
    pub fn model_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.default_model.is_empty() {
            fallback
        } else {
            &self.default_model
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_json_gets_defaults() {
        let def: AgentDefinition = serde_json::from_str(
            r#"{"name": "writer", "role_instruction": "You write."}"#,
        )
        .unwrap();
        assert_eq!(def.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(def.max_tokens, DEFAULT_MAX_TOKENS);
        assert!(def.tool_names.is_empty());
        assert!(def.delegates.is_empty());
        assert!(!def.family_context);
    }

    #[test]
    fn model_fallback() {
        let def = AgentDefinition::new("a", "x");
        assert_eq!(def.model_or("claude-sonnet"), "claude-sonnet");
        let def = def.with_model("claude-haiku");
        assert_eq!(def.model_or("claude-sonnet"), "claude-haiku");
    }

    #[test]
    fn builders() {
        let def = AgentDefinition::new("planner", "Plan things")
            .with_description("Breaks objectives into steps")
            .with_tools(["current_time"])
            .with_delegates(["writer"]);
        assert!(def.tool_names.contains("current_time"));
        assert_eq!(def.delegates, vec!["writer"]);
        assert_eq!(def.description, "Breaks objectives into steps");
    }
}
