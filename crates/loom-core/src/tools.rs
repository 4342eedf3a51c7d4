use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ids::GraphId;

/// Context available to tools during execution.
pub struct ToolContext {
    pub graph_id: GraphId,
    pub task_name: String,
    pub abort_signal: CancellationToken,
}

/// What a tool hands back to the orchestrator.
///
/// Tools that return JSON records are deserialized into this shape; missing
/// flags take the defaults `ask_llm = true`, `task_finished = false`,
/// `ask_human = false`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    #[serde(default = "default_true")]
    pub ask_llm: bool,
    #[serde(default)]
    pub task_finished: bool,
    #[serde(default)]
    pub ask_human: bool,
}

fn default_true() -> bool {
    true
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ask_llm: true,
            task_finished: false,
            ask_human: false,
        }
    }

    pub fn finish(mut self) -> Self {
        self.task_finished = true;
        self
    }

    pub fn hand_to_human(mut self) -> Self {
        self.ask_human = true;
        self.ask_llm = false;
        self
    }
}

impl From<String> for ToolOutput {
    fn from(content: String) -> Self {
        Self::text(content)
    }
}

impl From<&str> for ToolOutput {
    fn from(content: &str) -> Self {
        Self::text(content)
    }
}

/// Tool definition rendered into an agent's tool catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Trait implemented by each tool. Arguments arrive as the model's `kwargs` object.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        kwargs: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}
