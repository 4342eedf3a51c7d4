use std::time::Duration;

use loom_core::errors::GatewayError;
use loom_core::tools::ToolError;
use loom_store::StoreError;

/// Violations of the task tree's shape. Always reported to the caller that
/// triggered them; the graph is left unchanged.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum StructuralError {
    #[error("task already exists: {0}")]
    DuplicateTask(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("parent task not found: {0}")]
    MissingParent(String),

    #[error("invalid placement: {0}")]
    InvalidPlacement(String),

    #[error("sequence {sequence} already used under {parent}")]
    DuplicateSequence { parent: String, sequence: f64 },

    #[error("invalid decision node: {0}")]
    InvalidDecisionNode(String),

    #[error("the root task cannot be changed this way")]
    RootImmutable,

    #[error("moving {0} would create a cycle")]
    Cycle(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("agent {agent} references unknown tool {tool}")]
    UnknownTool { agent: String, tool: String },

    #[error("agent {from} may not delegate to {to}")]
    DelegateNotAllowed { from: String, to: String },

    #[error("invalid graph document: {0}")]
    InvalidDocument(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("agent definitions: {0}")]
    Catalog(String),

    #[error("turn aborted")]
    Aborted,

    #[error("max auto turns exceeded: {0}")]
    MaxTurnsExceeded(u32),

    #[error("turn timed out after {0:?}")]
    TurnTimeout(Duration),

    #[error("{0}")]
    Internal(String),
}
