use serde::Serialize;

use loom_core::ids::{GraphId, TurnId};

use crate::error::EngineError;

/// Outcome code carried by turn reports and API responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    Success,
    NotFound,
    InvalidResponseFromModel,
    ToolError,
    StructuralError,
    MaxTurnsExceeded,
    TurnTimeout,
    GatewayError,
    InvalidParams,
    MethodNotFound,
    InternalError,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NotFound => "not_found",
            Self::InvalidResponseFromModel => "invalid_response_from_model",
            Self::ToolError => "tool_error",
            Self::StructuralError => "structural_error",
            Self::MaxTurnsExceeded => "max_turns_exceeded",
            Self::TurnTimeout => "turn_timeout",
            Self::GatewayError => "gateway_error",
            Self::InvalidParams => "invalid_params",
            Self::MethodNotFound => "method_not_found",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&EngineError> for ResponseCode {
    fn from(e: &EngineError) -> Self {
        match e {
            EngineError::Structural(_) => Self::StructuralError,
            EngineError::Gateway(_) => Self::GatewayError,
            EngineError::Store(loom_store::StoreError::NotFound(_)) => Self::NotFound,
            EngineError::Tool(_) => Self::ToolError,
            EngineError::MaxTurnsExceeded(_) => Self::MaxTurnsExceeded,
            EngineError::TurnTimeout(_) => Self::TurnTimeout,
            EngineError::Store(_)
            | EngineError::Catalog(_)
            | EngineError::Aborted
            | EngineError::Internal(_) => Self::InternalError,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// The loop will call the model again.
    Running,
    AwaitingHuman,
    /// No incomplete task is reachable from the root.
    Done,
}

/// Text a task's agent addressed to the user.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reply {
    pub task: String,
    pub agent: String,
    pub text: String,
}

/// What happened between a human message and the loop handing control back.
#[derive(Clone, Debug, Serialize)]
pub struct TurnReport {
    pub graph_id: GraphId,
    pub turn_id: TurnId,
    pub code: ResponseCode,
    pub status: TurnStatus,
    pub active_task: String,
    pub replies: Vec<Reply>,
    pub llm_calls: u32,
    pub tool_calls: u32,
}

impl TurnReport {
    pub fn new(graph_id: GraphId, active_task: impl Into<String>) -> Self {
        Self {
            graph_id,
            turn_id: TurnId::new(),
            code: ResponseCode::Success,
            status: TurnStatus::Running,
            active_task: active_task.into(),
            replies: Vec::new(),
            llm_calls: 0,
            tool_calls: 0,
        }
    }

    /// Record a non-fatal problem. The first one wins.
    pub fn flag(&mut self, code: ResponseCode) {
        if self.code == ResponseCode::Success {
            self.code = code;
        }
    }
}

/// A loop that stopped on an error, with everything it produced before stopping.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct TurnFailure {
    pub error: EngineError,
    /// Replies and counters up to the failure; `code` is the error's code.
    pub report: TurnReport,
}

impl TurnFailure {
    pub fn new(error: EngineError, mut report: TurnReport) -> Self {
        report.code = ResponseCode::from(&error);
        Self { error, report }
    }

    pub fn code(&self) -> ResponseCode {
        self.report.code
    }
}

/// Snapshot returned by `graph.state`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GraphState {
    pub graph_id: GraphId,
    pub objective: String,
    pub active_task: String,
    pub status: TurnStatus,
    pub pending_tasks: Vec<String>,
    pub completed_tasks: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StructuralError;

    #[test]
    fn codes_serialize_snake_case() {
        assert_eq!(
            serde_json::to_value(ResponseCode::InvalidResponseFromModel).unwrap(),
            "invalid_response_from_model"
        );
        assert_eq!(ResponseCode::NotFound.to_string(), "not_found");
    }

    #[test]
    fn first_flag_wins() {
        let mut report = TurnReport::new(GraphId::from_raw("g"), "root");
        report.flag(ResponseCode::ToolError);
        report.flag(ResponseCode::InvalidResponseFromModel);
        assert_eq!(report.code, ResponseCode::ToolError);
    }

    #[test]
    fn failure_overrides_the_report_code() {
        let mut report = TurnReport::new(GraphId::from_raw("g"), "root");
        report.flag(ResponseCode::ToolError);
        let failure = TurnFailure::new(EngineError::MaxTurnsExceeded(4), report);
        assert_eq!(failure.code(), ResponseCode::MaxTurnsExceeded);
        assert_eq!(failure.to_string(), EngineError::MaxTurnsExceeded(4).to_string());
    }

    #[test]
    fn engine_errors_map_to_codes() {
        let e = EngineError::Structural(StructuralError::RootImmutable);
        assert_eq!(ResponseCode::from(&e), ResponseCode::StructuralError);
        let e = EngineError::Store(loom_store::StoreError::NotFound("graph x".into()));
        assert_eq!(ResponseCode::from(&e), ResponseCode::NotFound);
        assert_eq!(
            ResponseCode::from(&EngineError::MaxTurnsExceeded(3)),
            ResponseCode::MaxTurnsExceeded
        );
    }
}
