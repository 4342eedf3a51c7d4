pub mod catalog;
pub mod error;
pub mod graph;
pub mod log;
pub mod orchestrator;
pub mod persistence;
pub mod registry;
pub mod report;
pub mod response;
pub mod sequence;
pub mod task;
pub mod tools;
pub mod truncate;

pub use catalog::AgentCatalog;
pub use error::{EngineError, StructuralError};
pub use graph::{Decision, NewTask, PredicateRegistry, TaskGraph, TaskNode, TaskUpdate, ROOT_TASK};
pub use log::MessageLog;
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorState, Session};
pub use registry::ToolRegistry;
pub use report::{GraphState, Reply, ResponseCode, TurnFailure, TurnReport, TurnStatus};
pub use task::{ContextProvider, GraphContext, StaticContext, Task};
