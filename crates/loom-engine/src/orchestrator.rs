//! The conversational turn loop.
//!
//! Each graph is driven by exactly one sequential loop. A human message
//! re-arms the loop for the active task; the loop then calls the model,
//! classifies the reply, and applies it to the graph until a reply hands
//! control back to the human, every task is done, or a guard trips.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use loom_core::ids::GraphId;
use loom_core::messages::{ChatMessage, Role, HUMAN_AUTHOR};
use loom_core::provider::{LlmProvider, LlmRequest};
use loom_core::tools::{ToolContext, ToolError, ToolOutput};
use loom_settings::LoomSettings;

use crate::catalog::AgentCatalog;
use crate::error::{EngineError, StructuralError};
use crate::graph::{NewTask, PredicateRegistry, TaskGraph, ROOT_TASK};
use crate::registry::ToolRegistry;
use crate::report::{GraphState, Reply, ResponseCode, TurnFailure, TurnReport, TurnStatus};
use crate::response::{parse_reply, Directive};
use crate::task::{GraphContext, StaticContext, Task};
use crate::truncate::truncate_output;

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub coordinator: String,
    pub default_model: String,
    /// Model calls allowed between two human messages.
    pub max_auto_turns: u32,
    pub turn_timeout: Duration,
    /// Extra attempts after the turn deadline expires.
    pub turn_retries: u32,
    pub tool_timeout: Duration,
    pub max_tool_output_bytes: usize,
    pub context_values: BTreeMap<String, String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_settings(&LoomSettings::default())
    }
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &LoomSettings) -> Self {
        let o = &settings.orchestrator;
        Self {
            coordinator: o.coordinator_agent.clone(),
            default_model: settings.llm.default_model.clone(),
            max_auto_turns: o.max_auto_turns.max(1),
            turn_timeout: Duration::from_millis(o.turn_timeout_ms),
            turn_retries: o.turn_retries,
            tool_timeout: Duration::from_millis(o.tool_timeout_ms),
            max_tool_output_bytes: o.max_tool_output_bytes,
            context_values: o.context_values.clone(),
        }
    }
}

/// Loop state for one session.
#[derive(Clone, Debug, PartialEq)]
pub struct OrchestratorState {
    pub active_task: String,
    pub ask_llm: bool,
    /// Model calls since the last human message.
    pub auto_turns: u32,
    pub status: TurnStatus,
}

impl OrchestratorState {
    /// Waiting for the human on `active_task`.
    pub fn idle(active_task: impl Into<String>) -> Self {
        Self {
            active_task: active_task.into(),
            ask_llm: false,
            auto_turns: 0,
            status: TurnStatus::AwaitingHuman,
        }
    }

    fn await_human(&mut self) {
        self.ask_llm = false;
        self.status = TurnStatus::AwaitingHuman;
    }

    fn keep_going(&mut self) {
        self.ask_llm = true;
        self.status = TurnStatus::Running;
    }
}

/// A graph plus the loop state driving it.
pub struct Session {
    pub id: GraphId,
    pub graph: TaskGraph,
    pub state: OrchestratorState,
    /// Cancels the in-flight model or tool call. Replace it to start fresh.
    pub cancel: CancellationToken,
}

impl Session {
    pub fn snapshot(&self) -> GraphState {
        GraphState {
            graph_id: self.id.clone(),
            objective: self.graph.objective().to_string(),
            active_task: self.state.active_task.clone(),
            status: self.state.status,
            pending_tasks: self.graph.pending_tasks(),
            completed_tasks: self.graph.completed_tasks(),
        }
    }
}

/// Result of running a tool, computed before any state changes.
enum ToolRun {
    Rejected(String),
    Finished(Result<ToolOutput, ToolError>),
}

pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    catalog: Arc<AgentCatalog>,
    tools: Arc<ToolRegistry>,
    predicates: PredicateRegistry,
    static_context: StaticContext,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        catalog: Arc<AgentCatalog>,
        tools: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Result<Self, EngineError> {
        if !catalog.contains(&config.coordinator) {
            return Err(StructuralError::UnknownAgent(config.coordinator.clone()).into());
        }
        Ok(Self {
            provider,
            catalog,
            tools,
            predicates: PredicateRegistry::new(),
            static_context: StaticContext(config.context_values.clone()),
            config,
        })
    }

    /// Predicates attached to every graph this orchestrator creates or resumes.
    pub fn with_predicates(mut self, predicates: PredicateRegistry) -> Self {
        self.predicates = predicates;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Swap in the definitions from `path`. Sessions pick them up on their
    /// next delegation; tasks already in a graph keep what they resolved.
    pub fn reload_agents(&self, path: &Path) -> Result<usize, EngineError> {
        self.catalog.reload(path, &self.tools, &self.config.coordinator)
    }

    pub fn predicates(&self) -> &PredicateRegistry {
        &self.predicates
    }

    /// Start a graph for `objective`, rooted at the coordinator.
    #[instrument(skip(self, objective))]
    pub fn create_session(
        &self,
        objective: &str,
        name: Option<&str>,
    ) -> Result<Session, EngineError> {
        let id = name.map_or_else(GraphId::new, GraphId::from_raw);
        let root = self
            .catalog
            .resolve_task(ROOT_TASK, &self.config.coordinator, objective)?;
        let graph = TaskGraph::new(id.as_str(), objective, root)
            .with_predicates(self.predicates.clone());
        info!(graph_id = %id, "graph created");
        Ok(Session {
            id,
            graph,
            state: OrchestratorState::idle(ROOT_TASK),
            cancel: CancellationToken::new(),
        })
    }

    /// Wrap a restored graph. The next actionable task (or root) becomes
    /// active and the loop waits for the human.
    pub fn resume(&self, graph: TaskGraph) -> Session {
        let graph = graph.with_predicates(self.predicates.clone());
        let active = graph
            .get_next_task()
            .map_or_else(|| ROOT_TASK.to_string(), |n| n.name().to_string());
        Session {
            id: GraphId::from_raw(graph.name()),
            graph,
            state: OrchestratorState::idle(active),
            cancel: CancellationToken::new(),
        }
    }

    /// Append a human message for the active task and run the loop.
    #[instrument(skip(self, session, text), fields(graph_id = %session.id, task = %session.state.active_task))]
    pub async fn post_message(
        &self,
        session: &mut Session,
        text: &str,
    ) -> Result<TurnReport, TurnFailure> {
        let active = session.state.active_task.clone();
        let _ = session
            .graph
            .log_mut()
            .append(text, Role::User, HUMAN_AUTHOR, &active);
        session.state.auto_turns = 0;
        session.state.keep_going();
        self.run(session).await
    }

    /// Run turns while `ask_llm` holds. A failure keeps the replies gathered so far.
    pub async fn run(&self, session: &mut Session) -> Result<TurnReport, TurnFailure> {
        let mut report = TurnReport::new(session.id.clone(), &session.state.active_task);

        while session.state.ask_llm {
            if session.state.auto_turns >= self.config.max_auto_turns {
                let max = self.config.max_auto_turns;
                warn!(graph_id = %session.id, task = %session.state.active_task, max, "auto-turn limit reached");
                let active = session.state.active_task.clone();
                let _ = session.graph.log_mut().append(
                    format!("Stopped after {max} model calls without input from the user."),
                    Role::System,
                    ROOT_TASK,
                    &active,
                );
                session.state.await_human();
                return Err(Self::failed(session, report, EngineError::MaxTurnsExceeded(max)));
            }

            if let Err(e) = self.turn(session, &mut report).await {
                session.state.await_human();
                return Err(Self::failed(session, report, e));
            }
        }

        report.status = session.state.status;
        report.active_task = session.state.active_task.clone();
        Ok(report)
    }

    fn failed(session: &Session, mut report: TurnReport, error: EngineError) -> TurnFailure {
        report.status = session.state.status;
        report.active_task = session.state.active_task.clone();
        TurnFailure::new(error, report)
    }

    /// One model call and the changes its reply asks for.
    #[instrument(skip(self, session, report), fields(graph_id = %session.id, task = %session.state.active_task))]
    pub async fn turn(
        &self,
        session: &mut Session,
        report: &mut TurnReport,
    ) -> Result<(), EngineError> {
        let active = session.state.active_task.clone();
        let task = session
            .graph
            .node(&active)
            .map(|n| n.task.clone())
            .ok_or_else(|| StructuralError::TaskNotFound(active.clone()))?;
        let agent = self
            .catalog
            .get(&task.agent_name)
            .ok_or_else(|| StructuralError::UnknownAgent(task.agent_name.clone()))?;

        // 1. Prompt
        let history = if agent.family_context {
            session.graph.slice_for_family(&active)
        } else {
            session.graph.log().slice_for_task(&active)
        };
        let request = {
            let context = GraphContext::new(&session.graph, &task).chain(&self.static_context);
            LlmRequest {
                system: task.system_instruction(&agent, &self.tools, &context),
                messages: history.into_iter().map(ChatMessage::from).collect(),
                model: agent.model_or(&self.config.default_model).to_string(),
                max_tokens: agent.max_tokens,
                temperature: agent.temperature,
            }
        };

        // 2. Model call; nothing is applied until it returns
        let raw = self.call_model(&request, &session.cancel).await?;
        session.state.auto_turns += 1;
        report.llm_calls += 1;
        let parsed = parse_reply(&raw);
        debug!(graph_id = %session.id, task = %active, directive = ?parsed.directive, "reply classified");

        // 3. Tools run before the reply is recorded so an abort leaves no trace
        let tool_run = match &parsed.directive {
            Directive::ToolCall { name, kwargs } => {
                Some(self.run_tool(session, &task, name, kwargs.clone()).await?)
            }
            _ => None,
        };

        // 4. Apply
        let _ = session
            .graph
            .log_mut()
            .append(raw, Role::Assistant, &active, &active);
        if !parsed.reply.user_message.is_empty() {
            report.replies.push(Reply {
                task: active.clone(),
                agent: task.agent_name.clone(),
                text: parsed.reply.user_message.clone(),
            });
        }
        if let Some(err) = &parsed.protocol_error {
            warn!(graph_id = %session.id, task = %active, error = %err, "model reply did not follow the response format");
            system_note(
                session,
                &active,
                format!("Your last reply could not be used ({err}). Reply with a single JSON object."),
            );
            report.flag(ResponseCode::InvalidResponseFromModel);
        }

        match parsed.directive {
            Directive::ToolCall { name, .. } => {
                if let Some(run) = tool_run {
                    self.apply_tool_run(session, &task, &name, run, &parsed.reply.user_message, report);
                }
            }
            Directive::Delegate {
                task_name,
                agent_name,
                description,
            } => {
                let description = description
                    .or_else(|| Some(parsed.reply.user_message.clone()).filter(|m| !m.is_empty()))
                    .unwrap_or_else(|| task_name.clone());
                self.delegate(session, &task, &task_name, agent_name.as_deref(), &description);
            }
            Directive::Finish if task.is_root() => session.state.await_human(),
            Directive::Finish => self.finish(session, &active, &parsed.reply.user_message)?,
            Directive::AskHuman => session.state.await_human(),
            Directive::Continue => session.state.keep_going(),
        }
        Ok(())
    }

    async fn call_model(
        &self,
        request: &LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<String, EngineError> {
        let attempts = self.config.turn_retries + 1;
        for attempt in 1..=attempts {
            let call = tokio::time::timeout(self.config.turn_timeout, self.provider.call(request));
            tokio::select! {
                result = call => match result {
                    Ok(reply) => return Ok(reply?),
                    Err(_elapsed) => warn!(
                        attempt,
                        attempts,
                        timeout_ms = self.config.turn_timeout.as_millis() as u64,
                        "model call missed the turn deadline"
                    ),
                },
                () = cancel.cancelled() => return Err(EngineError::Aborted),
            }
        }
        Err(EngineError::TurnTimeout(self.config.turn_timeout))
    }

    async fn run_tool(
        &self,
        session: &Session,
        task: &Task,
        name: &str,
        kwargs: Value,
    ) -> Result<ToolRun, EngineError> {
        if !task.tools.iter().any(|t| t == name) {
            let available = if task.tools.is_empty() {
                "none".to_string()
            } else {
                task.tools.join(", ")
            };
            return Ok(ToolRun::Rejected(format!(
                "Tool {name} is not available to this task. Available tools: {available}."
            )));
        }
        let Some(tool) = self.tools.get(name) else {
            return Ok(ToolRun::Rejected(format!("Tool {name} is not registered.")));
        };

        let ctx = ToolContext {
            graph_id: session.id.clone(),
            task_name: task.task_name.clone(),
            abort_signal: session.cancel.child_token(),
        };
        let timeout = self.config.tool_timeout;
        let execution = AssertUnwindSafe(tool.execute(kwargs, &ctx)).catch_unwind();
        let outcome = tokio::select! {
            outcome = tokio::time::timeout(timeout, execution) => outcome,
            () = session.cancel.cancelled() => return Err(EngineError::Aborted),
        };

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_panic)) => Err(ToolError::ExecutionFailed(format!("tool {name} panicked"))),
            Err(_elapsed) => Err(ToolError::Timeout(timeout)),
        };
        if let Err(e) = &result {
            warn!(graph_id = %session.id, task = %task.task_name, tool = name, error = %e, "tool failed");
        }
        Ok(ToolRun::Finished(result))
    }

    fn apply_tool_run(
        &self,
        session: &mut Session,
        task: &Task,
        name: &str,
        run: ToolRun,
        summary: &str,
        report: &mut TurnReport,
    ) {
        let active = task.task_name.as_str();
        let output = match run {
            ToolRun::Rejected(note) => {
                system_note(session, active, note);
                session.state.keep_going();
                return;
            }
            ToolRun::Finished(Err(e)) => {
                let _ = session.graph.log_mut().append(
                    format!("Tool {name} failed: {e}"),
                    Role::Tool,
                    active,
                    active,
                );
                report.tool_calls += 1;
                report.flag(ResponseCode::ToolError);
                session.state.keep_going();
                return;
            }
            ToolRun::Finished(Ok(output)) => output,
        };

        report.tool_calls += 1;
        let content = truncate_output(&output.content, self.config.max_tool_output_bytes);
        let _ = session
            .graph
            .log_mut()
            .append(content, Role::Tool, active, active);

        if output.task_finished && !task.is_root() {
            if let Err(e) = self.finish(session, active, summary) {
                warn!(graph_id = %session.id, task = active, error = %e, "could not finish task after tool");
                session.state.await_human();
            }
        } else if output.ask_human || output.task_finished || !output.ask_llm {
            session.state.await_human();
        } else {
            session.state.keep_going();
        }
    }

    /// Hand work to a new or existing task. Rejections become system notes.
    fn delegate(
        &self,
        session: &mut Session,
        from: &Task,
        target: &str,
        agent_name: Option<&str>,
        description: &str,
    ) {
        let active = from.task_name.as_str();
        match self.try_delegate(session, from, target, agent_name, description) {
            Ok(()) => {
                info!(graph_id = %session.id, from = active, task = target, "active task switched");
                session.state.active_task = target.to_string();
                session.state.keep_going();
            }
            Err(e) => {
                warn!(graph_id = %session.id, task = active, target, error = %e, "delegation rejected");
                system_note(session, active, format!("Could not hand off to {target}: {e}"));
                session.state.keep_going();
            }
        }
    }

    fn try_delegate(
        &self,
        session: &mut Session,
        from: &Task,
        target: &str,
        agent_name: Option<&str>,
        description: &str,
    ) -> Result<(), StructuralError> {
        if target == from.task_name || target == ROOT_TASK {
            return Err(StructuralError::InvalidPlacement(format!(
                "{target} cannot be delegated to"
            )));
        }
        if let Some(node) = session.graph.node(target) {
            if node.completed {
                return Err(StructuralError::InvalidPlacement(format!(
                    "{target} is already completed"
                )));
            }
            seed_if_empty(session, target);
            return Ok(());
        }

        let agent = agent_name.ok_or_else(|| {
            StructuralError::InvalidPlacement("agent_name is required for a new task".into())
        })?;
        if !from.delegate_catalog.contains_key(agent) {
            return Err(StructuralError::DelegateNotAllowed {
                from: from.agent_name.clone(),
                to: agent.to_string(),
            });
        }
        let task = self.catalog.resolve_task(target, agent, description)?;
        let _ = session
            .graph
            .add_task(NewTask::new(task).under(&from.task_name))?;
        let _ = session
            .graph
            .log_mut()
            .append(description, Role::User, &from.task_name, target);
        Ok(())
    }

    /// Complete `name`, report to its parent, and move to the next task.
    fn finish(&self, session: &mut Session, name: &str, summary: &str) -> Result<(), EngineError> {
        session.graph.complete_task(name)?;
        let parent = session
            .graph
            .parent_of(name)
            .unwrap_or(ROOT_TASK)
            .to_string();
        let note = if summary.is_empty() {
            format!("Task {name} is finished.")
        } else {
            format!("Task {name} is finished: {summary}")
        };
        let _ = session
            .graph
            .log_mut()
            .append(note, Role::System, name, &parent);
        info!(graph_id = %session.id, task = name, parent = %parent, "task finished");
        session.state.active_task = parent;
        session.state.auto_turns = 0;

        let next = session.graph.get_next_task().map(|n| n.name().to_string());
        match next {
            Some(next) => {
                seed_if_empty(session, &next);
                info!(graph_id = %session.id, task = %next, "next task active");
                session.state.active_task = next;
                session.state.keep_going();
            }
            None => {
                info!(graph_id = %session.id, "all tasks complete");
                session.state.ask_llm = false;
                session.state.status = TurnStatus::Done;
            }
        }
        Ok(())
    }
}

fn system_note(session: &mut Session, task: &str, note: impl Into<String>) {
    let _ = session
        .graph
        .log_mut()
        .append(note, Role::System, ROOT_TASK, task);
}

/// Give a task with no history its description as the opening message.
fn seed_if_empty(session: &mut Session, task: &str) {
    if session.graph.log().has_messages_for(task) {
        return;
    }
    let Some(node) = session.graph.node(task) else {
        return;
    };
    let description = node.task.task_description.clone();
    let author = node.parent.clone().unwrap_or_else(|| ROOT_TASK.to_string());
    let _ = session
        .graph
        .log_mut()
        .append(description, Role::User, author, task);
}
