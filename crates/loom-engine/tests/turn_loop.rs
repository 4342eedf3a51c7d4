use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use loom_core::agents::AgentDefinition;
use loom_core::messages::Role;
use loom_core::tools::{Tool, ToolContext, ToolError, ToolOutput};
use loom_engine::persistence::{load_graph, save_graph};
use loom_engine::tools::create_default_registry;
use loom_engine::{
    AgentCatalog, NewTask, Orchestrator, OrchestratorConfig, PredicateRegistry, ResponseCode,
    Session, TurnStatus, ROOT_TASK,
};
use loom_llm::{ScriptedProvider, ScriptedResponse};
use loom_store::{Database, GraphRepo};

struct Flaky;

#[async_trait]
impl Tool for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _: serde_json::Value, _: &ToolContext) -> Result<ToolOutput, ToolError> {
        Err(ToolError::ExecutionFailed("boom".into()))
    }
}

struct Panicky;

#[async_trait]
impl Tool for Panicky {
    fn name(&self) -> &str {
        "panicky"
    }
    fn description(&self) -> &str {
        "Panics"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _: serde_json::Value, _: &ToolContext) -> Result<ToolOutput, ToolError> {
        panic!("tool bug")
    }
}

struct Filer;

#[async_trait]
impl Tool for Filer {
    fn name(&self) -> &str {
        "file_report"
    }
    fn description(&self) -> &str {
        "Files the report and ends the task"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {"title": {"type": "string"}}})
    }
    async fn execute(&self, kwargs: serde_json::Value, _: &ToolContext) -> Result<ToolOutput, ToolError> {
        let title = kwargs["title"].as_str().unwrap_or("untitled");
        Ok(ToolOutput::text(format!("filed {title}")).finish())
    }
}

fn agents() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition::new("coordinator", "Lead {objective} for {user_name}.")
            .with_tools(["flaky", "panicky"])
            .with_delegates(["worker", "reviewer"]),
        AgentDefinition::new("worker", "Work on {task_description}.")
            .with_description("Does the work")
            .with_tools(["file_report"]),
        AgentDefinition {
            family_context: true,
            ..AgentDefinition::new("reviewer", "Review.").with_description("Reviews with full history")
        },
    ]
}

fn setup(replies: Vec<ScriptedResponse>) -> (Orchestrator, Arc<ScriptedProvider>) {
    let mut registry = create_default_registry();
    registry.register(Arc::new(Flaky));
    registry.register(Arc::new(Panicky));
    registry.register(Arc::new(Filer));
    let registry = Arc::new(registry);
    let catalog = Arc::new(AgentCatalog::new(agents(), &registry).unwrap());
    let provider = Arc::new(ScriptedProvider::new(replies));
    let mut config = OrchestratorConfig::default();
    config
        .context_values
        .insert("user_name".into(), "Sam".into());
    let orch = Orchestrator::new(provider.clone(), catalog, registry, config).unwrap();
    (orch, provider)
}

fn add_task(orch: &Orchestrator, session: &mut Session, name: &str, agent: &str) {
    let task = orch
        .catalog()
        .resolve_task(name, agent, &format!("do {name}"))
        .unwrap();
    session.graph.add_task(NewTask::new(task)).unwrap();
}

#[tokio::test]
async fn delegated_task_finishes_and_graph_is_done() {
    let (orch, provider) = setup(vec![
        ScriptedResponse::json(json!({
            "user_message": "Handing this to a worker",
            "transfer_to_task": "draft",
            "agent_name": "worker",
            "task_description": "write a draft"
        })),
        ScriptedResponse::json(json!({"user_message": "Draft done", "task_finished": true})),
    ]);
    let mut session = orch.create_session("write a memo", None).unwrap();
    let report = orch.post_message(&mut session, "please write it").await.unwrap();

    assert_eq!(report.code, ResponseCode::Success);
    assert_eq!(report.status, TurnStatus::Done);
    assert_eq!(report.llm_calls, 2);
    let texts: Vec<&str> = report.replies.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts, vec!["Handing this to a worker", "Draft done"]);

    assert!(session.graph.node("draft").unwrap().completed);
    assert_eq!(session.graph.parent_of("draft"), Some(ROOT_TASK));
    assert!(session.graph.get_next_task().is_none());
    assert_eq!(session.state.active_task, ROOT_TASK);

    let draft = session.graph.log().slice_for_task("draft");
    assert_eq!(draft[0].role, Role::User);
    assert_eq!(draft[0].created_by, ROOT_TASK);
    assert_eq!(draft[0].content, "write a draft");
    let note = session.graph.log().last_for_task(ROOT_TASK).unwrap();
    assert_eq!(note.role, Role::System);
    assert!(note.content.contains("Task draft is finished: Draft done"));

    let requests = provider.requests();
    assert!(requests[0].system.contains("Lead write a memo for Sam."));
    assert!(requests[1].system.contains("Work on write a draft."));
    assert!(requests[1].system.contains("- file_report:"));
}

#[tokio::test]
async fn finishing_moves_to_the_next_task_in_order() {
    let (orch, provider) = setup(vec![
        ScriptedResponse::json(json!({"transfer_to_task": "first"})),
        ScriptedResponse::json(json!({"user_message": "first done", "task_finished": true})),
        ScriptedResponse::json(json!({"user_message": "what colour?", "ask_human": true})),
    ]);
    let mut session = orch.create_session("two steps", None).unwrap();
    add_task(&orch, &mut session, "first", "worker");
    add_task(&orch, &mut session, "second", "worker");

    let report = orch.post_message(&mut session, "start").await.unwrap();
    assert_eq!(provider.call_count(), 3);
    assert_eq!(report.status, TurnStatus::AwaitingHuman);
    assert_eq!(report.active_task, "second");
    assert_eq!(session.graph.completed_tasks(), vec!["first"]);
    assert_eq!(session.graph.pending_tasks(), vec!["second"]);

    let second = session.graph.log().slice_for_task("second");
    assert_eq!(second.len(), 2);
    assert_eq!(second[0].content, "do second");

    let report = orch.post_message(&mut session, "blue").await;
    assert!(report.is_err(), "no scripted reply left");
    let second = session.graph.log().slice_for_task("second");
    assert_eq!(second.last().unwrap().content, "blue");
}

#[tokio::test]
async fn prose_reply_suspends_without_error() {
    let prose = "Sounds good, let me think about the best route.";
    let (orch, provider) = setup(vec![ScriptedResponse::text(prose)]);
    let mut session = orch.create_session("route", None).unwrap();

    let report = orch.post_message(&mut session, "find a route").await.unwrap();
    assert_eq!(report.code, ResponseCode::InvalidResponseFromModel);
    assert_eq!(report.status, TurnStatus::AwaitingHuman);
    assert_eq!(report.replies[0].text, prose);
    assert_eq!(provider.call_count(), 1);

    let slice = session.graph.log().slice_for_task(ROOT_TASK);
    let roles: Vec<Role> = slice.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::System]);
    assert_eq!(slice[1].content, prose);
}

#[tokio::test]
async fn failing_tool_reprompts_exactly_once() {
    let (orch, provider) = setup(vec![
        ScriptedResponse::json(json!({"tool_name": "flaky", "kwargs": {}})),
        ScriptedResponse::json(json!({"user_message": "the tool failed", "ask_human": true})),
    ]);
    let mut session = orch.create_session("try the tool", None).unwrap();
    let report = orch.post_message(&mut session, "go").await.unwrap();

    assert_eq!(report.code, ResponseCode::ToolError);
    assert_eq!(report.tool_calls, 1);
    assert_eq!(provider.call_count(), 2);

    let tool_msg = session
        .graph
        .log()
        .slice_for_task(ROOT_TASK)
        .into_iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert!(tool_msg.content.contains("boom"));
    let second_prompt = &provider.requests()[1];
    let last = second_prompt.messages.last().unwrap();
    assert_eq!(last.role, Role::Tool);
    assert!(last.content.contains("boom"));
}

#[tokio::test]
async fn panicking_tool_is_reported_not_propagated() {
    let (orch, _) = setup(vec![
        ScriptedResponse::json(json!({"tool_name": "panicky"})),
        ScriptedResponse::json(json!({"ask_human": true})),
    ]);
    let mut session = orch.create_session("x", None).unwrap();
    let report = orch.post_message(&mut session, "go").await.unwrap();
    assert_eq!(report.code, ResponseCode::ToolError);
    let tool_msg = session.graph.log().iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.content.contains("panicked"));
}

#[tokio::test]
async fn tool_can_finish_the_task() {
    let (orch, provider) = setup(vec![
        ScriptedResponse::json(json!({
            "transfer_to_task": "report", "agent_name": "worker", "task_description": "file the report"
        })),
        ScriptedResponse::json(json!({
            "user_message": "Filing now", "tool_name": "file_report", "kwargs": {"title": "Q3"}
        })),
    ]);
    let mut session = orch.create_session("reports", None).unwrap();
    let report = orch.post_message(&mut session, "go").await.unwrap();

    assert_eq!(provider.call_count(), 2);
    assert_eq!(report.status, TurnStatus::Done);
    assert!(session.graph.node("report").unwrap().completed);
    let report_slice = session.graph.log().slice_for_task("report");
    assert_eq!(report_slice.last().unwrap().content, "filed Q3");
}

#[tokio::test]
async fn family_context_agent_sees_ancestor_messages() {
    let (orch, provider) = setup(vec![
        ScriptedResponse::json(json!({
            "transfer_to_task": "review", "agent_name": "reviewer", "task_description": "review it"
        })),
        ScriptedResponse::json(json!({"ask_human": true})),
    ]);
    let mut session = orch.create_session("x", None).unwrap();
    orch.post_message(&mut session, "the secret word is plum").await.unwrap();

    let review_prompt = &provider.requests()[1];
    assert!(review_prompt
        .messages
        .iter()
        .any(|m| m.content == "the secret word is plum"));
    assert_eq!(review_prompt.messages.last().unwrap().content, "review it");
}

#[tokio::test]
async fn saved_graph_resumes_where_it_left_off() {
    let (orch, _) = setup(vec![
        ScriptedResponse::json(json!({"transfer_to_task": "first"})),
        ScriptedResponse::json(json!({"user_message": "need input", "ask_human": true})),
    ]);
    let mut session = orch.create_session("persisted", Some("keep-me")).unwrap();
    add_task(&orch, &mut session, "first", "worker");
    orch.post_message(&mut session, "go").await.unwrap();

    let repo = GraphRepo::new(Database::in_memory().unwrap());
    save_graph(&repo, &session.graph).unwrap();
    let graph = load_graph(&repo, "keep-me", PredicateRegistry::new()).unwrap();
    assert_eq!(graph, session.graph);

    let (orch, provider) = setup(vec![ScriptedResponse::json(
        json!({"user_message": "thanks", "task_finished": true}),
    )]);
    let mut resumed = orch.resume(graph);
    assert_eq!(resumed.state.active_task, "first");
    let report = orch.post_message(&mut resumed, "here you go").await.unwrap();
    assert_eq!(report.status, TurnStatus::Done);
    assert_eq!(provider.call_count(), 1);
    assert!(provider.requests()[0]
        .messages
        .iter()
        .any(|m| m.content.contains("need input")));
}
