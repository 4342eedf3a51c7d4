//! Tasks and the system instruction sent with each of their turns.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use loom_core::agents::AgentDefinition;
use loom_core::document::TaskRecord;

use crate::graph::{TaskGraph, ROOT_TASK};
use crate::registry::ToolRegistry;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// A unit of work bound to one agent. Messages are looked up by `task_name`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_name: String,
    pub agent_name: String,
    pub task_description: String,
    /// Tools this task may call; a subset of the agent's authorized tools.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Agents this task may delegate to, with the description shown to the model.
    #[serde(default)]
    pub delegate_catalog: BTreeMap<String, String>,
}

impl Task {
    pub fn new(
        task_name: impl Into<String>,
        agent_name: impl Into<String>,
        task_description: impl Into<String>,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            agent_name: agent_name.into(),
            task_description: task_description.into(),
            tools: Vec::new(),
            delegate_catalog: BTreeMap::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.task_name == ROOT_TASK
    }

    /// Build the system instruction for this task's next LLM call.
    ///
    /// Sections are separated by a blank line: the agent's substituted role
    /// instruction, the tool catalog, the delegate catalog, and the response
    /// contract. Empty catalogs are left out.
    pub fn system_instruction(
        &self,
        agent: &AgentDefinition,
        tools: &ToolRegistry,
        context: &dyn ContextProvider,
    ) -> String {
        let mut sections = vec![substitute(&agent.role_instruction, context)];

        if !self.tools.is_empty() {
            let mut block = String::from("You can call these tools:");
            for name in &self.tools {
                let Some(tool) = tools.get(name) else {
                    continue;
                };
                block.push_str(&format!(
                    "\n- {}: {}\n  arguments: {}",
                    tool.name(),
                    tool.description(),
                    tool.parameters_schema()
                ));
            }
            sections.push(block);
        }

        if !self.delegate_catalog.is_empty() {
            let mut block = String::from("You can hand work to these agents:");
            for (name, description) in &self.delegate_catalog {
                block.push_str(&format!("\n- {name}: {description}"));
            }
            sections.push(block);
        }

        sections.push(response_contract(self.is_root()));
        sections.join("\n\n")
    }
}

fn response_contract(is_root: bool) -> String {
    let mut fields = vec![
        r#"  "user_message": string shown to the user"#,
        r#"  "ask_human": true when you need the user's input"#,
    ];
    if !is_root {
        fields.push(r#"  "task_finished": true when this task is done"#);
    }
    fields.push(r#"  "tool_name" and "kwargs": optional, call one of your tools"#);
    fields.push(
        r#"  "transfer_to_task", "agent_name" and "task_description": optional, hand a new or existing task to an agent"#,
    );
    format!(
        "Reply with a single JSON object with these fields:\n{{\n{}\n}}",
        fields.join(",\n")
    )
}

impl From<TaskRecord> for Task {
    fn from(r: TaskRecord) -> Self {
        Self {
            task_name: r.task_name,
            agent_name: r.agent_name,
            task_description: r.task_description,
            tools: r.tools,
            delegate_catalog: r.delegate_catalog,
        }
    }
}

impl From<&Task> for TaskRecord {
    fn from(t: &Task) -> Self {
        Self {
            task_name: t.task_name.clone(),
            agent_name: t.agent_name.clone(),
            task_description: t.task_description.clone(),
            tools: t.tools.clone(),
            delegate_catalog: t.delegate_catalog.clone(),
        }
    }
}

/// Source of `{placeholder}` values.
pub trait ContextProvider: Send + Sync {
    fn value(&self, key: &str) -> Option<String>;
}

/// Fixed key/value pairs, usually from settings.
#[derive(Clone, Debug, Default)]
pub struct StaticContext(pub BTreeMap<String, String>);

impl ContextProvider for StaticContext {
    fn value(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

/// Values derived from the live graph for one task, falling back to `extra`.
pub struct GraphContext<'a> {
    graph: &'a TaskGraph,
    task: &'a Task,
    extra: Option<&'a dyn ContextProvider>,
}

impl<'a> GraphContext<'a> {
    pub fn new(graph: &'a TaskGraph, task: &'a Task) -> Self {
        Self {
            graph,
            task,
            extra: None,
        }
    }

    pub fn chain(mut self, extra: &'a dyn ContextProvider) -> Self {
        self.extra = Some(extra);
        self
    }
}

impl ContextProvider for GraphContext<'_> {
    fn value(&self, key: &str) -> Option<String> {
        let value = match key {
            "objective" => self.graph.objective().to_string(),
            "graph_name" => self.graph.name().to_string(),
            "task_name" => self.task.task_name.clone(),
            "task_description" => self.task.task_description.clone(),
            "existing_tasks" => self
                .graph
                .preorder()
                .iter()
                .filter(|n| !n.is_root())
                .map(|n| {
                    let mark = if n.completed { "x" } else { " " };
                    format!("[{mark}] {} ({}): {}", n.name(), n.task.agent_name, n.task.task_description)
                })
                .collect::<Vec<_>>()
                .join("\n"),
            "pending_tasks" => self.graph.pending_tasks().join(", "),
            "completed_tasks" => self.graph.completed_tasks().join(", "),
            "templates" => self
                .graph
                .templates()
                .iter()
                .map(|(name, body)| format!("{name}: {body}"))
                .collect::<Vec<_>>()
                .join("\n"),
            other => return self.extra.and_then(|e| e.value(other)),
        };
        Some(value)
    }
}

/// Replace `{name}` tokens with provider values. Unknown names are kept as written.
pub fn substitute(template: &str, context: &dyn ContextProvider) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            context.value(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NewTask;
    use crate::tools::create_default_registry;

    fn statics(pairs: &[(&str, &str)]) -> StaticContext {
        StaticContext(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn unknown_placeholders_stay_verbatim() {
        let ctx = statics(&[("city", "Lisbon")]);
        assert_eq!(
            substitute("Visit {city} in {season}. JSON: {\"a\": 1}", &ctx),
            "Visit Lisbon in {season}. JSON: {\"a\": 1}"
        );
    }

    #[test]
    fn sections_in_fixed_order() {
        let registry = create_default_registry();
        let agent = AgentDefinition::new("planner", "Plan for {objective}.");
        let mut task = Task::new("plan", "planner", "make a plan");
        task.tools = vec!["current_time".into()];
        task.delegate_catalog
            .insert("writer".into(), "Writes prose".into());
        let graph = TaskGraph::new("g", "a trip", Task::new("root", "coordinator", "a trip"));

        let text = task.system_instruction(&agent, &registry, &GraphContext::new(&graph, &task));
        let role = text.find("Plan for a trip.").unwrap();
        let tools = text.find("- current_time:").unwrap();
        let delegates = text.find("- writer: Writes prose").unwrap();
        let contract = text.find("task_finished").unwrap();
        assert!(role < tools && tools < delegates && delegates < contract);
    }

    #[test]
    fn root_contract_omits_task_finished() {
        let registry = ToolRegistry::new();
        let agent = AgentDefinition::new("coordinator", "Coordinate.");
        let root = Task::new("root", "coordinator", "objective");
        let text = root.system_instruction(&agent, &registry, &StaticContext::default());
        assert!(!text.contains("task_finished"));
        assert!(text.contains("user_message"));
        assert!(!text.contains("You can call these tools"));
        assert!(!text.contains("You can hand work"));
    }

    #[test]
    fn graph_context_lists_tasks_and_chains() {
        let mut graph = TaskGraph::new("trip", "a trip", Task::new("root", "coordinator", "a trip"));
        graph.add_task(NewTask::new(Task::new("book", "booker", "book hotel"))).unwrap();
        graph.add_task(NewTask::new(Task::new("pack", "packer", "pack bags"))).unwrap();
        graph.complete_task("book").unwrap();
        graph.add_template("weekend", "two nights");

        let extra = statics(&[("user_name", "Sam")]);
        let task = graph.node("pack").unwrap().task.clone();
        let ctx = GraphContext::new(&graph, &task).chain(&extra);
        assert_eq!(ctx.value("pending_tasks").unwrap(), "pack");
        assert_eq!(ctx.value("completed_tasks").unwrap(), "book");
        assert!(ctx.value("existing_tasks").unwrap().contains("[x] book (booker): book hotel"));
        assert_eq!(ctx.value("templates").unwrap(), "weekend: two nights");
        assert_eq!(ctx.value("user_name").unwrap(), "Sam");
        assert_eq!(ctx.value("nothing"), None);
    }
}
