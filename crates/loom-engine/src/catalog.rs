//! Agent definition store.
//!
//! Loaded once at startup from a JSON array (or the built-in pair), checked
//! against the tool registry, then shared read-only. `reload` swaps the
//! whole set atomically.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;
use tracing::{info, instrument};

use loom_core::agents::AgentDefinition;

use crate::error::{EngineError, StructuralError};
use crate::registry::ToolRegistry;
use crate::task::Task;

pub const COORDINATOR: &str = "coordinator";
pub const ASSISTANT: &str = "assistant";

const COORDINATOR_INSTRUCTION: &str = "You coordinate work toward this objective: {objective}

Break the objective into concrete tasks and hand each one to a suitable agent. \
Talk to the user when you need decisions or when everything is done.

Existing tasks:
{existing_tasks}";

const ASSISTANT_INSTRUCTION: &str = "You are working on the task \"{task_name}\": {task_description}

This is part of the objective: {objective}

Use your tools when they help. Mark the task finished once it is done.";

/// Agents used when no agents file is configured.
pub fn builtin_agents() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition::new(COORDINATOR, COORDINATOR_INSTRUCTION)
            .with_description("Plans the objective and delegates tasks")
            .with_delegates([ASSISTANT]),
        AgentDefinition::new(ASSISTANT, ASSISTANT_INSTRUCTION)
            .with_description("General helper that carries out one task")
            .with_tools(["current_time", "fetch_url"]),
    ]
}

pub struct AgentCatalog {
    agents: RwLock<BTreeMap<String, AgentDefinition>>,
}

impl AgentCatalog {
    /// Validate and index a set of definitions.
    pub fn new(agents: Vec<AgentDefinition>, tools: &ToolRegistry) -> Result<Self, EngineError> {
        Ok(Self {
            agents: RwLock::new(index(agents, tools)?),
        })
    }

    pub fn builtin(tools: &ToolRegistry) -> Result<Self, EngineError> {
        Self::new(builtin_agents(), tools)
    }

    /// Load from `path` when given, otherwise use the built-in agents.
    #[instrument(skip(tools))]
    pub fn load(path: Option<&Path>, tools: &ToolRegistry) -> Result<Self, EngineError> {
        match path {
            Some(path) => Self::new(read_file(path)?, tools),
            None => Self::builtin(tools),
        }
    }

    /// Replace every definition. The new set must still define `required`.
    /// On error the current set is kept.
    #[instrument(skip(self, tools))]
    pub fn reload(
        &self,
        path: &Path,
        tools: &ToolRegistry,
        required: &str,
    ) -> Result<usize, EngineError> {
        let fresh = index(read_file(path)?, tools)?;
        if !fresh.contains_key(required) {
            return Err(StructuralError::UnknownAgent(required.to_string()).into());
        }
        let count = fresh.len();
        *self.agents.write() = fresh;
        info!(count, "agent definitions reloaded");
        Ok(count)
    }

    pub fn get(&self, name: &str) -> Option<AgentDefinition> {
        self.agents.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.read().keys().cloned().collect()
    }

    pub fn list(&self) -> Vec<AgentDefinition> {
        self.agents.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Build a task bound to `agent_name`, resolving its tools and delegates.
    pub fn resolve_task(
        &self,
        task_name: &str,
        agent_name: &str,
        description: &str,
    ) -> Result<Task, StructuralError> {
        let agents = self.agents.read();
        let agent = agents
            .get(agent_name)
            .ok_or_else(|| StructuralError::UnknownAgent(agent_name.to_string()))?;
        let mut task = Task::new(task_name, agent_name, description);
        task.tools = agent.tool_names.iter().cloned().collect();
        for delegate in &agent.delegates {
            let Some(def) = agents.get(delegate) else {
                return Err(StructuralError::UnknownAgent(delegate.clone()));
            };
            let _ = task
                .delegate_catalog
                .insert(delegate.clone(), def.description.clone());
        }
        Ok(task)
    }
}

fn read_file(path: &Path) -> Result<Vec<AgentDefinition>, EngineError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Catalog(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| EngineError::Catalog(format!("{}: {e}", path.display())))
}

fn index(
    agents: Vec<AgentDefinition>,
    tools: &ToolRegistry,
) -> Result<BTreeMap<String, AgentDefinition>, EngineError> {
    let mut map = BTreeMap::new();
    for agent in agents {
        if agent.name.trim().is_empty() {
            return Err(EngineError::Catalog("agent with empty name".into()));
        }
        if let Some(tool) = agent.tool_names.iter().find(|t| !tools.contains(t)) {
            return Err(StructuralError::UnknownTool {
                agent: agent.name.clone(),
                tool: tool.clone(),
            }
            .into());
        }
        let name = agent.name.clone();
        if map.insert(name.clone(), agent).is_some() {
            return Err(EngineError::Catalog(format!("duplicate agent: {name}")));
        }
    }
    for agent in map.values() {
        if let Some(missing) = agent.delegates.iter().find(|d| !map.contains_key(*d)) {
            return Err(StructuralError::UnknownAgent(missing.clone()).into());
        }
    }
    Ok(map)
}
