//! The persisted form of a task graph.
//!
//! One JSON object per graph. Tasks are stored as plain records so a graph
//! can be rebuilt without access to the agent store that created it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::messages::Message;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub name: String,
    pub objective: String,
    pub graph: BTreeMap<String, NodeRecord>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub sequence: f64,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub task: TaskRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_predicate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branches: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_name: String,
    pub agent_name: String,
    pub task_description: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub delegate_catalog: BTreeMap<String, String>,
}

impl GraphDocument {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
