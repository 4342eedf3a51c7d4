//! Mapping between [`TaskGraph`] and the persisted [`GraphDocument`].

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use tracing::{instrument, warn};

use loom_core::document::{GraphDocument, NodeRecord, TaskRecord};
use loom_store::{files, GraphRepo};

use crate::error::{EngineError, StructuralError};
use crate::graph::{Decision, PredicateRegistry, TaskGraph, TaskNode, ROOT_TASK};
use crate::log::MessageLog;

pub fn to_document(graph: &TaskGraph) -> GraphDocument {
    let nodes = graph
        .nodes()
        .map(|n| {
            let record = NodeRecord {
                sequence: n.sequence,
                completed: n.completed,
                parent: n.parent.clone(),
                task: TaskRecord::from(&n.task),
                decision_predicate: n.decision.as_ref().map(|d| d.predicate.clone()),
                branches: n.decision.as_ref().map(|d| d.branches.clone()),
            };
            (n.name().to_string(), record)
        })
        .collect();
    GraphDocument {
        name: graph.name().to_string(),
        objective: graph.objective().to_string(),
        graph: nodes,
        messages: graph.log().export(),
        templates: graph.templates().clone(),
    }
}

/// Rebuild a graph, checking the tree before accepting it.
pub fn from_document(
    doc: GraphDocument,
    predicates: PredicateRegistry,
) -> Result<TaskGraph, StructuralError> {
    let invalid = |msg: String| StructuralError::InvalidDocument(msg);

    let roots: Vec<&String> = doc
        .graph
        .iter()
        .filter(|(_, n)| n.parent.is_none())
        .map(|(k, _)| k)
        .collect();
    if roots.len() != 1 || roots[0] != ROOT_TASK {
        return Err(invalid(format!(
            "expected a single parentless node named {ROOT_TASK}, found {roots:?}"
        )));
    }

    if doc.graph.get(ROOT_TASK).is_some_and(|root| root.completed) {
        return Err(invalid(format!("{ROOT_TASK} cannot be completed")));
    }

    let mut nodes = BTreeMap::new();
    let mut sequences: HashSet<(String, u64)> = HashSet::new();
    for (key, record) in &doc.graph {
        if key != &record.task.task_name {
            return Err(invalid(format!(
                "node {key} holds task {}",
                record.task.task_name
            )));
        }
        if let Some(parent) = &record.parent {
            if !doc.graph.contains_key(parent) {
                return Err(StructuralError::MissingParent(parent.clone()));
            }
            if !sequences.insert((parent.clone(), record.sequence.to_bits())) {
                return Err(StructuralError::DuplicateSequence {
                    parent: parent.clone(),
                    sequence: record.sequence,
                });
            }
        }
        let decision = match (&record.decision_predicate, &record.branches) {
            (Some(predicate), Some(branches)) => {
                if predicate.trim().is_empty() || branches.is_empty() {
                    return Err(StructuralError::InvalidDecisionNode(key.clone()));
                }
                if !predicates.contains(predicate) {
                    warn!(graph_id = %doc.name, task = %key, predicate = %predicate, "decision predicate not registered");
                }
                Some(Decision {
                    predicate: predicate.clone(),
                    branches: branches.clone(),
                })
            }
            (None, None) => None,
            _ => {
                return Err(invalid(format!(
                    "node {key} needs both decision_predicate and branches"
                )))
            }
        };
        let _ = nodes.insert(
            key.clone(),
            TaskNode {
                task: record.task.clone().into(),
                sequence: record.sequence,
                completed: record.completed,
                parent: record.parent.clone(),
                decision,
            },
        );
    }

    for start in doc.graph.keys() {
        let mut seen = HashSet::new();
        let mut cursor = Some(start.as_str());
        while let Some(name) = cursor {
            if !seen.insert(name) {
                return Err(StructuralError::Cycle(start.clone()));
            }
            cursor = doc.graph.get(name).and_then(|n| n.parent.as_deref());
        }
    }

    Ok(TaskGraph::from_parts(
        doc.name,
        doc.objective,
        nodes,
        MessageLog::from_messages(doc.messages),
        doc.templates,
        predicates,
    ))
}

#[instrument(skip(repo, graph), fields(graph_id = %graph.name()))]
pub fn save_graph(repo: &GraphRepo, graph: &TaskGraph) -> Result<(), EngineError> {
    repo.save(&to_document(graph))?;
    Ok(())
}

#[instrument(skip(repo, predicates))]
pub fn load_graph(
    repo: &GraphRepo,
    name: &str,
    predicates: PredicateRegistry,
) -> Result<TaskGraph, EngineError> {
    let doc = repo.load(name)?;
    Ok(from_document(doc, predicates)?)
}

pub fn export_graph(graph: &TaskGraph, path: &Path) -> Result<(), EngineError> {
    files::export_json(&to_document(graph), path)?;
    Ok(())
}

pub fn import_graph(path: &Path, predicates: PredicateRegistry) -> Result<TaskGraph, EngineError> {
    let doc = files::import_json(path)?;
    Ok(from_document(doc, predicates)?)
}
