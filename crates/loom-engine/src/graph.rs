//! The task tree for one objective.
//!
//! Nodes are keyed by task name. Tree edges are stored as `parent` links;
//! children are ordered by their float `sequence`. The graph also owns the
//! session's message log so that family slices can be resolved against the
//! tree.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use loom_core::messages::Message;

use crate::error::StructuralError;
use crate::log::MessageLog;
use crate::sequence::{self, Anchor};
use crate::task::Task;

/// Name of the synthetic node every graph is rooted at.
pub const ROOT_TASK: &str = "root";

/// Evaluates a decision node. Receives the graph and the decision node's
/// name; returns the outcome key to follow, or `None` for no branch.
pub type Predicate = Arc<dyn Fn(&TaskGraph, &str) -> Option<String> + Send + Sync>;

/// Named decision predicates. Only names are persisted with a graph.
#[derive(Clone, Default)]
pub struct PredicateRegistry {
    predicates: HashMap<String, Predicate>,
}

impl PredicateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&TaskGraph, &str) -> Option<String> + Send + Sync + 'static,
    {
        let _ = self.predicates.insert(name.into(), Arc::new(predicate));
    }

    pub fn get(&self, name: &str) -> Option<Predicate> {
        self.predicates.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.predicates.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.predicates.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for PredicateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    pub predicate: String,
    /// Outcome key to the task name followed for that outcome.
    pub branches: BTreeMap<String, String>,
}

impl Decision {
    pub fn new<I, K, V>(predicate: impl Into<String>, branches: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            predicate: predicate.into(),
            branches: branches
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskNode {
    pub task: Task,
    pub sequence: f64,
    pub completed: bool,
    pub parent: Option<String>,
    pub decision: Option<Decision>,
}

impl TaskNode {
    pub fn name(&self) -> &str {
        &self.task.task_name
    }

    pub fn is_root(&self) -> bool {
        self.task.task_name == ROOT_TASK
    }
}

/// Insertion request for [`TaskGraph::add_task`].
#[derive(Clone, Debug)]
pub struct NewTask {
    pub task: Task,
    pub parent: Option<String>,
    pub before: Option<String>,
    pub after: Option<String>,
    pub sequence: Option<f64>,
    pub decision: Option<Decision>,
}

impl NewTask {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            parent: None,
            before: None,
            after: None,
            sequence: None,
            decision: None,
        }
    }

    pub fn under(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn before(mut self, sibling: impl Into<String>) -> Self {
        self.before = Some(sibling.into());
        self
    }

    pub fn after(mut self, sibling: impl Into<String>) -> Self {
        self.after = Some(sibling.into());
        self
    }

    pub fn at(mut self, sequence: f64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }
}

/// Field changes for [`TaskGraph::update_task`]. `None` leaves a field alone.
#[derive(Clone, Debug, Default)]
pub struct TaskUpdate {
    pub description: Option<String>,
    pub sequence: Option<f64>,
    /// `Some(None)` turns a decision node back into a plain task.
    pub decision: Option<Option<Decision>>,
    pub completed: Option<bool>,
    pub parent: Option<String>,
}

#[derive(Clone, Debug)]
pub struct TaskGraph {
    name: String,
    objective: String,
    nodes: BTreeMap<String, TaskNode>,
    log: MessageLog,
    templates: BTreeMap<String, String>,
    predicates: PredicateRegistry,
}

impl PartialEq for TaskGraph {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.objective == other.objective
            && self.nodes == other.nodes
            && self.log == other.log
            && self.templates == other.templates
    }
}

impl TaskGraph {
    /// A graph holding only its root. `root` is renamed to [`ROOT_TASK`].
    pub fn new(name: impl Into<String>, objective: impl Into<String>, mut root: Task) -> Self {
        root.task_name = ROOT_TASK.to_string();
        let mut nodes = BTreeMap::new();
        let _ = nodes.insert(
            ROOT_TASK.to_string(),
            TaskNode {
                task: root,
                sequence: 0.0,
                completed: false,
                parent: None,
                decision: None,
            },
        );
        Self {
            name: name.into(),
            objective: objective.into(),
            nodes,
            log: MessageLog::new(),
            templates: BTreeMap::new(),
            predicates: PredicateRegistry::new(),
        }
    }

    pub(crate) fn from_parts(
        name: String,
        objective: String,
        nodes: BTreeMap<String, TaskNode>,
        log: MessageLog,
        templates: BTreeMap<String, String>,
        predicates: PredicateRegistry,
    ) -> Self {
        Self {
            name,
            objective,
            nodes,
            log,
            templates,
            predicates,
        }
    }

    pub fn with_predicates(mut self, predicates: PredicateRegistry) -> Self {
        self.predicates = predicates;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn objective(&self) -> &str {
        &self.objective
    }

    pub fn templates(&self) -> &BTreeMap<String, String> {
        &self.templates
    }

    pub fn add_template(&mut self, name: impl Into<String>, body: impl Into<String>) {
        let _ = self.templates.insert(name.into(), body.into());
    }

    pub fn predicates(&self) -> &PredicateRegistry {
        &self.predicates
    }

    pub fn predicates_mut(&mut self) -> &mut PredicateRegistry {
        &mut self.predicates
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut MessageLog {
        &mut self.log
    }

    pub fn node(&self, name: &str) -> Option<&TaskNode> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<&TaskNode> {
        self.nodes.get(ROOT_TASK)
    }

    pub fn parent_of(&self, name: &str) -> Option<&str> {
        self.nodes.get(name)?.parent.as_deref()
    }

    /// Children of `name`, ascending by sequence.
    pub fn children(&self, name: &str) -> Vec<&TaskNode> {
        let mut children: Vec<&TaskNode> = self
            .nodes
            .values()
            .filter(|n| n.parent.as_deref() == Some(name))
            .collect();
        children.sort_by(|a, b| a.sequence.total_cmp(&b.sequence));
        children
    }

    fn sibling_sequences(&self, parent: &str, excluding: Option<&str>) -> Vec<f64> {
        self.nodes
            .values()
            .filter(|n| n.parent.as_deref() == Some(parent) && Some(n.name()) != excluding)
            .map(|n| n.sequence)
            .collect()
    }

    /// Ancestors, `name` itself, and every descendant.
    pub fn family(&self, name: &str) -> HashSet<String> {
        let mut family = HashSet::new();
        if !self.contains(name) {
            return family;
        }
        let mut cursor = self.parent_of(name);
        while let Some(parent) = cursor {
            if !family.insert(parent.to_string()) {
                break;
            }
            cursor = self.parent_of(parent);
        }
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if family.insert(current.clone()) || current == name {
                stack.extend(self.children(&current).iter().map(|c| c.name().to_string()));
            }
        }
        family
    }

    fn is_descendant(&self, candidate: &str, ancestor: &str) -> bool {
        let mut cursor = Some(candidate);
        let mut seen = HashSet::new();
        while let Some(name) = cursor {
            if name == ancestor {
                return true;
            }
            if !seen.insert(name) {
                return false;
            }
            cursor = self.parent_of(name);
        }
        false
    }

    /// Messages addressed to any member of `name`'s family, in log order.
    pub fn slice_for_family(&self, name: &str) -> Vec<&Message> {
        let family = self.family(name);
        self.log.slice_for_tasks(&family)
    }

    fn validate_decision(&self, decision: &Decision) -> Result<(), StructuralError> {
        if decision.predicate.trim().is_empty() {
            return Err(StructuralError::InvalidDecisionNode(
                "decision predicate name is empty".into(),
            ));
        }
        if decision.branches.is_empty() {
            return Err(StructuralError::InvalidDecisionNode(format!(
                "{} has no branches",
                decision.predicate
            )));
        }
        if !self.predicates.contains(&decision.predicate) {
            return Err(StructuralError::InvalidDecisionNode(format!(
                "predicate {} is not registered",
                decision.predicate
            )));
        }
        Ok(())
    }

    fn resolve_parent(&self, request: &NewTask) -> Result<(String, Option<Anchor>), StructuralError> {
        let anchor_name = match (&request.before, &request.after) {
            (Some(_), Some(_)) => {
                return Err(StructuralError::InvalidPlacement(
                    "give either before or after, not both".into(),
                ))
            }
            (Some(b), None) => Some(b.as_str()),
            (None, Some(a)) => Some(a.as_str()),
            (None, None) => None,
        };

        let Some(anchor_name) = anchor_name else {
            let parent = request.parent.clone().unwrap_or_else(|| ROOT_TASK.to_string());
            if !self.contains(&parent) {
                return Err(StructuralError::MissingParent(parent));
            }
            return Ok((parent, None));
        };

        let anchor = self
            .nodes
            .get(anchor_name)
            .ok_or_else(|| StructuralError::TaskNotFound(anchor_name.to_string()))?;
        let Some(anchor_parent) = anchor.parent.clone() else {
            return Err(StructuralError::InvalidPlacement(
                "cannot place a task beside the root".into(),
            ));
        };
        if let Some(explicit) = &request.parent {
            if explicit != &anchor_parent {
                return Err(StructuralError::InvalidPlacement(format!(
                    "{anchor_name} is a child of {anchor_parent}, not {explicit}"
                )));
            }
        }
        let placement = if request.before.is_some() {
            Anchor::Before(anchor.sequence)
        } else {
            Anchor::After(anchor.sequence)
        };
        Ok((anchor_parent, Some(placement)))
    }

    /// Insert a task. Leaves the message log untouched.
    pub fn add_task(&mut self, request: NewTask) -> Result<&TaskNode, StructuralError> {
        let name = request.task.task_name.clone();
        if name.trim().is_empty() {
            return Err(StructuralError::InvalidPlacement("task name is empty".into()));
        }
        if self.contains(&name) {
            return Err(StructuralError::DuplicateTask(name));
        }
        if let Some(decision) = &request.decision {
            self.validate_decision(decision)?;
        }
        let (parent, anchor) = self.resolve_parent(&request)?;

        let sequence = match (request.sequence, anchor) {
            (Some(seq), _) => {
                self.check_free_sequence(&parent, seq, None)?;
                seq
            }
            (None, None) => sequence::append(&self.sibling_sequences(&parent, None)),
            (None, Some(_)) => self.sequence_near(&parent, &request)?,
        };

        debug!(graph_id = %self.name, task = %name, parent = %parent, sequence, "task added");
        let node = TaskNode {
            task: request.task,
            sequence,
            completed: false,
            parent: Some(parent),
            decision: request.decision,
        };
        Ok(self.nodes.entry(name).or_insert(node))
    }

    fn check_free_sequence(
        &self,
        parent: &str,
        seq: f64,
        excluding: Option<&str>,
    ) -> Result<(), StructuralError> {
        if !seq.is_finite() {
            return Err(StructuralError::InvalidPlacement(format!(
                "sequence {seq} is not a finite number"
            )));
        }
        if self.sibling_sequences(parent, excluding).contains(&seq) {
            return Err(StructuralError::DuplicateSequence {
                parent: parent.to_string(),
                sequence: seq,
            });
        }
        Ok(())
    }

    /// Gap-find next to the request's anchor, renumbering the siblings once
    /// if the gap cannot be split.
    fn sequence_near(&mut self, parent: &str, request: &NewTask) -> Result<f64, StructuralError> {
        for attempt in 0..2 {
            let (anchor_name, before) = match (&request.before, &request.after) {
                (Some(b), _) => (b.as_str(), true),
                (_, Some(a)) => (a.as_str(), false),
                _ => unreachable!("sequence_near requires an anchor"),
            };
            let anchor_seq = self
                .nodes
                .get(anchor_name)
                .map(|n| n.sequence)
                .ok_or_else(|| StructuralError::TaskNotFound(anchor_name.to_string()))?;
            let anchor = if before {
                Anchor::Before(anchor_seq)
            } else {
                Anchor::After(anchor_seq)
            };
            if let Some(seq) = sequence::place(&self.sibling_sequences(parent, None), anchor) {
                return Ok(seq);
            }
            if attempt == 0 {
                self.renumber_children(parent);
            }
        }
        Err(StructuralError::InvalidPlacement(format!(
            "no sequence available under {parent}"
        )))
    }

    fn renumber_children(&mut self, parent: &str) {
        let order: Vec<String> = self
            .children(parent)
            .iter()
            .map(|n| n.name().to_string())
            .collect();
        warn!(
            graph_id = %self.name,
            parent,
            siblings = order.len(),
            "sequence gap exhausted, renumbering siblings"
        );
        for (name, seq) in order.iter().zip(sequence::renumbered(order.len())) {
            if let Some(node) = self.nodes.get_mut(name) {
                node.sequence = seq;
            }
        }
    }

    /// Mark a task done. Completing an already completed task is a no-op.
    pub fn complete_task(&mut self, name: &str) -> Result<(), StructuralError> {
        if name == ROOT_TASK {
            return Err(StructuralError::RootImmutable);
        }
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| StructuralError::TaskNotFound(name.to_string()))?;
        node.completed = true;
        debug!(graph_id = %self.name, task = name, "task completed");
        Ok(())
    }

    /// Apply every change in `update` or none of them.
    pub fn update_task(&mut self, name: &str, update: TaskUpdate) -> Result<(), StructuralError> {
        let node = self
            .nodes
            .get(name)
            .ok_or_else(|| StructuralError::TaskNotFound(name.to_string()))?;

        if node.is_root()
            && (update.sequence.is_some()
                || update.decision.is_some()
                || update.completed.is_some()
                || update.parent.is_some())
        {
            return Err(StructuralError::RootImmutable);
        }

        let current_parent = node.parent.clone().unwrap_or_else(|| ROOT_TASK.to_string());
        let target_parent = match &update.parent {
            Some(new_parent) => {
                if !self.contains(new_parent) {
                    return Err(StructuralError::MissingParent(new_parent.clone()));
                }
                if self.is_descendant(new_parent, name) {
                    return Err(StructuralError::Cycle(name.to_string()));
                }
                new_parent.clone()
            }
            None => current_parent.clone(),
        };

        if let Some(seq) = update.sequence {
            self.check_free_sequence(&target_parent, seq, Some(name))?;
        }
        if let Some(Some(decision)) = &update.decision {
            self.validate_decision(decision)?;
        }

        let moved = target_parent != current_parent;
        let new_sequence = match update.sequence {
            Some(seq) => Some(seq),
            None if moved => Some(sequence::append(
                &self.sibling_sequences(&target_parent, Some(name)),
            )),
            None => None,
        };

        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| StructuralError::TaskNotFound(name.to_string()))?;
        if let Some(description) = update.description {
            node.task.task_description = description;
        }
        if let Some(seq) = new_sequence {
            node.sequence = seq;
        }
        if let Some(decision) = update.decision {
            node.decision = decision;
        }
        if let Some(completed) = update.completed {
            node.completed = completed;
        }
        if moved {
            node.parent = Some(target_parent);
        }
        Ok(())
    }

    /// Next actionable task, searching depth-first from the root.
    pub fn get_next_task(&self) -> Option<&TaskNode> {
        self.get_next_task_from(ROOT_TASK)
    }

    /// Depth-first pre-order search for the first incomplete non-root node.
    ///
    /// A completed decision node continues only into the branch its predicate
    /// selects. Tasks that are branch targets are reached only through their
    /// decision node, never as ordinary children.
    pub fn get_next_task_from(&self, start: &str) -> Option<&TaskNode> {
        let targets: HashSet<&str> = self
            .nodes
            .values()
            .filter_map(|n| n.decision.as_ref())
            .flat_map(|d| d.branches.values().map(String::as_str))
            .collect();
        let mut visited = HashSet::new();
        self.search_from(start, &targets, &mut visited)
    }

    fn search_from<'a>(
        &'a self,
        name: &str,
        targets: &HashSet<&str>,
        visited: &mut HashSet<String>,
    ) -> Option<&'a TaskNode> {
        if !visited.insert(name.to_string()) {
            return None;
        }
        let node = self.nodes.get(name)?;
        if !node.completed && !node.is_root() {
            return Some(node);
        }

        if let Some(decision) = &node.decision {
            let Some(predicate) = self.predicates.get(&decision.predicate) else {
                warn!(graph_id = %self.name, task = name, predicate = %decision.predicate, "decision predicate not registered");
                return None;
            };
            let outcome = predicate(self, name)?;
            let Some(target) = decision.branches.get(&outcome) else {
                warn!(graph_id = %self.name, task = name, outcome = %outcome, "no branch for decision outcome");
                return None;
            };
            return self.search_from(target, targets, visited);
        }

        self.children(name)
            .into_iter()
            .filter(|child| !targets.contains(child.name()))
            .find_map(|child| self.search_from(child.name(), targets, visited))
    }

    /// Every node reachable from the root in pre-order, root first.
    pub fn preorder(&self) -> Vec<&TaskNode> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut seen = HashSet::new();
        let mut stack: Vec<&TaskNode> = self.root().into_iter().collect();
        while let Some(node) = stack.pop() {
            if !seen.insert(node.name()) {
                continue;
            }
            out.push(node);
            stack.extend(self.children(node.name()).into_iter().rev());
        }
        out
    }

    pub fn pending_tasks(&self) -> Vec<String> {
        self.preorder()
            .into_iter()
            .filter(|n| !n.is_root() && !n.completed)
            .map(|n| n.name().to_string())
            .collect()
    }

    pub fn completed_tasks(&self) -> Vec<String> {
        self.preorder()
            .into_iter()
            .filter(|n| !n.is_root() && n.completed)
            .map(|n| n.name().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::messages::Role;

    fn task(name: &str) -> Task {
        Task::new(name, "worker", format!("do {name}"))
    }

    fn graph() -> TaskGraph {
        TaskGraph::new("g", "objective", Task::new("root", "coordinator", "objective"))
    }

    fn seq(g: &TaskGraph, name: &str) -> f64 {
        g.node(name).unwrap().sequence
    }

    fn next(g: &TaskGraph) -> Option<String> {
        g.get_next_task().map(|n| n.name().to_string())
    }

    #[test]
    fn root_is_never_next() {
        let g = graph();
        assert!(g.root().is_some());
        assert_eq!(next(&g), None);
    }

    #[test]
    fn insert_before_lands_between_neighbours() {
        let mut g = graph();
        g.add_task(NewTask::new(task("T1"))).unwrap();
        g.add_task(NewTask::new(task("T2"))).unwrap();
        g.add_task(NewTask::new(task("T1_5")).before("T2")).unwrap();

        assert_eq!(seq(&g, "T1"), 1.0);
        assert_eq!(seq(&g, "T2"), 2.0);
        assert!(seq(&g, "T1") < seq(&g, "T1_5") && seq(&g, "T1_5") < seq(&g, "T2"));

        let mut order = Vec::new();
        while let Some(name) = next(&g) {
            g.complete_task(&name).unwrap();
            order.push(name);
        }
        assert_eq!(order, vec!["T1", "T1_5", "T2"]);
    }

    #[test]
    fn duplicate_and_missing_references() {
        let mut g = graph();
        g.add_task(NewTask::new(task("a"))).unwrap();
        assert_eq!(
            g.add_task(NewTask::new(task("a"))).unwrap_err(),
            StructuralError::DuplicateTask("a".into())
        );
        assert_eq!(
            g.add_task(NewTask::new(task("b")).under("nope")).unwrap_err(),
            StructuralError::MissingParent("nope".into())
        );
        assert_eq!(
            g.add_task(NewTask::new(task("b")).after("nope")).unwrap_err(),
            StructuralError::TaskNotFound("nope".into())
        );
        assert!(matches!(
            g.add_task(NewTask::new(task("b")).after("root")),
            Err(StructuralError::InvalidPlacement(_))
        ));
        assert!(matches!(
            g.add_task(NewTask::new(task("b")).at(1.0)),
            Err(StructuralError::DuplicateSequence { .. })
        ));
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn anchor_parent_must_agree() {
        let mut g = graph();
        g.add_task(NewTask::new(task("a"))).unwrap();
        g.add_task(NewTask::new(task("b"))).unwrap();
        g.add_task(NewTask::new(task("a1")).under("a")).unwrap();
        assert!(matches!(
            g.add_task(NewTask::new(task("x")).under("b").after("a1")),
            Err(StructuralError::InvalidPlacement(_))
        ));
        g.add_task(NewTask::new(task("a2")).after("a1")).unwrap();
        assert_eq!(g.parent_of("a2"), Some("a"));
    }

    #[test]
    fn exhausted_gap_renumbers_siblings() {
        let mut g = graph();
        g.add_task(NewTask::new(task("a")).at(1.0)).unwrap();
        let tight = f64::from_bits(1.0f64.to_bits() + 1);
        g.add_task(NewTask::new(task("b")).at(tight)).unwrap();
        g.add_task(NewTask::new(task("c")).after("a")).unwrap();

        assert_eq!(seq(&g, "a"), 1.0);
        assert_eq!(seq(&g, "b"), 2.0);
        assert!(seq(&g, "c") > 1.0 && seq(&g, "c") < 2.0);
    }

    #[test]
    fn depth_first_visits_children_before_siblings() {
        let mut g = graph();
        g.add_task(NewTask::new(task("a"))).unwrap();
        g.add_task(NewTask::new(task("b"))).unwrap();
        g.add_task(NewTask::new(task("a1")).under("a")).unwrap();

        assert_eq!(next(&g).as_deref(), Some("a"));
        g.complete_task("a").unwrap();
        assert_eq!(next(&g).as_deref(), Some("a1"));
        g.complete_task("a1").unwrap();
        assert_eq!(next(&g).as_deref(), Some("b"));
        g.complete_task("b").unwrap();
        assert_eq!(next(&g), None);
    }

    fn decision_graph(outcome: &'static str) -> TaskGraph {
        let mut predicates = PredicateRegistry::new();
        predicates.register("budget", move |_: &TaskGraph, _: &str| Some(outcome.to_string()));
        let mut g = graph().with_predicates(predicates);
        g.add_task(
            NewTask::new(task("choose")).with_decision(Decision::new(
                "budget",
                [("low", "hostel"), ("high", "hotel")],
            )),
        )
        .unwrap();
        g.add_task(NewTask::new(task("hostel")).under("choose")).unwrap();
        g.add_task(NewTask::new(task("hotel")).under("choose")).unwrap();
        g.add_task(NewTask::new(task("pack"))).unwrap();
        g.complete_task("choose").unwrap();
        g
    }

    #[test]
    fn decision_follows_only_the_chosen_branch() {
        let mut g = decision_graph("high");
        assert_eq!(next(&g).as_deref(), Some("hotel"));
        g.complete_task("hotel").unwrap();
        assert_eq!(next(&g).as_deref(), Some("pack"));

        let g = decision_graph("low");
        assert_eq!(next(&g).as_deref(), Some("hostel"));
    }

    #[test]
    fn unmatched_outcome_skips_subtree() {
        let g = decision_graph("medium");
        assert_eq!(next(&g).as_deref(), Some("pack"));
    }

    #[test]
    fn branch_targets_outside_decision_are_not_plain_children() {
        let mut predicates = PredicateRegistry::new();
        predicates.register("weather", |_: &TaskGraph, _: &str| Some("rain".to_string()));
        let mut g = graph().with_predicates(predicates);
        g.add_task(
            NewTask::new(task("check"))
                .with_decision(Decision::new("weather", [("sun", "beach"), ("rain", "museum")])),
        )
        .unwrap();
        g.add_task(NewTask::new(task("beach"))).unwrap();
        g.add_task(NewTask::new(task("museum"))).unwrap();
        g.complete_task("check").unwrap();

        assert_eq!(next(&g).as_deref(), Some("museum"));
        g.complete_task("museum").unwrap();
        assert_eq!(next(&g), None);
    }

    #[test]
    fn branch_cycle_terminates() {
        let mut predicates = PredicateRegistry::new();
        predicates.register("loop", |_: &TaskGraph, _: &str| Some("again".to_string()));
        let mut g = graph().with_predicates(predicates);
        g.add_task(
            NewTask::new(task("spin")).with_decision(Decision::new("loop", [("again", "spin")])),
        )
        .unwrap();
        g.complete_task("spin").unwrap();
        assert_eq!(next(&g), None);
    }

    #[test]
    fn decision_validation() {
        let mut g = graph();
        assert!(matches!(
            g.add_task(NewTask::new(task("d")).with_decision(Decision::new("unknown", [("a", "b")]))),
            Err(StructuralError::InvalidDecisionNode(_))
        ));
        g.predicates_mut().register("p", |_: &TaskGraph, _: &str| None);
        let empty: [(&str, &str); 0] = [];
        assert!(matches!(
            g.add_task(NewTask::new(task("d")).with_decision(Decision::new("p", empty))),
            Err(StructuralError::InvalidDecisionNode(_))
        ));
        g.add_task(NewTask::new(task("d")).with_decision(Decision::new("p", [("a", "b")])))
            .unwrap();
    }

    #[test]
    fn root_cannot_complete_or_move() {
        let mut g = graph();
        assert_eq!(g.complete_task("root"), Err(StructuralError::RootImmutable));
        assert_eq!(
            g.update_task("root", TaskUpdate { completed: Some(true), ..Default::default() }),
            Err(StructuralError::RootImmutable)
        );
        g.update_task(
            "root",
            TaskUpdate { description: Some("new objective".into()), ..Default::default() },
        )
        .unwrap();
        assert_eq!(g.root().unwrap().task.task_description, "new objective");
        assert_eq!(g.complete_task("ghost"), Err(StructuralError::TaskNotFound("ghost".into())));
    }

    #[test]
    fn update_moves_and_rejects_cycles() {
        let mut g = graph();
        g.add_task(NewTask::new(task("a"))).unwrap();
        g.add_task(NewTask::new(task("b"))).unwrap();
        g.add_task(NewTask::new(task("a1")).under("a")).unwrap();

        assert_eq!(
            g.update_task("a", TaskUpdate { parent: Some("a1".into()), ..Default::default() }),
            Err(StructuralError::Cycle("a".into()))
        );
        g.update_task("b", TaskUpdate { parent: Some("a".into()), ..Default::default() })
            .unwrap();
        assert_eq!(g.parent_of("b"), Some("a"));
        assert!(seq(&g, "b") > seq(&g, "a1"));

        assert!(matches!(
            g.update_task("b", TaskUpdate { sequence: Some(seq(&g, "a1")), ..Default::default() }),
            Err(StructuralError::DuplicateSequence { .. })
        ));
    }

    #[test]
    fn reopen_with_update() {
        let mut g = graph();
        g.add_task(NewTask::new(task("a"))).unwrap();
        g.complete_task("a").unwrap();
        assert_eq!(next(&g), None);
        g.update_task("a", TaskUpdate { completed: Some(false), ..Default::default() })
            .unwrap();
        assert_eq!(next(&g).as_deref(), Some("a"));
    }

    #[test]
    fn family_slice_includes_ancestors_and_descendants() {
        let mut g = graph();
        g.add_task(NewTask::new(task("a"))).unwrap();
        g.add_task(NewTask::new(task("b"))).unwrap();
        g.add_task(NewTask::new(task("a1")).under("a")).unwrap();
        g.log_mut().append("to root", Role::User, "human", "root");
        g.log_mut().append("to a", Role::User, "root", "a");
        g.log_mut().append("to b", Role::User, "root", "b");
        g.log_mut().append("to a1", Role::User, "a", "a1");

        let family: Vec<&str> = g
            .slice_for_family("a")
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(family, vec!["to root", "to a", "to a1"]);
        assert_eq!(g.log().slice_for_task("b").len(), 1);
    }

    #[test]
    fn pending_and_completed_in_preorder() {
        let mut g = graph();
        g.add_task(NewTask::new(task("a"))).unwrap();
        g.add_task(NewTask::new(task("b"))).unwrap();
        g.add_task(NewTask::new(task("a1")).under("a")).unwrap();
        g.complete_task("a1").unwrap();

        assert_eq!(g.pending_tasks(), vec!["a", "b"]);
        assert_eq!(g.completed_tasks(), vec!["a1"]);
        let names: Vec<&str> = g.preorder().iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["root", "a", "a1", "b"]);
    }
}
