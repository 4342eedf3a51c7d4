use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use loom_core::document::GraphDocument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const ROOT: &str = "root";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphStatus {
    Active,
    Archived,
}

impl std::fmt::Display for GraphStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for GraphStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown graph status: {other}")),
        }
    }
}

/// Listing row; never parses the stored document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphSummary {
    pub name: String,
    pub objective: String,
    pub status: GraphStatus,
    pub task_count: u32,
    pub completed_count: u32,
    pub message_count: u32,
    pub created_at: String,
    pub updated_at: String,
}

pub struct GraphRepo {
    db: Database,
}

impl GraphRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace a graph. Saving marks it active again and keeps
    /// the original creation time.
    #[instrument(skip(self, doc), fields(graph_id = %doc.name))]
    pub fn save(&self, doc: &GraphDocument) -> Result<(), StoreError> {
        let json = serde_json::to_string(doc)?;
        let tasks = doc.graph.keys().filter(|k| k.as_str() != ROOT).count() as u32;
        let completed = doc
            .graph
            .iter()
            .filter(|(k, n)| k.as_str() != ROOT && n.completed)
            .count() as u32;
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO graphs (name, objective, status, document, task_count, completed_count, message_count, created_at, updated_at)
                 VALUES (?1, ?2, 'active', ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(name) DO UPDATE SET
                     objective = excluded.objective,
                     status = 'active',
                     document = excluded.document,
                     task_count = excluded.task_count,
                     completed_count = excluded.completed_count,
                     message_count = excluded.message_count,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    doc.name,
                    doc.objective,
                    json,
                    tasks,
                    completed,
                    doc.messages.len() as u32,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn load(&self, name: &str) -> Result<GraphDocument, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT document FROM graphs WHERE name = ?1")?;
            let mut rows = stmt.query([name])?;
            match rows.next()? {
                Some(row) => {
                    let raw: String = row_helpers::get(row, 0, "graphs", "document")?;
                    row_helpers::parse_json(&raw, "graphs", "document")
                }
                None => Err(StoreError::NotFound(format!("graph {name}"))),
            }
        })
    }

    pub fn exists(&self, name: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM graphs WHERE name = ?1",
                [name],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    #[instrument(skip(self))]
    pub fn summary(&self, name: &str) -> Result<GraphSummary, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SUMMARY_SELECT} WHERE name = ?1"))?;
            let mut rows = stmt.query([name])?;
            match rows.next()? {
                Some(row) => row_to_summary(row),
                None => Err(StoreError::NotFound(format!("graph {name}"))),
            }
        })
    }

    /// Most recently updated first.
    #[instrument(skip(self))]
    pub fn list(&self, status: Option<GraphStatus>) -> Result<Vec<GraphSummary>, StoreError> {
        self.db.with_conn(|conn| {
            let mut results = Vec::new();
            match status {
                Some(s) => {
                    let mut stmt = conn.prepare(&format!(
                        "{SUMMARY_SELECT} WHERE status = ?1 ORDER BY updated_at DESC, name"
                    ))?;
                    let mut rows = stmt.query([s.to_string()])?;
                    while let Some(row) = rows.next()? {
                        results.push(row_to_summary(row)?);
                    }
                }
                None => {
                    let mut stmt =
                        conn.prepare(&format!("{SUMMARY_SELECT} ORDER BY updated_at DESC, name"))?;
                    let mut rows = stmt.query([])?;
                    while let Some(row) = rows.next()? {
                        results.push(row_to_summary(row)?);
                    }
                }
            }
            Ok(results)
        })
    }

    #[instrument(skip(self))]
    pub fn archive(&self, name: &str) -> Result<(), StoreError> {
        self.set_status(name, GraphStatus::Archived)
    }

    fn set_status(&self, name: &str, status: GraphStatus) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE graphs SET status = ?1, updated_at = ?2 WHERE name = ?3",
                rusqlite::params![status.to_string(), Utc::now().to_rfc3339(), name],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("graph {name}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM graphs WHERE name = ?1", [name])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("graph {name}")));
            }
            Ok(())
        })
    }
}

const SUMMARY_SELECT: &str = "SELECT name, objective, status, task_count, completed_count, message_count, created_at, updated_at FROM graphs";

fn row_to_summary(row: &rusqlite::Row<'_>) -> Result<GraphSummary, StoreError> {
    let status: String = row_helpers::get(row, 2, "graphs", "status")?;
    Ok(GraphSummary {
        name: row_helpers::get(row, 0, "graphs", "name")?,
        objective: row_helpers::get(row, 1, "graphs", "objective")?,
        status: row_helpers::parse_enum(&status, "graphs", "status")?,
        task_count: row_helpers::get(row, 3, "graphs", "task_count")?,
        completed_count: row_helpers::get(row, 4, "graphs", "completed_count")?,
        message_count: row_helpers::get(row, 5, "graphs", "message_count")?,
        created_at: row_helpers::get(row, 6, "graphs", "created_at")?,
        updated_at: row_helpers::get(row, 7, "graphs", "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::document::{NodeRecord, TaskRecord};
    use loom_core::messages::{Message, Role, HUMAN_AUTHOR};
    use std::collections::BTreeMap;

    fn node(name: &str, agent: &str, seq: f64, completed: bool, parent: Option<&str>) -> NodeRecord {
        NodeRecord {
            sequence: seq,
            completed,
            parent: parent.map(String::from),
            task: TaskRecord {
                task_name: name.into(),
                agent_name: agent.into(),
                task_description: format!("do {name}"),
                tools: vec![],
                delegate_catalog: BTreeMap::new(),
            },
            decision_predicate: None,
            branches: None,
        }
    }

    fn doc(name: &str) -> GraphDocument {
        let mut graph = BTreeMap::new();
        graph.insert("root".into(), node("root", "coordinator", 0.0, false, None));
        graph.insert("a".into(), node("a", "worker", 1.0, true, Some("root")));
        graph.insert("b".into(), node("b", "worker", 2.0, false, Some("root")));
        GraphDocument {
            name: name.into(),
            objective: "ship it".into(),
            graph,
            messages: vec![Message::new("go", Role::User, HUMAN_AUTHOR, "root")],
            templates: BTreeMap::new(),
        }
    }

    fn repo() -> GraphRepo {
        GraphRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn save_then_load_returns_document() {
        let repo = repo();
        let original = doc("release");
        repo.save(&original).unwrap();
        assert_eq!(repo.load("release").unwrap(), original);
        assert!(repo.exists("release").unwrap());
    }

    #[test]
    fn summary_counts_exclude_root() {
        let repo = repo();
        repo.save(&doc("release")).unwrap();
        let summary = repo.summary("release").unwrap();
        assert_eq!(summary.task_count, 2);
        assert_eq!(summary.completed_count, 1);
        assert_eq!(summary.message_count, 1);
        assert_eq!(summary.status, GraphStatus::Active);
    }

    #[test]
    fn resave_keeps_created_at_and_reactivates() {
        let repo = repo();
        repo.save(&doc("release")).unwrap();
        let first = repo.summary("release").unwrap();
        repo.archive("release").unwrap();
        assert_eq!(repo.summary("release").unwrap().status, GraphStatus::Archived);

        let mut changed = doc("release");
        changed.objective = "ship it twice".into();
        repo.save(&changed).unwrap();
        let second = repo.summary("release").unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.objective, "ship it twice");
        assert_eq!(second.status, GraphStatus::Active);
    }

    #[test]
    fn list_filters_by_status() {
        let repo = repo();
        repo.save(&doc("one")).unwrap();
        repo.save(&doc("two")).unwrap();
        repo.archive("one").unwrap();

        let active = repo.list(Some(GraphStatus::Active)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "two");
        assert_eq!(repo.list(None).unwrap().len(), 2);
    }

    #[test]
    fn missing_graph_is_not_found() {
        let repo = repo();
        assert!(matches!(repo.load("nope"), Err(StoreError::NotFound(_))));
        assert!(matches!(repo.archive("nope"), Err(StoreError::NotFound(_))));
        assert!(matches!(repo.delete("nope"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn delete_removes_row() {
        let repo = repo();
        repo.save(&doc("gone")).unwrap();
        repo.delete("gone").unwrap();
        assert!(!repo.exists("gone").unwrap());
    }
}
