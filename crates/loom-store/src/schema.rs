/// SQL DDL for the graph store.
pub const SCHEMA_VERSION: u32 = 1;

/// `document` holds the full persisted graph as JSON; the counters are
/// denormalised so listings never parse it.
pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS graphs (
    name TEXT PRIMARY KEY,
    objective TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    document TEXT NOT NULL,
    task_count INTEGER NOT NULL DEFAULT 0,
    completed_count INTEGER NOT NULL DEFAULT 0,
    message_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_graphs_status ON graphs(status);
CREATE INDEX IF NOT EXISTS idx_graphs_updated ON graphs(updated_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
