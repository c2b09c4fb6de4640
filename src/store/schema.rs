//! Schema creation and additive migration, `spec.md` §4.1 "Schema migration".
//!
//! On startup the Store checks for each required column and adds missing
//! ones with `ALTER TABLE ... ADD COLUMN ... DEFAULT ...`; existing rows
//! are left intact and no column is ever dropped or renamed.

use rusqlite::Connection;

use crate::error::StoreResult;

const CREATE_PROJECTS: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    path TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    ignore_patterns TEXT NOT NULL DEFAULT '[]',
    architecture_document_path TEXT,
    architecture TEXT
)";

const CREATE_EVENTS: &str = "
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER,
    instant TEXT NOT NULL,
    kind TEXT NOT NULL,
    path TEXT,
    payload TEXT NOT NULL,
    FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
)";

const CREATE_AI_CONVERSATIONS: &str = "
CREATE TABLE IF NOT EXISTS ai_conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    project_id INTEGER,
    provider TEXT,
    model TEXT,
    instant TEXT NOT NULL,
    user_prompt TEXT NOT NULL,
    assistant_response TEXT NOT NULL,
    code_snippets TEXT NOT NULL DEFAULT '[]',
    file_references TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT '{}',
    matched_to_events TEXT NOT NULL DEFAULT '[]',
    confidence_score REAL NOT NULL DEFAULT 0.0,
    FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
)";

const CREATE_AI_CODE_MATCHES: &str = "
CREATE TABLE IF NOT EXISTS ai_code_matches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL,
    event_id INTEGER NOT NULL,
    match_category TEXT NOT NULL,
    confidence REAL NOT NULL,
    reasoning TEXT NOT NULL DEFAULT '',
    file_overlap_count INTEGER NOT NULL DEFAULT 0,
    time_delta_seconds INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    FOREIGN KEY(conversation_id) REFERENCES ai_conversations(id) ON DELETE CASCADE,
    FOREIGN KEY(event_id) REFERENCES events(id) ON DELETE CASCADE
)";

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_events_project_id ON events(project_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind, id)",
    "CREATE INDEX IF NOT EXISTS idx_ai_conv_project_instant ON ai_conversations(project_id, instant)",
    "CREATE INDEX IF NOT EXISTS idx_ai_conv_session ON ai_conversations(session_id)",
    "CREATE INDEX IF NOT EXISTS idx_ai_match_conversation ON ai_code_matches(conversation_id)",
    "CREATE INDEX IF NOT EXISTS idx_ai_match_event ON ai_code_matches(event_id)",
];

/// `(table, column, add_column_ddl)` — additive-only migration list. New
/// columns are appended here as the schema evolves; nothing here ever
/// drops or renames a column.
const COLUMNS: &[(&str, &str, &str)] = &[
    ("projects", "description", "ALTER TABLE projects ADD COLUMN description TEXT NOT NULL DEFAULT ''"),
    ("projects", "ignore_patterns", "ALTER TABLE projects ADD COLUMN ignore_patterns TEXT NOT NULL DEFAULT '[]'"),
    ("projects", "architecture_document_path", "ALTER TABLE projects ADD COLUMN architecture_document_path TEXT"),
    ("projects", "architecture", "ALTER TABLE projects ADD COLUMN architecture TEXT"),
];

pub fn migrate(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute(CREATE_PROJECTS, [])?;
    conn.execute(CREATE_EVENTS, [])?;
    conn.execute(CREATE_AI_CONVERSATIONS, [])?;
    conn.execute(CREATE_AI_CODE_MATCHES, [])?;
    for ddl in INDEXES {
        conn.execute(ddl, [])?;
    }
    for (table, column, add_ddl) in COLUMNS {
        ensure_column(conn, table, column, add_ddl)?;
    }
    Ok(())
}

fn ensure_column(conn: &Connection, table: &str, column: &str, add_ddl: &str) -> StoreResult<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<_, _>>()?;
    if !existing.iter().any(|c| c == column) {
        conn.execute(add_ddl, [])?;
    }
    Ok(())
}
