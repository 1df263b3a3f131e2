//! Tag schema
//!
//! Every history row gets exactly one audit row written in the same
//! transaction; `UNIQUE (table_name, record_id)` on `audit_log` enforces
//! the pairing from the audit side.

use rusqlite::Connection;

pub const TAG_DEFINITIONS: &str = "tag_definitions";
pub const TAG_DEFINITION_HISTORY: &str = "tag_definition_history";
pub const TAGS: &str = "tags";
pub const TAG_HISTORY: &str = "tag_history";
pub const AUDIT_LOG: &str = "audit_log";

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS tag_definitions (
    record_id INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    is_control INTEGER NOT NULL DEFAULT 0,
    created_by TEXT NOT NULL,
    created_date TEXT NOT NULL,
    UNIQUE (tenant_id, name)
);

CREATE TABLE IF NOT EXISTS tag_definition_history (
    record_id INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    is_control INTEGER NOT NULL DEFAULT 0,
    change_type TEXT NOT NULL CHECK (change_type IN ('INSERT', 'DELETE')),
    changed_by TEXT NOT NULL,
    change_date TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tag_definition_history_name
    ON tag_definition_history(tenant_id, name);

CREATE TABLE IF NOT EXISTS tags (
    record_id INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    tag_definition_name TEXT NOT NULL,
    object_id TEXT NOT NULL,
    object_type TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_date TEXT NOT NULL,
    UNIQUE (tenant_id, object_id, object_type, tag_definition_name)
);
CREATE INDEX IF NOT EXISTS idx_tags_definition ON tags(tenant_id, tag_definition_name);

CREATE TABLE IF NOT EXISTS tag_history (
    record_id INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    tag_definition_name TEXT NOT NULL,
    object_id TEXT NOT NULL,
    object_type TEXT NOT NULL,
    change_type TEXT NOT NULL CHECK (change_type IN ('INSERT', 'DELETE')),
    changed_by TEXT NOT NULL,
    change_date TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tag_history_id ON tag_history(id);
CREATE INDEX IF NOT EXISTS idx_tag_history_target
    ON tag_history(tenant_id, object_id, object_type);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name TEXT NOT NULL,
    record_id INTEGER NOT NULL,
    change_type TEXT NOT NULL CHECK (change_type IN ('INSERT', 'DELETE')),
    change_date TEXT NOT NULL,
    changed_by TEXT NOT NULL,
    reason_code TEXT,
    comments TEXT,
    user_token TEXT,
    UNIQUE (table_name, record_id)
);
"#;

/// Create the tag tables if missing. Safe to run on every open.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    // journal_mode answers with the resulting mode, so read it back
    let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    conn.execute_batch(DDL)
}
