//! SQL DDL for the learning store.
//!
//! The base `learnings` table matches the version-1 layout; later columns are
//! added by [`super::migrations`]. All DDL uses `IF NOT EXISTS`.

use rusqlite::Connection;

/// Base schema (version 1).
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS learnings (
    id TEXT PRIMARY KEY,
    repo_identifier TEXT,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    category TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    session_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_learnings_repo ON learnings(repo_identifier);
CREATE INDEX IF NOT EXISTS idx_learnings_updated ON learnings(updated_at);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Create the base tables and stamp version 1 if no version is recorded.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

/// Whether the `learnings` table exists at all.
pub fn learnings_table_exists(conn: &Connection) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'learnings'",
        [],
        |row| row.get(0),
    )
}

/// Whether `table` has a column named `column`.
pub fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|n| n == column))
}
