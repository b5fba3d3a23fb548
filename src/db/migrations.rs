//! Forward-only schema migration framework.
//!
//! Tracks the schema version in `schema_meta` and runs sequential migrations
//! to bring the database up to [`CURRENT_SCHEMA_VERSION`].

use rusqlite::{Connection, OptionalExtension};

use super::schema::has_column;

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// Get the current schema version from the database, or `None` when the
/// metadata table has never been created.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let has_meta: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'schema_meta'",
        [],
        |row| row.get(0),
    )?;
    if !has_meta {
        return Ok(None);
    }

    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
    .optional()
}

/// Update the stored schema version.
fn update_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
        [version.to_string()],
    )?;
    Ok(())
}

/// Run any pending forward-only migrations. Each migration runs in a transaction.
/// Returns the resulting schema version.
pub fn run_migrations(conn: &mut Connection) -> rusqlite::Result<u32> {
    let mut version = get_schema_version(conn)?.unwrap_or(0);
    tracing::debug!(schema_version = version, target = CURRENT_SCHEMA_VERSION, "checking migrations");

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(from = version, to = next, "running migration");

        let tx = conn.transaction()?;
        match next {
            1 => super::schema::init_schema(&tx)?,
            2 => migrate_v1_to_v2(&tx)?,
            3 => migrate_v2_to_v3(&tx)?,
            _ => {
                tracing::error!(version = next, "unknown migration target");
                break;
            }
        }
        update_schema_version(&tx, next)?;
        tx.commit()?;

        version = next;
    }

    Ok(version)
}

/// Migration v1 → v2: scope columns and the composite scope index.
fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    if !has_column(conn, "learnings", "scope_level")? {
        conn.execute_batch(
            "ALTER TABLE learnings ADD COLUMN scope_level TEXT NOT NULL DEFAULT 'repository'",
        )?;
    }
    if !has_column(conn, "learnings", "directory_path")? {
        conn.execute_batch("ALTER TABLE learnings ADD COLUMN directory_path TEXT")?;
    }
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_learnings_scope \
         ON learnings(scope_level, repo_identifier, directory_path)",
    )?;
    Ok(())
}

/// Migration v2 → v3: first-class context, confidence and embedding columns.
fn migrate_v2_to_v3(conn: &Connection) -> rusqlite::Result<()> {
    if !has_column(conn, "learnings", "context")? {
        conn.execute_batch("ALTER TABLE learnings ADD COLUMN context TEXT")?;
    }
    if !has_column(conn, "learnings", "confidence")? {
        conn.execute_batch(
            "ALTER TABLE learnings ADD COLUMN confidence TEXT NOT NULL DEFAULT 'medium'",
        )?;
    }
    if !has_column(conn, "learnings", "embedding")? {
        conn.execute_batch("ALTER TABLE learnings ADD COLUMN embedding BLOB")?;
    }
    Ok(())
}
