pub mod migrations;
pub mod pool;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub use pool::{ConnectionPool, PoolGuard, PoolStats};

/// Readiness of the on-disk schema relative to this binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStatus {
    /// No `learnings` table; `init_db` has never run.
    Missing,
    /// Tables exist but migrations are pending.
    Outdated(u32),
    Ready(u32),
}

/// Open a single SQLite connection with the daemon's pragmas applied.
///
/// `busy_timeout` matches the statement timeout so lock waits are bounded the
/// same way as statement execution.
pub fn open_connection(path: &Path, statement_timeout: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;

    // Enable WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(statement_timeout)?;

    Ok(conn)
}

/// Inspect the schema without modifying it.
pub fn check_schema(conn: &Connection) -> rusqlite::Result<SchemaStatus> {
    if !schema::learnings_table_exists(conn)? {
        return Ok(SchemaStatus::Missing);
    }
    let version = migrations::get_schema_version(conn)?.unwrap_or(0);
    if version < migrations::CURRENT_SCHEMA_VERSION {
        Ok(SchemaStatus::Outdated(version))
    } else {
        Ok(SchemaStatus::Ready(version))
    }
}

/// Open (or create) the database at the given path with the schema fully
/// migrated. Used by the `init-db` command outside the daemon.
pub fn open_database(path: impl AsRef<Path>, statement_timeout: Duration) -> Result<Connection> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let mut conn = open_connection(path, statement_timeout)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    let version = migrations::run_migrations(&mut conn).context("failed to run migrations")?;

    tracing::info!(path = %path.display(), schema_version = version, "database initialized");
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_schema_reports_each_state() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(check_schema(&conn).unwrap(), SchemaStatus::Missing);

        schema::init_schema(&conn).unwrap();
        assert_eq!(check_schema(&conn).unwrap(), SchemaStatus::Outdated(1));

        migrations::run_migrations(&mut conn).unwrap();
        assert_eq!(
            check_schema(&conn).unwrap(),
            SchemaStatus::Ready(migrations::CURRENT_SCHEMA_VERSION)
        );
    }

    #[test]
    fn open_connection_sets_busy_timeout() {
        let tmp = tempfile::TempDir::new().unwrap();
        let conn = open_connection(&tmp.path().join("t.db"), Duration::from_millis(5000)).unwrap();
        let timeout: i64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 5000);
    }
}
