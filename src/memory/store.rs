//! Write path: validated inserts, reinforcement of duplicates, and row decoding.
//!
//! [`save_learning`] is the single entry point for new learnings, used both by
//! direct `save_learning` requests and by the extraction worker. Everything runs
//! on a borrowed connection inside one transaction.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{DaemonError, Result};
use crate::memory::types::{Confidence, Learning, NewLearning, Scope};
use crate::memory::{embedding_from_bytes, embedding_to_bytes};
use crate::repo::org_identifier;

/// Column list matching [`learning_from_row`].
pub(crate) const LEARNING_COLUMNS: &str = "id, repo_identifier, title, context, content, category, \
     confidence, scope_level, directory_path, tags, session_id, metadata, embedding, \
     created_at, updated_at";

/// Validate and insert a new learning. Returns its UUID v7 identifier.
pub fn save_learning(conn: &mut Connection, learning: &NewLearning) -> Result<String> {
    learning.validate()?;

    let id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let scope = learning.scope();

    // Global learnings never carry a repository; organization learnings keep
    // only the owner; only directory scope keeps a path.
    let repo = match scope {
        Scope::Global => None,
        Scope::Organization => learning
            .repo_identifier
            .as_deref()
            .map(str::trim)
            .map(|r| org_identifier(r).unwrap_or(r)),
        _ => learning.repo_identifier.as_deref().map(str::trim),
    };
    let directory = match scope {
        Scope::Directory => learning
            .directory_path
            .as_deref()
            .map(|d| d.trim().trim_matches('/')),
        _ => None,
    };
    let tags_json = serde_json::to_string(&learning.tags)?;
    let metadata_json = learning
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let embedding = learning.embedding.as_deref().map(embedding_to_bytes);

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO learnings (id, repo_identifier, title, context, content, category, confidence, \
         scope_level, directory_path, tags, session_id, metadata, embedding, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
        params![
            id,
            repo,
            learning.title.trim(),
            learning.context,
            learning.content.trim(),
            learning.category,
            learning.confidence.as_str(),
            scope.as_str(),
            directory,
            tags_json,
            learning.session_id,
            metadata_json,
            embedding,
            now,
        ],
    )?;
    tx.commit()?;

    tracing::debug!(id = %id, scope = %scope, repo = ?repo, "learning saved");
    Ok(id)
}

/// Reinforce an existing learning that a new candidate duplicated: bump
/// `updated_at` and raise confidence one level. Returns `false` if the id is unknown.
pub fn reinforce_learning(conn: &mut Connection, id: &str) -> Result<bool> {
    let tx = conn.transaction()?;
    let current: Option<String> = tx
        .query_row(
            "SELECT confidence FROM learnings WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(current) = current else {
        return Ok(false);
    };

    let raised = current
        .parse::<Confidence>()
        .unwrap_or_default()
        .raised();
    let now = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "UPDATE learnings SET updated_at = ?1, confidence = ?2 WHERE id = ?3",
        params![now, raised.as_str(), id],
    )?;
    tx.commit()?;

    tracing::debug!(id, confidence = %raised, "learning reinforced");
    Ok(true)
}

/// Fetch a single learning by id.
pub fn get_learning(conn: &Connection, id: &str) -> Result<Option<Learning>> {
    let sql = format!("SELECT {LEARNING_COLUMNS} FROM learnings WHERE id = ?1");
    conn.query_row(&sql, params![id], learning_from_row)
        .optional()
        .map_err(DaemonError::from)
}

/// Decode a row selected with [`LEARNING_COLUMNS`].
///
/// Rows written by older tools may hold unknown scope or confidence strings;
/// those fall back to repository scope and medium confidence.
pub(crate) fn learning_from_row(row: &Row<'_>) -> rusqlite::Result<Learning> {
    let confidence: Option<String> = row.get(6)?;
    let scope: Option<String> = row.get(7)?;
    let tags: Option<String> = row.get(9)?;
    let metadata: Option<String> = row.get(11)?;
    let embedding: Option<Vec<u8>> = row.get(12)?;

    Ok(Learning {
        id: row.get(0)?,
        repo_identifier: row.get(1)?,
        title: row.get(2)?,
        context: row.get(3)?,
        content: row.get(4)?,
        category: row.get(5)?,
        confidence: confidence
            .and_then(|c| c.parse().ok())
            .unwrap_or_default(),
        scope_level: scope
            .and_then(|s| s.parse().ok())
            .unwrap_or(Scope::Repository),
        directory_path: row.get(8)?,
        tags: tags
            .and_then(|t| serde_json::from_str(&t).ok())
            .unwrap_or_default(),
        session_id: row.get(10)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        embedding: embedding.map(|b| embedding_from_bytes(&b)),
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}
