use rusqlite::types::Value;
use rusqlite::Connection;

use crate::error::Result;
use crate::memory::store::{learning_from_row, LEARNING_COLUMNS};
use crate::memory::types::{Learning, Scope};
use crate::repo::{org_identifier, path_ancestors};

// ── Public types ──────────────────────────────────────────────────────────────

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

/// One search over the scope cascade of a repository context.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// `owner/repo` of the caller's working directory, if known.
    pub repo_identifier: Option<String>,
    /// Working directory relative to the repository root; `None` at the root.
    pub relative_dir: Option<String>,
    /// Substring matched against title and content, or an exact tag.
    pub text: Option<String>,
    /// Restrict to exactly one scope instead of cascading.
    pub scope: Option<Scope>,
    pub limit: usize,
}

impl SearchQuery {
    /// Cascade search for a repository context with the default limit.
    pub fn for_repo(repo_identifier: impl Into<String>) -> Self {
        Self {
            repo_identifier: Some(repo_identifier.into()),
            limit: DEFAULT_LIMIT,
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Apply the default and clamp to `1..=MAX_LIMIT`.
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

// ── Query building ────────────────────────────────────────────────────────────

/// Collects positional parameters so a value can be referenced more than once.
#[derive(Default)]
struct Binds {
    values: Vec<Value>,
}

impl Binds {
    fn bind(&mut self, value: impl Into<Value>) -> String {
        self.values.push(value.into());
        format!("?{}", self.values.len())
    }
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn like_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// SQL predicates for each scope the query may see. An empty list means the
/// query can match nothing.
fn scope_clauses(query: &SearchQuery, binds: &mut Binds) -> Vec<String> {
    let repo = query
        .repo_identifier
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());
    let org = repo.and_then(org_identifier);
    let dir = query
        .relative_dir
        .as_deref()
        .map(|d| d.trim_matches('/'))
        .filter(|d| !d.is_empty());

    let wanted = |scope: Scope| query.scope.map_or(true, |s| s == scope);
    let mut clauses = Vec::new();

    if wanted(Scope::Global) {
        clauses.push("scope_level = 'global'".to_string());
    }
    if wanted(Scope::Organization) {
        if let Some(org) = org {
            clauses.push(format!(
                "(scope_level = 'organization' AND repo_identifier = {})",
                binds.bind(org.to_string())
            ));
        }
    }
    if let Some(repo) = repo {
        if wanted(Scope::Repository) {
            clauses.push(format!(
                "(scope_level = 'repository' AND repo_identifier = {})",
                binds.bind(repo.to_string())
            ));
        }
        if wanted(Scope::Directory) {
            if let Some(dir) = dir {
                let repo_param = binds.bind(repo.to_string());
                let paths: Vec<String> = path_ancestors(dir)
                    .into_iter()
                    .map(|p| binds.bind(p))
                    .collect();
                clauses.push(format!(
                    "(scope_level = 'directory' AND repo_identifier = {repo_param} \
                     AND directory_path IN ({}))",
                    paths.join(", ")
                ));
            }
        }
    }
    clauses
}

// ── Search ────────────────────────────────────────────────────────────────────

/// Search learnings visible from the query's repository context.
///
/// Results are ordered by scope specificity (directory first, global last),
/// then by match strength (title, content, tag), then most recently updated.
pub fn search_learnings(conn: &Connection, query: &SearchQuery) -> Result<Vec<Learning>> {
    let mut binds = Binds::default();

    let clauses = scope_clauses(query, &mut binds);
    if clauses.is_empty() {
        return Ok(Vec::new());
    }
    let mut sql_where = format!("({})", clauses.join(" OR "));

    let text = query
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let match_rank = match text {
        Some(text) => {
            let pattern = binds.bind(like_pattern(text));
            let tag = binds.bind(text.to_lowercase());
            let title_match = format!("title LIKE {pattern} ESCAPE '\\'");
            let content_match = format!("content LIKE {pattern} ESCAPE '\\'");
            let tag_match = format!(
                "EXISTS (SELECT 1 FROM json_each(learnings.tags) WHERE lower(json_each.value) = {tag})"
            );
            sql_where.push_str(&format!(
                " AND ({title_match} OR {content_match} OR {tag_match})"
            ));
            format!("CASE WHEN {title_match} THEN 1 WHEN {content_match} THEN 2 ELSE 3 END")
        }
        None => "0".to_string(),
    };

    let limit = binds.bind(query.limit.clamp(1, MAX_LIMIT) as i64);
    let sql = format!(
        "SELECT {LEARNING_COLUMNS} FROM learnings \
         WHERE {sql_where} \
         ORDER BY CASE scope_level \
             WHEN 'directory' THEN 1 WHEN 'repository' THEN 2 \
             WHEN 'organization' THEN 3 ELSE 4 END, \
           {match_rank}, updated_at DESC \
         LIMIT {limit}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds.values.iter()), learning_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    tracing::debug!(
        repo = ?query.repo_identifier,
        scope = ?query.scope,
        results = rows.len(),
        "search completed"
    );
    Ok(rows)
}
