#![allow(dead_code)]

use async_trait::async_trait;
use memoryd::config::DaemonConfig;
use memoryd::db;
use memoryd::error::{DaemonError, Result};
use memoryd::extraction::{ExtractedLearning, Extractor};
use memoryd::memory::types::{Learning, NewLearning, Scope};
use memoryd::repo::{RepoIdentity, RepoResolver};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    db::migrations::run_migrations(&mut conn).unwrap();
    conn
}

/// Config with every file (socket, pid, db, log) inside `dir` and the
/// background health loop effectively idle.
pub fn test_config(dir: &Path) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.server.socket_path = dir.join("d.sock").to_string_lossy().into_owned();
    config.server.pid_path = dir.join("d.pid").to_string_lossy().into_owned();
    config.server.log_path = dir.join("d.log").to_string_lossy().into_owned();
    config.server.drain_timeout_ms = 2_000;
    config.storage.db_path = dir.join("memory.db").to_string_lossy().into_owned();
    config.pool.acquire_timeout_ms = 1_000;
    config.health.interval_secs = 3_600;
    config.client.timeout_ms = 2_000;
    config
}

/// Repository-scoped save input.
pub fn repo_learning(repo: &str, title: &str, content: &str) -> NewLearning {
    NewLearning {
        repo_identifier: Some(repo.to_string()),
        title: title.to_string(),
        content: content.to_string(),
        ..Default::default()
    }
}

pub fn global_learning(title: &str, content: &str) -> NewLearning {
    NewLearning {
        title: title.to_string(),
        content: content.to_string(),
        scope: Some(Scope::Global),
        ..Default::default()
    }
}

/// Transcript with `count` alternating user/assistant messages, each long
/// enough that the whole clears the minimum length.
pub fn transcript(count: usize) -> Value {
    let messages: Vec<Value> = (0..count)
        .map(|i| {
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            json!({
                "role": role,
                "content": format!("message {i}: the integration tests need a migrated database before they run"),
            })
        })
        .collect();
    json!({"session_id": "session-1", "messages": messages})
}

pub fn candidate(title: &str, learning: &str) -> ExtractedLearning {
    ExtractedLearning {
        title: title.to_string(),
        learning: learning.to_string(),
        context: None,
        confidence: Some("high".into()),
        kind: Some("process".into()),
    }
}

/// Resolver returning a fixed identity, counting calls.
pub struct MockResolver {
    identity: Option<RepoIdentity>,
    calls: AtomicUsize,
}

impl MockResolver {
    pub fn fixed(id: &str) -> Arc<Self> {
        Arc::new(Self {
            identity: Some(RepoIdentity::new(id)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn in_dir(id: &str, relative_dir: &str) -> Arc<Self> {
        Arc::new(Self {
            identity: Some(RepoIdentity {
                id: id.to_string(),
                relative_dir: Some(relative_dir.to_string()),
            }),
            calls: AtomicUsize::new(0),
        })
    }

    /// Every resolution fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            identity: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepoResolver for MockResolver {
    async fn resolve(&self, _cwd: &Path) -> Result<RepoIdentity> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.identity
            .clone()
            .ok_or_else(|| DaemonError::Resolve("git not available".into()))
    }
}

/// Extractor returning canned candidates and recording what it was shown.
pub struct MockExtractor {
    candidates: Vec<ExtractedLearning>,
    pub seen_existing: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn returning(candidates: Vec<ExtractedLearning>) -> Arc<Self> {
        Arc::new(Self {
            candidates,
            seen_existing: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, _transcript: &str, existing: &[Learning]) -> Result<Vec<ExtractedLearning>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_existing
            .lock()
            .unwrap()
            .extend(existing.iter().map(|l| l.title.clone()));
        Ok(self.candidates.clone())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
