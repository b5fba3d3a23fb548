//! Client for the daemon socket.
//!
//! Every call is bounded by one timeout covering connect, write and read.
//! Any failure means "daemon absent": callers get an empty or null result
//! instead of an error, except [`DaemonClient::init_db`].

use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::config::DaemonConfig;
use crate::memory::types::{Learning, NewLearning, Scope};
use crate::server::pidfile::read_pid;

/// Result of asking the daemon to queue an extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueStatus {
    Queued { queue_size: usize },
    /// The daemon answered but refused the job; carries the error code.
    Rejected { code: String },
    /// The daemon could not be reached.
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
}

#[derive(Deserialize)]
struct SearchReply {
    results: Vec<Learning>,
}

impl DaemonClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(
            config.resolved_socket_path(),
            Duration::from_millis(config.client.timeout_ms),
        )
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one request and read one response line. `None` on any failure.
    pub async fn request(&self, method: &str, params: Value) -> Option<Value> {
        let exchange = async {
            let mut stream = UnixStream::connect(&self.socket_path).await.ok()?;
            let mut line = serde_json::to_vec(&json!({"method": method, "params": params})).ok()?;
            line.push(b'\n');
            stream.write_all(&line).await.ok()?;

            let mut reply = String::new();
            let read = BufReader::new(stream).read_line(&mut reply).await.ok()?;
            if read == 0 {
                return None;
            }
            serde_json::from_str::<Value>(&reply).ok()
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(reply) => reply,
            Err(_) => {
                tracing::debug!(method, timeout_ms = self.timeout.as_millis() as u64, "daemon request timed out");
                None
            }
        }
    }

    pub async fn ping(&self) -> bool {
        self.request("ping", json!({}))
            .await
            .is_some_and(|r| r["status"] == "ok")
    }

    pub async fn search_learnings(
        &self,
        cwd: &str,
        query: Option<&str>,
        limit: usize,
        scope: Option<Scope>,
    ) -> Vec<Learning> {
        let params = json!({
            "cwd": cwd,
            "query": query,
            "limit": limit,
            "scope_filter": scope.map(|s| s.as_str()),
        });
        self.request("search_learnings", params)
            .await
            .and_then(|r| serde_json::from_value::<SearchReply>(r).ok())
            .map(|r| r.results)
            .unwrap_or_default()
    }

    /// Saved learning id, or `None` when the daemon is absent or the save failed.
    pub async fn save_learning(&self, learning: &NewLearning) -> Option<String> {
        let params = json!({
            "repo_identifier": learning.repo_identifier,
            "title": learning.title,
            "content": learning.content,
            "context": learning.context,
            "category": learning.category,
            "confidence": learning.confidence.as_str(),
            "tags": learning.tags,
            "session_id": learning.session_id,
            "metadata": learning.metadata,
            "scope_level": learning.scope().as_str(),
            "directory_path": learning.directory_path,
        });
        self.request("save_learning", params)
            .await?
            .get("id")?
            .as_str()
            .map(String::from)
    }

    pub async fn get_repo_identifier(&self, cwd: &str) -> Option<String> {
        self.request("get_repo_identifier", json!({"cwd": cwd}))
            .await?
            .get("repo_id")?
            .as_str()
            .map(String::from)
    }

    pub async fn queue_extraction(&self, transcript: Value, cwd: &str) -> QueueStatus {
        let Some(reply) = self
            .request("queue_extraction", json!({"transcript_data": transcript, "cwd": cwd}))
            .await
        else {
            return QueueStatus::Unavailable;
        };
        if reply["status"] == "queued" {
            let queue_size = reply["queue_size"].as_u64().unwrap_or_default() as usize;
            return QueueStatus::Queued { queue_size };
        }
        QueueStatus::Rejected {
            code: reply["code"].as_str().unwrap_or("internal").to_string(),
        }
    }

    /// Run migrations through the daemon. Returns the schema version, or the
    /// daemon's error text.
    pub async fn init_db(&self) -> Result<u32, String> {
        let reply = self
            .request("init_db", json!({}))
            .await
            .ok_or_else(|| format!("daemon not reachable at {}", self.socket_path.display()))?;
        if reply["success"] == true {
            return reply["schema_version"]
                .as_u64()
                .map(|v| v as u32)
                .ok_or_else(|| "response missing schema_version".to_string());
        }
        Err(reply["error"]
            .as_str()
            .unwrap_or("init_db failed")
            .to_string())
    }

    /// A PID file exists and the daemon answers a ping.
    pub async fn is_daemon_running(&self, pid_path: &Path) -> bool {
        read_pid(pid_path).is_some() && self.ping().await
    }
}
