//! Request dispatch over the shared daemon context.
//!
//! Every operation except `ping` is bounded by the request timeout. Backend
//! trouble degrades to an empty or null result; only `init_db` reports its
//! failure loudly.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::protocol::{QueueParams, RepoParams, Request, Response, SaveParams, SearchParams};
use crate::config::DaemonConfig;
use crate::db::{migrations, ConnectionPool};
use crate::error::{DaemonError, Result};
use crate::extraction::{ExtractionJob, ExtractionQueue};
use crate::memory::search::{clamp_limit, search_learnings, SearchQuery};
use crate::memory::store::save_learning;
use crate::memory::types::Learning;
use crate::repo::{folder_name, RepoCache, RepoIdentity};

/// Result of a search; `error` is set when the search degraded to empty.
#[derive(Debug)]
pub struct SearchOutcome {
    pub results: Vec<Learning>,
    pub error: Option<DaemonError>,
}

/// Result of a save that passed validation.
#[derive(Debug)]
pub enum SaveOutcome {
    Saved(String),
    /// The backend failed; nothing was stored.
    Failed(DaemonError),
}

/// Shared state for every connection, built once at startup.
pub struct Daemon {
    pub pool: ConnectionPool,
    pub cache: Arc<RepoCache>,
    pub queue: ExtractionQueue,
    pub config: Arc<DaemonConfig>,
    started_at: Instant,
}

impl Daemon {
    pub fn new(
        pool: ConnectionPool,
        cache: Arc<RepoCache>,
        queue: ExtractionQueue,
        config: Arc<DaemonConfig>,
    ) -> Self {
        Self {
            pool,
            cache,
            queue,
            config,
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.server.request_timeout_ms)
    }

    /// Parse and answer one request line.
    pub async fn handle_line(&self, line: &str) -> Response {
        match Request::parse(line) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                tracing::debug!(error = %e, "rejected request");
                Response::error(&e)
            }
        }
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        let method = request.method();
        let started = Instant::now();
        let response = match request {
            Request::Ping => Response::pong(),
            Request::SearchLearnings(params) => self.search(params).await,
            Request::SaveLearning(params) => self.save(params).await,
            Request::GetRepoIdentifier(params) => self.repo_identifier(params).await,
            Request::QueueExtraction(params) => self.queue_extraction(params),
            Request::InitDb => self.init_db().await,
        };
        tracing::debug!(method, elapsed_ms = started.elapsed().as_millis() as u64, "request handled");
        response
    }

    async fn bounded<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.request_timeout();
        match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(DaemonError::Timeout(limit.as_millis() as u64)),
        }
    }

    /// Identity for `cwd`, falling back to the folder name when resolution fails.
    async fn identity_for(&self, cwd: &str) -> RepoIdentity {
        match self.cache.get_or_resolve(cwd).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(cwd, error = %e, "repository resolution failed, using folder name");
                RepoIdentity::new(folder_name(Path::new(cwd)))
            }
        }
    }

    /// Cascade search for the context of `params.cwd`. Backend trouble yields
    /// an empty result carrying the error.
    pub async fn search_learnings(&self, params: &SearchParams) -> Result<SearchOutcome> {
        let scope = params.scope()?;
        let result = self
            .bounded(async {
                let identity = self.identity_for(&params.cwd).await;
                let query = SearchQuery {
                    repo_identifier: Some(identity.id),
                    relative_dir: identity.relative_dir,
                    text: params.query.clone(),
                    scope,
                    limit: clamp_limit(params.limit),
                };
                self.pool.run(move |conn| search_learnings(conn, &query)).await
            })
            .await;

        Ok(match result {
            Ok(mut results) => {
                for learning in &mut results {
                    learning.embedding = None;
                }
                SearchOutcome { results, error: None }
            }
            Err(e) => {
                tracing::warn!(cwd = %params.cwd, error = %e, "search degraded to empty result");
                SearchOutcome {
                    results: Vec::new(),
                    error: Some(e),
                }
            }
        })
    }

    /// Validate and store one learning. Validation failures are `Err`; backend
    /// failures are a [`SaveOutcome::Failed`].
    pub async fn save_learning(&self, params: SaveParams) -> Result<SaveOutcome> {
        let learning = params.into_new_learning()?;
        let result = self
            .bounded(self.pool.run(move |conn| save_learning(conn, &learning)))
            .await;

        match result {
            Ok(id) => Ok(SaveOutcome::Saved(id)),
            Err(e @ DaemonError::InvalidRequest(_)) => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "save failed");
                Ok(SaveOutcome::Failed(e))
            }
        }
    }

    async fn search(&self, params: SearchParams) -> Response {
        match self.search_learnings(&params).await {
            Ok(outcome) => Response::Search {
                results: outcome.results,
                error: outcome.error.map(|e| e.to_string()),
            },
            Err(e) => Response::error(&e),
        }
    }

    async fn save(&self, params: SaveParams) -> Response {
        match self.save_learning(params).await {
            Ok(SaveOutcome::Saved(id)) => Response::Saved {
                id: Some(id),
                error: None,
                code: None,
            },
            Ok(SaveOutcome::Failed(e)) => Response::Saved {
                id: None,
                error: Some(e.to_string()),
                code: Some(e.code()),
            },
            Err(e) => Response::error(&e),
        }
    }

    async fn repo_identifier(&self, params: RepoParams) -> Response {
        if params.cwd.trim().is_empty() {
            return Response::error(&DaemonError::InvalidRequest("cwd must not be empty".into()));
        }
        let resolved = self.bounded(self.cache.get_or_resolve(&params.cwd)).await;
        let repo_id = match resolved {
            Ok(identity) => identity.id,
            Err(e) => {
                tracing::warn!(cwd = %params.cwd, error = %e, "repository resolution failed, using folder name");
                folder_name(Path::new(&params.cwd))
            }
        };
        Response::RepoId { repo_id }
    }

    fn queue_extraction(&self, params: QueueParams) -> Response {
        let job = ExtractionJob::new(params.transcript_data, params.cwd);
        let cwd = job.cwd.clone();
        match self.queue.enqueue(job) {
            Ok(queue_size) => {
                tracing::info!(cwd = %cwd, queue_size, "extraction queued");
                Response::Queued {
                    status: "queued",
                    queue_size,
                }
            }
            Err(e) => Response::rejected(&e),
        }
    }

    async fn init_db(&self) -> Response {
        let result = self
            .bounded(self.pool.run(|conn| {
                migrations::run_migrations(conn)
                    .map_err(|e| DaemonError::Schema(format!("migration failed: {e}")))
            }))
            .await;

        match result {
            Ok(version) => {
                tracing::info!(schema_version = version, "schema initialized");
                Response::InitDb {
                    success: true,
                    schema_version: Some(version),
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "init_db failed");
                Response::InitDb {
                    success: false,
                    schema_version: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
