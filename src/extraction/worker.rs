use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

use super::transcript::{self, SkipReason};
use super::{ExtractionJob, Extractor, JobReceiver};
use crate::config::ExtractionConfig;
use crate::db::ConnectionPool;
use crate::error::Result;
use crate::memory::dedup::{DedupIndex, DedupMatch};
use crate::memory::search::{search_learnings, SearchQuery};
use crate::memory::store::{reinforce_learning, save_learning};
use crate::memory::types::NewLearning;
use crate::repo::{folder_name, RepoCache, RepoIdentity};

/// What processing one job did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutcome {
    pub saved: usize,
    pub reinforced: usize,
    pub skipped: Option<String>,
}

impl JobOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Single consumer of the extraction queue.
pub struct ExtractionWorker {
    pool: ConnectionPool,
    cache: Arc<RepoCache>,
    extractor: Option<Arc<dyn Extractor>>,
    config: ExtractionConfig,
}

impl ExtractionWorker {
    pub fn new(
        pool: ConnectionPool,
        cache: Arc<RepoCache>,
        extractor: Option<Arc<dyn Extractor>>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            pool,
            cache,
            extractor,
            config,
        }
    }

    /// Process jobs in FIFO order until shutdown is signalled or every
    /// producer is gone. A failed job is logged and dropped.
    pub async fn run(self, mut jobs: JobReceiver, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            extractor = self.extractor.as_ref().map_or("none", |e| e.name()),
            "extraction worker started"
        );
        loop {
            let job = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let cwd = job.cwd.clone();
            let waited_ms = job.enqueued_at.elapsed().as_millis() as u64;
            match self.process(job).await {
                Ok(JobOutcome { skipped: Some(reason), .. }) => {
                    tracing::debug!(cwd = %cwd, reason = %reason, "extraction skipped");
                }
                Ok(outcome) => {
                    tracing::info!(
                        cwd = %cwd,
                        waited_ms,
                        saved = outcome.saved,
                        reinforced = outcome.reinforced,
                        "extraction finished"
                    );
                }
                Err(e) => tracing::error!(cwd = %cwd, error = %e, "extraction failed"),
            }
        }
        jobs.close();
        tracing::info!("extraction worker stopped");
    }

    /// Run one job end to end: resolve, fetch existing, extract, dedup, persist.
    pub async fn process(&self, job: ExtractionJob) -> Result<JobOutcome> {
        if !self.config.enabled {
            return Ok(JobOutcome::skipped("extraction disabled"));
        }
        let Some(extractor) = self.extractor.as_ref() else {
            return Ok(JobOutcome::skipped("no extractor configured"));
        };
        let text = match transcript::prepare(&job.transcript, &self.config) {
            Ok(text) => text,
            Err(SkipReason::TooFewMessages(n)) => {
                return Ok(JobOutcome::skipped(format!("only {n} messages")))
            }
            Err(SkipReason::TooShort(n)) => {
                return Ok(JobOutcome::skipped(format!("transcript only {n} chars")))
            }
        };

        let identity = match self.cache.get_or_resolve(&job.cwd).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(cwd = %job.cwd, error = %e, "repository resolution failed, using folder name");
                RepoIdentity::new(folder_name(std::path::Path::new(&job.cwd)))
            }
        };

        let query = SearchQuery {
            repo_identifier: Some(identity.id.clone()),
            relative_dir: identity.relative_dir.clone(),
            limit: self.config.existing_limit,
            ..Default::default()
        };
        let existing = self
            .pool
            .run(move |conn| search_learnings(conn, &query))
            .await?;

        let candidates = extractor.extract(&text, &existing).await?;
        if candidates.is_empty() {
            return Ok(JobOutcome::default());
        }

        let mut index = DedupIndex::from_existing(&existing, self.config.dedup_threshold);
        let mut to_save: Vec<NewLearning> = Vec::new();
        let mut to_reinforce: Vec<String> = Vec::new();
        let mut seen_ids = HashSet::new();
        let session_id = job.session_id();

        for candidate in candidates {
            let text = candidate.dedup_text();
            match index.check(&candidate.title, &text) {
                DedupMatch::Unique => {
                    index.insert(&candidate.title, &text);
                    to_save.push(candidate.into_new_learning(&identity.id, session_id.clone()));
                }
                DedupMatch::Existing(id) => {
                    if seen_ids.insert(id.clone()) {
                        to_reinforce.push(id);
                    }
                }
                DedupMatch::Batch => {
                    tracing::debug!(title = %candidate.title, "dropping duplicate candidate");
                }
            }
        }

        self.pool
            .run(move |conn| {
                let mut outcome = JobOutcome::default();
                for learning in &to_save {
                    match save_learning(conn, learning) {
                        Ok(_) => outcome.saved += 1,
                        Err(e) => tracing::warn!(title = %learning.title, error = %e, "failed to save extracted learning"),
                    }
                }
                for id in &to_reinforce {
                    if reinforce_learning(conn, id)? {
                        outcome.reinforced += 1;
                    }
                }
                Ok(outcome)
            })
            .await
    }
}
