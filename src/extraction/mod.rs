//! Background learning extraction.
//!
//! Requests enqueue an [`ExtractionJob`] on the bounded [`ExtractionQueue`];
//! the single [`worker`] task turns each transcript into learnings through an
//! [`Extractor`], filters duplicates and saves the rest.

pub mod openai;
pub mod prompt;
pub mod queue;
pub mod transcript;
pub mod worker;

pub use openai::OpenAiExtractor;
pub use queue::{ExtractionQueue, JobReceiver};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;

use crate::error::Result;
use crate::memory::types::{Confidence, Learning, NewLearning, Scope};

/// One queued transcript.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    /// Raw transcript, `{"messages": [...]}`.
    pub transcript: serde_json::Value,
    /// Working directory the session ran in.
    pub cwd: String,
    pub enqueued_at: Instant,
}

impl ExtractionJob {
    pub fn new(transcript: serde_json::Value, cwd: impl Into<String>) -> Self {
        Self {
            transcript,
            cwd: cwd.into(),
            enqueued_at: Instant::now(),
        }
    }

    /// Session id carried in the transcript, if any.
    pub fn session_id(&self) -> Option<String> {
        self.transcript
            .get("session_id")
            .and_then(|v| v.as_str())
            .map(String::from)
    }
}

/// A candidate learning as returned by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractedLearning {
    pub title: String,
    pub learning: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub confidence: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl ExtractedLearning {
    /// Text used for word-overlap comparison.
    pub fn dedup_text(&self) -> String {
        format!(
            "{} {} {}",
            self.title,
            self.learning,
            self.context.as_deref().unwrap_or_default()
        )
    }

    /// Repository-scoped save input tagged as coming from extraction.
    pub fn into_new_learning(self, repo_identifier: &str, session_id: Option<String>) -> NewLearning {
        let confidence = self
            .confidence
            .as_deref()
            .and_then(|c| c.trim().to_lowercase().parse::<Confidence>().ok())
            .unwrap_or_default();
        NewLearning {
            repo_identifier: Some(repo_identifier.to_string()),
            title: self.title,
            content: self.learning,
            context: self.context.filter(|c| !c.trim().is_empty()),
            category: self.kind.map(|k| k.trim().to_lowercase()).filter(|k| !k.is_empty()),
            confidence,
            session_id,
            metadata: Some(serde_json::json!({"source": "extraction"})),
            scope: Some(Scope::Repository),
            ..Default::default()
        }
    }
}

/// Turns a formatted transcript into candidate learnings.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// `existing` lists learnings already stored for the repository so the
    /// model can avoid repeating them.
    async fn extract(&self, transcript: &str, existing: &[Learning]) -> Result<Vec<ExtractedLearning>>;

    fn name(&self) -> &'static str;
}
