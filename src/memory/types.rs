//! Core learning type definitions.
//!
//! Defines [`Scope`] (the visibility cascade), [`Confidence`], [`LearningType`],
//! [`Learning`] (a full stored record), and [`NewLearning`] (the save input).

use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, Result};

/// Visibility level of a learning, from broadest to narrowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Applies everywhere.
    Global,
    /// Applies to every repository of one owner; `repo_identifier` holds the owner.
    Organization,
    /// Applies to one repository.
    Repository,
    /// Applies to one directory (and below) inside a repository.
    Directory,
}

impl Scope {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Organization => "organization",
            Self::Repository => "repository",
            Self::Directory => "directory",
        }
    }

    /// Sort key for relevance: narrower scopes rank first.
    pub fn specificity_rank(&self) -> u8 {
        match self {
            Self::Directory => 1,
            Self::Repository => 2,
            Self::Organization => 3,
            Self::Global => 4,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "organization" => Ok(Self::Organization),
            "repository" => Ok(Self::Repository),
            "directory" => Ok(Self::Directory),
            _ => Err(format!("unknown scope: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// One level up, saturating at `High`.
    pub fn raised(&self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("unknown confidence: {s}")),
        }
    }
}

/// Kind of insight a learning captures. Stored in the `category` column;
/// other category strings are accepted and kept as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningType {
    Rule,
    Heuristic,
    Source,
    Process,
    Constraint,
}

impl LearningType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Heuristic => "heuristic",
            Self::Source => "source",
            Self::Process => "process",
            Self::Constraint => "constraint",
        }
    }
}

impl std::str::FromStr for LearningType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "rule" => Ok(Self::Rule),
            "heuristic" => Ok(Self::Heuristic),
            "source" => Ok(Self::Source),
            "process" => Ok(Self::Process),
            "constraint" => Ok(Self::Constraint),
            _ => Err(format!("unknown learning type: {s}")),
        }
    }
}

/// A learning record, matching the `learnings` table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    /// Owning repository (`owner/repo`), the owner for organization scope,
    /// `None` for global learnings.
    pub repo_identifier: Option<String>,
    pub title: String,
    /// When this learning applies.
    pub context: Option<String>,
    /// The insight itself.
    pub content: String,
    /// Learning type or a free-form category.
    pub category: Option<String>,
    pub confidence: Confidence,
    pub scope_level: Scope,
    /// Path relative to the repository root; directory scope only.
    pub directory_path: Option<String>,
    pub tags: Vec<String>,
    pub session_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// RFC 3339 timestamps.
    pub created_at: String,
    pub updated_at: String,
}

impl Learning {
    /// The learning's category parsed as a [`LearningType`], if it is one.
    pub fn learning_type(&self) -> Option<LearningType> {
        self.category.as_deref().and_then(|c| c.parse().ok())
    }
}

/// Input for the save path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewLearning {
    pub repo_identifier: Option<String>,
    pub title: String,
    pub content: String,
    pub context: Option<String>,
    pub category: Option<String>,
    pub confidence: Confidence,
    pub tags: Vec<String>,
    pub session_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub scope: Option<Scope>,
    pub directory_path: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

impl NewLearning {
    /// Effective scope; repository when unspecified.
    pub fn scope(&self) -> Scope {
        self.scope.unwrap_or(Scope::Repository)
    }

    /// Check required fields and scope consistency.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(DaemonError::InvalidRequest("title must not be empty".into()));
        }
        if self.content.trim().is_empty() {
            return Err(DaemonError::InvalidRequest("content must not be empty".into()));
        }
        let scope = self.scope();
        let has_repo = self
            .repo_identifier
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty());
        if scope != Scope::Global && !has_repo {
            return Err(DaemonError::InvalidRequest(format!(
                "repo_identifier is required for {scope} scope"
            )));
        }
        if scope == Scope::Directory
            && self.directory_path.as_deref().map_or(true, |d| d.trim().is_empty())
        {
            return Err(DaemonError::InvalidRequest(
                "directory_path is required for directory scope".into(),
            ));
        }
        if let Some(meta) = &self.metadata {
            if !meta.is_object() {
                return Err(DaemonError::InvalidRequest("metadata must be an object".into()));
            }
        }
        Ok(())
    }
}
