//! Repository identification for a working directory.
//!
//! [`GitResolver`] asks git for the `origin` remote and the repository root.
//! Results are cached per directory by [`RepoCache`].

pub mod cache;

pub use cache::RepoCache;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::error::{DaemonError, Result};

/// Resolved identity of a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoIdentity {
    /// `owner/repo` from the remote, or the folder name.
    pub id: String,
    /// Working directory relative to the repository root; `None` at the root
    /// or outside a repository.
    pub relative_dir: Option<String>,
}

impl RepoIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            relative_dir: None,
        }
    }
}

/// Maps a working directory to a [`RepoIdentity`].
#[async_trait]
pub trait RepoResolver: Send + Sync {
    async fn resolve(&self, cwd: &Path) -> Result<RepoIdentity>;
}

/// Resolver backed by the `git` command line.
pub struct GitResolver {
    timeout: Duration,
}

impl GitResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run git in `cwd`. `Ok(None)` when git ran but failed (not a repository,
    /// no remote); `Err` when git could not be run or timed out.
    async fn git(&self, cwd: &Path, args: &[&str]) -> Result<Option<String>> {
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(DaemonError::Resolve(format!("failed to run git: {e}"))),
            Err(_) => {
                return Err(DaemonError::Resolve(format!(
                    "git timed out after {} ms",
                    self.timeout.as_millis()
                )))
            }
        };
        if !output.status.success() {
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!stdout.is_empty()).then_some(stdout))
    }
}

impl Default for GitResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl RepoResolver for GitResolver {
    async fn resolve(&self, cwd: &Path) -> Result<RepoIdentity> {
        let id = match self.git(cwd, &["config", "--get", "remote.origin.url"]).await? {
            Some(remote) => normalize_remote(&remote),
            None => folder_name(cwd),
        };

        let relative_dir = match self.git(cwd, &["rev-parse", "--show-toplevel"]).await? {
            Some(root) => {
                let cwd = tokio::fs::canonicalize(cwd)
                    .await
                    .unwrap_or_else(|_| cwd.to_path_buf());
                let root = tokio::fs::canonicalize(&root)
                    .await
                    .unwrap_or_else(|_| PathBuf::from(&root));
                cwd.strip_prefix(&root)
                    .ok()
                    .map(|rel| rel.to_string_lossy().replace('\\', "/"))
                    .filter(|rel| !rel.is_empty())
            }
            None => None,
        };

        tracing::debug!(cwd = %cwd.display(), repo = %id, relative_dir = ?relative_dir, "resolved repository");
        Ok(RepoIdentity { id, relative_dir })
    }
}

/// Reduce a remote URL to `owner/repo`: drop a trailing `.git` and keep the
/// last two segments. Handles both URL and scp-like (`git@host:owner/repo`) forms.
pub fn normalize_remote(remote: &str) -> String {
    let trimmed = remote.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let parts: Vec<&str> = trimmed
        .split(['/', ':'])
        .filter(|p| !p.is_empty())
        .collect();
    match parts.as_slice() {
        [.., owner, repo] => format!("{owner}/{repo}"),
        _ => trimmed.to_string(),
    }
}

/// Last path component, used when there is no remote or git is unavailable.
pub fn folder_name(cwd: &Path) -> String {
    cwd.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| cwd.to_string_lossy().into_owned())
}

/// Organization part of a repository identifier (before the first `/`).
pub fn org_identifier(repo_id: &str) -> Option<&str> {
    repo_id
        .split_once('/')
        .map(|(org, _)| org)
        .filter(|org| !org.is_empty())
}

/// `a/b/c` → `[a/b/c, a/b, a]`.
pub fn path_ancestors(relative: &str) -> Vec<String> {
    let parts: Vec<&str> = relative.split('/').filter(|p| !p.is_empty()).collect();
    (1..=parts.len())
        .rev()
        .map(|n| parts[..n].join("/"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_remote_forms() {
        assert_eq!(normalize_remote("https://github.com/acme/api.git"), "acme/api");
        assert_eq!(normalize_remote("git@github.com:acme/api.git"), "acme/api");
        assert_eq!(normalize_remote("ssh://git@host:22/acme/api"), "acme/api");
        assert_eq!(normalize_remote("https://github.com/acme/api/"), "acme/api");
        assert_eq!(normalize_remote("api"), "api");
    }

    #[test]
    fn org_identifier_needs_a_slash() {
        assert_eq!(org_identifier("acme/api"), Some("acme"));
        assert_eq!(org_identifier("api"), None);
        assert_eq!(org_identifier("/api"), None);
    }

    #[test]
    fn ancestors_are_narrowest_first() {
        assert_eq!(path_ancestors("a/b/c"), vec!["a/b/c", "a/b", "a"]);
        assert_eq!(path_ancestors("/src/"), vec!["src"]);
        assert!(path_ancestors("").is_empty());
    }

    #[test]
    fn folder_name_falls_back_to_path() {
        assert_eq!(folder_name(Path::new("/home/me/project")), "project");
        assert_eq!(folder_name(Path::new("/")), "/");
    }

    #[tokio::test]
    async fn missing_directory_is_a_resolution_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let missing = tmp.path().join("gone");
        let err = GitResolver::default().resolve(&missing).await.unwrap_err();
        assert!(matches!(err, DaemonError::Resolve(_)));
    }
}
