//! Newline-delimited JSON wire protocol.
//!
//! Each request is one line, `{"method": "...", "params": {...}}`; each
//! response is one JSON line. Result shapes are per method; protocol errors
//! are `{"error": "...", "code": "..."}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DaemonError, Result};
use crate::memory::types::{Confidence, Learning, NewLearning, Scope};

#[derive(Debug, Deserialize)]
struct RawRequest {
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchParams {
    pub cwd: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default, alias = "scope")]
    pub scope_filter: Option<String>,
}

impl SearchParams {
    pub fn scope(&self) -> Result<Option<Scope>> {
        parse_opt(self.scope_filter.as_deref(), "scope_filter")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SaveParams {
    #[serde(default)]
    pub repo_identifier: Option<String>,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default, alias = "type")]
    pub category: Option<String>,
    #[serde(default)]
    pub confidence: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default, alias = "scope")]
    pub scope_level: Option<String>,
    #[serde(default)]
    pub directory_path: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl SaveParams {
    /// Convert to a validated save input. Unknown scope or confidence strings
    /// are rejected.
    pub fn into_new_learning(self) -> Result<NewLearning> {
        let learning = NewLearning {
            scope: parse_opt(self.scope_level.as_deref(), "scope_level")?,
            confidence: parse_opt::<Confidence>(self.confidence.as_deref(), "confidence")?
                .unwrap_or_default(),
            repo_identifier: self.repo_identifier,
            title: self.title,
            content: self.content,
            context: self.context,
            category: self.category,
            tags: self.tags.unwrap_or_default(),
            session_id: self.session_id,
            metadata: self.metadata.filter(|m| !m.is_null()),
            directory_path: self.directory_path,
            embedding: self.embedding,
        };
        learning.validate()?;
        Ok(learning)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RepoParams {
    pub cwd: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueueParams {
    #[serde(alias = "transcript")]
    pub transcript_data: Value,
    pub cwd: String,
}

/// A parsed request. Dispatch matches on this exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Ping,
    SearchLearnings(SearchParams),
    SaveLearning(SaveParams),
    GetRepoIdentifier(RepoParams),
    QueueExtraction(QueueParams),
    InitDb,
}

impl Request {
    /// Parse one request line.
    pub fn parse(line: &str) -> Result<Self> {
        let raw: RawRequest = serde_json::from_str(line)
            .map_err(|e| DaemonError::InvalidRequest(format!("malformed request: {e}")))?;
        let params = match raw.params {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        match raw.method.as_str() {
            "ping" => Ok(Self::Ping),
            "search_learnings" => params_of(&raw.method, params).map(Self::SearchLearnings),
            "save_learning" => params_of(&raw.method, params).map(Self::SaveLearning),
            "get_repo_identifier" => params_of(&raw.method, params).map(Self::GetRepoIdentifier),
            "queue_extraction" => params_of(&raw.method, params).map(Self::QueueExtraction),
            "init_db" => Ok(Self::InitDb),
            _ => Err(DaemonError::UnknownMethod(raw.method)),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::SearchLearnings(_) => "search_learnings",
            Self::SaveLearning(_) => "save_learning",
            Self::GetRepoIdentifier(_) => "get_repo_identifier",
            Self::QueueExtraction(_) => "queue_extraction",
            Self::InitDb => "init_db",
        }
    }
}

fn params_of<T: serde::de::DeserializeOwned>(method: &str, params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| DaemonError::InvalidRequest(format!("{method}: {e}")))
}

fn parse_opt<T>(value: Option<&str>, field: &str) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|e| DaemonError::InvalidRequest(format!("{field}: {e}"))),
    }
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Pong {
        status: &'static str,
        timestamp: f64,
    },
    Search {
        results: Vec<Learning>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Saved {
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<&'static str>,
    },
    RepoId {
        repo_id: String,
    },
    Queued {
        status: &'static str,
        queue_size: usize,
    },
    Rejected {
        status: &'static str,
        error: String,
        code: &'static str,
    },
    InitDb {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        schema_version: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        error: String,
        code: &'static str,
    },
}

impl Response {
    pub fn pong() -> Self {
        Self::Pong {
            status: "ok",
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }

    pub fn error(err: &DaemonError) -> Self {
        Self::Error {
            error: err.to_string(),
            code: err.code(),
        }
    }

    pub fn rejected(err: &DaemonError) -> Self {
        Self::Rejected {
            status: "rejected",
            error: err.to_string(),
            code: err.code(),
        }
    }

    /// Serialize as one newline-terminated line.
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = serde_json::to_vec(self).unwrap_or_else(|e| {
            format!(r#"{{"error":"failed to encode response: {e}","code":"internal"}}"#).into_bytes()
        });
        line.push(b'\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_each_method() {
        assert_eq!(Request::parse(r#"{"method":"ping"}"#).unwrap(), Request::Ping);
        assert_eq!(
            Request::parse(r#"{"method":"init_db","params":null}"#).unwrap(),
            Request::InitDb
        );

        let search = Request::parse(
            r#"{"method":"search_learnings","params":{"cwd":"/repo","query":"errors","limit":5,"scope_filter":null}}"#,
        )
        .unwrap();
        match search {
            Request::SearchLearnings(p) => {
                assert_eq!(p.cwd, "/repo");
                assert_eq!(p.limit, Some(5));
                assert_eq!(p.scope().unwrap(), None);
            }
            other => panic!("unexpected {other:?}"),
        }

        let queue = Request::parse(
            r#"{"method":"queue_extraction","params":{"transcript_data":{"messages":[]},"cwd":"/repo"}}"#,
        )
        .unwrap();
        assert_eq!(queue.method(), "queue_extraction");
    }

    #[test]
    fn malformed_json_is_invalid_request() {
        let err = Request::parse("{not json").unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn unknown_method_is_reported() {
        let err = Request::parse(r#"{"method":"drop_tables"}"#).unwrap_err();
        assert!(matches!(err, DaemonError::UnknownMethod(ref m) if m == "drop_tables"));
    }

    #[test]
    fn missing_required_params_are_invalid() {
        let err = Request::parse(r#"{"method":"save_learning","params":{"title":"t"}}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
        let err = Request::parse(r#"{"method":"get_repo_identifier"}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn save_params_convert_with_defaults() {
        let params: SaveParams = serde_json::from_value(json!({
            "repo_identifier": "acme/api",
            "title": "t",
            "content": "c",
            "tags": null,
            "metadata": null,
        }))
        .unwrap();
        let learning = params.into_new_learning().unwrap();
        assert_eq!(learning.scope(), Scope::Repository);
        assert_eq!(learning.confidence, Confidence::Medium);
        assert!(learning.tags.is_empty());
        assert!(learning.metadata.is_none());
    }

    #[test]
    fn save_params_reject_unknown_scope() {
        let params: SaveParams = serde_json::from_value(json!({
            "repo_identifier": "acme/api",
            "title": "t",
            "content": "c",
            "scope_level": "team",
        }))
        .unwrap();
        let err = params.into_new_learning().unwrap_err();
        assert!(err.to_string().contains("scope_level"));
    }

    #[test]
    fn response_shapes() {
        let saved = serde_json::to_value(Response::Saved {
            id: None,
            error: Some("down".into()),
            code: Some("unavailable"),
        })
        .unwrap();
        assert_eq!(saved, json!({"id": null, "error": "down", "code": "unavailable"}));

        let queued = serde_json::to_value(Response::Queued { status: "queued", queue_size: 3 }).unwrap();
        assert_eq!(queued, json!({"status": "queued", "queue_size": 3}));

        let rejected = serde_json::to_value(Response::rejected(&DaemonError::QueueFull)).unwrap();
        assert_eq!(
            rejected,
            json!({"status": "rejected", "error": "extraction queue is full", "code": "queue_full"})
        );

        let line = Response::pong().to_line();
        assert_eq!(line.last(), Some(&b'\n'));
        let pong: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(pong["status"], "ok");
    }
}
