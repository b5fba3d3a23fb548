mod helpers;

use memoryd::client::{DaemonClient, QueueStatus};
use memoryd::extraction::Extractor;
use memoryd::memory::types::{Confidence, Scope};
use memoryd::repo::RepoResolver;
use memoryd::server::{self, DaemonHandle, ServerState};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

async fn start(tmp: &TempDir, resolver: Arc<dyn RepoResolver>) -> (DaemonHandle, DaemonClient) {
    let config = helpers::test_config(tmp.path());
    let client = DaemonClient::from_config(&config);
    let handle = server::start(config, resolver, None).await.unwrap();
    (handle, client)
}

/// Send raw lines over one connection and collect one reply per line.
async fn exchange(socket: &std::path::Path, lines: &[&str]) -> Vec<Value> {
    let stream = UnixStream::connect(socket).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader).lines();
    let mut replies = Vec::new();
    for line in lines {
        writer.write_all(line.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
        let reply = reader.next_line().await.unwrap().expect("reply line");
        replies.push(serde_json::from_str(&reply).unwrap());
    }
    replies
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn save_then_search_over_the_socket() {
    let tmp = TempDir::new().unwrap();
    let (handle, client) = start(&tmp, helpers::MockResolver::fixed("acme/api")).await;
    assert_eq!(handle.state(), ServerState::Listening);

    assert!(client.ping().await);

    let mut learning = helpers::repo_learning(
        "acme/api",
        "Error handling in handlers",
        "Degrade to empty results on backend failure.",
    );
    learning.confidence = Confidence::High;
    learning.tags = vec!["errors".into()];
    let id = client.save_learning(&learning).await.expect("saved id");

    let global = helpers::global_learning("Error handling everywhere", "Never panic in a daemon.");
    client.save_learning(&global).await.expect("saved global id");

    let results = client
        .search_learnings("/work/api", Some("error handling"), 10, None)
        .await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, id);
    assert_eq!(results[0].confidence, Confidence::High);
    assert_eq!(results[0].tags, vec!["errors".to_string()]);
    assert_eq!(results[1].scope_level, Scope::Global);

    let only_global = client
        .search_learnings("/work/api", Some("error"), 10, Some(Scope::Global))
        .await;
    assert_eq!(only_global.len(), 1);

    assert_eq!(
        client.get_repo_identifier("/work/api").await.as_deref(),
        Some("acme/api")
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_connection_carries_many_requests_in_order() {
    let tmp = TempDir::new().unwrap();
    let (handle, _client) = start(&tmp, helpers::MockResolver::fixed("acme/api")).await;

    let replies = exchange(
        handle.socket_path(),
        &[
            r#"{"method":"ping"}"#,
            "this is not json",
            r#"{"method":"drop_tables","params":{}}"#,
            r#"{"method":"save_learning","params":{"repo_identifier":"acme/api","title":"","content":"x"}}"#,
            r#"{"method":"search_learnings","params":{"cwd":"/work/api","scope_filter":"planet"}}"#,
            r#"{"method":"get_repo_identifier","params":{"cwd":"/work/api"}}"#,
            r#"{"method":"init_db","params":null}"#,
        ],
    )
    .await;

    assert_eq!(replies[0]["status"], "ok");
    assert!(replies[0]["timestamp"].as_f64().unwrap() > 0.0);
    assert_eq!(replies[1]["code"], "invalid_request");
    assert_eq!(replies[2]["code"], "unknown_method");
    assert_eq!(replies[3]["code"], "invalid_request");
    assert_eq!(replies[4]["code"], "invalid_request");
    assert_eq!(replies[5]["repo_id"], "acme/api");
    assert_eq!(replies[6]["success"], true);
    assert!(replies[6]["schema_version"].as_u64().unwrap() >= 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resolution_failure_falls_back_to_folder_name() {
    let tmp = TempDir::new().unwrap();
    let resolver = helpers::MockResolver::failing();
    let (handle, client) = start(&tmp, resolver.clone()).await;

    assert_eq!(
        client.get_repo_identifier("/home/dev/widgets").await.as_deref(),
        Some("widgets")
    );
    // Failures are not cached.
    client.get_repo_identifier("/home/dev/widgets").await;
    assert_eq!(resolver.calls(), 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repository_identifier_is_cached_between_requests() {
    let tmp = TempDir::new().unwrap();
    let resolver = helpers::MockResolver::fixed("acme/api");
    let (handle, client) = start(&tmp, resolver.clone()).await;

    for _ in 0..3 {
        client.get_repo_identifier("/work/api").await.unwrap();
    }
    client.search_learnings("/work/api", None, 5, None).await;
    assert_eq!(resolver.calls(), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queue_extraction_reports_back_pressure() {
    let tmp = TempDir::new().unwrap();
    let mut config = helpers::test_config(tmp.path());
    config.queue.capacity = 1;
    let client = DaemonClient::from_config(&config);
    // An extractor that never finishes keeps the worker busy on the first job.
    let blocking: Arc<dyn Extractor> = Arc::new(StuckExtractor);
    let handle = server::start(config, helpers::MockResolver::fixed("acme/api"), Some(blocking))
        .await
        .unwrap();

    let mut statuses = Vec::new();
    for _ in 0..4 {
        statuses.push(client.queue_extraction(helpers::transcript(12), "/work/api").await);
    }
    assert!(matches!(statuses[0], QueueStatus::Queued { .. }));
    assert!(statuses.contains(&QueueStatus::Rejected {
        code: "queue_full".into()
    }));

    handle.shutdown().await.unwrap();
}

struct StuckExtractor;

#[async_trait::async_trait]
impl Extractor for StuckExtractor {
    async fn extract(
        &self,
        _transcript: &str,
        _existing: &[memoryd::memory::types::Learning],
    ) -> memoryd::Result<Vec<memoryd::extraction::ExtractedLearning>> {
        std::future::pending().await
    }

    fn name(&self) -> &'static str {
        "stuck"
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_daemon_is_refused_while_first_is_live() {
    let tmp = TempDir::new().unwrap();
    let (handle, client) = start(&tmp, helpers::MockResolver::fixed("acme/api")).await;

    let err = server::start(
        helpers::test_config(tmp.path()),
        helpers::MockResolver::fixed("acme/api"),
        None,
    )
    .await
    .err()
    .expect("second start must fail");
    assert!(err.to_string().contains("already running"), "{err:#}");
    assert!(client.ping().await, "first daemon keeps serving");

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_removes_socket_and_pid_file() {
    let tmp = TempDir::new().unwrap();
    let config = helpers::test_config(tmp.path());
    let pid_path = config.resolved_pid_path();
    let (handle, client) = start(&tmp, helpers::MockResolver::fixed("acme/api")).await;
    let socket = handle.socket_path().to_path_buf();
    assert!(client.is_daemon_running(&pid_path).await);

    handle.shutdown().await.unwrap();

    assert!(!socket.exists());
    assert!(!pid_path.exists());
    assert!(!client.ping().await);
    assert!(!client.is_daemon_running(&pid_path).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_socket_and_pid_file_are_replaced() {
    let tmp = TempDir::new().unwrap();
    let config = helpers::test_config(tmp.path());
    std::fs::write(config.resolved_pid_path(), "999999\n").unwrap();
    drop(std::os::unix::net::UnixListener::bind(config.resolved_socket_path()).unwrap());

    let (handle, client) = start(&tmp, helpers::MockResolver::fixed("acme/api")).await;
    assert!(client.ping().await);
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_schema_refuses_start_without_auto_init() {
    let tmp = TempDir::new().unwrap();
    let mut config = helpers::test_config(tmp.path());
    config.storage.auto_init = false;
    let socket = config.resolved_socket_path();
    let pid_path = config.resolved_pid_path();

    let err = server::start(config, helpers::MockResolver::fixed("acme/api"), None)
        .await
        .err()
        .expect("start must fail");
    assert!(err.to_string().contains("init-db"), "{err:#}");
    assert!(!socket.exists());
    assert!(!pid_path.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn init_db_through_the_client() {
    let tmp = TempDir::new().unwrap();
    let (handle, client) = start(&tmp, helpers::MockResolver::fixed("acme/api")).await;

    let version = client.init_db().await.unwrap();
    assert_eq!(version, memoryd::db::migrations::CURRENT_SCHEMA_VERSION);
    // Idempotent.
    assert_eq!(client.init_db().await.unwrap(), version);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn save_response_shape_on_success() {
    let tmp = TempDir::new().unwrap();
    let (handle, _client) = start(&tmp, helpers::MockResolver::fixed("acme/api")).await;

    let replies = exchange(
        handle.socket_path(),
        &[&json!({
            "method": "save_learning",
            "params": {
                "repo_identifier": "acme/api",
                "title": "Directory rule",
                "content": "Migrations live here.",
                "scope": "directory",
                "directory_path": "db/migrations",
                "type": "constraint",
                "tags": null,
            }
        })
        .to_string()],
    )
    .await;

    let id = replies[0]["id"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok());
    assert!(replies[0].get("error").is_none());

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_line_is_rejected_and_the_connection_survives() {
    let tmp = TempDir::new().unwrap();
    let mut config = helpers::test_config(tmp.path());
    config.server.max_line_bytes = 1024;
    let handle = server::start(config, helpers::MockResolver::fixed("acme/api"), None)
        .await
        .unwrap();

    let huge = format!(
        r#"{{"method":"search_learnings","params":{{"cwd":"/work/api","query":"{}"}}}}"#,
        "x".repeat(10_000)
    );
    let replies = exchange(handle.socket_path(), &[&huge, r#"{"method":"ping"}"#]).await;
    assert_eq!(replies[0]["code"], "invalid_request");
    assert_eq!(replies[1]["status"], "ok");

    handle.shutdown().await.unwrap();
}
