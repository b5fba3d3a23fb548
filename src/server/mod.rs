//! Unix-socket daemon: startup, accept loop, draining shutdown.
//!
//! [`start`] runs the startup sequence and returns a [`DaemonHandle`];
//! [`serve`] wraps it with the production resolver and extractor and runs
//! until SIGINT or SIGTERM.

pub mod handlers;
pub mod health;
pub mod pidfile;
pub mod protocol;

pub use handlers::{Daemon, SaveOutcome, SearchOutcome};
pub use protocol::Response;
pub use health::HealthSnapshot;
pub use pidfile::PidFile;

use anyhow::{bail, Context, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::config::DaemonConfig;
use crate::db::{self, migrations, ConnectionPool, SchemaStatus};
use crate::error::DaemonError;
use crate::extraction::worker::ExtractionWorker;
use crate::extraction::{ExtractionQueue, Extractor, OpenAiExtractor};
use crate::repo::{GitResolver, RepoCache, RepoResolver};

/// Lifecycle of the request server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Listening,
    Draining,
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::Listening => "listening",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        })
    }
}

/// A running daemon.
pub struct DaemonHandle {
    daemon: Arc<Daemon>,
    socket_path: PathBuf,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ServerState>,
    task: JoinHandle<()>,
}

impl DaemonHandle {
    pub fn daemon(&self) -> &Arc<Daemon> {
        &self.daemon
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Drain connections, stop background tasks, close the pool and remove
    /// the socket and PID files.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await.context("server task failed")?;
        Ok(())
    }
}

/// Start with the git resolver and, when an API key is configured, the
/// OpenAI-compatible extractor; serve until SIGINT or SIGTERM.
pub async fn serve(config: DaemonConfig) -> Result<()> {
    let resolver: Arc<dyn RepoResolver> = Arc::new(GitResolver::default());
    let extractor = if config.extraction.enabled {
        OpenAiExtractor::from_env(&config.extraction)?.map(|e| Arc::new(e) as Arc<dyn Extractor>)
    } else {
        tracing::info!("automatic extraction disabled");
        None
    };

    let handle = start(config, resolver, extractor).await?;
    wait_for_signal().await?;
    tracing::info!("shutdown signal received");
    handle.shutdown().await
}

async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for SIGINT")?,
        _ = term.recv() => {}
    }
    Ok(())
}

/// Run the startup sequence and begin accepting connections.
///
/// Fatal: a live daemon already owns the PID file, the schema is missing or
/// outdated with `storage.auto_init` off, or the socket cannot be bound. An
/// unreachable database is not fatal; requests degrade until it returns.
pub async fn start(
    config: DaemonConfig,
    resolver: Arc<dyn RepoResolver>,
    extractor: Option<Arc<dyn Extractor>>,
) -> Result<DaemonHandle> {
    let config = Arc::new(config);
    let (state_tx, state_rx) = watch::channel(ServerState::Starting);
    let socket_path = config.resolved_socket_path();
    let db_path = config.resolved_db_path();
    tracing::info!(socket = %socket_path.display(), db = %db_path.display(), state = %ServerState::Starting, "starting memory daemon");

    let pidfile = PidFile::acquire(&config.resolved_pid_path(), &socket_path)?;

    if let Some(parent) = db_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!(dir = %parent.display(), error = %e, "failed to create database directory");
        }
    }
    let pool = ConnectionPool::new(&db_path, config.pool.clone());
    if let Err(e) = pool.warm().await {
        tracing::warn!(error = %e, "database unavailable at startup, running degraded");
    }
    prepare_schema(&pool, config.storage.auto_init).await?;

    let listener = bind_socket(&socket_path)?;

    let cache = Arc::new(RepoCache::new(resolver, config.cache.ttl()));
    let (queue, jobs) = ExtractionQueue::new(config.queue.capacity);
    let daemon = Arc::new(Daemon::new(
        pool.clone(),
        Arc::clone(&cache),
        queue,
        Arc::clone(&config),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ExtractionWorker::new(pool.clone(), cache, extractor, config.extraction.clone());
    let worker_task = tokio::spawn(worker.run(jobs, shutdown_rx.clone()));
    let health_task = tokio::spawn(health::run_health_loop(
        Arc::clone(&daemon),
        Duration::from_secs(config.health.interval_secs),
        shutdown_rx.clone(),
    ));

    let _ = state_tx.send(ServerState::Listening);
    tracing::info!(socket = %socket_path.display(), pid = pidfile.pid(), state = %ServerState::Listening, "memory daemon ready");

    let task = tokio::spawn(run_server(ServerRun {
        listener,
        daemon: Arc::clone(&daemon),
        socket_path: socket_path.clone(),
        pidfile,
        state: state_tx,
        shutdown: shutdown_rx,
        background: vec![worker_task, health_task],
    }));

    Ok(DaemonHandle {
        daemon,
        socket_path,
        shutdown: shutdown_tx,
        state: state_rx,
        task,
    })
}

/// Check the schema; migrate when allowed, refuse to start otherwise.
async fn prepare_schema(pool: &ConnectionPool, auto_init: bool) -> Result<()> {
    let status = match pool.run(|conn| Ok(db::check_schema(conn)?)).await {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!(error = %e, "schema check skipped, database unavailable");
            return Ok(());
        }
    };

    match status {
        SchemaStatus::Ready(version) => {
            tracing::info!(schema_version = version, "schema ready");
            Ok(())
        }
        SchemaStatus::Missing | SchemaStatus::Outdated(_) if !auto_init => {
            bail!("database schema is {status:?} and storage.auto_init is off; run `memoryd init-db`")
        }
        SchemaStatus::Missing | SchemaStatus::Outdated(_) => {
            let version = pool
                .run(|conn| {
                    migrations::run_migrations(conn)
                        .map_err(|e| DaemonError::Schema(e.to_string()))
                })
                .await
                .context("failed to migrate database schema")?;
            tracing::info!(schema_version = version, "schema migrated");
            Ok(())
        }
    }
}

/// Remove a leftover socket file and bind a fresh one, owner-only.
fn bind_socket(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(socket = %path.display(), "removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("failed to remove stale socket {}", path.display()))
        }
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("failed to restrict permissions on {}", path.display()))?;
    Ok(listener)
}

/// Everything the accept loop owns until shutdown completes.
struct ServerRun {
    listener: UnixListener,
    daemon: Arc<Daemon>,
    socket_path: PathBuf,
    pidfile: PidFile,
    state: watch::Sender<ServerState>,
    shutdown: watch::Receiver<bool>,
    background: Vec<JoinHandle<()>>,
}

async fn run_server(run: ServerRun) {
    let ServerRun {
        listener,
        daemon,
        socket_path,
        pidfile,
        state,
        mut shutdown,
        background,
    } = run;
    let config = Arc::clone(&daemon.config);
    let drain_timeout = Duration::from_millis(config.server.drain_timeout_ms);
    let read_timeout = Duration::from_millis(config.server.read_timeout_ms);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    connections.spawn(handle_connection(
                        stream,
                        Arc::clone(&daemon),
                        read_timeout,
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            // Reap finished connection tasks so the set does not grow.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    let _ = state.send(ServerState::Draining);
    drop(listener);
    tracing::info!(in_flight = connections.len(), state = %ServerState::Draining, "draining connections");
    let drained = tokio::time::timeout(drain_timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(remaining = connections.len(), "drain timeout, aborting connections");
        connections.shutdown().await;
    }

    for mut task in background {
        if tokio::time::timeout(drain_timeout, &mut task).await.is_err() {
            tracing::warn!("background task did not stop in time, aborting");
            task.abort();
        }
    }

    daemon.pool.close();
    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::warn!(socket = %socket_path.display(), error = %e, "failed to remove socket");
    }
    drop(pidfile);
    let _ = state.send(ServerState::Stopped);
    tracing::info!(state = %ServerState::Stopped, "memory daemon stopped");
}

/// One request line off the wire.
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line(String),
    /// Longer than the limit; the rest of the line has been discarded.
    TooLong,
    Eof,
}

/// Read one newline-terminated line of at most `max` bytes.
async fn read_request_line<R>(reader: &mut R, max: usize) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader).take(max as u64 + 1).read_until(b'\n', &mut buf).await?;
    if read == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > max {
        loop {
            let mut rest = Vec::new();
            let read = (&mut *reader).take(max as u64).read_until(b'\n', &mut rest).await?;
            if read == 0 || rest.last() == Some(&b'\n') {
                break;
            }
        }
        return Ok(LineRead::TooLong);
    }
    Ok(LineRead::Line(String::from_utf8_lossy(&buf).into_owned()))
}

/// Serve one client: requests are answered in order until EOF, idle
/// timeout, or shutdown between requests.
async fn handle_connection(
    stream: UnixStream,
    daemon: Arc<Daemon>,
    read_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let max_line = daemon.config.server.max_line_bytes;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        if *shutdown.borrow() {
            break;
        }
        let read = tokio::select! {
            _ = shutdown.changed() => break,
            read = tokio::time::timeout(read_timeout, read_request_line(&mut reader, max_line)) => read,
        };
        let response = match read {
            Ok(Ok(LineRead::Line(line))) if line.trim().is_empty() => continue,
            Ok(Ok(LineRead::Line(line))) => daemon.handle_line(&line).await,
            Ok(Ok(LineRead::TooLong)) => {
                tracing::warn!(max_bytes = max_line, "rejected oversized request line");
                Response::error(&DaemonError::InvalidRequest(format!(
                    "request line exceeds {max_line} bytes"
                )))
            }
            Ok(Ok(LineRead::Eof)) => break,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "connection read failed");
                break;
            }
            Err(_) => {
                tracing::debug!(timeout_ms = read_timeout.as_millis() as u64, "closing idle connection");
                break;
            }
        };

        if let Err(e) = writer.write_all(&response.to_line()).await {
            tracing::debug!(error = %e, "client went away before the response");
            break;
        }
    }
}
