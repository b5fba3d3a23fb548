//! Bounded pool of SQLite connections.
//!
//! A semaphore with `max_size` permits bounds the number of connections on
//! loan. Idle connections are reused most-recently-used first; new ones are
//! opened lazily when no idle connection exists. A loan is a [`PoolGuard`]:
//! dropping the guard returns the connection, or discards it when marked
//! broken, freeing the slot for a replacement.
//!
//! SQLite work is synchronous, so [`ConnectionPool::run`] moves the guard onto
//! the blocking thread pool and arms a watchdog that interrupts the connection
//! once the statement timeout elapses.

use rusqlite::Connection;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolConfig;
use crate::error::{DaemonError, Result};

/// A live connection plus its bookkeeping while owned by the pool.
struct PooledConnection {
    conn: Connection,
    last_used: Instant,
}

struct PoolInner {
    db_path: PathBuf,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<PooledConnection>>,
    open: AtomicUsize,
    closed: AtomicBool,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, VecDeque<PooledConnection>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub in_use: usize,
    pub open: usize,
    pub max: usize,
}

/// Cheaply cloneable handle to a shared connection pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool. No connection is opened until [`warm`](Self::warm) or
    /// the first acquisition.
    pub fn new(db_path: impl AsRef<Path>, config: PoolConfig) -> Self {
        let max = config.max_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                db_path: db_path.as_ref().to_path_buf(),
                permits: Arc::new(Semaphore::new(max)),
                config,
                idle: Mutex::new(VecDeque::new()),
                open: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    /// Borrow a connection, waiting up to the acquisition timeout.
    pub async fn acquire(&self) -> Result<PoolGuard> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DaemonError::PoolClosed);
        }

        let wait = self.inner.config.acquire_timeout();
        let permit = match tokio::time::timeout(wait, self.inner.permits.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DaemonError::PoolClosed),
            Err(_) => {
                tracing::warn!(
                    max = self.inner.config.max_size,
                    wait_ms = wait.as_millis() as u64,
                    "connection pool exhausted"
                );
                return Err(DaemonError::PoolExhausted);
            }
        };

        let reused = self.inner.idle().pop_back();
        let pooled = match reused {
            Some(pooled) => pooled,
            None => self.open_new().await?,
        };

        Ok(PoolGuard {
            conn: Some(pooled),
            pool: Arc::clone(&self.inner),
            broken: false,
            _permit: permit,
        })
    }

    /// Run synchronous database work on a pooled connection.
    ///
    /// The whole closure is bounded by the statement timeout. If it fails and
    /// the connection no longer answers a ping, the connection is discarded.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = self.acquire().await?;

        let interrupt = guard.conn().get_interrupt_handle();
        let armed = Arc::new(Mutex::new(true));
        let watchdog = Watchdog(tokio::spawn({
            let armed = Arc::clone(&armed);
            let limit = self.inner.config.statement_timeout();
            async move {
                tokio::time::sleep(limit).await;
                let armed = armed.lock().unwrap_or_else(|e| e.into_inner());
                if *armed {
                    tracing::warn!(timeout_ms = limit.as_millis() as u64, "interrupting slow statement");
                    interrupt.interrupt();
                }
            }
        }));

        // Disarm before the connection can return to the idle set.
        let joined = tokio::task::spawn_blocking(move || {
            let result = f(guard.conn_mut());
            *armed.lock().unwrap_or_else(|e| e.into_inner()) = false;
            if result.is_err() && !guard.ping() {
                guard.mark_broken();
            }
            (guard, result)
        })
        .await;
        drop(watchdog);

        let (guard, result) = joined?;
        drop(guard);
        result
    }

    /// Open connections until `min_size` are open.
    pub async fn warm(&self) -> Result<usize> {
        let target = self.inner.config.min_size.min(self.inner.config.max_size);
        let mut opened = 0;
        while self.inner.open.load(Ordering::Acquire) < target {
            // Every connection is opened under a permit; none free means the
            // pool is already busy at its bound.
            let Ok(_permit) = self.inner.permits.clone().try_acquire_owned() else {
                break;
            };
            if self.inner.open.load(Ordering::Acquire) >= target {
                break;
            }
            let pooled = self.open_new().await?;
            self.inner.idle().push_back(pooled);
            opened += 1;
        }
        if opened > 0 {
            tracing::info!(opened, open = self.inner.open.load(Ordering::Acquire), "connection pool warmed");
        }
        Ok(opened)
    }

    /// Ping every idle connection, drop the dead ones, then refill to `min_size`.
    /// Connections on loan are left alone. Returns how many were discarded.
    pub async fn prune_idle(&self) -> Result<usize> {
        let candidates = self.inner.idle().len();
        let mut discarded = 0;

        for _ in 0..candidates {
            let Ok(permit) = self.inner.permits.clone().try_acquire_owned() else {
                break;
            };
            let Some(pooled) = self.inner.idle().pop_front() else {
                break;
            };
            let idle_for = pooled.last_used.elapsed();
            let mut guard = PoolGuard {
                conn: Some(pooled),
                pool: Arc::clone(&self.inner),
                broken: false,
                _permit: permit,
            };
            let dead = tokio::task::spawn_blocking(move || {
                if !guard.ping() {
                    guard.mark_broken();
                }
                guard.broken
            })
            .await?;
            if dead {
                tracing::warn!(idle_secs = idle_for.as_secs(), "discarded dead idle connection");
                discarded += 1;
            }
        }

        if !self.inner.closed.load(Ordering::Acquire) {
            self.warm().await?;
        }
        Ok(discarded)
    }

    /// Close the pool: pending and future acquisitions fail, idle connections
    /// are dropped now, loaned ones when their guard drops.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.permits.close();
        let drained: Vec<PooledConnection> = self.inner.idle().drain(..).collect();
        self.inner.open.fetch_sub(drained.len(), Ordering::AcqRel);
        tracing::info!(closed = drained.len(), "connection pool closed");
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.inner.idle().len();
        let open = self.inner.open.load(Ordering::Acquire);
        PoolStats {
            idle,
            in_use: open.saturating_sub(idle),
            open,
            max: self.inner.config.max_size,
        }
    }

    async fn open_new(&self) -> Result<PooledConnection> {
        let path = self.inner.db_path.clone();
        let statement_timeout = self.inner.config.statement_timeout();
        let connect_timeout = self.inner.config.connect_timeout();

        let opening = tokio::task::spawn_blocking(move || {
            crate::db::open_connection(&path, statement_timeout)
        });
        let conn = match tokio::time::timeout(connect_timeout, opening).await {
            Ok(joined) => joined??,
            Err(_) => return Err(DaemonError::Timeout(connect_timeout.as_millis() as u64)),
        };

        let open = self.inner.open.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(open, "opened database connection");
        Ok(PooledConnection {
            conn,
            last_used: Instant::now(),
        })
    }
}

/// Aborts the statement watchdog when `run` finishes or is cancelled.
struct Watchdog(tokio::task::JoinHandle<()>);

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Exclusive loan of one pooled connection.
pub struct PoolGuard {
    conn: Option<PooledConnection>,
    pool: Arc<PoolInner>,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl PoolGuard {
    pub fn conn(&self) -> &Connection {
        &self.pooled().conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self
            .conn
            .as_mut()
            .expect("connection present until guard drops")
            .conn
    }

    /// Discard this connection instead of returning it to the idle set.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// `SELECT 1` liveness probe.
    pub fn ping(&self) -> bool {
        self.conn()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    fn pooled(&self) -> &PooledConnection {
        self.conn
            .as_ref()
            .expect("connection present until guard drops")
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        let Some(mut pooled) = self.conn.take() else {
            return;
        };
        if self.broken || self.pool.closed.load(Ordering::Acquire) {
            let open = self.pool.open.fetch_sub(1, Ordering::AcqRel) - 1;
            if self.broken {
                tracing::warn!(open, "discarding broken connection");
            }
            drop(pooled);
        } else {
            pooled.last_used = Instant::now();
            self.pool.idle().push_back(pooled);
        }
        // `_permit` is released after this body runs.
    }
}
