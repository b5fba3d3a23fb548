use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::ExtractionJob;
use crate::error::{DaemonError, Result};

/// Producer side of the bounded extraction queue. Cloneable.
#[derive(Clone)]
pub struct ExtractionQueue {
    tx: mpsc::Sender<ExtractionJob>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

/// Consumer side, owned by the worker.
pub struct JobReceiver {
    rx: mpsc::Receiver<ExtractionJob>,
    depth: Arc<AtomicUsize>,
}

impl ExtractionQueue {
    /// Create a queue holding at most `capacity` jobs.
    pub fn new(capacity: usize) -> (Self, JobReceiver) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let depth = Arc::new(AtomicUsize::new(0));
        (
            Self {
                tx,
                depth: Arc::clone(&depth),
                capacity,
            },
            JobReceiver { rx, depth },
        )
    }

    /// Append a job without waiting. Returns the queue depth after the push,
    /// or [`DaemonError::QueueFull`] when at capacity.
    pub fn enqueue(&self, job: ExtractionJob) -> Result<usize> {
        // Counted before the send so the worker never decrements below zero.
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        let sent = self.tx.try_send(job);
        if sent.is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        match sent {
            Ok(()) => Ok(depth),
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(cwd = %job.cwd, capacity = self.capacity, "extraction queue full, job rejected");
                Err(DaemonError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(DaemonError::Extraction("extraction worker has stopped".into()))
            }
        }
    }

    /// Jobs waiting to be picked up.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl JobReceiver {
    /// Wait for the next job in FIFO order. `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<ExtractionJob> {
        let job = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(job)
    }

    /// Stop accepting new jobs; already queued ones can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
