//! Submission pool (spec §4.5, component C5): a fixed-worker,
//! bounded-channel background submitter with per-submit completion
//! callbacks. Generalized from the teacher's `AharonR-downloader`
//! `DownloadEngine` shape (semaphore/channel + atomic stats + spawned
//! workers) from per-item download tasks to per-batch submission tasks,
//! with an explicit callback invoked once per accepted submit instead
//! of an awaited future.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::pipeline::types::EnrichedRecord;

/// Bounded FIFO queue capacity (spec §4.5).
const QUEUE_CAPACITY: usize = 100;
/// Default fixed worker count.
const DEFAULT_WORKERS: usize = 3;

/// Invoked exactly once per accepted `submit()`, with the result of the
/// downstream call (`Ok` on 200/202, `Err` otherwise).
pub type SubmitCallback = Box<dyn FnOnce(Result<(), String>) + Send + 'static>;

/// Implemented by the downstream HTTP collaborator (spec §6
/// "Downstream submitter").
#[async_trait::async_trait]
pub trait BatchSubmitter: Send + Sync + 'static {
    async fn submit_batches(&self, records: &[EnrichedRecord]) -> Result<(), String>;
}

struct SubmissionTask {
    records: Vec<EnrichedRecord>,
    callback: Option<SubmitCallback>,
}

/// Point-in-time submission counters.
#[derive(Debug, Default)]
pub struct SubmissionStats {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}

struct Counters {
    total: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> SubmissionStats {
        SubmissionStats {
            total: self.total.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Fixed-worker pool draining a bounded queue of submission tasks.
pub struct SubmissionPool {
    sender: mpsc::Sender<SubmissionTask>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl SubmissionPool {
    #[must_use]
    pub fn new(submitter: Arc<dyn BatchSubmitter>) -> Self {
        Self::with_worker_count(submitter, DEFAULT_WORKERS)
    }

    #[must_use]
    pub fn with_worker_count(submitter: Arc<dyn BatchSubmitter>, worker_count: usize) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(Counters::new());

        let workers = (0..worker_count.max(1))
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let submitter = Arc::clone(&submitter);
                let counters = Arc::clone(&counters);
                tokio::spawn(async move { Self::worker_loop(id, receiver, submitter, counters).await })
            })
            .collect();

        Self {
            sender,
            workers,
            counters,
        }
    }

    async fn worker_loop(
        worker_id: usize,
        receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<SubmissionTask>>>,
        submitter: Arc<dyn BatchSubmitter>,
        counters: Arc<Counters>,
    ) {
        loop {
            let task = {
                let mut guard = receiver.lock().await;
                guard.recv().await
            };
            let Some(task) = task else {
                log::debug!("submission worker {worker_id} exiting: channel closed");
                return;
            };

            let result = AssertUnwindSafe(submitter.submit_batches(&task.records))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err("submission task panicked".to_string()));

            match &result {
                Ok(()) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    log::warn!("submission worker {worker_id} failed: {e}");
                }
            }

            if let Some(cb) = task.callback {
                cb(result);
            }
        }
    }

    /// Non-blocking enqueue. Returns `false` if the queue is full or the
    /// pool is stopping; the caller should then persist the records as
    /// failed (spec §4.5).
    pub fn submit(&self, records: Vec<EnrichedRecord>, callback: Option<SubmitCallback>) -> bool {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        self.sender
            .try_send(SubmissionTask { records, callback })
            .is_ok()
    }

    #[must_use]
    pub fn stats(&self) -> SubmissionStats {
        self.counters.snapshot()
    }

    /// Close the sender side and wait for all workers to drain
    /// in-flight and queued work.
    pub async fn stop(self) {
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}
