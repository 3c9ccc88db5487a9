//! Generic worker pool (spec §4.8, component C8): a fixed set of
//! workers draining a job channel into a result channel, with a
//! per-task adaptive timeout and a clamped overall run deadline.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Minimum and maximum overall run timeout (spec §4.8).
const MIN_RUN_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const MAX_RUN_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// One unit of work submitted to the pool.
pub trait Task: Send + 'static {
    fn id(&self) -> String;
    /// Size hint driving the per-task timeout multiplier (spec §4.8);
    /// `1.0` means "use the base timeout unscaled".
    fn size_hint(&self) -> f64 {
        1.0
    }
    fn execute(
        self: Box<Self>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, String>> + Send>>;
}

/// Outcome of one [`Task::execute`] call.
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub task_id: String,
    pub ok: bool,
    pub error: Option<String>,
    pub data: Option<serde_json::Value>,
    pub timestamp: SystemTime,
}

/// Multiplies `base_timeout` by a task's size hint, clamped to
/// `[base_timeout, max_timeout]` (spec §4.8).
#[must_use]
pub fn adaptive_timeout(base_timeout: Duration, max_timeout: Duration, size_hint: f64) -> Duration {
    let scaled = base_timeout.mul_f64(size_hint.max(0.0));
    scaled.clamp(base_timeout, max_timeout)
}

/// Clamp `download_timeout * sitemap_count` to `[2min, 15min]` (spec §4.8).
#[must_use]
pub fn overall_run_timeout(download_timeout: Duration, sitemap_count: usize) -> Duration {
    let raw = download_timeout.saturating_mul(sitemap_count.max(1) as u32);
    raw.clamp(MIN_RUN_TIMEOUT, MAX_RUN_TIMEOUT)
}

/// Fixed-size pool of workers pulling `Task`s off a job channel and
/// pushing `WorkerResult`s onto a result channel, until the job
/// channel closes or `cancel` fires.
pub struct WorkerPool {
    job_tx: mpsc::Sender<Box<dyn Task>>,
    result_rx: mpsc::Receiver<WorkerResult>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    #[must_use]
    pub fn spawn(worker_count: usize, base_timeout: Duration, max_timeout: Duration, cancel: CancellationToken) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<Box<dyn Task>>(worker_count.max(1) * 4);
        let (result_tx, result_rx) = mpsc::channel(worker_count.max(1) * 4);
        let job_rx = std::sync::Arc::new(tokio::sync::Mutex::new(job_rx));

        let handles = (0..worker_count.max(1))
            .map(|_| {
                let job_rx = std::sync::Arc::clone(&job_rx);
                let result_tx = result_tx.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let task = {
                            let mut guard = job_rx.lock().await;
                            guard.recv().await
                        };
                        let Some(task) = task else { return };
                        if cancel.is_cancelled() {
                            return;
                        }

                        let task_id = task.id();
                        let timeout = adaptive_timeout(base_timeout, max_timeout, task.size_hint());
                        let result = tokio::select! {
                            () = cancel.cancelled() => Err("cancelled".to_string()),
                            r = tokio::time::timeout(timeout, task.execute(cancel.clone())) => {
                                match r {
                                    Ok(inner) => inner,
                                    Err(_) => Err("task timed out".to_string()),
                                }
                            }
                        };

                        let worker_result = match result {
                            Ok(data) => WorkerResult {
                                task_id,
                                ok: true,
                                error: None,
                                data: Some(data),
                                timestamp: SystemTime::now(),
                            },
                            Err(e) => WorkerResult {
                                task_id,
                                ok: false,
                                error: Some(e),
                                data: None,
                                timestamp: SystemTime::now(),
                            },
                        };
                        if result_tx.send(worker_result).await.is_err() {
                            return;
                        }
                    }
                })
            })
            .collect();

        Self {
            job_tx,
            result_rx,
            handles,
        }
    }

    /// Enqueue a task. Blocks if the job channel is momentarily full.
    ///
    /// # Errors
    /// Returns the task back if every worker has exited and the
    /// channel is closed.
    pub async fn submit(&self, task: Box<dyn Task>) -> Result<(), Box<dyn Task>> {
        self.job_tx.send(task).await.map_err(|e| e.0)
    }

    /// Receive the next result, or `None` once all workers have exited
    /// and the result channel is drained.
    pub async fn recv(&mut self) -> Option<WorkerResult> {
        self.result_rx.recv().await
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        drop(self.job_tx);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
