//! Atomic concurrency limiter (spec §4.1, component C1).
//!
//! A counted permit guarded by a fixed maximum, acquired via a CAS fast
//! path and a bounded exponential-backoff slow path. Mirrors the
//! lock-free CAS-loop style of the teacher's `crawl_rate_limiter`
//! token bucket, generalized from token accounting to a simple permit
//! count.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::TimeoutAcquire;

const BACKOFF_BASE_MS: u64 = 5;
const BACKOFF_JITTER_MS: u64 = 2;
const BACKOFF_CAP_MS: u64 = 50;

/// Point-in-time counters exposed for observability.
#[derive(Debug, Clone, Copy)]
pub struct LimiterStats {
    pub total_attempts: u64,
    pub total_timeouts: u64,
    pub current: usize,
}

/// CAS-based counted permit with a timed acquire.
///
/// Invariant (spec §3.4): `current` is always in `[0, max]`; it never
/// underflows; `acquires - releases = current`.
#[derive(Debug)]
pub struct AtomicLimiter {
    current: AtomicUsize,
    max: AtomicUsize,
    total_attempts: AtomicU64,
    total_timeouts: AtomicU64,
}

/// RAII guard returned by [`AtomicLimiter::acquire`]. Releases the
/// permit on drop.
#[derive(Debug)]
pub struct Permit {
    limiter: Arc<AtomicLimiter>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

impl AtomicLimiter {
    #[must_use]
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            current: AtomicUsize::new(0),
            max: AtomicUsize::new(max),
            total_attempts: AtomicU64::new(0),
            total_timeouts: AtomicU64::new(0),
        })
    }

    /// Try once to take a permit without blocking.
    fn try_acquire_once(&self) -> bool {
        let max = self.max.load(Ordering::Relaxed);
        let mut current = self.current.load(Ordering::Relaxed);
        loop {
            if current >= max {
                return false;
            }
            match self.current.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Acquire a permit, retrying with bounded exponential backoff+jitter
    /// until success, cancellation, or `deadline` elapses.
    ///
    /// # Errors
    /// Returns [`TimeoutAcquire::Cancelled`] if `cancel` fires first, or
    /// [`TimeoutAcquire::Deadline`] if `deadline` elapses first.
    pub async fn acquire(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        deadline: Duration,
    ) -> Result<Permit, TimeoutAcquire> {
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        if self.try_acquire_once() {
            return Ok(Permit {
                limiter: Arc::clone(self),
            });
        }

        let mut attempt: u32 = 1;
        loop {
            if cancel.is_cancelled() {
                self.total_timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(TimeoutAcquire::Cancelled);
            }
            if started.elapsed() >= deadline {
                self.total_timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(TimeoutAcquire::Deadline);
            }

            let base = BACKOFF_BASE_MS.saturating_mul(u64::from(attempt));
            let jitter = BACKOFF_JITTER_MS.saturating_mul(u64::from(attempt));
            let wait = base.saturating_add(jitter).min(BACKOFF_CAP_MS);

            tokio::select! {
                () = cancel.cancelled() => {
                    self.total_timeouts.fetch_add(1, Ordering::Relaxed);
                    return Err(TimeoutAcquire::Cancelled);
                }
                () = tokio::time::sleep(Duration::from_millis(wait)) => {}
            }

            if self.try_acquire_once() {
                return Ok(Permit {
                    limiter: Arc::clone(self),
                });
            }
            attempt += 1;
        }
    }

    fn release(&self) {
        let mut current = self.current.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                log::warn!("AtomicLimiter::release called with current already at zero");
                return;
            }
            match self.current.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically swap the maximum permit count. In-flight permits are
    /// honored; future acquires observe the new max.
    pub fn update_max(&self, new_max: usize) {
        self.max.store(new_max, Ordering::Release);
    }

    #[must_use]
    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
            current: self.current.load(Ordering::Relaxed),
        }
    }
}
