//! Keyed pool of [`RateLimiter`]/[`AtomicLimiter`] instances.
//!
//! Grounded in the teacher's `DashMap`-indexed per-domain limiter cache
//! (`crawl_engine::rate_limiter::CrawlRateLimiter`): `DashMap::entry`
//! gives the double-checked-locking guarantee from spec §4.2
//! (`getOrCreate*`: read, miss, write, recheck, insert) without a
//! separate read/write lock pair.

use std::sync::Arc;

use dashmap::DashMap;

use super::bucket::RateLimiter;
use crate::limiter::AtomicLimiter;

/// Indexes three limiter families by string key, as spec §4.2 describes:
/// legacy (`rps`), per-endpoint (`endpoint@rps`), and per-endpoint
/// concurrency (`endpoint@maxConcurrent` -> an [`AtomicLimiter`]).
///
/// Ownership is the orchestrator's; limiters are shared only through
/// this pool, never exposed by raw index.
#[derive(Default)]
pub struct RateLimiterPool {
    rate_limiters: DashMap<String, Arc<RateLimiter>>,
    concurrency_limiters: DashMap<String, Arc<AtomicLimiter>>,
}

impl RateLimiterPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Legacy key: `rps` alone (no per-endpoint distinction).
    pub fn get_or_create_legacy(&self, rps: f64) -> Arc<RateLimiter> {
        let key = format!("{rps}");
        self.get_or_create_rate(&key, rps)
    }

    /// Per-endpoint key: `endpoint@rps`.
    pub fn get_or_create_for_endpoint(&self, endpoint: &str, rps: f64) -> Arc<RateLimiter> {
        let key = format!("{endpoint}@{rps}");
        self.get_or_create_rate(&key, rps)
    }

    fn get_or_create_rate(&self, key: &str, rps: f64) -> Arc<RateLimiter> {
        if let Some(existing) = self.rate_limiters.get(key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.rate_limiters
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(RateLimiter::new(rps)))
                .value(),
        )
    }

    /// Per-endpoint concurrency key: `endpoint@maxConcurrent` -> an
    /// [`AtomicLimiter`] (C1).
    pub fn get_or_create_concurrency(&self, endpoint: &str, max_concurrent: usize) -> Arc<AtomicLimiter> {
        let key = format!("{endpoint}@{max_concurrent}");
        if let Some(existing) = self.concurrency_limiters.get(&key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.concurrency_limiters
                .entry(key)
                .or_insert_with(|| AtomicLimiter::new(max_concurrent))
                .value(),
        )
    }

    /// Stop tracking every limiter in the pool.
    pub fn close(&self) {
        self.rate_limiters.clear();
        self.concurrency_limiters.clear();
    }
}
