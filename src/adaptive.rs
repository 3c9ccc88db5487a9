//! Adaptive concurrency manager (spec §4.3, component C3).
//!
//! Holds the mutable [`ConcurrencyConfig`] behind a shared `RwLock`:
//! many readers take snapshots cheaply, an adjustment takes the
//! exclusive lock. Per-tier EMA latency and cumulative error rate drive
//! at-most-once-per-minute grow/shrink decisions, mirroring the
//! teacher's `DomainHealth`/circuit-breaker bookkeeping
//! (`crawl_engine::circuit_breaker`) generalized from a binary
//! open/closed trip to a continuously tunable worker count.

use std::sync::Mutex as StdMutex;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::config::ConcurrencyConfig;

/// Smoothing factor for the exponential moving average of latency.
const EMA_ALPHA: f64 = 0.2;
/// Minimum spacing between adjustments to either tier.
const ADJUSTMENT_COOLDOWN: Duration = Duration::from_secs(60);

const MAIN_SHRINK_ERROR_RATE: f64 = 0.10;
const MAIN_SHRINK_LATENCY: Duration = Duration::from_secs(5);
const MAIN_GROW_ERROR_RATE: f64 = 0.02;
const MAIN_GROW_LATENCY: Duration = Duration::from_secs(2);

const ANALYTICS_SHRINK_ERROR_RATE: f64 = 0.20;
const ANALYTICS_GROW_ERROR_RATE: f64 = 0.01;
const ANALYTICS_GROW_LATENCY: Duration = Duration::from_secs(10);

/// Which tier an observed (latency, ok) sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Main,
    Analytics,
}

#[derive(Debug, Clone, Copy)]
struct TierMetrics {
    ema_latency_secs: f64,
    error_rate: f64,
    samples: u64,
    last_adjusted: Option<Instant>,
}

impl TierMetrics {
    const fn new() -> Self {
        Self {
            ema_latency_secs: 0.0,
            error_rate: 0.0,
            samples: 0,
            last_adjusted: None,
        }
    }

    fn observe(&mut self, latency: Duration, ok: bool) {
        let latency_secs = latency.as_secs_f64();
        self.ema_latency_secs = if self.samples == 0 {
            latency_secs
        } else {
            EMA_ALPHA * latency_secs + (1.0 - EMA_ALPHA) * self.ema_latency_secs
        };
        // Cumulative error rate as an EMA too, so a long healthy run
        // gradually forgives an old burst of failures.
        let sample_error = if ok { 0.0 } else { 1.0 };
        self.error_rate = if self.samples == 0 {
            sample_error
        } else {
            EMA_ALPHA * sample_error + (1.0 - EMA_ALPHA) * self.error_rate
        };
        self.samples += 1;
    }

    fn cooldown_elapsed(&self) -> bool {
        self.last_adjusted
            .is_none_or(|at| at.elapsed() >= ADJUSTMENT_COOLDOWN)
    }
}

/// Owns the live [`ConcurrencyConfig`] and the per-tier metrics that
/// drive its adjustment (spec §4.3).
pub struct ConcurrencyManager {
    config: RwLock<ConcurrencyConfig>,
    main: StdMutex<TierMetrics>,
    analytics: StdMutex<TierMetrics>,
}

impl ConcurrencyManager {
    #[must_use]
    pub fn new(initial: ConcurrencyConfig) -> Self {
        Self {
            config: RwLock::new(initial),
            main: StdMutex::new(TierMetrics::new()),
            analytics: StdMutex::new(TierMetrics::new()),
        }
    }

    /// Snapshot the current config (shared read lock).
    #[must_use]
    pub fn snapshot(&self) -> ConcurrencyConfig {
        self.config.read().expect("concurrency config lock poisoned").clone()
    }

    /// Record an observed (latency, success) sample for `tier` and,
    /// respecting the one-adjustment-per-minute cooldown, apply the
    /// grow/shrink rule it now satisfies.
    pub fn update_metrics(&self, tier: Tier, latency: Duration, ok: bool) {
        match tier {
            Tier::Main => self.update_main(latency, ok),
            Tier::Analytics => self.update_analytics(latency, ok),
        }
    }

    fn update_main(&self, latency: Duration, ok: bool) {
        let mut metrics = self.main.lock().expect("main tier metrics lock poisoned");
        metrics.observe(latency, ok);
        if !metrics.cooldown_elapsed() {
            return;
        }

        let shrink = metrics.error_rate > MAIN_SHRINK_ERROR_RATE
            || metrics.ema_latency_secs > MAIN_SHRINK_LATENCY.as_secs_f64();
        let grow = metrics.error_rate < MAIN_GROW_ERROR_RATE
            && metrics.ema_latency_secs < MAIN_GROW_LATENCY.as_secs_f64();

        if !shrink && !grow {
            return;
        }

        let mut config = self.config.write().expect("concurrency config lock poisoned");
        if shrink {
            config.main_workers = config.main_workers.saturating_sub(2);
            config.parse_workers = config.parse_workers.saturating_sub(1);
            config.sitemap_rps *= 0.8;
            log::info!(
                "adaptive: shrinking main tier (error_rate={:.3}, latency={:.2}s)",
                metrics.error_rate,
                metrics.ema_latency_secs
            );
        } else {
            config.main_workers += 2;
            config.parse_workers += 1;
            config.sitemap_rps *= 1.2;
            log::info!(
                "adaptive: growing main tier (error_rate={:.3}, latency={:.2}s)",
                metrics.error_rate,
                metrics.ema_latency_secs
            );
        }
        config.clamp_fields();
        metrics.last_adjusted = Some(Instant::now());
    }

    fn update_analytics(&self, latency: Duration, ok: bool) {
        let mut metrics = self.analytics.lock().expect("analytics tier metrics lock poisoned");
        metrics.observe(latency, ok);
        if !metrics.cooldown_elapsed() {
            return;
        }

        let shrink = metrics.error_rate > ANALYTICS_SHRINK_ERROR_RATE;
        let grow = metrics.error_rate < ANALYTICS_GROW_ERROR_RATE
            && metrics.ema_latency_secs < ANALYTICS_GROW_LATENCY.as_secs_f64();

        if !shrink && !grow {
            return;
        }

        let mut config = self.config.write().expect("concurrency config lock poisoned");
        if shrink {
            config.api_workers = config.api_workers.saturating_sub(1).max(1);
            log::info!(
                "adaptive: shrinking analytics tier (error_rate={:.3})",
                metrics.error_rate
            );
        } else {
            config.api_workers += 1;
            log::info!(
                "adaptive: growing analytics tier (error_rate={:.3}, latency={:.2}s)",
                metrics.error_rate,
                metrics.ema_latency_secs
            );
        }
        config.clamp_fields();
        metrics.last_adjusted = Some(Instant::now());
    }
}
