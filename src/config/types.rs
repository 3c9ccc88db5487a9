//! Core configuration types for the pipeline (spec §6 CLI/environment surface).

use std::path::PathBuf;

/// Known-weak encryption keys that config validation must reject.
pub const WEAK_ENCRYPTION_KEYS: &[&str] = &["default-sitemap-monitor-key", "test-encryption-key"];

/// Analytics keyword-cap for a single batch (`B_analytics` in spec §4.6/§4.7).
pub const DEFAULT_ANALYTICS_BATCH_SIZE: usize = 8;

/// Fully validated pipeline configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Downstream ingestion endpoint base URL.
    pub backend_base_url: String,
    /// `X-API-Key` sent on downstream submissions.
    pub backend_api_key: String,
    /// Primary analytics endpoint(s); may be more than one for fan-out.
    pub trends_api_urls: Vec<String>,
    /// Optional secondary analytics endpoint (dual-endpoint mode).
    pub trends_api_url_secondary: Option<String>,
    /// Passphrase the encrypted store derives its key from.
    pub encryption_key: String,
    /// Downstream submit batch size, `[1, 1000]`.
    pub batch_size: usize,
    /// Top-level worker-pool size, `[1, 50]`.
    pub workers: usize,
    /// Root directory for the encrypted idempotency store.
    pub data_dir: PathBuf,
    /// Analytics keyword-cap per batch.
    pub analytics_batch_size: usize,
}

/// Tunable concurrency knobs, independently mutable at runtime by
/// [`crate::adaptive::ConcurrencyManager`] (spec §4.3).
#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    pub main_workers: usize,
    pub parse_workers: usize,
    pub extract_workers: usize,
    pub api_workers: usize,
    pub api_rps: f64,
    pub sitemap_rps: f64,
    pub download_timeout: std::time::Duration,
    pub api_timeout: std::time::Duration,
    pub max_concurrent_per_api: usize,
    pub concurrency_timeout: std::time::Duration,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            main_workers: 15,
            parse_workers: 10,
            extract_workers: num_cpus_fallback().clamp(1, 16),
            api_workers: 2,
            api_rps: 1.0,
            sitemap_rps: 30.0,
            download_timeout: std::time::Duration::from_secs(10),
            api_timeout: std::time::Duration::from_secs(60),
            max_concurrent_per_api: 5,
            concurrency_timeout: std::time::Duration::from_secs(30),
        }
    }
}

impl ConcurrencyConfig {
    pub const MAIN_WORKERS_RANGE: (usize, usize) = (5, 20);
    pub const PARSE_WORKERS_RANGE: (usize, usize) = (3, 15);
    pub const EXTRACT_WORKERS_MAX: usize = 16;
    pub const API_WORKERS_RANGE: (usize, usize) = (1, 3);
    pub const API_RPS_RANGE: (f64, f64) = (0.5, 2.0);
    pub const SITEMAP_RPS_MAX: f64 = 50.0;

    /// Clamp every field back into its allowed range (spec §4.3 table).
    pub fn clamp_fields(&mut self) {
        self.main_workers = self
            .main_workers
            .clamp(Self::MAIN_WORKERS_RANGE.0, Self::MAIN_WORKERS_RANGE.1);
        self.parse_workers = self
            .parse_workers
            .clamp(Self::PARSE_WORKERS_RANGE.0, Self::PARSE_WORKERS_RANGE.1);
        self.extract_workers = self
            .extract_workers
            .clamp(num_cpus_fallback(), Self::EXTRACT_WORKERS_MAX);
        self.api_workers = self
            .api_workers
            .clamp(Self::API_WORKERS_RANGE.0, Self::API_WORKERS_RANGE.1);
        self.api_rps = self.api_rps.clamp(Self::API_RPS_RANGE.0, Self::API_RPS_RANGE.1);
        self.sitemap_rps = self.sitemap_rps.min(Self::SITEMAP_RPS_MAX).max(0.0);
    }
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}
