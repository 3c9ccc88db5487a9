//! Type-safe builder for [`PipelineConfig`], modeled on the teacher's
//! `CrawlConfigBuilder<State>`: each required field transitions the
//! builder into a new marker state, and `build()` is only reachable
//! once every required field has been supplied.
//!
//! [`load_from_env`] reads the process environment and drives this
//! builder, so both construction paths funnel through the same
//! validation in [`PipelineConfigBuilder::build`], which aggregates
//! every violation into a single error (spec §7 "Configuration / init").

use std::marker::PhantomData;
use std::path::PathBuf;

use super::types::{PipelineConfig, DEFAULT_ANALYTICS_BATCH_SIZE, WEAK_ENCRYPTION_KEYS};
use crate::error::PipelineError;

pub struct WithBackend;
pub struct WithTrends;
pub struct WithEncryptionKey;

pub struct PipelineConfigBuilder<State = ()> {
    backend_base_url: String,
    backend_api_key: String,
    trends_api_urls: Vec<String>,
    trends_api_url_secondary: Option<String>,
    encryption_key: String,
    batch_size: Option<usize>,
    workers: Option<usize>,
    data_dir: PathBuf,
    analytics_batch_size: Option<usize>,
    _phantom: PhantomData<State>,
}

impl Default for PipelineConfigBuilder<()> {
    fn default() -> Self {
        Self {
            backend_base_url: String::new(),
            backend_api_key: String::new(),
            trends_api_urls: Vec::new(),
            trends_api_url_secondary: None,
            encryption_key: String::new(),
            batch_size: None,
            workers: None,
            data_dir: PathBuf::from("./data"),
            analytics_batch_size: None,
            _phantom: PhantomData,
        }
    }
}

impl PipelineConfig {
    /// Start a typestate-guarded builder for [`PipelineConfig`].
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder<()> {
        PipelineConfigBuilder::default()
    }
}

impl PipelineConfigBuilder<()> {
    #[must_use]
    pub fn backend(self, base_url: impl Into<String>, api_key: impl Into<String>) -> PipelineConfigBuilder<WithBackend> {
        PipelineConfigBuilder {
            backend_base_url: base_url.into(),
            backend_api_key: api_key.into(),
            trends_api_urls: self.trends_api_urls,
            trends_api_url_secondary: self.trends_api_url_secondary,
            encryption_key: self.encryption_key,
            batch_size: self.batch_size,
            workers: self.workers,
            data_dir: self.data_dir,
            analytics_batch_size: self.analytics_batch_size,
            _phantom: PhantomData,
        }
    }
}

impl PipelineConfigBuilder<WithBackend> {
    #[must_use]
    pub fn trends(self, primary: Vec<String>, secondary: Option<String>) -> PipelineConfigBuilder<WithTrends> {
        PipelineConfigBuilder {
            backend_base_url: self.backend_base_url,
            backend_api_key: self.backend_api_key,
            trends_api_urls: primary,
            trends_api_url_secondary: secondary,
            encryption_key: self.encryption_key,
            batch_size: self.batch_size,
            workers: self.workers,
            data_dir: self.data_dir,
            analytics_batch_size: self.analytics_batch_size,
            _phantom: PhantomData,
        }
    }
}

impl PipelineConfigBuilder<WithTrends> {
    #[must_use]
    pub fn encryption_key(self, key: impl Into<String>) -> PipelineConfigBuilder<WithEncryptionKey> {
        PipelineConfigBuilder {
            backend_base_url: self.backend_base_url,
            backend_api_key: self.backend_api_key,
            trends_api_urls: self.trends_api_urls,
            trends_api_url_secondary: self.trends_api_url_secondary,
            encryption_key: key.into(),
            batch_size: self.batch_size,
            workers: self.workers,
            data_dir: self.data_dir,
            analytics_batch_size: self.analytics_batch_size,
            _phantom: PhantomData,
        }
    }
}

impl PipelineConfigBuilder<WithEncryptionKey> {
    #[must_use]
    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = Some(n);
        self
    }

    #[must_use]
    pub fn workers(mut self, n: usize) -> Self {
        self.workers = Some(n);
        self
    }

    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    #[must_use]
    pub fn analytics_batch_size(mut self, n: usize) -> Self {
        self.analytics_batch_size = Some(n);
        self
    }

    /// Validate every field and produce a [`PipelineConfig`], aggregating
    /// every violation into one [`PipelineError::Config`] instead of
    /// failing on the first.
    ///
    /// # Errors
    /// Returns [`PipelineError::Config`] if any required field is blank
    /// or any numeric field is out of range.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let mut problems = Vec::new();

        if self.backend_base_url.is_empty() {
            problems.push("BACKEND_BASE_URL is required".to_string());
        }
        if self.backend_api_key.is_empty() {
            problems.push("BACKEND_API_KEY is required".to_string());
        }
        if self.trends_api_urls.is_empty() {
            problems.push("TRENDS_API_URL is required".to_string());
        }
        if self.encryption_key.is_empty() {
            problems.push("ENCRYPTION_KEY is required".to_string());
        } else {
            if self.encryption_key.len() < 16 {
                problems.push("ENCRYPTION_KEY must be at least 16 characters".to_string());
            }
            if WEAK_ENCRYPTION_KEYS.contains(&self.encryption_key.as_str()) {
                problems.push("ENCRYPTION_KEY must not equal a known weak default".to_string());
            }
        }

        let batch_size = match self.batch_size {
            Some(n) if (1..=1000).contains(&n) => n,
            Some(_) => {
                problems.push("BATCH_SIZE must be an integer in [1, 1000]".to_string());
                100
            }
            None => 100,
        };

        let workers = match self.workers {
            Some(n) if (1..=50).contains(&n) => n,
            Some(_) => {
                problems.push("WORKERS must be an integer in [1, 50]".to_string());
                10
            }
            None => 10,
        };

        let analytics_batch_size = self
            .analytics_batch_size
            .filter(|n| (1..=10).contains(n))
            .unwrap_or(DEFAULT_ANALYTICS_BATCH_SIZE);

        if !problems.is_empty() {
            return Err(PipelineError::Config(problems.join("; ")));
        }

        Ok(PipelineConfig {
            backend_base_url: self.backend_base_url,
            backend_api_key: self.backend_api_key,
            trends_api_urls: self.trends_api_urls,
            trends_api_url_secondary: self.trends_api_url_secondary,
            encryption_key: self.encryption_key,
            batch_size,
            workers,
            data_dir: self.data_dir,
            analytics_batch_size,
        })
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Loads and validates a [`PipelineConfig`] from the process environment,
/// driving [`PipelineConfigBuilder`] through its required states.
///
/// # Errors
/// Returns [`PipelineError::Config`] with every violation joined into one
/// message when required keys are missing or fail validation.
pub fn load_from_env() -> Result<PipelineConfig, PipelineError> {
    let trends_api_urls: Vec<String> = env_var("TRENDS_API_URL")
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let mut builder = PipelineConfig::builder()
        .backend(
            env_var("BACKEND_BASE_URL").unwrap_or_default(),
            env_var("BACKEND_API_KEY").unwrap_or_default(),
        )
        .trends(trends_api_urls, env_var("TRENDS_API_URL_SECONDARY"))
        .encryption_key(env_var("ENCRYPTION_KEY").unwrap_or_default())
        .data_dir(env_var("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("./data")));

    if let Some(raw) = env_var("BATCH_SIZE") {
        builder = builder.batch_size(raw.parse::<usize>().unwrap_or(0));
    }
    if let Some(raw) = env_var("WORKERS") {
        builder = builder.workers(raw.parse::<usize>().unwrap_or(0));
    }
    if let Some(n) = env_var("ANALYTICS_BATCH_SIZE").and_then(|raw| raw.parse::<usize>().ok()) {
        builder = builder.analytics_batch_size(n);
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "BACKEND_BASE_URL",
            "BACKEND_API_KEY",
            "TRENDS_API_URL",
            "TRENDS_API_URL_SECONDARY",
            "ENCRYPTION_KEY",
            "BATCH_SIZE",
            "WORKERS",
            "DATA_DIR",
            "ANALYTICS_BATCH_SIZE",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn missing_required_keys_aggregate_into_one_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let err = load_from_env().expect_err("expected config error");
        let msg = err.to_string();
        assert!(msg.contains("BACKEND_BASE_URL"));
        assert!(msg.contains("BACKEND_API_KEY"));
        assert!(msg.contains("TRENDS_API_URL"));
        assert!(msg.contains("ENCRYPTION_KEY"));
    }

    #[test]
    fn weak_encryption_key_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            std::env::set_var("BACKEND_BASE_URL", "https://example.com");
            std::env::set_var("BACKEND_API_KEY", "key");
            std::env::set_var("TRENDS_API_URL", "https://trends.example.com");
            std::env::set_var("ENCRYPTION_KEY", "test-encryption-key");
        }
        let err = load_from_env().expect_err("expected weak key rejection");
        assert!(err.to_string().contains("weak default"));
        clear_env();
    }

    #[test]
    fn valid_config_loads() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            std::env::set_var("BACKEND_BASE_URL", "https://example.com");
            std::env::set_var("BACKEND_API_KEY", "key");
            std::env::set_var("TRENDS_API_URL", "https://trends.example.com,https://trends2.example.com");
            std::env::set_var("ENCRYPTION_KEY", "a-sufficiently-long-passphrase");
            std::env::set_var("BATCH_SIZE", "250");
        }
        let cfg = load_from_env().expect("expected valid config");
        assert_eq!(cfg.batch_size, 250);
        assert_eq!(cfg.trends_api_urls.len(), 2);
        clear_env();
    }

    #[test]
    fn builder_enforces_required_fields_at_compile_time_then_validates_at_build() {
        let result = PipelineConfig::builder()
            .backend("https://example.com", "key")
            .trends(vec!["https://trends.example.com".to_string()], None)
            .encryption_key("a-sufficiently-long-passphrase")
            .batch_size(50)
            .workers(5)
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn builder_rejects_out_of_range_batch_size() {
        let err = PipelineConfig::builder()
            .backend("https://example.com", "key")
            .trends(vec!["https://trends.example.com".to_string()], None)
            .encryption_key("a-sufficiently-long-passphrase")
            .batch_size(5000)
            .build()
            .expect_err("out-of-range batch size should fail");
        assert!(err.to_string().contains("BATCH_SIZE"));
    }
}
