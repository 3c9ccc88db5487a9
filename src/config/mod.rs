//! Configuration for the sitemap keyword pipeline.
//!
//! [`PipelineConfig`] is loaded once from the environment at startup via
//! [`builder::load_from_env`]; [`ConcurrencyConfig`] is the mutable set
//! of tiered concurrency knobs owned by [`crate::adaptive::ConcurrencyManager`].

pub mod builder;
pub mod types;

pub use builder::{load_from_env, PipelineConfigBuilder, WithBackend, WithEncryptionKey, WithTrends};
pub use types::{ConcurrencyConfig, PipelineConfig, DEFAULT_ANALYTICS_BATCH_SIZE, WEAK_ENCRYPTION_KEYS};
