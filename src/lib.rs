//! Sitemap keyword enrichment pipeline: ingest sitemap feeds, extract
//! candidate keywords from URL paths, enrich unique keywords with
//! trend/volume metrics from a rate-limited analytics service, and
//! forward the enriched records to a downstream ingestion endpoint.
//!
//! The crate's core is the concurrent orchestration engine
//! ([`pipeline::Orchestrator`], component C7) and the supporting
//! primitives it's built from: the atomic concurrency limiter
//! ([`limiter`], C1), the rate limiter pool ([`rate_limit`], C2), the
//! adaptive concurrency manager ([`adaptive`], C3), the idempotency
//! store ([`store`], C4), the submission pool ([`submission`], C5),
//! the startup retry processor ([`pipeline::RetryProcessor`], C6), the
//! generic worker pool ([`worker_pool`], C8), and the analytics
//! response converter ([`converter`], C9).

pub mod adaptive;
pub mod collaborators;
pub mod config;
pub mod converter;
pub mod error;
pub mod limiter;
pub mod pipeline;
pub mod rate_limit;
pub mod store;
pub mod submission;
pub mod worker_pool;

pub use adaptive::ConcurrencyManager;
pub use config::{ConcurrencyConfig, PipelineConfig};
pub use error::{PipelineError, PipelineResult, UpstreamError};
pub use limiter::AtomicLimiter;
pub use pipeline::{Orchestrator, RetryProcessor, RunReport, SitemapResult};
pub use rate_limit::RateLimiterPool;
pub use store::{EncryptedStore, Tracker};
pub use submission::SubmissionPool;
