//! External collaborator contracts (spec §6): the parser, keyword
//! extractor, analytics client, and downstream submitter the core
//! depends on but treats as opaque. Concrete HTTP-backed
//! implementations live in the sibling modules; tests substitute fakes.

pub mod analytics;
pub mod downstream;
pub mod extractor;
pub mod parser;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::limiter::AtomicLimiter;
use crate::pipeline::types::{AnalyticsResponse, SitemapRef};

/// Streams `ExtractedURL`s from one sitemap, format dispatched by the
/// `SitemapRef`'s inferred format (spec §6).
#[async_trait]
pub trait SitemapParser: Send + Sync + 'static {
    async fn parse(
        &self,
        cancel: &CancellationToken,
        sitemap: &SitemapRef,
    ) -> Result<BoxStream<'static, String>, String>;
}

/// Yields candidate keyword strings for one extracted URL (spec §6).
pub trait KeywordExtractor: Send + Sync + 'static {
    fn extract(&self, url: &str) -> Vec<String>;
}

/// Queries search-volume/competition/CPC metrics for up to
/// `B_analytics` keywords at a time (spec §6).
#[async_trait]
pub trait AnalyticsClient: Send + Sync + 'static {
    async fn query(&self, cancel: &CancellationToken, keywords: &[String]) -> Result<AnalyticsResponse, String>;

    /// Identifies the endpoint in use, for C2's per-endpoint rate
    /// limiter keying (spec §4.7 Phase Q).
    fn endpoint(&self) -> &str;

    /// Installs the C1 concurrency limiter this client should gate
    /// `query` against, with the deadline an acquire may block for.
    /// Default no-op: only the capability-typed subset of
    /// implementations that actually front a bounded-concurrency
    /// backend need to override this (spec §9 REDESIGN FLAGS).
    fn set_concurrency_limiter(&self, _limiter: Arc<AtomicLimiter>, _deadline: Duration) {}
}

pub use analytics::HttpAnalyticsClient;
pub use downstream::HttpDownstreamSubmitter;
pub use extractor::PathKeywordExtractor;
pub use parser::HttpSitemapParser;
