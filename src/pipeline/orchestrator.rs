//! Pipeline orchestrator (spec §4.7, component C7) — the heart of the
//! system. Drives three strict phases per run, each complete before
//! the next begins: Extract (E), Dedupe & Filter (D), Enrich & Submit
//! (Q). Sitemap-fetch and analytics-batch work is dispatched through
//! the generic [`crate::worker_pool::WorkerPool`] (C8), paced by the
//! rate limiter pool (C2) and bounded by the atomic limiter (C1);
//! concurrency knobs come from the adaptive manager (C3) and idempotency
//! decisions from the tracker (C4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::adaptive::{ConcurrencyManager, Tier};
use crate::collaborators::{AnalyticsClient, KeywordExtractor, SitemapParser};
use crate::converter;
use crate::pipeline::keyword;
use crate::pipeline::prefilter;
use crate::pipeline::types::{EnrichedRecord, ExtractedURL, SitemapRef, Survivor, normalize};
use crate::rate_limit::{RateLimiter, RateLimiterPool};
use crate::store::Tracker;
use crate::submission::SubmissionPool;
use crate::worker_pool::{Task, WorkerPool};

/// Per-sitemap outcome of Phase E.
#[derive(Debug, Clone)]
pub struct SitemapResult {
    pub sitemap_url: String,
    pub success: bool,
    pub error: Option<String>,
    pub url_count: usize,
}

/// Summary of one full pipeline run, enough to decide the process exit
/// code (spec §6: "0 on completion with >= one sitemap successfully
/// enriched").
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub sitemap_results: Vec<SitemapResult>,
    pub keywords_submitted: usize,
    pub keywords_failed: usize,
}

impl RunReport {
    #[must_use]
    pub fn any_sitemap_succeeded(&self) -> bool {
        self.sitemap_results.iter().any(|r| r.success)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SitemapExtraction {
    sitemap: SitemapRef,
    /// Raw (unnormalized) primary keyword per URL, paired with its
    /// source URL — duplicates across URLs are expected and resolved
    /// in Phase D.
    candidates: Vec<(String, ExtractedURL)>,
}

struct SitemapTask {
    sitemap: SitemapRef,
    parser: Arc<dyn SitemapParser>,
    extractor: Arc<dyn KeywordExtractor>,
    rate_limiter: Arc<RateLimiter>,
    download_timeout: Duration,
}

impl Task for SitemapTask {
    fn id(&self) -> String {
        self.sitemap.url.clone()
    }

    fn execute(
        self: Box<Self>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<serde_json::Value, String>> + Send>> {
        Box::pin(async move {
            let timeout = self.download_timeout;
            let ticked = self
                .rate_limiter
                .execute(&cancel, || async {
                    tokio::time::timeout(timeout, extract_sitemap(&*self.parser, &*self.extractor, &self.sitemap, &cancel)).await
                })
                .await;

            let candidates = match ticked {
                None => return Err("cancelled before rate-limit tick".to_string()),
                Some(Err(_)) => return Err("sitemap fetch timed out".to_string()),
                Some(Ok(Err(e))) => return Err(e),
                Some(Ok(Ok(candidates))) => candidates,
            };

            let extraction = SitemapExtraction {
                sitemap: self.sitemap,
                candidates,
            };
            serde_json::to_value(extraction).map_err(|e| e.to_string())
        })
    }
}

async fn extract_sitemap(
    parser: &dyn SitemapParser,
    extractor: &dyn KeywordExtractor,
    sitemap: &SitemapRef,
    cancel: &CancellationToken,
) -> Result<Vec<(String, ExtractedURL)>, String> {
    use futures::StreamExt;

    let mut stream = parser.parse(cancel, sitemap).await?;
    let mut candidates = Vec::new();
    while let Some(url) = stream.next().await {
        let keyword_candidates = extractor.extract(&url);
        if let Some(primary) = keyword::select_primary(&keyword_candidates) {
            candidates.push((
                primary.to_string(),
                ExtractedURL {
                    sitemap: sitemap.clone(),
                    url,
                },
            ));
        }
    }
    Ok(candidates)
}

#[derive(Debug, Serialize, Deserialize)]
struct BatchOutcome {
    batch: Vec<Survivor>,
    keywords_found: Vec<(String, crate::pipeline::types::AnalyticsKeyword)>,
    error: Option<String>,
}

struct BatchTask {
    batch: Vec<Survivor>,
    analytics: Arc<dyn AnalyticsClient>,
    rate_limiter: Arc<RateLimiter>,
    api_timeout: Duration,
}

impl Task for BatchTask {
    fn id(&self) -> String {
        self.batch
            .first()
            .map_or_else(|| "empty-batch".to_string(), |s| s.keyword.clone())
    }

    fn execute(
        self: Box<Self>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<serde_json::Value, String>> + Send>> {
        Box::pin(async move {
            let keywords: Vec<String> = self.batch.iter().map(|s| s.keyword.clone()).collect();
            let api_timeout = self.api_timeout;
            let analytics = Arc::clone(&self.analytics);
            let cancel_for_query = cancel.clone();
            let outcome = self
                .rate_limiter
                .execute(&cancel, || async {
                    tokio::time::timeout(api_timeout, analytics.query(&cancel_for_query, &keywords)).await
                })
                .await;

            let (keywords_found, error) = match outcome {
                None => (Vec::new(), Some("cancelled before rate-limit tick".to_string())),
                Some(Err(_)) => (Vec::new(), Some("analytics batch timed out".to_string())),
                Some(Ok(Err(e))) => (Vec::new(), Some(e)),
                Some(Ok(Ok(response))) => (
                    response.keywords.into_iter().map(|k| (k.word.clone(), k)).collect(),
                    None,
                ),
            };

            let result = BatchOutcome {
                batch: self.batch,
                keywords_found,
                error,
            };
            serde_json::to_value(result).map_err(|e| e.to_string())
        })
    }
}

/// Drives the three-phase pipeline run (spec §4.7).
pub struct Orchestrator {
    concurrency: Arc<ConcurrencyManager>,
    rate_limiters: Arc<RateLimiterPool>,
    tracker: Arc<Tracker>,
    submission: Arc<SubmissionPool>,
    parser: Arc<dyn SitemapParser>,
    extractor: Arc<dyn KeywordExtractor>,
    analytics: Arc<dyn AnalyticsClient>,
    analytics_batch_size: usize,
}

impl Orchestrator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        concurrency: Arc<ConcurrencyManager>,
        rate_limiters: Arc<RateLimiterPool>,
        tracker: Arc<Tracker>,
        submission: Arc<SubmissionPool>,
        parser: Arc<dyn SitemapParser>,
        extractor: Arc<dyn KeywordExtractor>,
        analytics: Arc<dyn AnalyticsClient>,
        analytics_batch_size: usize,
    ) -> Self {
        Self {
            concurrency,
            rate_limiters,
            tracker,
            submission,
            parser,
            extractor,
            analytics,
            analytics_batch_size,
        }
    }

    /// Run one full pipeline pass over `sitemaps`, honoring `cancel`
    /// for the overall run deadline (spec §4.8: `download_timeout *
    /// |sitemaps|`, clamped to `[2min, 15min]`).
    pub async fn run(&self, sitemaps: Vec<SitemapRef>, cancel: &CancellationToken) -> RunReport {
        let survivors_sitemap_count = sitemaps.len();
        let snapshot = self.concurrency.snapshot();
        let overall_timeout = crate::worker_pool::overall_run_timeout(snapshot.download_timeout, survivors_sitemap_count);

        match tokio::time::timeout(overall_timeout, self.run_phases(sitemaps, cancel)).await {
            Ok(report) => report,
            Err(_) => {
                log::warn!("pipeline run exceeded overall timeout of {overall_timeout:?}; cancelling");
                cancel.cancel();
                RunReport::default()
            }
        }
    }

    async fn run_phases(&self, sitemaps: Vec<SitemapRef>, cancel: &CancellationToken) -> RunReport {
        let (sitemap_results, all_candidates) = self.phase_extract(sitemaps, cancel).await;

        let survivors = self.phase_dedupe_filter(all_candidates).await;

        let (submitted, failed) = self.phase_enrich_submit(survivors, cancel).await;

        RunReport {
            sitemap_results,
            keywords_submitted: submitted,
            keywords_failed: failed,
        }
    }

    /// Phase E: extract candidate (keyword, URL) pairs from every
    /// surviving sitemap, concurrency-bounded by `main_workers`.
    async fn phase_extract(
        &self,
        sitemaps: Vec<SitemapRef>,
        cancel: &CancellationToken,
    ) -> (Vec<SitemapResult>, Vec<(String, ExtractedURL)>) {
        let sitemaps = prefilter::filter(sitemaps);
        let snapshot = self.concurrency.snapshot();
        let rate_limiter = self.rate_limiters.get_or_create_legacy(snapshot.sitemap_rps);

        let mut pool = WorkerPool::spawn(
            snapshot.main_workers,
            snapshot.download_timeout,
            snapshot.download_timeout * 4,
            cancel.clone(),
        );

        for sitemap in &sitemaps {
            let task = SitemapTask {
                sitemap: sitemap.clone(),
                parser: Arc::clone(&self.parser),
                extractor: Arc::clone(&self.extractor),
                rate_limiter: Arc::clone(&rate_limiter),
                download_timeout: snapshot.download_timeout,
            };
            if pool.submit(Box::new(task)).await.is_err() {
                log::warn!("phase E: worker pool closed early, dropping remaining sitemaps");
                break;
            }
        }

        let mut results = Vec::with_capacity(sitemaps.len());
        let mut candidates = Vec::new();
        for _ in 0..sitemaps.len() {
            let started = Instant::now();
            let Some(outcome) = pool.recv().await else { break };
            let latency = started.elapsed();

            if outcome.ok {
                let extraction: SitemapExtraction = outcome
                    .data
                    .and_then(|v| serde_json::from_value(v).ok())
                    .expect("successful SitemapTask always serializes its extraction");
                self.concurrency.update_metrics(Tier::Main, latency, true);
                results.push(SitemapResult {
                    sitemap_url: extraction.sitemap.url.clone(),
                    success: true,
                    error: None,
                    url_count: extraction.candidates.len(),
                });
                candidates.extend(extraction.candidates);
            } else {
                self.concurrency.update_metrics(Tier::Main, latency, false);
                results.push(SitemapResult {
                    sitemap_url: outcome.task_id,
                    success: false,
                    error: outcome.error,
                    url_count: 0,
                });
            }
        }
        pool.join().await;
        (results, candidates)
    }

    /// Phase D: global dedupe by normalized form (highest-score
    /// survivor wins ties broken by first-seen), then drop survivors
    /// already processed in a prior run (spec §4.7 Phase D, invariants
    /// 1-2).
    async fn phase_dedupe_filter(&self, all_candidates: Vec<(String, ExtractedURL)>) -> Vec<Survivor> {
        // Last writer wins per raw keyword string (spec §3 KeywordURLBinding).
        let mut binding: HashMap<String, ExtractedURL> = HashMap::new();
        // First-seen order and best score per normalized equivalence class.
        let mut best_by_normalized: HashMap<String, (String, i64, usize)> = HashMap::new();
        for (index, (raw_keyword, url)) in all_candidates.into_iter().enumerate() {
            binding.insert(raw_keyword.clone(), url);
            let normalized = normalize(&raw_keyword);
            let score = keyword::score(&raw_keyword);
            best_by_normalized
                .entry(normalized)
                .and_modify(|(current_raw, current_score, _)| {
                    if score > *current_score {
                        *current_raw = raw_keyword.clone();
                        *current_score = score;
                    }
                })
                .or_insert((raw_keyword.clone(), score, index));
        }

        let mut survivors: Vec<Survivor> = best_by_normalized
            .into_iter()
            .filter_map(|(normalized, (raw_winner, _, _))| {
                binding.get(&raw_winner).map(|url| Survivor {
                    keyword: normalized,
                    url: url.clone(),
                })
            })
            .collect();

        let urls: Vec<String> = survivors.iter().map(|s| s.url.url.clone()).collect();
        let processed = self.tracker.are_processed(&urls).await;
        survivors.retain(|s| !processed.get(&s.url.url).copied().unwrap_or(false));
        survivors
    }

    /// Phase Q: batch survivors to `analytics_batch_size`, query
    /// through the analytics collaborator under C1/C2, convert
    /// successes via C9, persist failures via C4, and submit once
    /// through C5 (spec §4.7 Phase Q).
    async fn phase_enrich_submit(&self, survivors: Vec<Survivor>, cancel: &CancellationToken) -> (usize, usize) {
        if survivors.is_empty() {
            return (0, 0);
        }
        let snapshot = self.concurrency.snapshot();
        let endpoint = self.analytics.endpoint().to_string();
        let analytics_rate_limiter = self.rate_limiters.get_or_create_for_endpoint(&endpoint, snapshot.api_rps);
        let concurrency_limiter = self
            .rate_limiters
            .get_or_create_concurrency(&endpoint, snapshot.max_concurrent_per_api);
        self.analytics.set_concurrency_limiter(concurrency_limiter, snapshot.concurrency_timeout);

        let batches: Vec<Vec<Survivor>> = survivors
            .chunks(self.analytics_batch_size.max(1))
            .map(<[Survivor]>::to_vec)
            .collect();

        let mut pool = WorkerPool::spawn(
            snapshot.api_workers,
            snapshot.api_timeout,
            snapshot.api_timeout * 2,
            cancel.clone(),
        );

        for batch in batches.clone() {
            let task = BatchTask {
                batch,
                analytics: Arc::clone(&self.analytics),
                rate_limiter: Arc::clone(&analytics_rate_limiter),
                api_timeout: snapshot.api_timeout,
            };
            if pool.submit(Box::new(task)).await.is_err() {
                log::warn!("phase Q: worker pool closed early, dropping remaining batches");
                break;
            }
        }

        let mut accepted: Vec<EnrichedRecord> = Vec::new();
        let mut accepted_urls: Vec<ExtractedURL> = Vec::new();
        let mut failed_count = 0usize;

        for _ in 0..batches.len() {
            let started = Instant::now();
            let Some(outcome) = pool.recv().await else { break };
            let latency = started.elapsed();

            let data = outcome.data.and_then(|v| serde_json::from_value::<BatchOutcome>(v).ok());
            let Some(batch_outcome) = data else {
                self.concurrency.update_metrics(Tier::Analytics, latency, false);
                continue;
            };

            if let Some(err) = &batch_outcome.error {
                self.concurrency.update_metrics(Tier::Analytics, latency, false);
                failed_count += batch_outcome.batch.len();
                self.persist_batch_failure(&batch_outcome.batch, err).await;
                continue;
            }

            self.concurrency.update_metrics(Tier::Analytics, latency, true);
            let found: HashMap<String, crate::pipeline::types::AnalyticsKeyword> =
                batch_outcome.keywords_found.into_iter().collect();
            for survivor in &batch_outcome.batch {
                if let Some(analytics_keyword) = found.get(&survivor.keyword) {
                    let record = converter::convert(analytics_keyword, &survivor.url.url);
                    accepted_urls.push(survivor.url.clone());
                    accepted.push(record);
                }
            }
        }
        pool.join().await;

        let submitted = accepted.len();
        if !accepted.is_empty() {
            let accepted_keywords: Vec<String> = accepted.iter().map(|r| r.keyword.clone()).collect();
            let accepted_ok = self.submission.submit(accepted, Some(Box::new(|result| {
                if let Err(e) = result {
                    log::warn!("downstream submission failed: {e}");
                }
            })));

            if accepted_ok {
                // Invariant §3.5: recorded once enqueued, not after remote ack.
                let mut by_sitemap: HashMap<String, Vec<String>> = HashMap::new();
                for url in accepted_urls {
                    by_sitemap.entry(url.sitemap.url).or_default().push(url.url);
                }
                for (sitemap_url, urls) in by_sitemap {
                    if let Err(e) = self.tracker.save_processed(&urls, &sitemap_url).await {
                        log::warn!("failed to persist processed urls for {sitemap_url}: {e}");
                    }
                }
            } else {
                log::warn!("submission pool rejected {submitted} records; persisting as failed");
                for (keyword, url) in accepted_keywords.into_iter().zip(accepted_urls) {
                    let _ = self
                        .tracker
                        .save_failed(&[keyword], &url.url, &url.sitemap.url, "submission pool rejected")
                        .await;
                }
            }
        }

        (submitted, failed_count)
    }

    async fn persist_batch_failure(&self, batch: &[Survivor], err: &str) {
        let mut by_source: HashMap<(String, String), Vec<String>> = HashMap::new();
        for survivor in batch {
            by_source
                .entry((survivor.url.url.clone(), survivor.url.sitemap.url.clone()))
                .or_default()
                .push(survivor.keyword.clone());
        }
        for ((source_url, sitemap_url), keywords) in by_source {
            if let Err(e) = self.tracker.save_failed(&keywords, &source_url, &sitemap_url, err).await {
                log::warn!("failed to persist failed keywords for {source_url}: {e}");
            }
        }
    }
}
