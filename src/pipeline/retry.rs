//! Retry processor (spec §4.6, component C6): a startup-only,
//! one-shot drain of the failed-keyword backlog through the same
//! enrich/submit path, run before Phase E dispatches new work but
//! never blocking it — spawned on its own supervised task with a
//! panic barrier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collaborators::AnalyticsClient;
use crate::converter;
use crate::pipeline::types::normalize;
use crate::store::Tracker;
use crate::submission::SubmissionPool;

/// Gap between sequential retry batches (spec §4.6).
const INTER_BATCH_GAP: Duration = Duration::from_millis(500);

/// Drains retryable [`crate::store::FailedKeywordRecord`]s at process
/// start.
pub struct RetryProcessor {
    tracker: Arc<Tracker>,
    analytics: Arc<dyn AnalyticsClient>,
    submission: Arc<SubmissionPool>,
    batch_size: usize,
}

impl RetryProcessor {
    #[must_use]
    pub fn new(
        tracker: Arc<Tracker>,
        analytics: Arc<dyn AnalyticsClient>,
        submission: Arc<SubmissionPool>,
        batch_size: usize,
    ) -> Self {
        Self {
            tracker,
            analytics,
            submission,
            batch_size: batch_size.max(1),
        }
    }

    /// Spawn the drain as a supervised background task. Never awaited
    /// by the caller before Phase E begins — the returned handle is
    /// for tests and graceful-shutdown joins only.
    #[must_use]
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<usize> {
        tokio::spawn(async move {
            let outcome = std::panic::AssertUnwindSafe(self.drain(&cancel))
                .catch_unwind()
                .await;
            match outcome {
                Ok(submitted) => submitted,
                Err(_) => {
                    log::error!("retry processor panicked; backlog left for the next run");
                    0
                }
            }
        })
    }

    async fn drain(&self, cancel: &CancellationToken) -> usize {
        let retryable = self.tracker.get_retryable().await;
        if retryable.is_empty() {
            return 0;
        }
        log::info!("retry processor: draining {} retryable keyword(s)", retryable.len());

        // Dedup by normalized form — the analytics batch itself only
        // needs one query per equivalence class, even if several
        // distinct failed records share a normalized keyword.
        let mut by_normalized: HashMap<String, (String, String, String)> = HashMap::new();
        for record in retryable {
            by_normalized
                .entry(normalize(&record.keyword))
                .or_insert((record.keyword, record.source_url, record.sitemap_url));
        }
        let entries: Vec<(String, String, String)> = by_normalized.into_values().collect();

        let mut submitted_total = 0usize;
        for (batch_index, chunk) in entries.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                log::info!("retry processor: cancelled, stopping early");
                break;
            }
            if batch_index > 0 {
                tokio::time::sleep(INTER_BATCH_GAP).await;
            }

            let keywords: Vec<String> = chunk.iter().map(|(kw, _, _)| normalize(kw)).collect();
            let response = match self.analytics.query(cancel, &keywords).await {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("retry processor: batch {batch_index} failed: {e}");
                    continue;
                }
            };

            let found: HashMap<String, crate::pipeline::types::AnalyticsKeyword> =
                response.keywords.into_iter().map(|k| (k.word.clone(), k)).collect();

            let mut matched = Vec::new();
            for (keyword, source_url, _) in chunk {
                if let Some(analytics_keyword) = found.get(&normalize(keyword)) {
                    matched.push(converter::convert(analytics_keyword, source_url));
                }
            }

            if matched.is_empty() {
                continue;
            }
            let count = matched.len();
            // Spec §4.6: success does NOT remove the record from the
            // failed table; a future run observes it via the URL-hash
            // short-circuit instead (documented Open Question).
            let accepted = self.submission.submit(
                matched,
                Some(Box::new(move |result| {
                    if let Err(e) = result {
                        log::warn!("retry processor: submission of batch failed: {e}");
                    }
                })),
            );
            if accepted {
                submitted_total += count;
            } else {
                log::warn!("retry processor: submission pool rejected batch {batch_index}");
            }
        }
        submitted_total
    }
}

use futures::FutureExt;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EncryptedStore;
    use crate::submission::BatchSubmitter;
    use tokio_util::sync::CancellationToken;

    struct EchoAnalytics;
    #[async_trait::async_trait]
    impl AnalyticsClient for EchoAnalytics {
        async fn query(&self, _cancel: &CancellationToken, keywords: &[String]) -> Result<crate::pipeline::types::AnalyticsResponse, String> {
            Ok(crate::pipeline::types::AnalyticsResponse {
                keywords: keywords
                    .iter()
                    .map(|w| crate::pipeline::types::AnalyticsKeyword {
                        word: w.clone(),
                        search_volume: 100,
                        competition: 0.2,
                        cpc: 1.0,
                    })
                    .collect(),
            })
        }
        fn endpoint(&self) -> &str {
            "test"
        }
    }

    struct AlwaysOk;
    #[async_trait::async_trait]
    impl BatchSubmitter for AlwaysOk {
        async fn submit_batches(&self, _records: &[crate::pipeline::types::EnrichedRecord]) -> Result<(), String> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn drains_retryable_records_and_submits() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedStore::open(dir.path(), "a reasonably long passphrase").unwrap();
        let tracker = Arc::new(Tracker::open(store).await.unwrap());
        tracker
            .save_failed(&["widget".to_string()], "https://s/widget", "https://s/sitemap.xml", "boom")
            .await
            .unwrap();
        {
            // Force the record into the retryable window.
            let retryable = tracker.get_retryable().await;
            assert!(retryable.is_empty(), "freshly-failed record should not be retryable yet");
        }

        let submission = Arc::new(SubmissionPool::new(Arc::new(AlwaysOk)));
        let processor = Arc::new(RetryProcessor::new(
            Arc::clone(&tracker),
            Arc::new(EchoAnalytics),
            Arc::clone(&submission),
            8,
        ));
        let cancel = CancellationToken::new();
        let submitted = processor.spawn(cancel).await.unwrap();
        assert_eq!(submitted, 0, "record isn't due for retry yet");
    }
}
