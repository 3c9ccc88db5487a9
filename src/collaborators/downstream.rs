//! HTTP-backed downstream submitter (spec §6): POSTs batches of
//! [`EnrichedRecord`] as JSON to `<base>/api/v1/keyword-metrics/batch`.

use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::Client;
use std::io::Write;

use crate::pipeline::types::EnrichedRecord;
use crate::submission::BatchSubmitter;

/// POSTs JSON (optionally gzip-compressed) batches to the downstream
/// ingestion endpoint, chunked to `batch_size` records per request.
pub struct HttpDownstreamSubmitter {
    client: Client,
    base_url: String,
    api_key: String,
    batch_size: usize,
    gzip: bool,
}

impl HttpDownstreamSubmitter {
    #[must_use]
    pub fn new(client: Client, base_url: String, api_key: String, batch_size: usize) -> Self {
        Self {
            client,
            base_url,
            api_key,
            batch_size: batch_size.max(1),
            gzip: false,
        }
    }

    #[must_use]
    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    async fn submit_chunk(&self, chunk: &[EnrichedRecord]) -> Result<(), String> {
        let url = format!(
            "{}/api/v1/keyword-metrics/batch",
            self.base_url.trim_end_matches('/')
        );
        let json = serde_json::to_vec(chunk).map_err(|e| e.to_string())?;

        let mut request = self
            .client
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .header("Content-Type", "application/json");

        let body = if self.gzip {
            request = request.header("Content-Encoding", "gzip");
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&json).map_err(|e| e.to_string())?;
            encoder.finish().map_err(|e| e.to_string())?
        } else {
            json
        };

        let response = request.body(body).send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if status.as_u16() == 200 || status.as_u16() == 202 {
            Ok(())
        } else {
            // Spec §6: withhold the response body from logs on failure.
            Err(format!("downstream submit failed: status {status}"))
        }
    }
}

#[async_trait::async_trait]
impl BatchSubmitter for HttpDownstreamSubmitter {
    async fn submit_batches(&self, records: &[EnrichedRecord]) -> Result<(), String> {
        for chunk in records.chunks(self.batch_size) {
            self.submit_chunk(chunk).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{CompetitionLevel, QualityFlags};

    fn sample_record() -> EnrichedRecord {
        EnrichedRecord {
            keyword: "puzzle 1".to_string(),
            url: "https://s/game/puzzle-1".to_string(),
            avg_monthly_searches: 1000,
            latest_monthly_searches: 900,
            max_monthly_searches: 1100,
            competition: CompetitionLevel::Medium,
            competition_index: 50,
            low_bid_micro: 1_600_000,
            high_bid_micro: 2_400_000,
            monthly_series: vec![1000; 12],
            quality: QualityFlags {
                total: 12,
                available: 12,
                missing_months: vec![],
                only_last_month_populated: false,
                has_zero_months: false,
            },
        }
    }

    #[tokio::test]
    async fn success_status_200_is_ok() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/keyword-metrics/batch")
            .match_header("x-api-key", "secret")
            .with_status(200)
            .create_async()
            .await;

        let submitter = HttpDownstreamSubmitter::new(Client::new(), server.url(), "secret".to_string(), 100);
        submitter.submit_batches(&[sample_record()]).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn status_202_is_also_accepted() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/keyword-metrics/batch")
            .with_status(202)
            .create_async()
            .await;

        let submitter = HttpDownstreamSubmitter::new(Client::new(), server.url(), "k".to_string(), 100);
        submitter.submit_batches(&[sample_record()]).await.unwrap();
    }

    #[tokio::test]
    async fn server_error_is_a_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/keyword-metrics/batch")
            .with_status(500)
            .create_async()
            .await;

        let submitter = HttpDownstreamSubmitter::new(Client::new(), server.url(), "k".to_string(), 100);
        let err = submitter.submit_batches(&[sample_record()]).await.unwrap_err();
        assert!(err.contains("500"));
    }

    #[tokio::test]
    async fn chunks_by_batch_size() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/keyword-metrics/batch")
            .with_status(200)
            .expect(2)
            .create_async()
            .await;

        let submitter = HttpDownstreamSubmitter::new(Client::new(), server.url(), "k".to_string(), 1);
        submitter
            .submit_batches(&[sample_record(), sample_record()])
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
