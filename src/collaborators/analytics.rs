//! HTTP-backed [`AnalyticsClient`] (spec §6). Supports a single
//! endpoint or, when a secondary is configured, round-robin fan-out
//! across both — the dual-endpoint load-balancing policy is opaque to
//! the core (spec §9 Open Questions), so round-robin is this
//! collaborator's own internal choice.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;

use super::AnalyticsClient;
use crate::error::UpstreamError;
use crate::limiter::AtomicLimiter;
use crate::pipeline::types::AnalyticsResponse;

#[derive(serde::Serialize)]
struct QueryRequest<'a> {
    keywords: &'a [String],
}

/// Queries a single-or-dual analytics endpoint over HTTP.
pub struct HttpAnalyticsClient {
    client: Client,
    endpoints: Vec<String>,
    next: AtomicUsize,
    concurrency_limiter: OnceLock<(Arc<AtomicLimiter>, Duration)>,
}

impl HttpAnalyticsClient {
    #[must_use]
    pub fn new(client: Client, primary: Vec<String>, secondary: Option<String>) -> Self {
        let mut endpoints = primary;
        if let Some(secondary) = secondary {
            endpoints.push(secondary);
        }
        Self {
            client,
            endpoints,
            next: AtomicUsize::new(0),
            concurrency_limiter: OnceLock::new(),
        }
    }

    fn pick_endpoint(&self) -> &str {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.endpoints.len().max(1);
        self.endpoints.get(idx).map_or("", String::as_str)
    }
}

#[async_trait::async_trait]
impl AnalyticsClient for HttpAnalyticsClient {
    async fn query(&self, cancel: &CancellationToken, keywords: &[String]) -> Result<AnalyticsResponse, String> {
        let _permit = match self.concurrency_limiter.get() {
            Some((limiter, deadline)) => Some(
                limiter
                    .acquire(cancel, *deadline)
                    .await
                    .map_err(|e| UpstreamError::Local { reason: e.to_string() }.to_string())?,
            ),
            None => None,
        };

        let endpoint = self.pick_endpoint();
        let body = QueryRequest { keywords };

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(UpstreamError::Local { reason: "cancelled".to_string() }.to_string()),
            r = self.client.post(endpoint).json(&body).send() => r,
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => return Err(UpstreamError::classify(&e).to_string()),
        };

        let status = response.status();
        if status.is_success() {
            return response
                .json::<AnalyticsResponse>()
                .await
                .map_err(|e| UpstreamError::classify(&e).to_string());
        }

        let err = classify_status(status);
        Err(err.to_string())
    }

    fn endpoint(&self) -> &str {
        self.endpoints.first().map_or("unknown", String::as_str)
    }

    fn set_concurrency_limiter(&self, limiter: Arc<AtomicLimiter>, deadline: Duration) {
        if self.concurrency_limiter.set((limiter, deadline)).is_err() {
            log::warn!("concurrency limiter already installed on this analytics client");
        }
    }
}

fn classify_status(status: StatusCode) -> UpstreamError {
    let code = status.as_u16();
    if code == 429 || status.is_server_error() {
        UpstreamError::Transient {
            reason: format!("status {code}"),
        }
    } else {
        UpstreamError::Permanent { status: code }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_response_deserializes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"keywords":[{"word":"puzzle 1","searchVolume":1000,"competition":0.5,"cpc":2.0}]}"#)
            .create_async()
            .await;

        let client = HttpAnalyticsClient::new(Client::new(), vec![server.url()], None);
        let cancel = CancellationToken::new();
        let resp = client.query(&cancel, &["puzzle 1".to_string()]).await.unwrap();
        assert_eq!(resp.keywords.len(), 1);
        assert_eq!(resp.keywords[0].search_volume, 1000);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limited_status_classifies_as_transient() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/").with_status(429).create_async().await;

        let client = HttpAnalyticsClient::new(Client::new(), vec![server.url()], None);
        let cancel = CancellationToken::new();
        let err = client.query(&cancel, &["a".to_string()]).await.unwrap_err();
        assert!(err.contains("transient"));
    }

    #[tokio::test]
    async fn bad_request_classifies_as_permanent() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/").with_status(400).create_async().await;

        let client = HttpAnalyticsClient::new(Client::new(), vec![server.url()], None);
        let cancel = CancellationToken::new();
        let err = client.query(&cancel, &["a".to_string()]).await.unwrap_err();
        assert!(err.contains("permanent"));
    }

    #[tokio::test]
    async fn dual_endpoint_round_robins() {
        let client = HttpAnalyticsClient::new(
            Client::new(),
            vec!["https://a".to_string()],
            Some("https://b".to_string()),
        );
        assert_eq!(client.pick_endpoint(), "https://a");
        assert_eq!(client.pick_endpoint(), "https://b");
        assert_eq!(client.pick_endpoint(), "https://a");
    }
}
