use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::rate_limiter::RateLimiter;
use super::util::with_backoff;
use crate::core::config::ProviderConfig;
use crate::core::quota::{CurrencyPair, QuotaError, QuotaFetcher, QuotaResult};

#[derive(Debug, Deserialize)]
struct LatestRatesResponse {
    success: bool,
    #[allow(dead_code)]
    timestamp: i64,
    #[allow(dead_code)]
    base: String,
    #[allow(dead_code)]
    date: String,
    rates: HashMap<String, f64>,
}

/// Resolves codes against an exchangeratesapi.io compatible `/v1/latest` endpoint.
pub struct ExchangeRatesFetcher {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    endpoint: Url,
    api_key: String,
    retries: usize,
    backoff: Duration,
}

impl ExchangeRatesFetcher {
    pub fn new(
        client: reqwest::Client,
        limiter: Arc<RateLimiter>,
        base_url: &str,
        api_key: &str,
    ) -> Result<Self> {
        let endpoint = Url::parse(&format!("{}/v1/latest", base_url.trim_end_matches('/')))
            .with_context(|| format!("Invalid provider base URL: {base_url}"))?;
        Ok(Self {
            client,
            limiter,
            endpoint,
            api_key: api_key.to_string(),
            retries: 5,
            backoff: Duration::from_secs(1),
        })
    }

    pub fn from_config(config: &ProviderConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("fxquote/0.1")
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::new(client, limiter, &config.base_url, &config.api_key)?
            .with_retries(config.retries)
            .with_backoff(Duration::from_millis(config.backoff_ms)))
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn request_url(&self, pair: &CurrencyPair) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("access_key", &self.api_key)
            .append_pair("base", &pair.from)
            .append_pair("symbols", &pair.to);
        url
    }

    async fn request_once(&self, url: &Url, to: &str) -> QuotaResult<f64> {
        self.limiter.acquire().await;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| QuotaError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(QuotaError::Server(status));
        }
        if status.is_client_error() {
            return Err(QuotaError::Client(status));
        }
        if status != StatusCode::OK {
            return Err(QuotaError::UnexpectedStatus(status));
        }

        let text = response
            .text()
            .await
            .map_err(|e| QuotaError::Decode(e.to_string()))?;
        let data: LatestRatesResponse =
            serde_json::from_str(&text).map_err(|e| QuotaError::Decode(e.to_string()))?;

        if !data.success {
            return Err(QuotaError::Rejected);
        }

        data.rates
            .get(to)
            .copied()
            .ok_or_else(|| QuotaError::MissingRate(to.to_string()))
    }
}

#[async_trait]
impl QuotaFetcher for ExchangeRatesFetcher {
    #[instrument(name = "ExchangeRatesFetch", skip(self), fields(code = %code))]
    async fn fetch_quota(&self, code: &str) -> QuotaResult<f64> {
        let pair = CurrencyPair::parse(code)?;
        let url = self.request_url(&pair);
        debug!(base = %pair.from, symbol = %pair.to, "Requesting latest rate");

        let (url, to) = (&url, pair.to.as_str());
        let rate = with_backoff(
            move |attempt| {
                debug!(attempt, "Fetching quota");
                self.request_once(url, to)
            },
            self.retries,
            self.backoff,
        )
        .await?;

        debug!(rate, "Fetched quota");
        Ok(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EUR_USD_RESPONSE: &str = r#"{
        "success": true,
        "timestamp": 1700000000,
        "base": "EUR",
        "date": "2023-11-14",
        "rates": {"USD": 1.08}
    }"#;

    fn fetcher(server: &MockServer, retries: usize) -> ExchangeRatesFetcher {
        let limiter = Arc::new(RateLimiter::new(100, Duration::from_secs(1)));
        ExchangeRatesFetcher::new(reqwest::Client::new(), limiter, &server.uri(), "test-key")
            .unwrap()
            .with_retries(retries)
            .with_backoff(Duration::from_millis(1))
    }

    async fn request_count(server: &MockServer) -> usize {
        server.received_requests().await.unwrap().len()
    }

    #[tokio::test]
    async fn test_successful_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/latest"))
            .and(query_param("access_key", "test-key"))
            .and(query_param("base", "EUR"))
            .and(query_param("symbols", "USD"))
            .respond_with(ResponseTemplate::new(200).set_body_string(EUR_USD_RESPONSE))
            .mount(&server)
            .await;

        let rate = fetcher(&server, 3).fetch_quota("EUR_USD").await.unwrap();
        assert_eq!(rate, 1.08);
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/latest"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(EUR_USD_RESPONSE))
            .mount(&server)
            .await;

        let rate = fetcher(&server, 5).fetch_quota("EUR_USD").await.unwrap();
        assert_eq!(rate, 1.08);
        assert_eq!(request_count(&server).await, 3);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = fetcher(&server, 5).fetch_quota("EUR_USD").await;
        assert!(matches!(result, Err(QuotaError::Client(s)) if s == StatusCode::UNAUTHORIZED));
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_invalid_code_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(EUR_USD_RESPONSE))
            .mount(&server)
            .await;

        let result = fetcher(&server, 5).fetch_quota("EURUSD").await;
        assert!(matches!(result, Err(QuotaError::InvalidCode(code)) if code == "EURUSD"));
        assert_eq!(request_count(&server).await, 0);
    }

    #[tokio::test]
    async fn test_persistent_server_error_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = fetcher(&server, 3).fetch_quota("EUR_USD").await;
        match result {
            Err(QuotaError::Unavailable { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, QuotaError::Server(_)));
            }
            other => panic!("expected Unavailable, got {other:?}"),
        }
        assert_eq!(request_count(&server).await, 3);
    }

    #[tokio::test]
    async fn test_unsuccessful_payloads_are_not_retried() {
        let cases = [
            (r#"{"success": false, "timestamp": 0, "base": "EUR", "date": "", "rates": {}}"#, "rejected"),
            (r#"{"success": true, "timestamp": 0, "base": "EUR", "date": "", "rates": {"GBP": 0.9}}"#, "missing"),
            (r#"{"rates": "nope"}"#, "decode"),
        ];

        for (body, kind) in cases {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(&server)
                .await;

            let result = fetcher(&server, 5).fetch_quota("EUR_USD").await;
            match (kind, result) {
                ("rejected", Err(QuotaError::Rejected)) => {}
                ("missing", Err(QuotaError::MissingRate(to))) => assert_eq!(to, "USD"),
                ("decode", Err(QuotaError::Decode(_))) => {}
                (kind, other) => panic!("{kind}: unexpected result {other:?}"),
            }
            assert_eq!(request_count(&server).await, 1, "{kind}");
        }
    }

    #[tokio::test]
    async fn test_unexpected_status_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let result = fetcher(&server, 5).fetch_quota("EUR_USD").await;
        assert!(matches!(result, Err(QuotaError::UnexpectedStatus(_))));
        assert_eq!(request_count(&server).await, 1);
    }
}
