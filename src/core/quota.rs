//! Quota (exchange rate) fetching abstractions

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("invalid code format: {0}")]
    InvalidCode(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("server error: {0}")]
    Server(reqwest::StatusCode),

    #[error("client request error: {0}")]
    Client(reqwest::StatusCode),

    #[error("unexpected response status: {0}")]
    UnexpectedStatus(reqwest::StatusCode),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("provider request was not successful")]
    Rejected,

    #[error("rate not found for currency: {0}")]
    MissingRate(String),

    #[error("quota unavailable after {attempts} attempts: {source}")]
    Unavailable {
        attempts: usize,
        #[source]
        source: Box<QuotaError>,
    },

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl QuotaError {
    /// Transport faults and 5xx responses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QuotaError::Transport(_) | QuotaError::Server(_))
    }
}

pub type QuotaResult<T> = Result<T, QuotaError>;

/// A currency pair parsed from a `FROM_TO` code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyPair {
    pub from: String,
    pub to: String,
}

impl CurrencyPair {
    pub fn parse(code: &str) -> QuotaResult<Self> {
        let parts: Vec<&str> = code.split('_').collect();
        match parts.as_slice() {
            [from, to] if !from.is_empty() && !to.is_empty() => Ok(Self {
                from: from.to_string(),
                to: to.to_string(),
            }),
            _ => Err(QuotaError::InvalidCode(code.to_string())),
        }
    }
}

#[async_trait]
pub trait QuotaFetcher: Send + Sync {
    async fn fetch_quota(&self, code: &str) -> QuotaResult<f64>;
}
