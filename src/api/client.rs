use anyhow::{Context, Result};
use reqwest::{RequestBuilder, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

use super::CreateTaskRequest;
use crate::core::store::{StoreError, StoreResult};
use crate::core::task::{Task, TaskId};

/// Talks to the endpoints of a running `fxquote serve` process.
pub struct TaskClient {
    client: reqwest::Client,
    base: Url,
}

impl TaskClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base =
            Url::parse(base_url).with_context(|| format!("Invalid server URL: {base_url}"))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("Invalid server URL: {base_url}");
        }
        let client = reqwest::Client::builder()
            .user_agent("fxquote/0.1")
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn fetch(&self, request: RequestBuilder) -> StoreResult<Task> {
        let response = request.send().await.map_err(|e| {
            StoreError::Backend(format!(
                "cannot reach fxquote server at {} (is `fxquote serve` running?): {e}",
                self.base
            ))
        })?;

        let status = response.status();
        debug!(%status, url = %response.url(), "Server responded");
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!(
                "server returned {status}: {body}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| StoreError::Backend(format!("invalid task from server: {e}")))
    }

    pub async fn request(&self, code: &str, idempotency_key: &str) -> StoreResult<Task> {
        let url = self.endpoint(&["quotes", code, "task"]);
        let body = CreateTaskRequest {
            idempotency_key: idempotency_key.to_string(),
        };
        self.fetch(self.client.post(url).json(&body)).await
    }

    pub async fn get(&self, code: &str, id: TaskId) -> StoreResult<Task> {
        let url = self.endpoint(&["quotes", code, "task", &id.to_string()]);
        self.fetch(self.client.get(url)).await
    }

    pub async fn latest(&self, code: &str) -> StoreResult<Task> {
        let url = self.endpoint(&["quotes", code]);
        self.fetch(self.client.get(url)).await
    }
}
