//! Rollout percentage fetched over HTTP

use async_trait::async_trait;
use edgeline_connection::{FetchError, PercentageFetcher};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
struct PercentageResponse {
    percentage: i32,
}

/// Fetches the rollout percentage with `GET url`.
///
/// The body is either a bare integer or `{"percentage": N}`.
#[derive(Debug, Clone)]
pub struct HttpPercentageFetcher {
    client: reqwest::Client,
    url: Url,
}

impl HttpPercentageFetcher {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl PercentageFetcher for HttpPercentageFetcher {
    async fn fetch(&self) -> Result<i32, FetchError> {
        debug!("Fetching rollout percentage from {}", self.url);

        let response = self
            .client
            .get(self.url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Request(format!("HTTP error: {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        parse_percentage(&body)
    }
}

fn parse_percentage(body: &str) -> Result<i32, FetchError> {
    let body = body.trim();
    if let Ok(percentage) = body.parse::<i32>() {
        return Ok(percentage);
    }
    serde_json::from_str::<PercentageResponse>(body)
        .map(|r| r.percentage)
        .map_err(|e| FetchError::InvalidResponse(e.to_string()))
}
