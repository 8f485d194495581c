use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use common::error::FeedError;
use common::models::Signal;

use crate::traits::SnapshotSource;

/// REST client for `GET {base}/signals/recent?limit=N`.
#[derive(Clone)]
pub struct SnapshotClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl SnapshotClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, FeedError> {
        let client = Client::builder()
            .user_agent("signal_desk/0.1.0")
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/signals/recent", self.base_url)
    }
}

#[async_trait]
impl SnapshotSource for SnapshotClient {
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<Signal>, FeedError> {
        let mut request = self
            .client
            .get(self.endpoint())
            .query(&[("limit", limit)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Snapshot request rejected with {}: {}", status, body);
            return Err(FeedError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        let mut signals =
            serde_json::from_slice::<Vec<Signal>>(&bytes).map_err(|e| FeedError::Server {
                status: status.as_u16(),
                body: format!("snapshot body is not a signal array: {e}"),
            })?;

        if signals.len() > limit {
            debug!("Snapshot returned {} signals for limit {}", signals.len(), limit);
            signals.truncate(limit);
        }

        debug!("Fetched snapshot of {} signals", signals.len());
        Ok(signals)
    }
}
