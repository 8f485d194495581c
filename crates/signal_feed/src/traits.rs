use async_trait::async_trait;

use common::error::FeedError;
use common::models::Signal;

/// Pull side of the feed: an authoritative recent-history snapshot.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Up to `limit` signals, most recent first. Failures are returned as-is;
    /// retrying is the caller's business.
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<Signal>, FeedError>;
}
