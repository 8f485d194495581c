pub mod backoff;
pub mod push_frame;
pub mod snapshot_client;

pub use backoff::Backoff;
pub use push_frame::parse_frame;
pub use snapshot_client::SnapshotClient;
