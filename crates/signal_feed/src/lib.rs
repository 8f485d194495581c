//! Both sources of recent signals: the push channel (`SignalChannel`) and
//! the snapshot endpoint (`SnapshotClient`).

pub mod remote;
pub mod services;
pub mod traits;

pub use remote::{Backoff, SnapshotClient};
pub use services::signal_channel::{ChannelConfig, SignalChannel, Subscription};
pub use traits::SnapshotSource;
