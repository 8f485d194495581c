//! Error types shared by the feed, the reconciler and the desk runtime.

use thiserror::Error;

/// Failures reaching or understanding the signal source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Network-level failure (connect, TLS, timeout, reset) on either the
    /// snapshot endpoint or the push channel.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The source answered but rejected the request or sent an unusable body.
    #[error("Server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    /// A push frame that does not parse as any known shape.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}

impl FeedError {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}
