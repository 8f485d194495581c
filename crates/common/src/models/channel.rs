use std::fmt;

use crate::models::Signal;

/// Link health of the push channel.
///
/// `Disconnected` is both the initial state and the state after an explicit
/// teardown; only a new `connect()` leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl LinkState {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "live",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

/// One inbound event fanned out to every channel subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Signal(Signal),
}
