pub mod channel;
pub mod signal;

pub use channel::{ChannelEvent, LinkState};
pub use signal::{Conviction, Decision, Signal};
