//! The client's single view of "recent signals": a bounded, deduplicated,
//! recency-ordered buffer fed by push and pull, and the filters over it.

pub mod desk;
pub mod filter;
pub mod reconciler;

pub use desk::{DeskEvent, DeskView, SignalDesk};
pub use filter::FilterSpec;
pub use reconciler::{ApplyReport, Reconciler};
