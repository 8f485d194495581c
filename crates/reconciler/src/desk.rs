use chrono::{DateTime, Utc};
use tracing::{debug, info};

use common::models::{ChannelEvent, LinkState, Signal};

use crate::filter::FilterSpec;
use crate::reconciler::{ApplyReport, Reconciler};

/// Everything that may mutate the desk, delivered in arrival order.
#[derive(Debug, Clone)]
pub enum DeskEvent {
    Channel(ChannelEvent),
    Snapshot(Vec<Signal>),
    Link(LinkState),
    SetFilter(FilterSpec),
}

/// What the presentation layer renders: the filtered signals, newest first,
/// and the health of the live link.
#[derive(Debug, Clone, PartialEq)]
pub struct DeskView {
    pub signals: Vec<Signal>,
    /// Size of the underlying buffer before filtering.
    pub buffered: usize,
    pub link: LinkState,
    pub filter: FilterSpec,
    pub generated_at: DateTime<Utc>,
}

/// Sole owner of the reconciled buffer. Mutated only through [`handle`],
/// so whoever holds it is the single writer.
///
/// [`handle`]: SignalDesk::handle
#[derive(Debug)]
pub struct SignalDesk {
    reconciler: Reconciler,
    filter: FilterSpec,
    link: LinkState,
}

impl SignalDesk {
    pub fn new(capacity: usize, filter: FilterSpec) -> Self {
        Self {
            reconciler: Reconciler::new(capacity),
            filter,
            link: LinkState::Disconnected,
        }
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    /// Applies one event. Returns whether the view may have changed.
    pub fn handle(&mut self, event: DeskEvent) -> bool {
        match event {
            DeskEvent::Channel(ChannelEvent::Connected) => self.set_link(LinkState::Connected),
            DeskEvent::Channel(ChannelEvent::Signal(signal)) => {
                let id = signal.id;
                let report = self.reconciler.apply_push(signal);
                if report.duplicates > 0 {
                    debug!("Discarded duplicate push for signal {}", id);
                }
                report.changed()
            }
            DeskEvent::Snapshot(signals) => {
                let received = signals.len();
                let report = self.reconciler.apply_snapshot(signals);
                Self::log_snapshot(received, &report, self.reconciler.len());
                report.changed()
            }
            DeskEvent::Link(state) => self.set_link(state),
            DeskEvent::SetFilter(filter) => {
                if filter == self.filter {
                    return false;
                }
                info!("Filter changed to {:?}", filter);
                self.filter = filter;
                true
            }
        }
    }

    pub fn view(&self, now: DateTime<Utc>) -> DeskView {
        DeskView {
            signals: self
                .filter
                .apply(self.reconciler.iter(), now)
                .into_iter()
                .cloned()
                .collect(),
            buffered: self.reconciler.len(),
            link: self.link,
            filter: self.filter.clone(),
            generated_at: now,
        }
    }

    fn set_link(&mut self, state: LinkState) -> bool {
        if self.link == state {
            return false;
        }
        debug!("Link {} -> {}", self.link, state);
        self.link = state;
        true
    }

    fn log_snapshot(received: usize, report: &ApplyReport, buffered: usize) {
        if report.inserted > 0 {
            info!(
                "Snapshot of {} merged: {} new, {} already held, {} evicted ({} buffered)",
                received, report.inserted, report.duplicates, report.evicted, buffered
            );
        } else {
            debug!("Snapshot of {} held nothing new", received);
        }
    }
}
