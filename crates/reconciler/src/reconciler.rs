use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use common::config::DEFAULT_BUFFER_CAPACITY;
use common::models::Signal;

/// Sort key: ascending order is oldest first, so the newest entry is last and
/// eviction pops from the front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RecencyKey {
    timestamp: DateTime<Utc>,
    id: i64,
}

impl RecencyKey {
    fn of(signal: &Signal) -> Self {
        Self {
            timestamp: signal.timestamp,
            id: signal.id,
        }
    }
}

/// What one mutation did to the buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub evicted: usize,
}

impl ApplyReport {
    /// Whether the buffer may have changed. An entry that is inserted and
    /// evicted by the same mutation still counts.
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.evicted > 0
    }
}

/// Bounded buffer of the most recent signals, unique by `id`.
///
/// Ordered newest first (timestamp, then `id`, both descending). The first
/// copy of an `id` ever stored wins; later copies are duplicates. Capacity is
/// enforced after every mutation by dropping the oldest entries.
#[derive(Debug, Clone)]
pub struct Reconciler {
    capacity: usize,
    entries: BTreeMap<RecencyKey, Signal>,
    index: HashMap<i64, RecencyKey>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl Reconciler {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: BTreeMap::new(),
            index: HashMap::with_capacity(capacity + 1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: i64) -> Option<&Signal> {
        self.index.get(&id).and_then(|key| self.entries.get(key))
    }

    /// Newest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Signal> + ExactSizeIterator + '_ {
        self.entries.values().rev()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.iter().map(|s| s.id).collect()
    }

    /// A signal pushed by the live channel.
    pub fn apply_push(&mut self, signal: Signal) -> ApplyReport {
        let mut report = ApplyReport::default();
        self.insert(signal, &mut report);
        self.enforce_capacity(&mut report);
        report
    }

    /// A snapshot from the authoritative store. Entries already held are left
    /// untouched; the rest are merged into recency position.
    pub fn apply_snapshot(&mut self, signals: Vec<Signal>) -> ApplyReport {
        let mut report = ApplyReport::default();
        for signal in signals {
            self.insert(signal, &mut report);
        }
        self.enforce_capacity(&mut report);
        report
    }

    fn insert(&mut self, signal: Signal, report: &mut ApplyReport) {
        if let Some(existing) = self.get(signal.id) {
            if existing != &signal {
                warn!(
                    "Signal {} ({}) re-delivered with different fields; keeping first-seen copy",
                    signal.id, signal.symbol
                );
            }
            report.duplicates += 1;
            return;
        }

        let key = RecencyKey::of(&signal);
        self.index.insert(signal.id, key);
        self.entries.insert(key, signal);
        report.inserted += 1;
    }

    fn enforce_capacity(&mut self, report: &mut ApplyReport) {
        while self.entries.len() > self.capacity {
            let Some((key, _)) = self.entries.pop_first() else {
                break;
            };
            self.index.remove(&key.id);
            report.evicted += 1;
        }
        if report.evicted > 0 {
            debug!("Evicted {} signals beyond capacity {}", report.evicted, self.capacity);
        }
    }
}
