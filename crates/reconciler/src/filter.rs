use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use common::models::{Conviction, Decision, Signal};

/// A conjunction of optional constraints over signals.
///
/// Absent terms impose nothing; `min_score == 0` is also "no constraint".
/// The JSON form is the one the presentation layer produces:
/// `{"decision": "ALERT", "minScore": 70, "conviction": 1, "maxAgeHours": 24}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    #[serde(default)]
    pub decision: Option<Decision>,
    #[serde(default)]
    pub min_score: f64,
    /// Minimum tier: a `B` constraint admits `A` and `B`.
    #[serde(default)]
    pub conviction: Option<Conviction>,
    #[serde(default)]
    pub max_age_hours: Option<f64>,
}

impl FilterSpec {
    pub fn is_unconstrained(&self) -> bool {
        self.decision.is_none()
            && self.min_score <= 0.0
            && self.conviction.is_none()
            && self.max_age_hours.is_none()
    }

    pub fn matches(&self, signal: &Signal, now: DateTime<Utc>) -> bool {
        if let Some(decision) = &self.decision {
            if &signal.decision != decision {
                return false;
            }
        }

        if self.min_score > 0.0 && !signal.score.is_some_and(|score| score >= self.min_score) {
            return false;
        }

        if let Some(floor) = self.conviction {
            if !signal.conviction.is_some_and(|tier| tier >= floor) {
                return false;
            }
        }

        if let Some(cutoff) = self.age_cutoff(now) {
            if signal.timestamp < cutoff {
                return false;
            }
        }

        true
    }

    /// Oldest admissible timestamp. NaN or negative hours impose nothing, and a
    /// window reaching past the representable range admits every signal.
    fn age_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let hours = self.max_age_hours.filter(|hours| *hours >= 0.0)?;
        let window = TimeDelta::try_milliseconds((hours * 3_600_000.0) as i64)?;
        now.checked_sub_signed(window)
    }

    /// The matching subsequence, order preserved. Never touches the source.
    pub fn apply<'a, I>(&self, signals: I, now: DateTime<Utc>) -> Vec<&'a Signal>
    where
        I: IntoIterator<Item = &'a Signal>,
    {
        signals
            .into_iter()
            .filter(|signal| self.matches(signal, now))
            .collect()
    }
}
