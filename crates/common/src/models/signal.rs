use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// One scored trading opportunity emitted by the engine.
///
/// Signals are immutable once observed: `id` is the identity key and is never
/// regenerated client-side. Fields the desk does not interpret (regime label,
/// liquidity, price change, ...) are kept verbatim in `details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: i64,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    #[serde(default)]
    pub score: Option<f64>,
    pub decision: Decision,
    #[serde(default)]
    pub conviction: Option<Conviction>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl Signal {
    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Decision {
    Alert,
    DryRun,
    Watchlist,
    ScanBest,
    /// A decision type this build does not know yet, kept as received.
    Other(String),
}

impl Decision {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Alert => "ALERT",
            Self::DryRun => "DRY_RUN",
            Self::Watchlist => "WATCHLIST",
            Self::ScanBest => "SCAN_BEST",
            Self::Other(raw) => raw,
        }
    }
}

impl From<&str> for Decision {
    fn from(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.to_ascii_uppercase().as_str() {
            "ALERT" => Self::Alert,
            "DRY_RUN" => Self::DryRun,
            "WATCHLIST" => Self::Watchlist,
            "SCAN_BEST" => Self::ScanBest,
            _ => Self::Other(raw.to_string()),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Decision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Decision {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

/// Ordinal confidence tier, `A > B > C`.
///
/// On the wire a tier is either its letter or its tier number (1 = A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Conviction {
    C,
    B,
    A,
}

impl Conviction {
    pub fn from_tier(tier: u64) -> Option<Self> {
        match tier {
            1 => Some(Self::A),
            2 => Some(Self::B),
            3 => Some(Self::C),
            _ => None,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }
}

impl fmt::Display for Conviction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Conviction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Conviction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawConviction {
            Tier(u64),
            Label(String),
        }

        match RawConviction::deserialize(deserializer)? {
            RawConviction::Tier(tier) => Self::from_tier(tier).ok_or_else(|| {
                serde::de::Error::custom(format!("conviction tier {tier} is not one of 1, 2, 3"))
            }),
            RawConviction::Label(label) => Self::from_label(&label).ok_or_else(|| {
                serde::de::Error::custom(format!("conviction {label:?} is not one of A, B, C"))
            }),
        }
    }
}

/// Accepts RFC 3339, naive ISO-8601 (taken as UTC) or epoch seconds/millis.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawTimestamp {
            Epoch(f64),
            Text(String),
        }

        match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Text(text) => parse(&text)
                .ok_or_else(|| de::Error::custom(format!("unrecognised timestamp {text:?}"))),
            RawTimestamp::Epoch(value) => {
                // Anything past year 5138 in seconds is really milliseconds.
                let millis = if value.abs() >= 1e11 { value } else { value * 1_000.0 };
                DateTime::from_timestamp_millis(millis as i64)
                    .ok_or_else(|| de::Error::custom(format!("timestamp {value} out of range")))
            }
        }
    }

    pub fn parse(text: &str) -> Option<DateTime<Utc>> {
        let text = text.trim();
        DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                    .map(|naive| naive.and_utc())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_full_signal_deserializes() {
        let raw = json!({
            "id": 42,
            "timestamp": "2025-03-14T09:30:00Z",
            "symbol": "NVDA",
            "score": 82.5,
            "decision": "ALERT",
            "conviction": "A",
            "regime": "RISK_ON",
            "liquidity": 0.93,
            "price_change": -1.2
        });

        let signal: Signal = serde_json::from_value(raw).unwrap();
        assert_eq!(signal.id, 42);
        assert_eq!(signal.timestamp, Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap());
        assert_eq!(signal.score, Some(82.5));
        assert_eq!(signal.decision, Decision::Alert);
        assert_eq!(signal.conviction, Some(Conviction::A));
        assert_eq!(signal.detail("regime"), Some(&json!("RISK_ON")));
        assert_eq!(signal.details.len(), 3);
    }

    #[test]
    fn test_nullable_fields_may_be_missing_or_null() {
        let raw = json!({
            "id": 7,
            "timestamp": "2025-03-14T09:30:00",
            "symbol": "AMD",
            "score": null,
            "decision": "WATCHLIST"
        });

        let signal: Signal = serde_json::from_value(raw).unwrap();
        assert_eq!(signal.score, None);
        assert_eq!(signal.conviction, None);
        // Naive timestamps are read as UTC.
        assert_eq!(signal.timestamp, Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_epoch_seconds_and_millis() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let secs: Signal = serde_json::from_value(json!({
            "id": 1, "timestamp": 1_704_067_200, "symbol": "X", "decision": "ALERT"
        }))
        .unwrap();
        let millis: Signal = serde_json::from_value(json!({
            "id": 1, "timestamp": 1_704_067_200_000_i64, "symbol": "X", "decision": "ALERT"
        }))
        .unwrap();
        assert_eq!(secs.timestamp, expected);
        assert_eq!(millis.timestamp, expected);
    }

    #[test]
    fn test_unknown_decision_is_preserved() {
        let decision: Decision = serde_json::from_value(json!("EXIT_SIGNAL")).unwrap();
        assert_eq!(decision, Decision::Other("EXIT_SIGNAL".to_string()));
        assert_eq!(serde_json::to_value(&decision).unwrap(), json!("EXIT_SIGNAL"));

        let known: Decision = serde_json::from_value(json!("dry_run")).unwrap();
        assert_eq!(known, Decision::DryRun);
    }

    #[test]
    fn test_conviction_ordering_and_wire_forms() {
        assert!(Conviction::A > Conviction::B);
        assert!(Conviction::B > Conviction::C);

        let from_tier: Conviction = serde_json::from_value(json!(2)).unwrap();
        let from_label: Conviction = serde_json::from_value(json!("b")).unwrap();
        assert_eq!(from_tier, Conviction::B);
        assert_eq!(from_label, Conviction::B);

        assert!(serde_json::from_value::<Conviction>(json!(4)).is_err());
        assert!(serde_json::from_value::<Conviction>(json!("D")).is_err());
    }

    #[test]
    fn test_serialization_keeps_details_flat() {
        let signal: Signal = serde_json::from_value(json!({
            "id": 3, "timestamp": "2025-03-14T09:30:00Z", "symbol": "TSLA",
            "score": 61.0, "decision": "SCAN_BEST", "conviction": 3, "regime": "CHOP"
        }))
        .unwrap();

        let value = serde_json::to_value(&signal).unwrap();
        assert_eq!(value["conviction"], json!("C"));
        assert_eq!(value["regime"], json!("CHOP"));
        assert_eq!(value["decision"], json!("SCAN_BEST"));
    }
}
