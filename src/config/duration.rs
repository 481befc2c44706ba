//! Human-readable millisecond durations in config files (e.g. `"30s"`, `"500ms"`).

use std::fmt;
use std::time::Duration as StdDuration;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// A duration parsed from a human-readable string, stored as milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MsDuration(pub u64);

impl MsDuration {
    pub fn as_std(&self) -> StdDuration {
        StdDuration::from_millis(self.0)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MsDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl From<u64> for MsDuration {
    fn from(ms: u64) -> Self {
        MsDuration(ms)
    }
}

/// Parses strings like `"500ms"`, `"30s"`, `"5m"`, `"1h"`, or a bare number
/// of milliseconds.
fn parse_duration(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(ms);
    }
    let (num, unit) = s.split_at(
        s.find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| format!("invalid duration: {s}"))?,
    );
    let value: f64 = num
        .parse()
        .map_err(|_| format!("invalid duration number: {s}"))?;
    let multiplier = match unit {
        "ms" => 1.0,
        "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        other => return Err(format!("unknown duration unit: {other}")),
    };
    Ok((value * multiplier) as u64)
}

impl<'de> Deserialize<'de> for MsDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;
        impl<'de> de::Visitor<'de> for Visitor {
            type Value = MsDuration;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a duration string like \"30s\" or a number of milliseconds")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<MsDuration, E> {
                parse_duration(v).map(MsDuration).map_err(de::Error::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<MsDuration, E> {
                Ok(MsDuration(v))
            }
        }
        deserializer.deserialize_any(Visitor)
    }
}

impl Serialize for MsDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!(parse_duration("500ms").unwrap(), 500);
        assert_eq!(parse_duration("30s").unwrap(), 30_000);
        assert_eq!(parse_duration("5m").unwrap(), 300_000);
        assert_eq!(parse_duration("1h").unwrap(), 3_600_000);
        assert_eq!(parse_duration("250").unwrap(), 250);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("banana").is_err());
    }
}
