//! Time-encoded identifiers used by the chat API.
//!
//! The upper 42 bits of an id hold milliseconds since [`CHAT_EPOCH_MS`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 2015-01-01T00:00:00Z in Unix milliseconds.
pub const CHAT_EPOCH_MS: i64 = 1_420_070_400_000;
pub const MS_IN_A_DAY: i64 = 86_400_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Snowflake(pub u64);

impl Snowflake {
    pub const ZERO: Snowflake = Snowflake(0);

    /// Unix timestamp in milliseconds encoded in the id.
    pub fn timestamp_ms(self) -> i64 {
        (self.0 >> 22) as i64 + CHAT_EPOCH_MS
    }

    /// Whole days since the Unix epoch. Two ids share a calendar day (UTC)
    /// exactly when their day indices are equal.
    pub fn day_index(self) -> i64 {
        self.timestamp_ms().div_euclid(MS_IN_A_DAY)
    }

    pub fn datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp_ms()).unwrap_or_default()
    }

    /// Build an id for a given Unix millisecond timestamp, for fixtures and
    /// cursors. The low 22 bits carry `sequence`.
    pub fn from_timestamp_ms(unix_ms: i64, sequence: u64) -> Self {
        let offset = (unix_ms - CHAT_EPOCH_MS).max(0) as u64;
        Snowflake((offset << 22) | (sequence & 0x3F_FFFF))
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Snowflake {
    fn from(value: u64) -> Self {
        Snowflake(value)
    }
}

/// Ids travel as decimal strings on the wire; plain numbers are accepted too.
impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) => s
                .parse::<u64>()
                .map(Snowflake)
                .map_err(|e| D::Error::custom(format!("invalid snowflake {s:?}: {e}"))),
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(Snowflake)
                .ok_or_else(|| D::Error::custom(format!("invalid snowflake {n}"))),
            other => Err(D::Error::custom(format!(
                "expected string or number, got {:?}",
                other
            ))),
        }
    }
}

impl Serialize for Snowflake {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&self.0)
    }
}
