//! UTC timestamps and serde helpers.
//!
//! The backend emits either RFC 3339 strings or naive ISO 8601 strings
//! without an offset (`2024-05-01T10:00:00.123456`). Naive values are
//! read as UTC.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// All timestamps are UTC.
pub type Timestamp = DateTime<Utc>;

/// Parse an RFC 3339 or naive ISO 8601 timestamp.
pub fn parse(raw: &str) -> Result<Timestamp, chrono::ParseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// `#[serde(with = "...")]` helper for required timestamps.
pub mod lenient {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Timestamp;

    pub fn serialize<S: Serializer>(value: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// `#[serde(with = "...")]` helper for optional timestamps.
///
/// `null` and a missing field both read as `None`.
pub mod lenient_option {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Timestamp;

    pub fn serialize<S: Serializer>(
        value: &Option<Timestamp>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_some(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Timestamp>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| super::parse(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
