//! Conversion between the cloud store's native RFC 3339 timestamps and the
//! epoch milliseconds used everywhere else.

use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("timestamp out of range: {0}")]
    Range(#[from] time::error::ComponentRange),
    #[error("failed to format timestamp: {0}")]
    Format(#[from] time::error::Format),
    #[error("failed to parse timestamp: {0}")]
    Parse(#[from] time::error::Parse),
}

pub fn millis_to_rfc3339(millis: i64) -> Result<String, TimestampError> {
    let nanos = i128::from(millis) * 1_000_000;
    let value = OffsetDateTime::from_unix_timestamp_nanos(nanos)?;
    Ok(value.format(&Rfc3339)?)
}

pub fn rfc3339_to_millis(value: &str) -> Result<i64, TimestampError> {
    let parsed = OffsetDateTime::parse(value, &Rfc3339)?;
    Ok((parsed.unix_timestamp_nanos() / 1_000_000) as i64)
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Serde adapter: `i64` epoch millis in memory, RFC 3339 string on the wire.
pub mod rfc3339_millis {
    use serde::{Deserialize, Deserializer, Serializer, de, ser};

    pub fn serialize<S>(value: &i64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let text = super::millis_to_rfc3339(*value).map_err(ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        super::rfc3339_to_millis(&text).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_millis_to_rfc3339_and_back() {
        let text = millis_to_rfc3339(1_735_689_600_250).unwrap();
        assert!(text.starts_with("2025-01-01T00:00:00.25"));
        assert_eq!(rfc3339_to_millis(&text).unwrap(), 1_735_689_600_250);
    }

    #[test]
    fn parses_offset_timestamps() {
        let millis = rfc3339_to_millis("2025-01-01T02:00:00+02:00").unwrap();
        assert_eq!(millis, 1_735_689_600_000);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            rfc3339_to_millis("yesterday"),
            Err(TimestampError::Parse(_))
        ));
    }
}
