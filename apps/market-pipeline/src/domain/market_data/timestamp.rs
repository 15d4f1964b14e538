//! Canonical event timestamp.
//!
//! The upstream feed sends RFC-3339 strings; other producers and tests
//! send integer epochs in seconds, milliseconds, microseconds or
//! nanoseconds. All of them are normalized here, once, to nanoseconds.
//!
//! Integer units are classified by magnitude. The cut-offs keep every
//! unit unambiguous for dates between 1973 and 5138:
//!
//! | magnitude        | unit         |
//! |------------------|--------------|
//! | `< 1e11`         | seconds      |
//! | `< 1e14`         | milliseconds |
//! | `< 1e17`         | microseconds |
//! | otherwise        | nanoseconds  |

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

const SECONDS_CEILING: i64 = 100_000_000_000;
const MILLIS_CEILING: i64 = 100_000_000_000_000;
const MICROS_CEILING: i64 = 100_000_000_000_000_000;

/// Nanoseconds since the Unix epoch (UTC). Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochNanos(i64);

impl EpochNanos {
    /// Wrap a value that is already in nanoseconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not positive.
    pub fn new(nanos: i64) -> Result<Self, DomainError> {
        if nanos <= 0 {
            return Err(DomainError::InvalidTimestamp {
                raw: nanos.to_string(),
                reason: "timestamp must be positive",
            });
        }
        Ok(Self(nanos))
    }

    /// Normalize an integer epoch of unknown unit.
    ///
    /// # Errors
    ///
    /// Returns an error for non-positive values or values that overflow
    /// when scaled to nanoseconds.
    pub fn from_epoch(value: i64) -> Result<Self, DomainError> {
        let invalid = |reason| DomainError::InvalidTimestamp {
            raw: value.to_string(),
            reason,
        };

        if value <= 0 {
            return Err(invalid("timestamp must be positive"));
        }

        let scale = match value {
            v if v < SECONDS_CEILING => 1_000_000_000,
            v if v < MILLIS_CEILING => 1_000_000,
            v if v < MICROS_CEILING => 1_000,
            _ => 1,
        };

        value
            .checked_mul(scale)
            .map(Self)
            .ok_or_else(|| invalid("timestamp overflows nanosecond range"))
    }

    /// Convert a UTC datetime.
    ///
    /// # Errors
    ///
    /// Returns an error if the datetime is outside the representable
    /// nanosecond range (years 1677-2262) or not after the epoch.
    pub fn from_datetime(dt: DateTime<Utc>) -> Result<Self, DomainError> {
        let nanos = dt
            .timestamp_nanos_opt()
            .ok_or_else(|| DomainError::InvalidTimestamp {
                raw: dt.to_rfc3339(),
                reason: "timestamp outside nanosecond range",
            })?;
        Self::new(nanos)
    }

    /// Parse an RFC-3339 string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not RFC-3339 or out of range.
    pub fn parse_rfc3339(raw: &str) -> Result<Self, DomainError> {
        let dt = DateTime::parse_from_rfc3339(raw).map_err(|_| DomainError::InvalidTimestamp {
            raw: raw.to_string(),
            reason: "not an RFC-3339 timestamp",
        })?;
        Self::from_datetime(dt.with_timezone(&Utc))
    }

    /// Nanoseconds since the epoch.
    #[must_use]
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Milliseconds since the epoch (truncated).
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0 / 1_000_000
    }

    /// Convert to a UTC datetime.
    #[must_use]
    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.0)
    }
}

impl fmt::Display for EpochNanos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    const NOV_14_2023_NANOS: i64 = 1_700_000_000_000_000_000;

    #[test_case(1_700_000_000 ; "seconds")]
    #[test_case(1_700_000_000_000 ; "milliseconds")]
    #[test_case(1_700_000_000_000_000 ; "microseconds")]
    #[test_case(1_700_000_000_000_000_000 ; "nanoseconds")]
    fn classifies_unit_by_magnitude(raw: i64) {
        assert_eq!(
            EpochNanos::from_epoch(raw).unwrap().as_nanos(),
            NOV_14_2023_NANOS
        );
    }

    #[test_case(0)]
    #[test_case(-1)]
    #[test_case(-1_700_000_000_000)]
    fn rejects_non_positive(raw: i64) {
        assert!(EpochNanos::from_epoch(raw).is_err());
        assert!(EpochNanos::new(raw).is_err());
    }

    #[test]
    fn parses_rfc3339_with_nanoseconds() {
        let ts = EpochNanos::parse_rfc3339("2021-02-22T15:51:44.208123456Z").unwrap();
        assert_eq!(ts.as_nanos() % 1_000_000_000, 208_123_456);
        assert_eq!(ts.to_datetime().to_rfc3339(), "2021-02-22T15:51:44.208123456+00:00");
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let utc = EpochNanos::parse_rfc3339("2024-01-02T14:30:00Z").unwrap();
        let offset = EpochNanos::parse_rfc3339("2024-01-02T09:30:00-05:00").unwrap();
        assert_eq!(utc, offset);
    }

    #[test]
    fn rejects_garbage_string() {
        assert!(EpochNanos::parse_rfc3339("yesterday").is_err());
    }

    #[test]
    fn serializes_as_integer() {
        let ts = EpochNanos::new(NOV_14_2023_NANOS).unwrap();
        assert_eq!(serde_json::to_string(&ts).unwrap(), "1700000000000000000");
    }

    #[test]
    fn millis_truncates() {
        let ts = EpochNanos::new(1_700_000_000_123_999_999).unwrap();
        assert_eq!(ts.as_millis(), 1_700_000_000_123);
    }

    proptest! {
        #[test]
        fn millisecond_and_nanosecond_forms_agree(ms in SECONDS_CEILING..9_000_000_000_000i64) {
            let from_ms = EpochNanos::from_epoch(ms).unwrap();
            let from_ns = EpochNanos::from_epoch(ms * 1_000_000).unwrap();
            prop_assert_eq!(from_ms, from_ns);
        }

        #[test]
        fn datetime_round_trip(nanos in 1i64..i64::MAX) {
            let ts = EpochNanos::new(nanos).unwrap();
            prop_assert_eq!(EpochNanos::from_datetime(ts.to_datetime()).unwrap(), ts);
        }
    }
}
