//! Logical creation time of an ingestion.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::BundleError;

/// Point in time identifying one ingestion of a bundle.
///
/// Always UTC, truncated to whole microseconds, with a year in `0000..=9999`.
/// Those bounds are what make the directory encoding fixed-width, so every
/// `Timestamp` has exactly one directory name and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "DateTime<Utc>", into = "DateTime<Utc>")]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub const MIN_YEAR: i32 = 0;
    pub const MAX_YEAR: i32 = 9999;

    /// Validate and truncate `dt` to microsecond resolution.
    pub fn new(dt: DateTime<Utc>) -> Result<Self, BundleError> {
        if !(Self::MIN_YEAR..=Self::MAX_YEAR).contains(&dt.year()) {
            return Err(BundleError::TimestampOutOfRange(format!(
                "year {} outside {}..={}",
                dt.year(),
                Self::MIN_YEAR,
                Self::MAX_YEAR
            )));
        }
        let nanos = dt.nanosecond();
        if nanos >= 1_000_000_000 {
            return Err(BundleError::TimestampOutOfRange(format!(
                "leap second at {dt}"
            )));
        }
        let truncated = dt
            .with_nanosecond(nanos / 1_000 * 1_000)
            .ok_or_else(|| BundleError::TimestampOutOfRange(dt.to_string()))?;
        Ok(Self(truncated))
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        let now = Utc::now();
        let micros = now.nanosecond() % 1_000_000_000 / 1_000 * 1_000;
        Self(now.with_nanosecond(micros).unwrap_or(now))
    }

    /// Seconds since the Unix epoch.
    pub fn from_unix(secs: i64) -> Result<Self, BundleError> {
        let dt = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| BundleError::TimestampOutOfRange(format!("{secs}s since epoch")))?;
        Self::new(dt)
    }

    /// Microseconds since the Unix epoch.
    pub fn from_unix_micros(micros: i64) -> Result<Self, BundleError> {
        let dt = DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| BundleError::TimestampOutOfRange(format!("{micros}us since epoch")))?;
        Self::new(dt)
    }

    pub fn unix_micros(&self) -> i64 {
        self.0.timestamp_micros()
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Directory name of this timestamp, see [`codec::encode`].
    pub fn to_dirname(&self) -> String {
        codec::encode(*self)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Micros, true))
    }
}

impl TryFrom<DateTime<Utc>> for Timestamp {
    type Error = BundleError;

    fn try_from(dt: DateTime<Utc>) -> Result<Self, Self::Error> {
        Self::new(dt)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl FromStr for Timestamp {
    type Err = BundleError;

    /// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS[.f]` (read as UTC),
    /// a bare `YYYY-MM-DD` (midnight UTC), or an encoded directory name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Self::new(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
            return Self::new(naive.and_utc());
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Self::new(naive.and_utc());
            }
        }
        codec::decode(s).map_err(|_| {
            BundleError::TimestampOutOfRange(format!("unrecognized timestamp '{s}'"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn truncates_to_microseconds() {
        let dt = Utc.with_ymd_and_hms(2020, 5, 1, 12, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(1_234_567);
        let ts = Timestamp::new(dt).unwrap();
        assert_eq!(ts.as_datetime().nanosecond(), 1_234_000);
    }

    #[test]
    fn rejects_years_past_four_digits() {
        let dt = Utc.with_ymd_and_hms(10_000, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            Timestamp::new(dt),
            Err(BundleError::TimestampOutOfRange(_))
        ));
    }

    #[test]
    fn parses_every_accepted_form() {
        let expected = Timestamp::from_unix(1_577_836_800).unwrap(); // 2020-01-01
        for text in [
            "2020-01-01T00:00:00Z",
            "2020-01-01T00:00:00+00:00",
            "2020-01-01T00:00:00",
            "2020-01-01",
            "2020-01-01T00;00;00.000000",
        ] {
            assert_eq!(text.parse::<Timestamp>().unwrap(), expected, "{text}");
        }
        assert!("yesterday".parse::<Timestamp>().is_err());
    }

    #[test]
    fn serde_roundtrip_through_datetime() {
        let ts = Timestamp::from_unix_micros(1_600_000_000_123_456).unwrap();
        let json = serde_json::to_string(&ts).unwrap();
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, back);
    }

    #[test]
    fn now_is_microsecond_aligned() {
        let ts = Timestamp::now();
        assert_eq!(ts.as_datetime().nanosecond() % 1_000, 0);
    }
}
