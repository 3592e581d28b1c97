// One stored sample or one aggregated bucket.

use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::ONE_MINUTE;
use crate::error::{Result, StorageError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub name: String,
    #[serde(alias = "time_stamp")]
    pub timestamp: DateTime<Utc>,
    pub value: i64,
    /// Duration this entry represents. Ingested samples are always 1m.
    #[serde(default = "default_resolution", with = "humantime_serde")]
    pub resolution: Duration,
    /// Minutes since midnight of `timestamp`; staging-only, never persisted.
    #[serde(skip)]
    pub minute_of_day: Option<u32>,
}

fn default_resolution() -> Duration {
    ONE_MINUTE
}

impl MetricEntry {
    pub fn new(name: impl Into<String>, timestamp: DateTime<Utc>, value: i64) -> Self {
        Self {
            name: name.into(),
            timestamp,
            value,
            resolution: ONE_MINUTE,
            minute_of_day: None,
        }
    }

    pub fn with_resolution(mut self, resolution: Duration) -> Self {
        self.resolution = resolution;
        self
    }

    /// Checks the fields an ingested sample must carry.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StorageError::Validation("metric name is required".into()));
        }
        if self.timestamp.timestamp_millis() <= 0 {
            return Err(StorageError::Validation(format!(
                "metric {} has no timestamp",
                self.name
            )));
        }
        Ok(())
    }
}

/// Minutes since midnight (UTC) of `ts`.
pub fn minute_of_day(ts: DateTime<Utc>) -> u32 {
    ts.hour() * 60 + ts.minute()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn minute_of_day_counts_from_midnight() {
        let ts = Utc.with_ymd_and_hms(2022, 10, 27, 16, 23, 59).unwrap();
        assert_eq!(minute_of_day(ts), 16 * 60 + 23);
        let midnight = Utc.with_ymd_and_hms(2022, 10, 27, 0, 0, 0).unwrap();
        assert_eq!(minute_of_day(midnight), 0);
    }

    #[test]
    fn ingest_json_accepts_legacy_field_and_defaults_resolution() {
        let entry: MetricEntry = serde_json::from_str(
            r#"{"name":"test","value":123,"time_stamp":"2022-08-03T16:23:45Z"}"#,
        )
        .unwrap();
        assert_eq!(entry.name, "test");
        assert_eq!(entry.value, 123);
        assert_eq!(entry.resolution, ONE_MINUTE);
        assert_eq!(entry.minute_of_day, None);
    }

    #[test]
    fn validate_rejects_missing_name_and_timestamp() {
        let ts = Utc.with_ymd_and_hms(2022, 8, 3, 16, 23, 45).unwrap();
        assert!(MetricEntry::new("", ts, 1).validate().is_err());
        assert!(
            MetricEntry::new("cpu", DateTime::<Utc>::UNIX_EPOCH, 1)
                .validate()
                .is_err()
        );
        assert!(MetricEntry::new("cpu", ts, 1).validate().is_ok());
    }
}
