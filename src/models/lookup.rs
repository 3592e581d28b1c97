// Range + resolution query descriptor, with the number-or-string interval parsed at the boundary.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IntervalError, Result, StorageError};

/// Longest interval a lookup may ask for: 100 years of 365 days.
pub const MAX_INTERVAL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Requested resolution as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    untagged,
    expecting = "interval as a nanosecond count or a duration string such as \"30m\""
)]
pub enum IntervalSpec {
    /// Nanoseconds, e.g. 1800000000000 for 30 minutes.
    Count(u64),
    /// Human duration: "30m", "1h", "1h30m".
    Text(String),
}

impl IntervalSpec {
    pub fn parse(&self) -> std::result::Result<Duration, IntervalError> {
        let d = match self {
            Self::Count(nanos) => Duration::from_nanos(*nanos),
            Self::Text(s) => {
                humantime::parse_duration(s.trim()).map_err(|e| IntervalError::Invalid {
                    input: s.clone(),
                    reason: e.to_string(),
                })?
            }
        };
        if d.is_zero() {
            return Err(IntervalError::Zero);
        }
        if d.subsec_nanos() % 1_000_000 != 0 {
            return Err(IntervalError::SubMillisecond(d));
        }
        if d > MAX_INTERVAL {
            return Err(IntervalError::TooLarge(d));
        }
        Ok(d)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupQuery {
    /// Empty means every metric.
    #[serde(default)]
    pub name: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub interval: IntervalSpec,
}

impl LookupQuery {
    /// Validated `(from, to, interval)`.
    pub fn resolve(&self) -> Result<(DateTime<Utc>, DateTime<Utc>, Duration)> {
        if self.from > self.to {
            return Err(StorageError::Validation(format!(
                "lookup range is reversed: {} > {}",
                self.from, self.to
            )));
        }
        let interval = self.interval.parse()?;
        Ok((self.from, self.to, interval))
    }
}
