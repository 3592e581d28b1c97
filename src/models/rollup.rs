use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One rollup rule: retire `source`-resolution entries older than `age` into `target` buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaggregationBucket {
    #[serde(with = "humantime_serde")]
    pub target: Duration,
    /// Measured back from the start of the current UTC day.
    #[serde(with = "humantime_serde")]
    pub age: Duration,
    #[serde(with = "humantime_serde")]
    pub source: Duration,
}
