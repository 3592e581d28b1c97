// Domain models shared by staging, store access, rollups and the API

mod entry;
mod lookup;
mod rollup;

pub use entry::{MetricEntry, minute_of_day};
pub use lookup::{IntervalSpec, LookupQuery, MAX_INTERVAL};
pub use rollup::ReaggregationBucket;

use std::time::Duration;

/// Resolution of raw samples as staged and persisted.
pub const ONE_MINUTE: Duration = Duration::from_secs(60);
