// Bucketing: ceiling rounding of timestamps and the (name, bucket) merge used by
// both the aggregate read tier and the rollup.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::MetricEntry;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Smallest multiple of `unit` (counted from the Unix epoch) at or after `t`.
/// Already-aligned instants come back unchanged; a zero unit is the identity.
///
/// The epoch anchor lines up with midnight for every unit that divides a day. Units that
/// do not divide a day land elsewhere than they would if counted from 0001-01-01: 7-day
/// buckets end on Thursdays (1970-01-01 was one), not on Mondays.
pub fn ceil_round(t: DateTime<Utc>, unit: Duration) -> DateTime<Utc> {
    let unit_ns = unit.as_nanos() as i128;
    if unit_ns == 0 {
        return t;
    }
    let t_ns = t.timestamp() as i128 * NANOS_PER_SEC + t.timestamp_subsec_nanos() as i128;
    let rem = t_ns.rem_euclid(unit_ns);
    if rem == 0 {
        return t;
    }
    let up = t_ns - rem + unit_ns;
    i64::try_from(up.div_euclid(NANOS_PER_SEC))
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, up.rem_euclid(NANOS_PER_SEC) as u32))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Sums entries into `interval` buckets keyed by `(name, ceil_round(timestamp, interval))`.
/// Every merged entry carries `interval` as its resolution.
#[derive(Debug)]
pub struct BucketMerger {
    interval: Duration,
    buckets: BTreeMap<(String, DateTime<Utc>), MetricEntry>,
}

impl BucketMerger {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            buckets: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, entry: MetricEntry) {
        let interval = self.interval;
        let bucket = ceil_round(entry.timestamp, interval);
        self.buckets
            .entry((entry.name.clone(), bucket))
            .and_modify(|merged| merged.value += entry.value)
            .or_insert_with(|| MetricEntry {
                name: entry.name,
                timestamp: bucket,
                value: entry.value,
                resolution: interval,
                minute_of_day: None,
            });
    }

    /// Merged entries ordered by name, then bucket time.
    pub fn into_entries(self) -> Vec<MetricEntry> {
        self.buckets.into_values().collect()
    }
}

impl Extend<MetricEntry> for BucketMerger {
    fn extend<I: IntoIterator<Item = MetricEntry>>(&mut self, iter: I) {
        for entry in iter {
            self.add(entry);
        }
    }
}
