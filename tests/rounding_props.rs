use std::time::Duration;

use chrono::DateTime;
use metricsd::aggregation::{BucketMerger, ceil_round};
use metricsd::models::MetricEntry;
use proptest::prelude::*;

// 2000-01-01 .. 2100-01-01, in milliseconds.
const MIN_MS: i64 = 946_684_800_000;
const MAX_MS: i64 = 4_102_444_800_000;

fn unit() -> impl Strategy<Value = Duration> {
    prop_oneof![
        Just(Duration::from_secs(60)),
        Just(Duration::from_secs(180)),
        Just(Duration::from_secs(300)),
        Just(Duration::from_secs(1800)),
        Just(Duration::from_secs(3600)),
        (1u64..10_000).prop_map(Duration::from_millis),
    ]
}

proptest! {
    #[test]
    fn ceil_round_lands_on_the_next_boundary(ms in MIN_MS..MAX_MS, unit in unit()) {
        let t = DateTime::from_timestamp_millis(ms).unwrap();
        let rounded = ceil_round(t, unit);
        let unit_ms = unit.as_millis() as i64;
        prop_assert!(rounded >= t);
        prop_assert!((rounded - t).num_milliseconds() < unit_ms);
        prop_assert_eq!(rounded.timestamp_millis().rem_euclid(unit_ms), 0);
    }

    #[test]
    fn ceil_round_is_idempotent(ms in MIN_MS..MAX_MS, unit in unit()) {
        let t = DateTime::from_timestamp_millis(ms).unwrap();
        let once = ceil_round(t, unit);
        prop_assert_eq!(ceil_round(once, unit), once);
    }

    #[test]
    fn ceil_round_is_monotonic(a in MIN_MS..MAX_MS, b in MIN_MS..MAX_MS, unit in unit()) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let lo = DateTime::from_timestamp_millis(lo).unwrap();
        let hi = DateTime::from_timestamp_millis(hi).unwrap();
        prop_assert!(ceil_round(lo, unit) <= ceil_round(hi, unit));
    }

    #[test]
    fn merging_preserves_the_total(
        samples in prop::collection::vec((0usize..3, MIN_MS..MIN_MS + 86_400_000, -1000i64..1000), 0..64),
        unit in unit(),
    ) {
        let names = ["cpu", "mem", "disk"];
        let mut merger = BucketMerger::new(unit);
        let mut total = 0i64;
        for (n, ms, v) in &samples {
            let ts = DateTime::from_timestamp_millis(*ms).unwrap();
            merger.add(MetricEntry::new(names[*n], ts, *v));
            total += v;
        }
        let merged = merger.into_entries();
        prop_assert!(merged.len() <= samples.len());
        prop_assert_eq!(merged.iter().map(|e| e.value).sum::<i64>(), total);
        prop_assert!(merged.iter().all(|e| e.resolution == unit));
        prop_assert!(merged.windows(2).all(|w| (&w[0].name, w[0].timestamp) < (&w[1].name, w[1].timestamp)));
    }
}
