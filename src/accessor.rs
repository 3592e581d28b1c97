// Persistent-store accessor: raw 1m writes, full-history deletes, and the
// exact -> aggregate -> approximate resolution cascade for reads.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use tracing::{debug, instrument};

use crate::aggregation::{BucketMerger, ceil_round};
use crate::error::{IntervalError, Result, StorageError};
use crate::models::{MAX_INTERVAL, MetricEntry, ONE_MINUTE};
use crate::store::{DocumentStore, Filter, ResolutionMatch};

/// Default half-width of the approximate tier's tolerance band.
pub const DEFAULT_FORGIVENESS: f64 = 0.25;

/// Storage operations the staging service relies on.
pub trait Accessor: Send + Sync + 'static {
    /// Persists one raw sample, rounded up to its minute.
    fn write(&self, entry: &MetricEntry) -> impl Future<Output = Result<()>> + Send;

    /// Drops every stored entry for `name`, at every resolution and time.
    fn delete(&self, name: &str) -> impl Future<Output = Result<u64>> + Send;

    fn get_metrics_list(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn find_one_metric(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Duration,
    ) -> impl Future<Output = Result<Vec<MetricEntry>>> + Send;

    fn find_all(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Duration,
    ) -> impl Future<Output = Result<Vec<MetricEntry>>> + Send;
}

/// Which cascade tier produced a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Exact,
    Aggregated,
    Approximate,
    Empty,
}

pub struct MetricsAccessor<S> {
    store: Arc<S>,
    forgiveness: f64,
}

impl<S: DocumentStore> MetricsAccessor<S> {
    pub fn new(store: Arc<S>, forgiveness: f64) -> Self {
        Self {
            store,
            forgiveness: forgiveness.clamp(0.0, 1.0),
        }
    }

    /// Tier 1: entries stored at exactly `interval`.
    pub async fn exact_match(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Vec<MetricEntry>> {
        let filter = Filter::by_name(name)
            .resolution(ResolutionMatch::Exactly(interval))
            .between(from, to);
        self.store.find(&filter).try_collect().await
    }

    /// Tier 2: sums the largest stored resolution that evenly divides `interval`
    /// into `interval` buckets. Empty when no finer resolution divides it.
    pub async fn aggregate_finer(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Vec<MetricEntry>> {
        let finer = Filter::by_name(name)
            .resolution(ResolutionMatch::Below(interval))
            .between(from, to);
        let resolutions = self.store.distinct_resolutions(&finer).await?;
        let Some(source) = pick_divisor(resolutions, interval) else {
            debug!(metric = name, ?interval, "no finer resolution divides the interval");
            return Ok(Vec::new());
        };

        let filter = Filter::by_name(name)
            .resolution(ResolutionMatch::Exactly(source))
            .between(from, to);
        let mut merger = BucketMerger::new(interval);
        let mut cursor = self.store.find(&filter);
        while let Some(entry) = cursor.try_next().await? {
            merger.add(entry);
        }
        Ok(merger.into_entries())
    }

    /// Tier 3: entries whose resolution lies within `interval * (1 ± forgiveness)`, as stored.
    pub async fn approximate_match(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Vec<MetricEntry>> {
        let (min, max) = tolerance_band(interval, self.forgiveness);
        let filter = Filter::by_name(name)
            .resolution(ResolutionMatch::Within { min, max })
            .between(from, to);
        self.store.find(&filter).try_collect().await
    }

    /// Runs the three tiers in order and returns the first non-empty answer.
    #[instrument(skip(self), fields(repo = "metrics", operation = "cascade"))]
    pub async fn cascade(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Duration,
    ) -> Result<(Tier, Vec<MetricEntry>)> {
        let exact = self.exact_match(name, from, to, interval).await?;
        if !exact.is_empty() {
            return Ok((Tier::Exact, exact));
        }
        let aggregated = self.aggregate_finer(name, from, to, interval).await?;
        if !aggregated.is_empty() {
            return Ok((Tier::Aggregated, aggregated));
        }
        let approx = self.approximate_match(name, from, to, interval).await?;
        if !approx.is_empty() {
            return Ok((Tier::Approximate, approx));
        }
        Ok((Tier::Empty, Vec::new()))
    }
}

impl<S: DocumentStore> Accessor for MetricsAccessor<S> {
    async fn write(&self, entry: &MetricEntry) -> Result<()> {
        let stored = MetricEntry {
            timestamp: ceil_round(entry.timestamp, ONE_MINUTE),
            resolution: ONE_MINUTE,
            minute_of_day: None,
            ..entry.clone()
        };
        self.store.insert_one(&stored).await
    }

    async fn delete(&self, name: &str) -> Result<u64> {
        self.store.delete_many(&Filter::by_name(name)).await
    }

    async fn get_metrics_list(&self) -> Result<Vec<String>> {
        self.store.distinct_names(&Filter::all()).await
    }

    async fn find_one_metric(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Vec<MetricEntry>> {
        check_lookup(from, to, interval)?;
        let (tier, entries) = self.cascade(name, from, to, interval).await?;
        debug!(metric = name, ?tier, count = entries.len(), "lookup answered");
        Ok(entries)
    }

    async fn find_all(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Vec<MetricEntry>> {
        check_lookup(from, to, interval)?;
        let names = self
            .store
            .distinct_names(&Filter::all().between(from, to))
            .await?;
        let mut out = Vec::new();
        for name in names {
            let (_, entries) = self.cascade(&name, from, to, interval).await?;
            out.extend(entries);
        }
        Ok(out)
    }
}

fn check_lookup(from: DateTime<Utc>, to: DateTime<Utc>, interval: Duration) -> Result<()> {
    if interval.is_zero() {
        return Err(StorageError::Validation(
            "interval must be greater than zero".into(),
        ));
    }
    if interval > MAX_INTERVAL {
        return Err(IntervalError::TooLarge(interval).into());
    }
    if from > to {
        return Err(StorageError::Validation(format!(
            "lookup range is reversed: {from} > {to}"
        )));
    }
    Ok(())
}

/// Largest candidate with `interval % candidate == 0`.
fn pick_divisor(mut candidates: Vec<Duration>, interval: Duration) -> Option<Duration> {
    candidates.sort_unstable_by(|a, b| b.cmp(a));
    let target = interval.as_nanos();
    candidates
        .into_iter()
        .filter(|c| !c.is_zero() && *c < interval)
        .find(|c| target % c.as_nanos() == 0)
}

/// Saturates at `Duration::MAX` when the upper edge is not representable.
fn tolerance_band(interval: Duration, forgiveness: f64) -> (Duration, Duration) {
    let secs = interval.as_secs_f64();
    let edge = |factor: f64| Duration::try_from_secs_f64(secs * factor).unwrap_or(Duration::MAX);
    (edge(1.0 - forgiveness), edge(1.0 + forgiveness))
}
