// Rollup compactor: merges old fine-grained entries into coarser buckets and retires
// the sources. Buckets run in order; the first failure aborts the rest of the run
// without touching buckets already committed.
//
// Each bucket commits through `DocumentStore::replace`, one transaction that merges the
// new buckets and deletes the sources, so a crash never leaves both behind. Sources that
// changed after the scan abort the commit; the next run picks them up.
// Runs on a cron schedule (UTC) when one is configured, otherwise every `interval`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::aggregation::BucketMerger;
use crate::error::{Result, StorageError};
use crate::models::ReaggregationBucket;
use crate::store::{DocumentStore, Filter, ResolutionMatch};

/// What one bucket pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollupReport {
    pub bucket: ReaggregationBucket,
    pub scanned: u64,
    pub written: u64,
    pub deleted: u64,
}

pub struct Reaggregator<S> {
    store: Arc<S>,
    buckets: Vec<ReaggregationBucket>,
}

impl<S: DocumentStore> Reaggregator<S> {
    pub fn new(store: Arc<S>, buckets: Vec<ReaggregationBucket>) -> Self {
        Self { store, buckets }
    }

    /// Processes every bucket against the current time.
    pub async fn run(&self, shutdown: &watch::Receiver<bool>) -> Result<Vec<RollupReport>> {
        self.run_at(Utc::now(), shutdown).await
    }

    /// Processes every bucket as if the current time were `now`.
    pub async fn run_at(
        &self,
        now: DateTime<Utc>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Vec<RollupReport>> {
        let mut reports = Vec::with_capacity(self.buckets.len());
        for bucket in &self.buckets {
            reports.push(self.process(*bucket, now, shutdown).await?);
        }
        Ok(reports)
    }

    #[instrument(skip(self, shutdown), fields(target = ?bucket.target, source = ?bucket.source))]
    pub async fn process(
        &self,
        bucket: ReaggregationBucket,
        now: DateTime<Utc>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<RollupReport> {
        let filter = Filter::all()
            .resolution(ResolutionMatch::Exactly(bucket.source))
            .until(cutoff(now, bucket.age));

        let mut merger = BucketMerger::new(bucket.target);
        let mut scanned = 0u64;
        let mut cursor = self.store.find(&filter);
        while let Some(entry) = cursor.try_next().await? {
            if *shutdown.borrow() {
                return Err(StorageError::Cancelled);
            }
            merger.add(entry);
            scanned += 1;
        }
        drop(cursor);

        if scanned == 0 {
            return Ok(RollupReport {
                bucket,
                scanned,
                written: 0,
                deleted: 0,
            });
        }

        let merged = merger.into_entries();
        let outcome = self.store.replace(&filter, scanned, &merged).await?;
        Ok(RollupReport {
            bucket,
            scanned,
            written: outcome.written,
            deleted: outcome.deleted,
        })
    }
}

/// Start of `now`'s UTC day minus `age`.
pub fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now);
    let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
    midnight
        .checked_sub_signed(age)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// When rollups run.
#[derive(Debug, Clone)]
pub enum RollupSchedule {
    /// Cron expression, evaluated in UTC.
    Cron(String),
    Every(Duration),
}

/// Spawns the rollup worker; it exits when `shutdown` flips to true.
pub fn spawn<S: DocumentStore>(
    reaggregator: Arc<Reaggregator<S>>,
    schedule: RollupSchedule,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_worker(reaggregator, schedule, shutdown))
}

#[instrument(skip(reaggregator, shutdown))]
async fn run_worker<S: DocumentStore>(
    reaggregator: Arc<Reaggregator<S>>,
    schedule: RollupSchedule,
    mut shutdown: watch::Receiver<bool>,
) {
    let cron_schedule = match &schedule {
        RollupSchedule::Cron(expr) => match cron::Schedule::from_str(expr) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(cron = %expr, error = %e, "invalid rollup schedule; rollups will not run");
                return;
            }
        },
        RollupSchedule::Every(_) => None,
    };

    loop {
        let delay = match (&cron_schedule, &schedule) {
            (Some(s), _) => {
                let now = Utc::now();
                match s.after(&now).next() {
                    Some(next) => (next - now).to_std().unwrap_or(Duration::from_secs(1)),
                    None => Duration::from_secs(3600),
                }
            }
            (None, RollupSchedule::Every(every)) => *every,
            (None, RollupSchedule::Cron(_)) => return,
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match reaggregator.run(&shutdown).await {
            Ok(reports) => {
                for r in reports.iter().filter(|r| r.scanned > 0) {
                    info!(
                        target_interval = ?r.bucket.target,
                        source_interval = ?r.bucket.source,
                        scanned = r.scanned,
                        written = r.written,
                        deleted = r.deleted,
                        "rollup bucket complete"
                    );
                }
            }
            Err(StorageError::Cancelled) => break,
            Err(e) => warn!(error = %e, "rollup run failed"),
        }
    }
    info!("rollup worker stopped");
}
