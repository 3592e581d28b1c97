// Staging service: coalesces same-minute samples per metric in memory and flushes a
// bucket once its minute has closed. Reads go straight to the accessor, so they only
// see data flushed by the last bucket rollover or cleanup sweep.
//
// One tokio mutex guards the pending map for the whole of Update, Delete and the sweep,
// including the store call each makes. Every such call is bounded by `flush_timeout`, so
// Update and Delete hold the lock for at most one timeout and a sweep for at most one
// timeout per pending metric.
//
// A rollover swaps the new sample in before the closed bucket is written. An Update
// dropped mid-flush therefore loses at most that bucket and never writes it twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, instrument, warn};

use crate::accessor::Accessor;
use crate::error::{Result, StorageError};
use crate::models::{MetricEntry, ONE_MINUTE, minute_of_day};

pub struct Service<A> {
    db: Arc<A>,
    flush_timeout: Duration,
    staging: Mutex<HashMap<String, MetricEntry>>,
}

impl<A: Accessor> Service<A> {
    pub fn new(db: Arc<A>, flush_timeout: Duration) -> Self {
        Self {
            db,
            flush_timeout,
            staging: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a sample to its metric's open minute. A sample for a different minute takes
    /// the pending bucket's place and the closed bucket is flushed; if that flush fails
    /// the error is returned but the new sample is staged regardless.
    #[instrument(skip(self, entry), fields(metric = %entry.name))]
    pub async fn update(&self, entry: MetricEntry) -> Result<()> {
        entry.validate()?;
        let staged = MetricEntry {
            minute_of_day: Some(minute_of_day(entry.timestamp)),
            resolution: ONE_MINUTE,
            ..entry
        };

        let mut pending = self.staging.lock().await;
        let Some(current) = pending.get_mut(&staged.name) else {
            pending.insert(staged.name.clone(), staged);
            return Ok(());
        };

        if current.minute_of_day == staged.minute_of_day {
            current.value += staged.value;
            return Ok(());
        }

        let closed = std::mem::replace(current, staged);
        self.flush(&closed).await
    }

    /// Forgets the pending bucket and deletes the metric's whole stored history.
    #[instrument(skip(self, entry), fields(metric = %entry.name))]
    pub async fn delete(&self, entry: &MetricEntry) -> Result<()> {
        if entry.name.is_empty() {
            return Err(StorageError::Validation("metric name is required".into()));
        }
        let mut pending = self.staging.lock().await;
        pending.remove(&entry.name);
        let removed = match tokio::time::timeout(self.flush_timeout, self.db.delete(&entry.name))
            .await
        {
            Ok(r) => r.map_err(|e| e.context(format!("delete metric {}", entry.name)))?,
            Err(_) => {
                return Err(StorageError::Timeout {
                    op: format!("delete metric {}", entry.name),
                });
            }
        };
        debug!(removed, "metric history deleted");
        Ok(())
    }

    pub async fn get_list(&self) -> Result<Vec<String>> {
        self.db
            .get_metrics_list()
            .await
            .map_err(|e| e.context("list metrics"))
    }

    pub async fn get_one_metric(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Vec<MetricEntry>> {
        self.db
            .find_one_metric(name, from, to, interval)
            .await
            .map_err(|e| e.context(format!("find metric {name}")))
    }

    pub async fn get_all(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Vec<MetricEntry>> {
        self.db
            .find_all(from, to, interval)
            .await
            .map_err(|e| e.context("find all metrics"))
    }

    /// Value of the open bucket for `name`, if any.
    pub async fn pending_value(&self, name: &str) -> Option<i64> {
        self.staging.lock().await.get(name).map(|e| e.value)
    }

    pub async fn pending_len(&self) -> usize {
        self.staging.lock().await.len()
    }

    /// Flushes every pending bucket whose minute differs from `now`'s. Stops at the
    /// first failed flush; that entry and the rest stay pending for the next sweep.
    /// Returns the number of buckets flushed.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut pending = self.staging.lock().await;
        if pending.is_empty() {
            return Ok(0);
        }
        let now_minute = minute_of_day(now);
        let closed: Vec<String> = pending
            .iter()
            .filter(|(_, e)| e.minute_of_day != Some(now_minute))
            .map(|(name, _)| name.clone())
            .collect();

        let mut flushed = 0;
        for name in closed {
            if let Some(entry) = pending.get(&name) {
                self.flush(entry).await?;
                pending.remove(&name);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    async fn flush(&self, entry: &MetricEntry) -> Result<()> {
        match tokio::time::timeout(self.flush_timeout, self.db.write(entry)).await {
            Ok(r) => r,
            Err(_) => Err(StorageError::Timeout {
                op: format!("flush metric {}", entry.name),
            }),
        }
    }
}

/// Spawns the periodic cleanup sweep. On shutdown it runs one last sweep so closed
/// buckets are not lost, then exits.
pub fn spawn_cleanup<A: Accessor>(
    service: Arc<Service<A>>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval fires immediately; skip that so the first sweep happens after `every`.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match service.sweep(Utc::now()).await {
                        Ok(0) => {}
                        Ok(n) => debug!(flushed = n, "staging sweep"),
                        Err(e) => warn!(error = %e, "staging sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        match service.sweep(Utc::now()).await {
            Ok(n) => info!(flushed = n, "staging cleanup stopped"),
            Err(e) => warn!(error = %e, "final staging sweep failed"),
        }
    })
}
