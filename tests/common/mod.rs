// Shared test helpers

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use metricsd::accessor::{Accessor, MetricsAccessor};
use metricsd::error::{Result, StorageError};
use metricsd::models::MetricEntry;
use metricsd::store::SqliteStore;
use tempfile::TempDir;

pub const MIN: Duration = Duration::from_secs(60);

pub fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

/// Opens an initialised store in a fresh temp dir. Keep the dir alive for the test.
pub async fn open_store() -> (TempDir, Arc<SqliteStore>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.db");
    let store = SqliteStore::connect(path.to_str().unwrap(), 4, Duration::from_secs(5))
        .await
        .unwrap();
    store.init().await.unwrap();
    (dir, Arc::new(store))
}

pub async fn open_accessor() -> (TempDir, Arc<SqliteStore>, MetricsAccessor<SqliteStore>) {
    let (dir, store) = open_store().await;
    let accessor = MetricsAccessor::new(store.clone(), 0.25);
    (dir, store, accessor)
}

/// In-memory accessor double that records calls.
#[derive(Default)]
pub struct RecordingAccessor {
    pub writes: Mutex<Vec<MetricEntry>>,
    pub deletes: Mutex<Vec<String>>,
    pub lookups: Mutex<Vec<(String, Duration)>>,
    pub names: Mutex<Vec<String>>,
    pub canned: Mutex<Vec<MetricEntry>>,
    pub fail_writes: AtomicBool,
    pub fail_reads: AtomicBool,
    pub write_delay: Mutex<Option<Duration>>,
    pub delete_delay: Mutex<Option<Duration>>,
}

impl RecordingAccessor {
    pub fn written(&self) -> Vec<MetricEntry> {
        self.writes.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::store("read metrics", sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

impl Accessor for RecordingAccessor {
    async fn write(&self, entry: &MetricEntry) -> Result<()> {
        let delay = *self.write_delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::store(
                "insert metric",
                sqlx::Error::PoolTimedOut,
            ));
        }
        self.writes.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<u64> {
        self.deletes.lock().unwrap().push(name.to_string());
        let delay = *self.delete_delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        Ok(0)
    }

    async fn get_metrics_list(&self) -> Result<Vec<String>> {
        self.check_reads()?;
        Ok(self.names.lock().unwrap().clone())
    }

    async fn find_one_metric(
        &self,
        name: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Vec<MetricEntry>> {
        self.check_reads()?;
        self.lookups
            .lock()
            .unwrap()
            .push((name.to_string(), interval));
        Ok(self
            .canned
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect())
    }

    async fn find_all(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Vec<MetricEntry>> {
        self.check_reads()?;
        self.lookups.lock().unwrap().push((String::new(), interval));
        Ok(self.canned.lock().unwrap().clone())
    }
}
