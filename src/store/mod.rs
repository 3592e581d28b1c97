// Document-store contract the accessor and the rollup run against.
// The SQLite driver lives in `sqlite`; anything offering filtered find/insert/delete/distinct fits.

pub mod sqlite;

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;

use crate::error::Result;
use crate::models::MetricEntry;

pub use sqlite::SqliteStore;

/// Predicate on the stored `resolution`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionMatch {
    #[default]
    Any,
    Exactly(Duration),
    /// Strictly finer than the given resolution.
    Below(Duration),
    /// Inclusive band.
    Within { min: Duration, max: Duration },
}

/// Equality/range filter over stored entries. Unset parts match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub name: Option<String>,
    pub resolution: ResolutionMatch,
    /// Inclusive lower bound on `timestamp`.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `timestamp`.
    pub to: Option<DateTime<Utc>>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn resolution(mut self, resolution: ResolutionMatch) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn until(mut self, cutoff: DateTime<Utc>) -> Self {
        self.to = Some(cutoff);
        self
    }
}

/// Outcome of [`DocumentStore::replace`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// Replacement entries inserted or merged into an existing bucket.
    pub written: u64,
    pub deleted: u64,
}

pub trait DocumentStore: Send + Sync + 'static {
    fn insert_one(&self, entry: &MetricEntry) -> impl Future<Output = Result<()>> + Send;

    /// Removes every entry matching `filter`; returns how many went.
    fn delete_many(&self, filter: &Filter) -> impl Future<Output = Result<u64>> + Send;

    /// Cursor over matching entries, ordered by name then timestamp.
    fn find(&self, filter: &Filter) -> BoxStream<'_, Result<MetricEntry>>;

    /// Sorted distinct names among matching entries.
    fn distinct_names(&self, filter: &Filter) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Distinct resolutions among matching entries, ascending.
    fn distinct_resolutions(
        &self,
        filter: &Filter,
    ) -> impl Future<Output = Result<Vec<Duration>>> + Send;

    /// Atomically deletes everything matching `retire` and merges `replacements` into their
    /// `(name, resolution, timestamp)` buckets, adding to an existing bucket's value or
    /// inserting a new one.
    ///
    /// `scanned` is how many rows the caller read through `retire`. If a different number
    /// matches at commit time nothing is changed and `StorageError::Conflict` is returned.
    fn replace(
        &self,
        retire: &Filter,
        scanned: u64,
        replacements: &[MetricEntry],
    ) -> impl Future<Output = Result<ReplaceOutcome>> + Send;
}
