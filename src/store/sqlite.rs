// SQLite document store. One flat `metrics` table; every row carries its resolution.
// Timestamps and resolutions are stored as milliseconds.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::DateTime;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::instrument;

use super::{DocumentStore, Filter, ReplaceOutcome, ResolutionMatch};
use crate::error::{Result, StorageError};
use crate::models::MetricEntry;

// Every filter binds the same five nullable parameters, so the SQL stays static.
macro_rules! filter_clause {
    () => {
        "($1 IS NULL OR name = $1) \
         AND ($2 IS NULL OR resolution_ms >= $2) \
         AND ($3 IS NULL OR resolution_ms <= $3) \
         AND ($4 IS NULL OR timestamp_ms >= $4) \
         AND ($5 IS NULL OR timestamp_ms <= $5)"
    };
}

macro_rules! bind_filter {
    ($query:expr, $b:expr) => {{
        let b = $b;
        $query
            .bind(b.name)
            .bind(b.res_min)
            .bind(b.res_max)
            .bind(b.from)
            .bind(b.to)
    }};
}

const SELECT_SQL: &str = concat!(
    "SELECT name, timestamp_ms, value, resolution_ms FROM metrics WHERE ",
    filter_clause!(),
    " ORDER BY name ASC, timestamp_ms ASC"
);
const DELETE_SQL: &str = concat!("DELETE FROM metrics WHERE ", filter_clause!());
const DISTINCT_NAMES_SQL: &str = concat!(
    "SELECT DISTINCT name FROM metrics WHERE ",
    filter_clause!(),
    " ORDER BY name ASC"
);
const DISTINCT_RESOLUTIONS_SQL: &str = concat!(
    "SELECT DISTINCT resolution_ms FROM metrics WHERE ",
    filter_clause!(),
    " ORDER BY resolution_ms ASC"
);
const INSERT_SQL: &str =
    "INSERT INTO metrics (name, timestamp_ms, value, resolution_ms) VALUES ($1, $2, $3, $4)";
const MERGE_SQL: &str = "UPDATE metrics SET value = value + $1 \
     WHERE name = $2 AND resolution_ms = $3 AND timestamp_ms = $4";

/// Filter lowered to bind values.
struct Bounds {
    name: Option<String>,
    res_min: Option<i64>,
    res_max: Option<i64>,
    from: Option<i64>,
    to: Option<i64>,
}

impl From<&Filter> for Bounds {
    fn from(f: &Filter) -> Self {
        let (res_min, res_max) = match f.resolution {
            ResolutionMatch::Any => (None, None),
            ResolutionMatch::Exactly(d) => (Some(millis(d)), Some(millis(d))),
            ResolutionMatch::Below(d) => (None, Some(millis(d) - 1)),
            ResolutionMatch::Within { min, max } => (Some(millis(min)), Some(millis(max))),
        };
        Self {
            name: f.name.clone(),
            res_min,
            res_max,
            from: f.from.map(|t| t.timestamp_millis()),
            to: f.to.map(|t| t.timestamp_millis()),
        }
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(
        path: &str,
        max_pool_size: u32,
        busy_timeout: Duration,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                value INTEGER NOT NULL,
                resolution_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_metrics_name_resolution_ts ON metrics(name, resolution_ms, timestamp_ms)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_metrics_ts ON metrics(timestamp_ms)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Number of stored rows; handy for checks after a rollup.
    pub async fn count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metrics")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::store("count metrics", e))?;
        Ok(n.max(0) as u64)
    }

    fn parse_row(row: &SqliteRow) -> Result<MetricEntry> {
        let decode = |e| StorageError::store("decode metric row", e);
        let name: String = row.try_get("name").map_err(decode)?;
        let timestamp_ms: i64 = row.try_get("timestamp_ms").map_err(decode)?;
        let value: i64 = row.try_get("value").map_err(decode)?;
        let resolution_ms: i64 = row.try_get("resolution_ms").map_err(decode)?;

        let timestamp = DateTime::from_timestamp_millis(timestamp_ms).ok_or_else(|| {
            decode(sqlx::Error::Protocol(format!(
                "timestamp {timestamp_ms}ms out of range for {name}"
            )))
        })?;

        Ok(MetricEntry {
            name,
            timestamp,
            value,
            resolution: Duration::from_millis(resolution_ms.max(0) as u64),
            minute_of_day: None,
        })
    }
}

impl DocumentStore for SqliteStore {
    #[instrument(skip(self, entry), fields(repo = "metrics", operation = "insert_one", metric = %entry.name))]
    async fn insert_one(&self, entry: &MetricEntry) -> Result<()> {
        sqlx::query(INSERT_SQL)
            .bind(&entry.name)
            .bind(entry.timestamp.timestamp_millis())
            .bind(entry.value)
            .bind(millis(entry.resolution))
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::store(format!("insert metric {}", entry.name), e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = "metrics", operation = "delete_many"))]
    async fn delete_many(&self, filter: &Filter) -> Result<u64> {
        let r = bind_filter!(sqlx::query(DELETE_SQL), Bounds::from(filter))
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::store("delete metrics", e))?;
        Ok(r.rows_affected())
    }

    fn find(&self, filter: &Filter) -> BoxStream<'_, Result<MetricEntry>> {
        bind_filter!(sqlx::query(SELECT_SQL), Bounds::from(filter))
            .fetch(&self.pool)
            .map(|row| {
                row.map_err(|e| StorageError::store("read metrics", e))
                    .and_then(|row| Self::parse_row(&row))
            })
            .boxed()
    }

    #[instrument(skip(self), fields(repo = "metrics", operation = "distinct_names"))]
    async fn distinct_names(&self, filter: &Filter) -> Result<Vec<String>> {
        bind_filter!(
            sqlx::query_scalar::<_, String>(DISTINCT_NAMES_SQL),
            Bounds::from(filter)
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::store("list metric names", e))
    }

    #[instrument(skip(self), fields(repo = "metrics", operation = "distinct_resolutions"))]
    async fn distinct_resolutions(&self, filter: &Filter) -> Result<Vec<Duration>> {
        let rows = bind_filter!(
            sqlx::query_scalar::<_, i64>(DISTINCT_RESOLUTIONS_SQL),
            Bounds::from(filter)
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::store("list metric resolutions", e))?;
        Ok(rows
            .into_iter()
            .map(|ms| Duration::from_millis(ms.max(0) as u64))
            .collect())
    }

    #[instrument(
        skip(self, replacements),
        fields(repo = "metrics", operation = "replace", replacements = replacements.len())
    )]
    async fn replace(
        &self,
        retire: &Filter,
        scanned: u64,
        replacements: &[MetricEntry],
    ) -> Result<ReplaceOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::store("begin rollup transaction", e))?;

        // Retire first: the DELETE takes the write lock, so the count below and the
        // merges that follow see the same rows.
        let deleted = bind_filter!(sqlx::query(DELETE_SQL), Bounds::from(retire))
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::store("retire rolled-up metrics", e))?
            .rows_affected();
        if deleted != scanned {
            tx.rollback()
                .await
                .map_err(|e| StorageError::store("roll back rollup transaction", e))?;
            return Err(StorageError::Conflict {
                op: "rollup".into(),
                scanned,
                matched: deleted,
            });
        }

        let mut written = 0u64;
        for e in replacements {
            let merged = sqlx::query(MERGE_SQL)
                .bind(e.value)
                .bind(&e.name)
                .bind(millis(e.resolution))
                .bind(e.timestamp.timestamp_millis())
                .execute(&mut *tx)
                .await
                .map_err(|err| StorageError::store(format!("merge rollup of {}", e.name), err))?;
            if merged.rows_affected() == 0 {
                sqlx::query(INSERT_SQL)
                    .bind(&e.name)
                    .bind(e.timestamp.timestamp_millis())
                    .bind(e.value)
                    .bind(millis(e.resolution))
                    .execute(&mut *tx)
                    .await
                    .map_err(|err| {
                        StorageError::store(format!("write rollup of {}", e.name), err)
                    })?;
            }
            written += 1;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::store("commit rollup transaction", e))?;

        Ok(ReplaceOutcome { written, deleted })
    }
}
