use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::accessor::DEFAULT_FORGIVENESS;
use crate::models::{ONE_MINUTE, ReaggregationBucket};
use crate::reaggregator::RollupSchedule;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub rollup: RollupConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Per-request deadline; a timed-out request drops (cancels) its storage call.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Basic-auth credentials guarding the write routes.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    #[serde(default = "default_busy_timeout", with = "humantime_serde")]
    pub busy_timeout: Duration,
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Tolerance of the approximate read tier, as a fraction of the requested interval.
    #[serde(default = "default_forgiveness")]
    pub forgiveness: f64,
}

fn default_forgiveness() -> f64 {
    DEFAULT_FORGIVENESS
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            forgiveness: default_forgiveness(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,
    /// Upper bound on a single flush write made while the staging lock is held.
    #[serde(default = "default_flush_timeout", with = "humantime_serde")]
    pub flush_timeout: Duration,
}

fn default_cleanup_interval() -> Duration {
    ONE_MINUTE
}

fn default_flush_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: default_cleanup_interval(),
            flush_timeout: default_flush_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RollupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Optional cron expression (UTC, with seconds field), e.g. "0 5 0 * * *".
    pub schedule: Option<String>,
    /// Fixed period used when `schedule` is not set.
    #[serde(default = "default_rollup_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_buckets")]
    pub buckets: Vec<ReaggregationBucket>,
}

fn default_true() -> bool {
    true
}

fn default_rollup_interval() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_buckets() -> Vec<ReaggregationBucket> {
    vec![ReaggregationBucket {
        target: Duration::from_secs(30 * 60),
        age: Duration::from_secs(24 * 3600),
        source: ONE_MINUTE,
    }]
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: None,
            interval: default_rollup_interval(),
            buckets: default_buckets(),
        }
    }
}

impl RollupConfig {
    pub fn schedule(&self) -> RollupSchedule {
        match &self.schedule {
            Some(expr) => RollupSchedule::Cron(expr.clone()),
            None => RollupSchedule::Every(self.interval),
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.server.request_timeout.is_zero(),
            "server.request_timeout must be > 0"
        );
        anyhow::ensure!(!self.auth.user.is_empty(), "auth.user must be non-empty");
        anyhow::ensure!(
            !self.auth.password.is_empty(),
            "auth.password must be non-empty"
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            (0.0..1.0).contains(&self.query.forgiveness),
            "query.forgiveness must be in [0, 1), got {}",
            self.query.forgiveness
        );
        anyhow::ensure!(
            !self.staging.cleanup_interval.is_zero(),
            "staging.cleanup_interval must be > 0"
        );
        anyhow::ensure!(
            !self.staging.flush_timeout.is_zero(),
            "staging.flush_timeout must be > 0"
        );
        if let Some(expr) = &self.rollup.schedule {
            cron::Schedule::from_str(expr)
                .map_err(|e| anyhow::anyhow!("rollup.schedule {:?} is invalid: {}", expr, e))?;
        } else {
            anyhow::ensure!(
                !self.rollup.interval.is_zero(),
                "rollup.interval must be > 0"
            );
        }
        for (i, b) in self.rollup.buckets.iter().enumerate() {
            anyhow::ensure!(
                !b.source.is_zero(),
                "rollup.buckets[{}].source must be > 0",
                i
            );
            anyhow::ensure!(
                b.target > b.source,
                "rollup.buckets[{}].target ({:?}) must be coarser than source ({:?})",
                i,
                b.target,
                b.source
            );
        }
        Ok(())
    }
}
