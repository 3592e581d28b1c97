// Error taxonomy for the storage side: validation, store I/O, deadlines, cancellation.
// "No data" is never an error; reads return an empty Vec.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Malformed or missing field in an entry or a lookup. Never retried.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Interval(#[from] IntervalError),

    /// Store call failed; `op` names the call and, where relevant, the metric.
    #[error("failed to {op}: {source}")]
    Store {
        op: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("timed out while trying to {op}")]
    Timeout { op: String },

    /// Rows matching a rollup's sources changed between the scan and the commit.
    #[error("{op} saw {scanned} source rows but {matched} matched at commit")]
    Conflict {
        op: String,
        scanned: u64,
        matched: u64,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl StorageError {
    pub fn store(op: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Store {
            op: op.into(),
            source,
        }
    }

    /// Prefixes the operation of a store or timeout error with `ctx`, e.g. the metric
    /// being read. Other variants already say what went wrong and pass through.
    pub fn context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            Self::Store { op, source } => Self::Store {
                op: format!("{ctx}: {op}"),
                source,
            },
            Self::Timeout { op } => Self::Timeout {
                op: format!("{ctx}: {op}"),
            },
            other => other,
        }
    }

    /// True for errors caused by the caller's input rather than the store.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Interval(_))
    }
}

/// Rejections from parsing a requested interval.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntervalError {
    #[error("invalid interval {input:?}: {reason}")]
    Invalid { input: String, reason: String },

    #[error("interval must be greater than zero")]
    Zero,

    #[error("interval {0:?} is not a whole number of milliseconds")]
    SubMillisecond(std::time::Duration),

    #[error("interval {0:?} exceeds the longest supported interval")]
    TooLarge(std::time::Duration),
}
