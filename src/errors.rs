use thiserror::Error;

use crate::models::YearMonth;

/// Fatal errors raised by the planner and the worker before any fetch begins.
///
/// Per-item fetch failures are never reported through this type; they are
/// accumulated in the worker's run statistics instead.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{field} must be in YYYY-MM format (e.g. 2025-12), got {value:?}")]
    InvalidFormat { field: &'static str, value: String },

    #[error("year_month_end ({end}) is earlier than year_month_start ({start})")]
    InvalidOrder { start: YearMonth, end: YearMonth },

    #[error("internal error: {0}")]
    CoverageInvariantViolation(String),

    #[error("batch_size must be positive, got {0}")]
    InvalidBatchSize(i64),

    #[error("invalid trigger time {value:?}: {reason}")]
    InvalidTriggerTime { value: String, reason: String },

    #[error("input table must contain {missing:?} column(s)")]
    SchemaError { missing: Vec<&'static str> },

    #[error("failed to parse universe table: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from the object store facade.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid source uri {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("not configured: {0}")]
    NotConfigured(String),
}
