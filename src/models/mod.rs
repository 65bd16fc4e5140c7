use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::IngestError;

mod year_month;
pub use year_month::{MonthIter, ParseYearMonthError, YearMonth};

/// Validated ingest window, `start <= end`.
///
/// Built once per planning run and embedded verbatim in every batch, so a
/// re-run with the same trigger repairs exactly the same months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RangeBounds")]
pub struct IngestRange {
    #[serde(rename = "year_month_start")]
    start: YearMonth,
    #[serde(rename = "year_month_end")]
    end: YearMonth,
}

#[derive(Deserialize)]
struct RangeBounds {
    year_month_start: YearMonth,
    year_month_end: YearMonth,
}

impl TryFrom<RangeBounds> for IngestRange {
    type Error = IngestError;

    fn try_from(bounds: RangeBounds) -> Result<Self, Self::Error> {
        IngestRange::new(bounds.year_month_start, bounds.year_month_end)
    }
}

impl IngestRange {
    pub fn new(start: YearMonth, end: YearMonth) -> Result<Self, IngestError> {
        if end < start {
            return Err(IngestError::InvalidOrder { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse both bounds, format first, then order.
    pub fn parse(start: &str, end: &str) -> Result<Self, IngestError> {
        let start = parse_bound("year_month_start", start)?;
        let end = parse_bound("year_month_end", end)?;
        Self::new(start, end)
    }

    pub fn start(&self) -> YearMonth {
        self.start
    }

    pub fn end(&self) -> YearMonth {
        self.end
    }
}

fn parse_bound(field: &'static str, value: &str) -> Result<YearMonth, IngestError> {
    value.parse().map_err(|_| IngestError::InvalidFormat {
        field,
        value: value.to_string(),
    })
}

/// Wider window handed to downstream stages: January of the year before the
/// ingest end, through the ingest end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageRange {
    pub start: YearMonth,
    pub end: YearMonth,
}

impl CoverageRange {
    pub fn contains(&self, ingest: &IngestRange) -> bool {
        self.start <= ingest.start && self.end >= ingest.end
    }
}

/// One row of the symbol universe table.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolRecord {
    pub symbol: String,
    /// `None` when the table value is not a valid `YYYY-MM`.
    pub start_date: Option<YearMonth>,
    pub raw_start_date: String,
}

impl SymbolRecord {
    pub fn new(symbol: impl Into<String>, raw_start_date: impl Into<String>) -> Self {
        let raw_start_date = raw_start_date.into();
        Self {
            symbol: symbol.into(),
            start_date: raw_start_date.parse().ok(),
            raw_start_date,
        }
    }
}

/// Unit of fan-out produced by the planner; one worker invocation each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDescriptor {
    pub batch_id: usize,
    pub symbols_subset: Vec<String>,
    pub symbols_uri: String,
    #[serde(flatten)]
    pub range: IngestRange,
}

/// Scheduler trigger consumed by the planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannerEvent {
    #[serde(alias = "symbols_s3_uri")]
    pub symbols_uri: String,
    #[serde(default)]
    pub batch_size: Option<i64>,
    #[serde(default)]
    pub year_month_start: Option<String>,
    #[serde(default)]
    pub year_month_end: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
}

/// Planner result: the batches plus the ranges other pipeline stages need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerOutput {
    pub batches: Vec<BatchDescriptor>,
    pub total_symbols: usize,
    pub glue_year_month_start: YearMonth,
    pub glue_year_month_end: YearMonth,
    pub gold_year_start: String,
    pub gold_year_end: String,
    pub ingest_year_month_start: YearMonth,
    pub ingest_year_month_end: YearMonth,
    pub planned_at_utc: String,
}

/// Worker invocation payload. A serialized [`BatchDescriptor`] is accepted
/// as is; bounds stay raw strings so malformed input is reported as a
/// format error rather than a decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerEvent {
    #[serde(alias = "symbols_s3_uri")]
    pub symbols_uri: String,
    pub year_month_start: String,
    pub year_month_end: String,
    #[serde(default)]
    pub symbols_subset: Option<Vec<String>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl From<&BatchDescriptor> for WorkerEvent {
    fn from(batch: &BatchDescriptor) -> Self {
        Self {
            symbols_uri: batch.symbols_uri.clone(),
            year_month_start: batch.range.start().to_string(),
            year_month_end: batch.range.end().to_string(),
            symbols_subset: Some(batch.symbols_subset.clone()),
            limit: None,
        }
    }
}

/// Configuration for the worker and the upstream client
#[derive(Debug, Clone)]
pub struct Config {
    pub alpha_api_key: String,
    pub alpha_api_url: String,
    pub bronze_bucket: Option<String>,
    pub bronze_prefix: String,
    pub bronze_local_dir: Option<PathBuf>,
    pub rate_limit_per_minute: u32,
    pub http_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_jitter_ms: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

pub const DEFAULT_ALPHA_API_URL: &str = "https://www.alphavantage.co/query";

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let config = Config {
            alpha_api_key: std::env::var("ALPHA_API_KEY")
                .map_err(|_| anyhow::anyhow!("ALPHA_API_KEY environment variable required"))?,
            alpha_api_url: std::env::var("ALPHA_API_URL")
                .unwrap_or_else(|_| DEFAULT_ALPHA_API_URL.to_string()),
            bronze_bucket: std::env::var("S3_BRONZE_BUCKET").ok().filter(|b| !b.is_empty()),
            bronze_prefix: std::env::var("S3_BRONZE_PREFIX").unwrap_or_else(|_| "data".to_string()),
            bronze_local_dir: std::env::var("BRONZE_LOCAL_DIR").ok().map(PathBuf::from),
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", 75),
            http_retries: env_or("HTTP_RETRIES", 3),
            retry_base_delay_ms: env_or("RETRY_BASE_DELAY_MS", 100),
            retry_jitter_ms: env_or("RETRY_JITTER_MS", 900),
            connect_timeout_secs: env_or("HTTP_CONNECT_TIMEOUT_SECS", 5),
            read_timeout_secs: env_or("HTTP_READ_TIMEOUT_SECS", 15),
        };

        if config.bronze_bucket.is_none() && config.bronze_local_dir.is_none() {
            anyhow::bail!("S3_BRONZE_BUCKET (or BRONZE_LOCAL_DIR) environment variable required");
        }

        Ok(config)
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
