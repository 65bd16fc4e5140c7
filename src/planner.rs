//! Planning stage: trigger → ingest range → batches.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::info;

use crate::errors::IngestError;
use crate::models::{
    BatchDescriptor, CoverageRange, IngestRange, PlannerEvent, PlannerOutput, YearMonth,
};
use crate::storage::SourceReader;
use crate::universe;

pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Turns a trigger time and an optional explicit range into a validated
/// ingest range.
pub struct RangeResolver;

impl RangeResolver {
    /// Explicit bounds are used when both are given (non-blank); otherwise
    /// the previous and current month of `trigger_time`.
    pub fn resolve(
        trigger_time: DateTime<Utc>,
        explicit_start: Option<&str>,
        explicit_end: Option<&str>,
    ) -> Result<IngestRange, IngestError> {
        let explicit_start = explicit_start.map(str::trim).filter(|s| !s.is_empty());
        let explicit_end = explicit_end.map(str::trim).filter(|s| !s.is_empty());

        match (explicit_start, explicit_end) {
            (Some(start), Some(end)) => IngestRange::parse(start, end),
            _ => {
                let current = YearMonth::from_date(&trigger_time);
                IngestRange::new(current.previous(), current)
            }
        }
    }

    /// January of the year before the ingest end, through the ingest end.
    pub fn coverage(ingest: &IngestRange) -> Result<CoverageRange, IngestError> {
        let coverage = CoverageRange {
            start: YearMonth::january(ingest.end().year() - 1),
            end: ingest.end(),
        };

        if coverage.start.month() != 1 {
            return Err(IngestError::CoverageInvariantViolation(format!(
                "coverage start must be January (YYYY-01), got {}",
                coverage.start
            )));
        }
        if !coverage.contains(ingest) {
            return Err(IngestError::CoverageInvariantViolation(format!(
                "coverage range {}..{} must fully cover ingest range {}..{}",
                coverage.start,
                coverage.end,
                ingest.start(),
                ingest.end()
            )));
        }

        Ok(coverage)
    }

    /// Trigger time from the event; blank or absent means now.
    pub fn trigger_time(raw: Option<&str>) -> Result<DateTime<Utc>, IngestError> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            Some(value) => parse_trigger_time(value),
            None => Ok(Utc::now()),
        }
    }
}

fn parse_trigger_time(value: &str) -> Result<DateTime<Utc>, IngestError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    // Naive timestamps are taken as UTC.
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| IngestError::InvalidTriggerTime {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Contiguous, order-preserving partitioning of the universe.
pub struct BatchPlanner;

impl BatchPlanner {
    pub fn partition(
        symbols: &[String],
        batch_size: i64,
        symbols_uri: &str,
        range: IngestRange,
    ) -> Result<Vec<BatchDescriptor>, IngestError> {
        if batch_size <= 0 {
            return Err(IngestError::InvalidBatchSize(batch_size));
        }

        let batches = symbols
            .chunks(batch_size as usize)
            .enumerate()
            .map(|(batch_id, chunk)| BatchDescriptor {
                batch_id,
                symbols_subset: chunk.to_vec(),
                symbols_uri: symbols_uri.to_string(),
                range,
            })
            .collect();

        Ok(batches)
    }

    /// Read the universe and partition it.
    pub async fn plan(
        reader: &SourceReader,
        symbols_uri: &str,
        batch_size: i64,
        range: IngestRange,
    ) -> Result<(Vec<BatchDescriptor>, usize), IngestError> {
        if batch_size <= 0 {
            return Err(IngestError::InvalidBatchSize(batch_size));
        }

        let data = reader.read(symbols_uri).await?;
        let symbols = universe::parse_symbols(&data)?;
        let batches = Self::partition(&symbols, batch_size, symbols_uri, range)?;
        Ok((batches, symbols.len()))
    }
}

/// Planner entry point: validate the trigger, read the universe and emit
/// one descriptor per batch.
pub async fn handle_planner_event(
    event: &PlannerEvent,
    reader: &SourceReader,
) -> Result<PlannerOutput, IngestError> {
    let batch_size = event.batch_size.unwrap_or(DEFAULT_BATCH_SIZE as i64);
    let now = RangeResolver::trigger_time(event.time.as_deref())?;

    let ingest = RangeResolver::resolve(
        now,
        event.year_month_start.as_deref(),
        event.year_month_end.as_deref(),
    )?;
    let coverage = RangeResolver::coverage(&ingest)?;

    info!(
        "📅 Planning ingest range {} → {} (coverage {} → {})",
        ingest.start(),
        ingest.end(),
        coverage.start,
        coverage.end
    );

    let (batches, total_symbols) =
        BatchPlanner::plan(reader, &event.symbols_uri, batch_size, ingest).await?;

    info!(
        "📦 Planned {} batches for {} symbols (batch_size={})",
        batches.len(),
        total_symbols,
        batch_size
    );

    Ok(PlannerOutput {
        batches,
        total_symbols,
        glue_year_month_start: coverage.start,
        glue_year_month_end: coverage.end,
        gold_year_start: format!("{:04}", coverage.start.year()),
        gold_year_end: format!("{:04}", coverage.end.year()),
        ingest_year_month_start: ingest.start(),
        ingest_year_month_end: ingest.end(),
        planned_at_utc: now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    })
}
