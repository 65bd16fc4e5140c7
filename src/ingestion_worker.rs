//! Batch ingestion worker.
//!
//! Expands one batch into (symbol, month) fetches bounded by each symbol's
//! listing month and the current UTC month, runs them sequentially behind
//! the rate limiter and accumulates run statistics. Per-item failures are
//! recorded, never raised.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{error, info};

use crate::api::{ApiRateLimiter, MarketDataProvider};
use crate::errors::IngestError;
use crate::models::{IngestRange, SymbolRecord, WorkerEvent, YearMonth};
use crate::storage::SourceReader;
use crate::universe;

pub const COMPLETED_MESSAGE: &str = "Data fetching and storing completed.";

/// Accumulated over one worker run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunStatistics {
    pub total_symbols: usize,
    pub skipped_symbols: usize,
    pub total_requests: usize,
    pub success_requests: usize,
    pub error_requests: usize,
    pub symbols_with_errors: BTreeSet<String>,
    pub unresolved_failures: BTreeSet<(String, YearMonth)>,
}

impl RunStatistics {
    pub fn processed_symbols(&self) -> usize {
        self.total_symbols - self.skipped_symbols
    }

    fn record_success(&mut self, symbol: &str, month: YearMonth) {
        self.total_requests += 1;
        self.success_requests += 1;
        self.unresolved_failures.remove(&(symbol.to_string(), month));
    }

    fn record_failure(&mut self, symbol: &str, month: YearMonth) {
        self.total_requests += 1;
        self.error_requests += 1;
        self.symbols_with_errors.insert(symbol.to_string());
        self.unresolved_failures.insert((symbol.to_string(), month));
    }

    pub fn summary(&self, duration_seconds: f64) -> RunSummary {
        let requests_per_minute = if duration_seconds > 0.0 {
            self.total_requests as f64 / duration_seconds * 60.0
        } else {
            0.0
        };

        RunSummary {
            total_symbols: self.total_symbols,
            processed_symbols: self.processed_symbols(),
            skipped_symbols: self.skipped_symbols,
            total_requests: self.total_requests,
            success_requests: self.success_requests,
            error_requests: self.error_requests,
            unresolved_error_requests: self.unresolved_failures.len(),
            duration_seconds,
            requests_per_minute,
            symbols_with_errors: self.symbols_with_errors.iter().cloned().collect(),
        }
    }
}

/// `stats` block of the worker output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_symbols: usize,
    pub processed_symbols: usize,
    pub skipped_symbols: usize,
    pub total_requests: usize,
    pub success_requests: usize,
    pub error_requests: usize,
    pub unresolved_error_requests: usize,
    pub duration_seconds: f64,
    pub requests_per_minute: f64,
    /// Sorted.
    pub symbols_with_errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub ok: bool,
    pub message: String,
    pub stats: RunSummary,
}

/// Months to fetch for one symbol, or `None` when it must be skipped.
pub fn symbol_months(
    record: &SymbolRecord,
    range: &IngestRange,
    effective_end: YearMonth,
) -> Option<(YearMonth, YearMonth)> {
    let listed = record.start_date?;
    if listed > effective_end {
        return None;
    }
    Some((range.start().max(listed), effective_end))
}

pub struct IngestionWorker<P> {
    provider: P,
    reader: SourceReader,
    limiter: ApiRateLimiter,
}

impl<P: MarketDataProvider> IngestionWorker<P> {
    pub fn new(provider: P, reader: SourceReader, limiter: ApiRateLimiter) -> Self {
        Self {
            provider,
            reader,
            limiter,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run one batch against the current UTC month.
    pub async fn run(&self, event: &WorkerEvent) -> Result<WorkerOutput, IngestError> {
        self.run_at(event, YearMonth::current_utc()).await
    }

    /// Run one batch with `today` as the "no future data" cutoff.
    pub async fn run_at(
        &self,
        event: &WorkerEvent,
        today: YearMonth,
    ) -> Result<WorkerOutput, IngestError> {
        let range = IngestRange::parse(&event.year_month_start, &event.year_month_end)?;

        let subset_size = event
            .symbols_subset
            .as_ref()
            .map_or_else(|| "ALL".to_string(), |s| s.len().to_string());
        info!(
            "🚀 Worker started with range {} → {}, symbols_subset size={}",
            range.start(),
            range.end(),
            subset_size
        );

        let started = Instant::now();
        let records = self.load_universe(event).await?;

        let effective_end = range.end().min(today);
        let mut stats = RunStatistics {
            total_symbols: records.len(),
            ..Default::default()
        };

        info!(
            "📊 Starting Alpha Vantage fetch for {} symbols, range: {} → {}",
            stats.total_symbols,
            range.start(),
            effective_end
        );

        for record in &records {
            let Some((first, last)) = symbol_months(record, &range, effective_end) else {
                if record.start_date.is_none() {
                    info!(
                        "[SKIP] {} - invalid start_date {:?}",
                        record.symbol, record.raw_start_date
                    );
                } else {
                    info!(
                        "[SKIP] {} - symbol starts at {}, later than requested end {}",
                        record.symbol, record.raw_start_date, effective_end
                    );
                }
                stats.skipped_symbols += 1;
                continue;
            };

            for month in first.through(last) {
                info!("[FETCH] {} - month {}", record.symbol, month);

                match self.provider.fetch_and_store_month(&record.symbol, month).await {
                    Ok(()) => {
                        stats.record_success(&record.symbol, month);
                        info!("[OK] {} - stored for month {}", record.symbol, month);
                    }
                    Err(e) => {
                        stats.record_failure(&record.symbol, month);
                        error!("[ERR] {} - {} for {}", record.symbol, e, month);
                    }
                }

                self.limiter.wait().await;
            }
        }

        let summary = stats.summary(started.elapsed().as_secs_f64());
        log_summary(&summary);

        Ok(WorkerOutput {
            ok: true,
            message: COMPLETED_MESSAGE.to_string(),
            stats: summary,
        })
    }

    async fn load_universe(&self, event: &WorkerEvent) -> Result<Vec<SymbolRecord>, IngestError> {
        let data = self.reader.read(&event.symbols_uri).await?;
        let mut records = universe::parse_universe(&data)?;

        if let Some(subset) = &event.symbols_subset {
            let wanted: BTreeSet<&str> = subset.iter().map(String::as_str).collect();
            records.retain(|r| wanted.contains(r.symbol.as_str()));
            info!("Batch mode enabled: {} symbols in this batch", records.len());
        }

        if let Some(limit) = event.limit {
            records.truncate(limit);
            let symbols: Vec<&str> = records.iter().map(|r| r.symbol.as_str()).collect();
            info!("Limiting to first {} symbols: {:?}", limit, symbols);
        }

        Ok(records)
    }
}

fn log_summary(summary: &RunSummary) {
    info!("✅ {}", COMPLETED_MESSAGE);
    info!("========== SUMMARY ==========");
    info!("Total symbols         : {}", summary.total_symbols);
    info!("Processed symbols     : {}", summary.processed_symbols);
    info!("Skipped symbols       : {}", summary.skipped_symbols);
    info!("Total API requests    : {}", summary.total_requests);
    info!("Successful requests   : {}", summary.success_requests);
    info!("Error requests        : {}", summary.error_requests);
    info!("Symbols with any error: {}", summary.symbols_with_errors.len());
    info!("Unresolved errors     : {}", summary.unresolved_error_requests);
    info!("Total duration        : {:.1} s", summary.duration_seconds);
    info!("Requests per minute   : {:.2}", summary.requests_per_minute);

    if !summary.symbols_with_errors.is_empty() {
        info!(
            "Error symbols (any month failed): {}",
            summary.symbols_with_errors.join(", ")
        );
    }
}
