//! Symbol universe table (CSV with a header row).

use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::debug;

use crate::errors::IngestError;
use crate::models::SymbolRecord;

pub const SYMBOL_COLUMN: &str = "symbol";
pub const START_DATE_COLUMN: &str = "start_date";

/// Symbols in source order. Only the `symbol` column is required.
pub fn parse_symbols(data: &[u8]) -> Result<Vec<String>, IngestError> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(data);
    let columns = column_indexes(reader.headers()?, &[SYMBOL_COLUMN])?;

    let mut symbols = Vec::new();
    for row in reader.records() {
        let row = row?;
        symbols.push(row.get(columns[0]).unwrap_or_default().to_string());
    }

    debug!("Parsed {} symbols from universe table", symbols.len());
    Ok(symbols)
}

/// Full universe rows; both `symbol` and `start_date` are required.
pub fn parse_universe(data: &[u8]) -> Result<Vec<SymbolRecord>, IngestError> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(data);
    let columns = column_indexes(reader.headers()?, &[SYMBOL_COLUMN, START_DATE_COLUMN])?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        records.push(SymbolRecord::new(
            row.get(columns[0]).unwrap_or_default(),
            row.get(columns[1]).unwrap_or_default(),
        ));
    }

    debug!("Parsed {} universe rows", records.len());
    Ok(records)
}

fn column_indexes(
    headers: &StringRecord,
    required: &[&'static str],
) -> Result<Vec<usize>, IngestError> {
    let names: Vec<&str> = headers
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim())
        .collect();

    let mut indexes = Vec::with_capacity(required.len());
    let mut missing = Vec::new();
    for column in required {
        match names.iter().position(|name| name == column) {
            Some(idx) => indexes.push(idx),
            None => missing.push(*column),
        }
    }

    if !missing.is_empty() {
        return Err(IngestError::SchemaError { missing });
    }
    Ok(indexes)
}
