//! Scripted market data provider for worker tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use bronze_ingest::api::{FetchError, MarketDataProvider};
use bronze_ingest::models::YearMonth;

/// Answers `Ok(())` unless an outcome was queued for the (symbol, month).
#[derive(Default)]
pub struct ScriptedProvider {
    outcomes: Mutex<HashMap<(String, YearMonth), VecDeque<Result<(), FetchError>>>>,
    calls: Mutex<Vec<(String, YearMonth)>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(self, symbol: &str, month: YearMonth, error: FetchError) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .entry((symbol.to_string(), month))
            .or_default()
            .push_back(Err(error));
        self
    }

    pub fn calls(&self) -> Vec<(String, YearMonth)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, symbol: &str) -> Vec<YearMonth> {
        self.calls()
            .into_iter()
            .filter(|(s, _)| s == symbol)
            .map(|(_, month)| month)
            .collect()
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedProvider {
    async fn fetch_and_store_month(
        &self,
        symbol: &str,
        month: YearMonth,
    ) -> Result<(), FetchError> {
        self.calls.lock().unwrap().push((symbol.to_string(), month));
        self.outcomes
            .lock()
            .unwrap()
            .get_mut(&(symbol.to_string(), month))
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()))
    }
}
