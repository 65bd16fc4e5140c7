use std::time::Duration;

use crate::models::YearMonth;

pub mod alpha_vantage_client;
pub mod http_client;

pub use alpha_vantage_client::{AlphaVantageClient, FetchError};
pub use http_client::{RetryPolicy, RetryingHttpClient};

/// Fixed pause inserted after every upstream request.
///
/// Sized from the per-minute quota so that sequential requests can never
/// exceed it.
#[derive(Debug, Clone)]
pub struct ApiRateLimiter {
    delay: Duration,
}

impl ApiRateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let delay_ms = if requests_per_minute > 0 {
            // Never below 1 ms, even for quotas above 60k/min.
            (60_000 / requests_per_minute as u64).max(1)
        } else {
            1000 // Default 1 second delay
        };

        Self {
            delay: Duration::from_millis(delay_ms),
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn wait(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Source of monthly intraday payloads, as seen by the ingestion worker
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch one (symbol, month) and persist it under its bronze key.
    async fn fetch_and_store_month(&self, symbol: &str, month: YearMonth) -> Result<(), FetchError>;
}
