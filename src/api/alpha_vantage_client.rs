//! Alpha Vantage gateway.
//!
//! Builds endpoint-specific requests, sends them through the retrying client
//! and validates the response envelope. Every operation returns a
//! [`FetchError`] instead of propagating transport or upstream failures.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Method};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::http_client::{truncate, RetryingHttpClient};
use super::MarketDataProvider;
use crate::models::{Config, YearMonth};
use crate::storage::BronzeStore;

// Envelope markers of the current API version. Both mean "no data this time".
const RATE_LIMIT_FIELDS: [&str; 2] = ["Note", "Information"];
const ERROR_FIELD: &str = "Error Message";
const MONTHLY_ADJUSTED_SERIES: &str = "Monthly Adjusted Time Series";

/// Why a single gateway call produced no payload.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Transport(String),

    #[error("Alpha Vantage API returned HTTP {0}")]
    HttpStatus(u16),

    #[error("unexpected response format: {0:?}")]
    UnexpectedFormat(String),

    #[error("invalid JSON from Alpha Vantage API: {0}")]
    InvalidJson(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("upstream error: {0}")]
    UpstreamError(String),

    #[error("no time series in response")]
    NoTimeSeries,

    #[error("bronze save failed: {0}")]
    Storage(String),
}

/// Validated response: raw body bytes plus the parsed document.
#[derive(Debug, Clone)]
pub struct Payload {
    pub body: Bytes,
    pub json: Value,
}

/// Alpha Vantage API client
pub struct AlphaVantageClient {
    http: RetryingHttpClient,
    api_key: String,
    base_url: String,
    bronze: Option<BronzeStore>,
}

impl AlphaVantageClient {
    pub fn new(
        http: RetryingHttpClient,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into(),
            bronze: None,
        }
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        let http = RetryingHttpClient::from_config(config)?;
        Ok(Self::new(http, &config.alpha_api_key, &config.alpha_api_url))
    }

    /// Attach the store used when a call asks for persistence.
    pub fn with_bronze_store(mut self, store: BronzeStore) -> Self {
        self.bronze = Some(store);
        self
    }

    /// One month of 1-minute bars. With `persist`, the body is written
    /// verbatim to the bronze partition for (symbol, month).
    pub async fn fetch_intraday_month(
        &self,
        symbol: &str,
        month: YearMonth,
        persist: bool,
    ) -> Result<Value, FetchError> {
        let month_str = month.to_string();
        let params = [
            ("function", "TIME_SERIES_INTRADAY"),
            ("symbol", symbol),
            ("month", month_str.as_str()),
            ("interval", "1min"),
            ("outputsize", "full"),
        ];
        let context = format!("symbol={symbol}, month={month}");
        let payload = self.request(&params, &context).await?;

        if persist {
            let store = self.store()?;
            let uri = store
                .put_intraday(symbol, month, payload.body)
                .await
                .map_err(|e| {
                    error!("S3 save failed ({}): {}", context, e);
                    FetchError::Storage(e.to_string())
                })?;
            info!("Saved bronze raw JSON: {}", uri);
        }

        Ok(payload.json)
    }

    /// Monthly adjusted series. Useful to check that a ticker exists.
    pub async fn fetch_monthly_adjusted(
        &self,
        symbol: &str,
        save: bool,
    ) -> Result<Value, FetchError> {
        let params = [("function", "TIME_SERIES_MONTHLY_ADJUSTED"), ("symbol", symbol)];
        let context = format!("monthly adjusted, symbol={symbol}");
        let payload = self.request(&params, &context).await?;

        if save {
            let uri = self
                .store()?
                .put_monthly_adjusted(symbol, payload.body)
                .await
                .map_err(|e| FetchError::Storage(e.to_string()))?;
            info!("Saved monthly adjusted raw JSON: {}", uri);
        }

        Ok(payload.json)
    }

    /// Earliest month with data, from the smallest date key of the monthly
    /// adjusted series.
    pub async fn symbol_earliest_month(&self, symbol: &str) -> Result<YearMonth, FetchError> {
        let data = self.fetch_monthly_adjusted(symbol, false).await?;
        earliest_month(&data)
    }

    pub async fn search_symbol(&self, keywords: &str, save: bool) -> Result<Value, FetchError> {
        let params = [("function", "SYMBOL_SEARCH"), ("keywords", keywords)];
        let context = format!("symbol search, keywords={keywords}");
        let payload = self.request(&params, &context).await?;

        if save {
            let uri = self
                .store()?
                .put_symbol_search(keywords, payload.body)
                .await
                .map_err(|e| FetchError::Storage(e.to_string()))?;
            info!("Saved symbol search raw JSON: {}", uri);
        }

        Ok(payload.json)
    }

    fn store(&self) -> Result<&BronzeStore, FetchError> {
        self.bronze
            .as_ref()
            .ok_or_else(|| FetchError::Storage("no bronze store configured".to_string()))
    }

    async fn request(&self, params: &[(&str, &str)], context: &str) -> Result<Payload, FetchError> {
        let mut query = params.to_vec();
        query.push(("apikey", self.api_key.as_str()));

        let response = self
            .http
            .execute(Method::GET, &self.base_url, &query)
            .await
            .map_err(|e| {
                error!("Request to Alpha Vantage API failed after retries ({}): {}", context, e);
                FetchError::Transport(e.to_string())
            })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();

        let body = response.bytes().await.map_err(|e| {
            let e = e.without_url();
            error!("Failed to read response body ({}): {}", context, e);
            FetchError::Transport(e.to_string())
        })?;

        let payload = validate_response(status.as_u16(), &content_type, body, context)?;
        debug!("Validated {} byte payload ({})", payload.body.len(), context);
        Ok(payload)
    }
}

#[async_trait]
impl MarketDataProvider for AlphaVantageClient {
    async fn fetch_and_store_month(
        &self,
        symbol: &str,
        month: YearMonth,
    ) -> Result<(), FetchError> {
        self.fetch_intraday_month(symbol, month, true)
            .await
            .map(|_| ())
    }
}

/// Envelope validation shared by every endpoint, in order: status, content
/// type, JSON, rate-limit advisory, error message.
pub fn validate_response(
    status: u16,
    content_type: &str,
    body: Bytes,
    context: &str,
) -> Result<Payload, FetchError> {
    if !(200..300).contains(&status) {
        error!(
            "Alpha Vantage API returned non-2xx ({}): {} {:?}",
            context,
            status,
            truncate(&String::from_utf8_lossy(&body), 300)
        );
        return Err(FetchError::HttpStatus(status));
    }

    if !content_type.to_lowercase().contains("application/json") {
        error!("Unexpected response type ({}): {:?}", context, content_type);
        return Err(FetchError::UnexpectedFormat(content_type.to_string()));
    }

    let json: Value = serde_json::from_slice(&body).map_err(|e| {
        error!(
            "Invalid JSON from Alpha Vantage API ({}): {}; body[:300]={:?}",
            context,
            e,
            truncate(&String::from_utf8_lossy(&body), 300)
        );
        FetchError::InvalidJson(e.to_string())
    })?;

    check_envelope(&json, context)?;
    Ok(Payload { body, json })
}

fn check_envelope(json: &Value, context: &str) -> Result<(), FetchError> {
    for field in RATE_LIMIT_FIELDS {
        if let Some(note) = json.get(field) {
            let message = field_text(note);
            warn!("Alpha Vantage {} (rate limit?) for ({}): {}", field, context, message);
            return Err(FetchError::RateLimited(message));
        }
    }

    if let Some(err) = json.get(ERROR_FIELD) {
        let message = field_text(err);
        error!("Alpha Vantage returned error for ({}): {}", context, message);
        return Err(FetchError::UpstreamError(message));
    }

    Ok(())
}

fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Smallest `YYYY-MM-DD` key of the monthly adjusted series, as a month.
pub fn earliest_month(data: &Value) -> Result<YearMonth, FetchError> {
    let series = data
        .get(MONTHLY_ADJUSTED_SERIES)
        .and_then(Value::as_object)
        .filter(|series| !series.is_empty())
        .ok_or(FetchError::NoTimeSeries)?;

    let earliest = series.keys().min().ok_or(FetchError::NoTimeSeries)?;
    earliest
        .get(..7)
        .and_then(|prefix| prefix.parse().ok())
        .ok_or_else(|| FetchError::UnexpectedFormat(format!("date key {earliest:?}")))
}
