use rand::Rng;
use reqwest::{header, Client, Method, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::Config;

/// Statuses worth another attempt while the budget lasts.
pub const RETRIABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

/// Fixed-base-plus-jitter retry policy.
///
/// Every attempt waits `base_delay + uniform(0, jitter_max)`; the delay does
/// not grow between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub jitter_max: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, jitter_max: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            jitter_max,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.http_retries,
            Duration::from_millis(config.retry_base_delay_ms),
            Duration::from_millis(config.retry_jitter_ms),
        )
    }

    /// No sleeping between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO, Duration::ZERO)
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter_max.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        self.base_delay + jitter
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_millis(900))
    }
}

/// HTTP client that retries transport failures and retriable statuses.
///
/// Owns its `reqwest::Client`; the connection pool lives exactly as long as
/// this value.
pub struct RetryingHttpClient {
    client: Client,
    policy: RetryPolicy,
}

impl RetryingHttpClient {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Build the underlying client with the configured timeouts.
    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .default_headers(headers)
            .user_agent("bronze-ingest/0.1")
            .build()?;

        Ok(Self::new(client, RetryPolicy::from_config(config)))
    }

    /// Perform one logical request.
    ///
    /// Returns the first 2xx response, the first non-retriable response, or
    /// the last response once attempts run out. A transport error on the
    /// final attempt is returned as the error, stripped of its URL.
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, &str)],
    ) -> reqwest::Result<Response> {
        let attempts = self.policy.total_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self
                .client
                .request(method.clone(), url)
                .query(params)
                .send()
                .await;

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    // The query string carries the API key.
                    let e = e.without_url();
                    warn!(
                        "HTTP error on attempt {}/{}: {} {} | error={}",
                        attempt, attempts, method, url, e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.next_delay()).await;
                        continue;
                    }
                    return Err(e);
                }
            };

            let status = response.status();
            if status.is_success() {
                debug!("{} {} -> {} on attempt {}/{}", method, url, status, attempt, attempts);
                return Ok(response);
            }

            if is_retriable(status) && attempt < attempts {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    "Retryable status {} on attempt {}/{}: {} {} | body[:200]={:?}",
                    status.as_u16(),
                    attempt,
                    attempts,
                    method,
                    url,
                    truncate(&body, 200)
                );
                tokio::time::sleep(self.policy.next_delay()).await;
                continue;
            }

            return Ok(response);
        }
    }
}

pub fn is_retriable(status: StatusCode) -> bool {
    RETRIABLE_STATUS.contains(&status.as_u16())
}

/// First `max` characters of `text`, respecting char boundaries.
pub(crate) fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
