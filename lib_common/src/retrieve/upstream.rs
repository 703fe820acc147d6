//! # Upstream Fetcher
//!
//! Pulls the dataset from the analytics API. The work is split in two:
//!
//! - A [`DataSource`] performs exactly one attempt and reports a
//!   [`FetchError`] for anything short of a fully parsed JSON object.
//! - [`UpstreamFetcher`] drives a source through a bounded, constant-delay
//!   retry loop ([`RetryPolicy`]) and returns either the first successful
//!   payload or a [`TerminalFetchError`] once the budget is spent.
//!
//! Nothing here panics or escapes as a process error; the refresh pipeline
//! receives a typed failure it can log and report.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::retrieve::http_client::{ApiClient, ApiResponse, HttpError};

/// Default Dune API host.
pub const DEFAULT_BASE_URL: &str = "https://api.dune.com";
/// Result-size cap sent with every request; large enough to get the whole dataset in one page.
pub const DEFAULT_RESULT_LIMIT: u32 = 10_000;
/// Header carrying the upstream secret key.
pub const API_KEY_HEADER: &str = "x-dune-api-key";

/// A single failed attempt against the upstream. Always retried while budget remains.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection, timeout or transport failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The upstream answered with a non-success HTTP status.
    #[error("Upstream returned status {status}")]
    Status {
        /// Numeric HTTP status.
        status: u16,
        /// Raw response body, when it could be read.
        body: Option<String>,
    },

    /// The body was not valid JSON.
    #[error("Malformed response body: {0}")]
    Decode(String),

    /// The body was JSON but not the expected top-level object.
    #[error("Unexpected payload shape: {0}")]
    UnexpectedShape(String),
}

impl From<HttpError> for FetchError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Decode(e) => FetchError::Decode(e.to_string()),
            other => FetchError::Network(other.to_string()),
        }
    }
}

/// The retry budget was exhausted without a successful attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Upstream fetch failed after {attempts} attempts: {last}")]
pub struct TerminalFetchError {
    /// Number of attempts made, including the first.
    pub attempts: u32,
    /// Error of the final attempt.
    #[source]
    pub last: FetchError,
}

/// One-shot access to an upstream dataset.
///
/// Implementations must only return `Ok` with a fully parsed payload.
pub trait DataSource: Send + Sync {
    /// Performs a single attempt.
    fn fetch_once(&self) -> BoxFuture<'_, Result<Value, FetchError>>;

    /// Short label used in log lines.
    fn name(&self) -> &str {
        "upstream"
    }
}

/// Constant-delay retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Pause between consecutive attempts. No backoff, no jitter.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Attempts allowed in total.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Wraps a [`DataSource`] with the retry budget.
#[derive(Clone)]
pub struct UpstreamFetcher {
    source: Arc<dyn DataSource>,
    policy: RetryPolicy,
}

impl UpstreamFetcher {
    /// Creates a fetcher with an explicit policy.
    pub fn new(source: Arc<dyn DataSource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    /// Creates a fetcher with the default budget (3 retries, 1000 ms apart).
    pub fn with_default_policy(source: Arc<dyn DataSource>) -> Self {
        Self::new(source, RetryPolicy::default())
    }

    /// Fetches the payload, retrying failed attempts until the budget runs out.
    ///
    /// Returns on the first successful attempt without making further calls.
    pub async fn fetch(&self) -> Result<Value, TerminalFetchError> {
        let total = self.policy.total_attempts();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(source = self.source.name(), attempt, total, "Fetching upstream payload");

            match self.source.fetch_once().await {
                Ok(payload) => {
                    debug!(source = self.source.name(), attempt, "Upstream payload received");
                    return Ok(payload);
                }
                Err(e) => {
                    warn!(
                        source = self.source.name(),
                        "Error fetching upstream data (attempt {}/{}): {}",
                        attempt,
                        total,
                        e
                    );

                    if attempt >= total {
                        error!(source = self.source.name(), attempts = attempt, "All retry attempts failed");
                        return Err(TerminalFetchError {
                            attempts: attempt,
                            last: e,
                        });
                    }

                    info!("Retrying in {}ms...", self.policy.delay.as_millis());
                    sleep(self.policy.delay).await;
                }
            }
        }
    }
}

/// Settings for [`DuneSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuneSourceConfig {
    /// API host, e.g. `https://api.dune.com`.
    pub base_url: String,
    /// Identifier of the saved query whose latest results are pulled.
    pub query_id: String,
    /// Secret sent in the `X-Dune-API-Key` header.
    pub api_key: String,
    /// Result-size cap.
    pub limit: u32,
    /// Per-attempt HTTP timeout.
    pub timeout: Duration,
}

impl DuneSourceConfig {
    /// Config for the public API with the default limit and a 30 s timeout.
    pub fn new(query_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            query_id: query_id.into(),
            api_key: api_key.into(),
            limit: DEFAULT_RESULT_LIMIT,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Reads the latest results of a saved Dune query.
///
/// One `GET {base}/api/v1/query/{id}/results?limit={limit}` per attempt.
pub struct DuneSource {
    client: ApiClient,
    path: String,
    limit: u32,
    headers: HeaderMap,
}

impl DuneSource {
    /// Builds the source. Fails on an invalid base URL or an API key that is
    /// not a legal header value.
    pub fn new(config: DuneSourceConfig) -> Result<Self, HttpError> {
        let client = ApiClient::new(&config.base_url, config.timeout)?;

        let mut key = HeaderValue::from_str(&config.api_key)?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(API_KEY_HEADER), key);

        Ok(Self {
            client,
            path: format!("api/v1/query/{}/results", config.query_id),
            limit: config.limit,
            headers,
        })
    }

    async fn attempt(&self) -> Result<Value, FetchError> {
        let query = [("limit", self.limit.to_string())];
        let response: ApiResponse<Value> = self
            .client
            .get_json(&self.path, &query, self.headers.clone())
            .await?;

        if !response.success {
            return Err(FetchError::Status {
                status: response.status,
                body: response.error_body,
            });
        }

        match response.data {
            Some(payload @ Value::Object(_)) => Ok(payload),
            Some(other) => Err(FetchError::UnexpectedShape(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
            None => Err(FetchError::UnexpectedShape("empty body".to_string())),
        }
    }
}

impl DataSource for DuneSource {
    fn fetch_once(&self) -> BoxFuture<'_, Result<Value, FetchError>> {
        Box::pin(self.attempt())
    }

    fn name(&self) -> &str {
        "dune"
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// Fails the first `failures` calls, then succeeds.
    struct FlakySource {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakySource {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DataSource for FlakySource {
        fn fetch_once(&self) -> BoxFuture<'_, Result<Value, FetchError>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call > self.failures {
                    Ok(json!({ "call": call }))
                } else {
                    Err(FetchError::Status { status: 503, body: None })
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_retries() {
        let source = FlakySource::new(u32::MAX);
        let fetcher = UpstreamFetcher::with_default_policy(source.clone());

        let started = Instant::now();
        let err = fetcher.fetch().await.unwrap_err();

        assert_eq!(source.calls(), 4);
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last, FetchError::Status { status: 503, body: None });
        // three constant 1000 ms pauses between four attempts
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_stops_the_loop() {
        let source = FlakySource::new(0);
        let fetcher = UpstreamFetcher::with_default_policy(source.clone());

        let started = Instant::now();
        let payload = fetcher.fetch().await.unwrap();

        assert_eq!(payload, json!({ "call": 1 }));
        assert_eq!(source.calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_a_later_attempt() {
        let source = FlakySource::new(2);
        let fetcher = UpstreamFetcher::with_default_policy(source.clone());

        let started = Instant::now();
        let payload = fetcher.fetch().await.unwrap();

        assert_eq!(payload, json!({ "call": 3 }));
        assert_eq!(source.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retry_budget_makes_one_attempt() {
        let source = FlakySource::new(u32::MAX);
        let policy = RetryPolicy {
            max_retries: 0,
            delay: Duration::from_millis(1000),
        };
        let fetcher = UpstreamFetcher::new(source.clone(), policy);

        let err = fetcher.fetch().await.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn decode_errors_stay_distinct_from_network_errors() {
        let bad_json = serde_json::from_str::<Value>("{not json").unwrap_err();
        let mapped = FetchError::from(HttpError::Decode(bad_json));
        assert!(matches!(mapped, FetchError::Decode(_)));
    }

    #[test]
    fn api_key_must_be_a_valid_header() {
        let config = DuneSourceConfig::new("123", "bad\nkey");
        assert!(DuneSource::new(config).is_err());
    }
}
