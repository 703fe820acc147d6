//! # HTTP Retrieval Utilities
//!
//! A thin asynchronous API client wrapper around `reqwest`. It resolves
//! relative paths against a base URL and hands back the status and
//! decoded JSON body of one request. Retrying is the caller's business: the
//! upstream fetcher owns the retry budget so that every failure class (network,
//! status, body) is retried the same way.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Url;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors raised while building or executing a request.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The base URL or the joined path is not a valid absolute URL.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// A configured header value contains characters HTTP does not allow.
    #[error("Invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    /// Building the client, connecting, or reading the response failed.
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The response body of a successful request is not valid JSON for the target type.
    #[error("Failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A standardized container for API responses.
///
/// This struct wraps the deserialized data along with the status of the
/// HTTP transaction.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
}

/// A reusable asynchronous HTTP client bound to one base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    inner: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Creates a new `ApiClient`.
    ///
    /// `base_url` must be absolute. A trailing slash is appended when missing
    /// so that relative paths are joined under it rather than replacing its
    /// last segment.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, HttpError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)?;

        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dune-buffer/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { inner, base_url })
    }

    /// Performs a `GET` request and decodes a successful body as `T`.
    ///
    /// Non-2xx responses are not errors at this layer: they come back with
    /// `success == false` and the raw body in `error_body`.
    pub async fn get_json<T>(
        &self,
        path: &str,
        query: &[(&str, String)],
        headers: HeaderMap,
    ) -> Result<ApiResponse<T>, HttpError>
    where
        T: DeserializeOwned,
    {
        let full_url = self.base_url.join(path.trim_start_matches('/'))?;

        let response = self
            .inner
            .get(full_url)
            .headers(headers)
            .query(query)
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            let body = response.bytes().await?;
            let data = serde_json::from_slice::<T>(&body)?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
            })
        }
    }
}
