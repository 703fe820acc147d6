//! # Data Retrieval Module
//!
//! This module holds everything that talks to the upstream analytics API.
//!
//! ## Contained Modules:
//!
//! - **`http_client`**: A small `ApiClient` built on `reqwest` that joins
//!   paths onto a base URL, injects headers and query parameters, and
//!   reports the status and the decoded JSON body of a single request.
//!   It performs no retries on its own.
//!
//! - **`upstream`**: The Upstream Fetcher. A `DataSource` performs exactly one
//!   attempt; `UpstreamFetcher` wraps a source with a constant-delay retry
//!   budget and turns an exhausted budget into a typed terminal failure.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Single-shot HTTP client used by the upstream sources.
pub mod http_client;
/// Data sources and the retrying fetcher.
pub mod upstream;

// --- Public API Re-exports ---
pub use http_client::{ApiClient, ApiResponse, HttpError};
pub use upstream::{
    DataSource, DuneSource, DuneSourceConfig, FetchError, RetryPolicy, TerminalFetchError,
    UpstreamFetcher,
};
