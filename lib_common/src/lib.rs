//! # lib_common
//!
//! Shared library behind the Dune snapshot buffer service. Every module is
//! gated behind a cargo feature of the same name so that binaries only pull
//! in the dependencies they need; `full` enables everything.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Layered service configuration.
#[cfg(feature = "configs")]
pub mod configs;

/// Snapshot buffer, refresh pipeline, scheduler and manual trigger.
#[cfg(feature = "core")]
pub mod core;

/// `tracing` subscriber setup.
#[cfg(feature = "loggers")]
pub mod loggers;

/// HTTP query interface over the buffer.
#[cfg(feature = "query")]
pub mod query;

/// HTTP client wrapper and retrying upstream fetcher.
#[cfg(feature = "retrieve")]
pub mod retrieve;
