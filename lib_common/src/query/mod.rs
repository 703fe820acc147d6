//! # Query Interface
//!
//! Thin axum transport over the core: read the buffer, trigger a refresh,
//! report liveness. All behavior lives in `crate::core`; handlers only map
//! outcomes to status codes and JSON bodies.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Routes, handlers and the serve helper.
pub mod routes;

pub use routes::{QueryError, QueryState, router, serve};
