//! # Core Refresh-and-Serve Module
//!
//! The pieces that keep an up-to-date copy of the upstream dataset in memory.
//!
//! ## Core Components:
//!
//! - **`buffer`**: single-slot, atomically swapped store for the latest
//!   `BufferedSnapshot`.
//! - **`refresh`**: the `RefreshPipeline`, fetch-then-replace. Overlapping
//!   invocations are allowed and the last replace wins.
//! - **`scheduler`**: the cron-driven `RefreshScheduler` with its Idle/Active
//!   state and at most one live recurring job.
//! - **`trigger`**: the shared-secret `ManualTrigger` used by the query
//!   interface.
//!
//! Composition: scheduler → pipeline → buffer ← query interface.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Single-slot snapshot store.
pub mod buffer;
/// Fetch-then-replace orchestration.
pub mod refresh;
/// Cron-driven recurring refresh.
pub mod scheduler;
/// Shared-secret manual refresh.
pub mod trigger;

// --- Public API Re-exports ---
pub use buffer::{Buffer, BufferedSnapshot};
pub use refresh::{RefreshError, RefreshOutcome, RefreshPipeline};
pub use scheduler::{
    DEFAULT_SCHEDULE, InvalidScheduleError, RefreshScheduler, ScheduleError, ScheduleState,
    normalize_expression, validate_schedule,
};
pub use trigger::{ManualTrigger, TriggerError};
