//! # Refresh Pipeline
//!
//! Fetch from upstream, then replace the buffer. That is the whole job.
//!
//! The pipeline is a cheap, cloneable handle shared by the scheduler's cron
//! job and the manual trigger. Invocations may overlap: each one fetches and
//! replaces independently and the buffer ends up holding whichever replace
//! landed last. A failed fetch leaves the buffer exactly as it was.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::core::buffer::{Buffer, BufferedSnapshot};
use crate::retrieve::upstream::{TerminalFetchError, UpstreamFetcher};

/// Why a refresh did not update the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// The upstream fetch exhausted its retry budget.
    #[error("Failed to refresh buffer: {0}")]
    Fetch(#[from] TerminalFetchError),
}

/// Result of one refresh, handed back to whoever triggered it.
pub type RefreshOutcome = Result<Arc<BufferedSnapshot>, RefreshError>;

/// Orchestrates fetch-then-replace over a shared [`Buffer`].
#[derive(Clone)]
pub struct RefreshPipeline {
    fetcher: UpstreamFetcher,
    buffer: Arc<Buffer>,
}

impl RefreshPipeline {
    /// Creates a pipeline writing into `buffer`.
    pub fn new(fetcher: UpstreamFetcher, buffer: Arc<Buffer>) -> Self {
        Self { fetcher, buffer }
    }

    /// The buffer this pipeline writes into.
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Runs one refresh.
    ///
    /// The capture timestamp is taken after the fetch completes.
    pub async fn refresh(&self) -> RefreshOutcome {
        info!("Refreshing Dune data buffer...");

        match self.fetcher.fetch().await {
            Ok(payload) => {
                let snapshot = Arc::new(BufferedSnapshot::capture(payload));
                self.buffer.replace(snapshot.clone());
                info!(
                    captured_at = %snapshot.captured_at().to_rfc3339(),
                    "Buffer refreshed successfully"
                );
                Ok(snapshot)
            }
            Err(e) => {
                error!("Failed to refresh buffer: {}", e);
                Err(RefreshError::Fetch(e))
            }
        }
    }
}
