//! # Manual Trigger
//!
//! On-demand refresh gated by a shared secret. When no secret is configured
//! (unset or empty) every request is accepted.
//!
//! The comparison is plain string equality. It is neither constant-time nor
//! rate limited.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::core::buffer::BufferedSnapshot;
use crate::core::refresh::{RefreshError, RefreshPipeline};

/// Why a manual refresh was not performed or did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    /// The presented secret was missing or did not match.
    #[error("Invalid API key")]
    Unauthorized,

    /// Authorized, but the refresh itself failed.
    #[error(transparent)]
    Refresh(#[from] RefreshError),
}

/// Shared-secret gate in front of the refresh pipeline.
#[derive(Clone)]
pub struct ManualTrigger {
    expected_secret: Option<String>,
    pipeline: RefreshPipeline,
}

impl ManualTrigger {
    /// Creates the trigger. An empty secret counts as no secret.
    pub fn new(expected_secret: Option<String>, pipeline: RefreshPipeline) -> Self {
        Self {
            expected_secret: expected_secret.filter(|s| !s.is_empty()),
            pipeline,
        }
    }

    /// Whether requests must present a secret.
    pub fn requires_secret(&self) -> bool {
        self.expected_secret.is_some()
    }

    /// The pipeline behind the gate.
    pub fn pipeline(&self) -> &RefreshPipeline {
        &self.pipeline
    }

    /// Checks a presented secret.
    pub fn authorize(&self, presented: Option<&str>) -> Result<(), TriggerError> {
        match &self.expected_secret {
            None => Ok(()),
            Some(expected) if presented == Some(expected.as_str()) => Ok(()),
            Some(_) => {
                warn!("Rejected manual refresh: invalid API key");
                Err(TriggerError::Unauthorized)
            }
        }
    }

    /// Authorizes, then runs one refresh. The pipeline is untouched on rejection.
    pub async fn fire(&self, presented: Option<&str>) -> Result<Arc<BufferedSnapshot>, TriggerError> {
        self.authorize(presented)?;
        Ok(self.pipeline.refresh().await?)
    }
}
