//! # Refresh Scheduler
//!
//! Runs the refresh pipeline on a cron schedule using `tokio-cron-scheduler`.
//!
//! ## States
//!
//! - **Idle**: no recurring job installed.
//! - **Active**: exactly one recurring job installed.
//!
//! `init` always removes the current job before adding the new one, and the
//! state sits behind an async mutex so concurrent re-initializations cannot
//! interleave. At most one recurring job is live at any moment.
//!
//! An invalid expression is not fatal: it is logged and the default schedule
//! (every 6 hours) is installed instead. Each firing runs one refresh and
//! logs its outcome; a failed refresh never disturbs the next firing.

use chrono::Utc;
use croner::parser::{CronParser, Seconds};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobBuilder, JobScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use crate::core::refresh::{RefreshOutcome, RefreshPipeline};

/// Every 6 hours, on the hour (seconds field included).
pub const DEFAULT_SCHEDULE: &str = "0 0 */6 * * *";

/// The configured schedule expression could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid cron expression '{expression}': {reason}")]
pub struct InvalidScheduleError {
    /// Expression as configured.
    pub expression: String,
    /// Parser message.
    pub reason: String,
}

/// Failures of the underlying job scheduler.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Creating, starting or mutating the `JobScheduler` failed.
    #[error("Job scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
}

/// Whether a recurring job is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleState {
    /// No recurring trigger.
    Idle,
    /// One recurring trigger.
    Active {
        /// Scheduler id of the installed job.
        job_id: Uuid,
        /// Normalized expression the job runs on.
        cron_expression: String,
    },
}

impl ScheduleState {
    /// `true` when a job is installed.
    pub fn is_active(&self) -> bool {
        matches!(self, ScheduleState::Active { .. })
    }
}

/// Rewrites a classic five-field expression (`m h dom mon dow`) into the
/// six-field form with a leading seconds field. Other inputs are returned
/// with whitespace collapsed.
pub fn normalize_expression(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        fields.join(" ")
    }
}

/// Validates `expression` and returns its normalized form.
///
/// Parses with the same settings the job scheduler uses (seconds field
/// required), so whatever passes here is accepted by [`RefreshScheduler::init`].
pub fn validate_schedule(expression: &str) -> Result<String, InvalidScheduleError> {
    let normalized = normalize_expression(expression);
    if normalized.is_empty() {
        return Err(InvalidScheduleError {
            expression: expression.to_string(),
            reason: "expression is empty".to_string(),
        });
    }

    CronParser::builder()
        .seconds(Seconds::Required)
        .build()
        .parse(&normalized)
        .map_err(|e| InvalidScheduleError {
            expression: expression.to_string(),
            reason: format!("{} (expected `sec min hour day month weekday`, seconds optional)", e),
        })?;

    Ok(normalized)
}

/// Owns the job scheduler and the single recurring refresh job.
pub struct RefreshScheduler {
    scheduler: JobScheduler,
    pipeline: RefreshPipeline,
    state: Mutex<ScheduleState>,
}

impl RefreshScheduler {
    /// Creates and starts an idle scheduler.
    pub async fn new(pipeline: RefreshPipeline) -> Result<Self, ScheduleError> {
        let scheduler = JobScheduler::new().await?;
        scheduler.start().await?;

        Ok(Self {
            scheduler,
            pipeline,
            state: Mutex::new(ScheduleState::Idle),
        })
    }

    /// Installs the recurring refresh job, replacing any existing one.
    ///
    /// Falls back to [`DEFAULT_SCHEDULE`] when `expression` is invalid.
    /// Returns the expression actually installed.
    pub async fn init(&self, expression: &str) -> Result<String, ScheduleError> {
        let installed = match validate_schedule(expression) {
            Ok(normalized) => normalized,
            Err(e) => {
                error!("{}, using default", e);
                DEFAULT_SCHEDULE.to_string()
            }
        };

        let mut state = self.state.lock().await;
        self.cancel_active(&mut state).await?;

        info!("Scheduling buffer refresh with cron: {}", installed);
        let job = refresh_job(&installed, self.pipeline.clone())?;
        let job_id = self.scheduler.add(job).await?;

        *state = ScheduleState::Active {
            job_id,
            cron_expression: installed.clone(),
        };
        info!(%job_id, "Scheduler initialized");

        Ok(installed)
    }

    /// Removes the recurring job. Does nothing when already idle.
    pub async fn stop(&self) -> Result<(), ScheduleError> {
        let mut state = self.state.lock().await;
        if self.cancel_active(&mut state).await? {
            info!("Scheduler stopped");
        }
        Ok(())
    }

    /// A copy of the current state.
    pub async fn state(&self) -> ScheduleState {
        self.state.lock().await.clone()
    }

    /// Stops the recurring job and shuts the job scheduler down.
    pub async fn shutdown(&mut self) -> Result<(), ScheduleError> {
        self.stop().await?;
        self.scheduler.shutdown().await?;
        Ok(())
    }

    async fn cancel_active(&self, state: &mut ScheduleState) -> Result<bool, ScheduleError> {
        let ScheduleState::Active { job_id, .. } = &*state else {
            return Ok(false);
        };

        self.scheduler.remove(job_id).await?;
        *state = ScheduleState::Idle;
        Ok(true)
    }
}

fn refresh_job(expression: &str, pipeline: RefreshPipeline) -> Result<Job, JobSchedulerError> {
    JobBuilder::new()
        .with_timezone(Utc)
        .with_cron_job_type()
        .with_schedule(expression)?
        .with_run_async(Box::new(move |job_id, _scheduler| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                info!(%job_id, "Executing scheduled refresh at {}", Utc::now().to_rfc3339());
                report_scheduled(job_id, &pipeline.refresh().await);
            })
        }))
        .build()
}

fn report_scheduled(job_id: Uuid, outcome: &RefreshOutcome) {
    match outcome {
        Ok(_) => info!(%job_id, "Scheduled refresh completed successfully"),
        Err(e) => error!(%job_id, "Scheduled refresh failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::refresh::RefreshError;
    use crate::retrieve::upstream::{FetchError, TerminalFetchError};
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex as StdMutex};

    #[test]
    fn five_field_expressions_gain_a_seconds_field() {
        assert_eq!(normalize_expression("0 */6 * * *"), "0 0 */6 * * *");
        assert_eq!(normalize_expression("  */5   * * * * "), "0 */5 * * * *");
    }

    #[test]
    fn six_field_expressions_are_kept() {
        assert_eq!(normalize_expression("*/10 * * * * *"), "*/10 * * * * *");
    }

    #[test]
    fn default_schedule_is_valid() {
        assert_eq!(validate_schedule(DEFAULT_SCHEDULE).unwrap(), DEFAULT_SCHEDULE);
        assert_eq!(validate_schedule("0 */6 * * *").unwrap(), DEFAULT_SCHEDULE);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = validate_schedule("every six hours please").unwrap_err();
        assert_eq!(err.expression, "every six hours please");
        assert!(validate_schedule("").is_err());
        assert!(validate_schedule("99 99 99 * * *").is_err());
    }

    #[test]
    fn rejection_says_what_is_wrong() {
        let err = validate_schedule("61 * * * *").unwrap_err();

        assert_eq!(err.expression, "61 * * * *");
        assert_ne!(err.reason, "ParseSchedule");
        assert!(err.reason.contains("expected `sec min hour day month weekday`"));
        assert!(err.to_string().contains("'61 * * * *'"));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<StdMutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn captured_output(run: impl FnOnce()) -> String {
        let sink = Captured::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, run);
        let bytes = sink.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn failed_scheduled_refresh_is_logged_as_error() {
        let failure: RefreshOutcome = Err(RefreshError::Fetch(TerminalFetchError {
            attempts: 4,
            last: FetchError::Network("connection refused".to_string()),
        }));

        let output = captured_output(|| report_scheduled(Uuid::new_v4(), &failure));

        assert!(output.contains("ERROR"), "got: {}", output);
        assert!(output.contains("Scheduled refresh failed"));
        assert!(output.contains("after 4 attempts"));
    }
}
