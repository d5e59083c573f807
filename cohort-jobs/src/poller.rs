//! The polling engine.
//!
//! A [`JobPoller`] owns a repeating timer. On each tick it asks the
//! [`JobScheduler`] for a job, runs the caller supplied [`JobAction`] against
//! it, and persists the outcome back to the store: a history entry for the
//! attempt plus the status/counter/next-execution updates the retry policy
//! dictates. No error escapes a tick; selection failures are logged and
//! action failures are absorbed into the job's history.
//!
//! Ticks are serialized. A tick runs to completion before the next interval
//! sleep is armed, so a slow action delays subsequent polls rather than
//! overlapping them. Stopping is cooperative: an in-flight tick finishes
//! before the polling task exits.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::job::{AttemptError, HistoryEntry, Job, JobId, JobStatus};
use crate::scheduler::{JobScheduler, SchedulerConfig};
use crate::store::{Filter, JobPatch, JobStore, StoreError};

/// Verdict returned by a [`JobAction`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionReport {
    pub successful: bool,
    /// Structured error payload recorded in history when unsuccessful.
    pub error: Option<serde_json::Value>,
    /// Result payload recorded in history when successful.
    pub result: Option<serde_json::Value>,
}

impl ActionReport {
    pub fn success() -> Self {
        Self {
            successful: true,
            ..Default::default()
        }
    }

    pub fn success_with(result: serde_json::Value) -> Self {
        Self {
            successful: true,
            error: None,
            result: Some(result),
        }
    }

    pub fn failure(error: serde_json::Value) -> Self {
        Self {
            successful: false,
            error: Some(error),
            result: None,
        }
    }
}

/// The work a poller performs against a claimed job.
///
/// The job is handed over untouched, payloads included. Implementations
/// report their verdict through an [`ActionReport`]; returning `Err` instead
/// is treated as an unhandled failure and recorded in history without
/// advancing the job's retry state (see [`JobPoller`]).
#[async_trait]
pub trait JobAction: Send + Sync {
    type Error: std::error::Error + Send;

    async fn run(&self, job: &Job) -> Result<ActionReport, Self::Error>;
}

/// Configuration surface of a [`JobPoller`].
pub struct JobPollerConfig<S, A> {
    /// Label identifying this poller instance in logs.
    pub identity: String,
    /// Restricts which jobs this poller claims; `None` claims any type.
    pub job_type: Option<String>,
    pub store: S,
    pub polling_interval: Duration,
    pub action: A,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("polling interval must be greater than zero")]
    ZeroPollingInterval,
    #[error("max_attempts must be at least 1")]
    ZeroMaxAttempts,
    #[error("failed job delay must not be negative")]
    NegativeFailedJobDelay,
    #[error("failed to shut down the polling task")]
    ShutdownFailed,
}

/// The polling engine; see the module docs.
pub struct JobPoller<S, A> {
    identity: String,
    job_type: Option<String>,
    store: S,
    polling_interval: Duration,
    action: A,
    scheduler: JobScheduler,
}

/// Outcome of one tick that executed a job: the history entry to append and
/// the field updates to apply alongside it.
struct TickUpdate {
    entry: HistoryEntry,
    patch: JobPatch,
}

impl<S, A> JobPoller<S, A>
where
    S: JobStore + Send + Sync + 'static,
    A: JobAction + 'static,
{
    /// Validates the configuration and builds the poller.
    ///
    /// Misconfiguration fails here, at construction; nothing errors toward
    /// the caller at tick time.
    pub fn new(config: JobPollerConfig<S, A>) -> Result<Self, PollerError> {
        if config.polling_interval.is_zero() {
            return Err(PollerError::ZeroPollingInterval);
        }
        if config.scheduler.max_attempts == 0 {
            return Err(PollerError::ZeroMaxAttempts);
        }
        if config.scheduler.failed_job_delay < TimeDelta::zero() {
            return Err(PollerError::NegativeFailedJobDelay);
        }
        Ok(Self {
            identity: config.identity,
            job_type: config.job_type,
            store: config.store,
            polling_interval: config.polling_interval,
            action: config.action,
            scheduler: JobScheduler::new(config.scheduler),
        })
    }

    /// Starts the polling timer and returns a handle for stopping it.
    pub fn start(self) -> PollerHandle {
        let cancellation_token = CancellationToken::new();
        let handle = tokio::spawn({
            let token = cancellation_token.clone();
            async move {
                tracing::debug!(
                    "{} started polling for jobs of type {}",
                    self.identity,
                    self.job_type.as_deref().unwrap_or("ALL")
                );
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(self.polling_interval) => {
                            self.check_for_jobs().await;
                        }
                        _ = token.cancelled() => break,
                    }
                }
                tracing::debug!("Shutting down job poller {}", self.identity);
            }
        });

        PollerHandle {
            cancellation_token,
            handle: Some(handle),
        }
    }

    /// One tick: select, execute, persist.
    async fn check_for_jobs(&self) {
        tracing::debug!(
            "{} polling for new jobs of type {}",
            self.identity,
            self.job_type.as_deref().unwrap_or("ALL")
        );

        let job = match self
            .scheduler
            .find_next_job(&self.store, self.job_type.as_deref())
            .await
        {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(err) => {
                tracing::error!(?err, "{} failed to select a job: {err}", self.identity);
                return;
            }
        };

        let job_id = job.id;
        tracing::info!(
            %job_id,
            "{} claimed job of type {} - id: {job_id}",
            self.identity,
            job.job_type
        );

        let update = match self.action.run(&job).await {
            Ok(report) if report.successful => self.on_success(&job, report),
            Ok(report) => self.on_reported_failure(&job, report),
            Err(error) => {
                tracing::warn!(%job_id, "Job {job_id} action aborted: {error}");
                Self::on_unhandled_failure(error)
            }
        };

        if let Err(err) = self.persist(job_id, update).await {
            tracing::error!(?err, %job_id, "Failed to record outcome for job {job_id}: {err}");
            return;
        }
        tracing::info!(%job_id, "{} finished processing job {job_id}", self.identity);
    }

    fn on_success(&self, job: &Job, report: ActionReport) -> TickUpdate {
        let patch = match job.period {
            Some(period) => JobPatch {
                status: Some(JobStatus::Pending),
                next_execution_time: Some(Utc::now() + period),
                counter: Some(job.counter + 1),
                ..Default::default()
            },
            None => JobPatch {
                status: Some(JobStatus::Finished),
                counter: Some(job.counter + 1),
                ..Default::default()
            },
        };
        TickUpdate {
            entry: HistoryEntry::success(report.result),
            patch,
        }
    }

    fn on_reported_failure(&self, job: &Job, report: ActionReport) -> TickUpdate {
        let config = self.scheduler.config();
        let error = AttemptError::Reported {
            value: report.error.unwrap_or(serde_json::Value::Null),
        };
        let patch = match job.period {
            // Periodic jobs retry naturally on their next period.
            Some(period) => JobPatch {
                status: Some(JobStatus::Pending),
                next_execution_time: Some(Utc::now() + period),
                counter: Some(job.counter + 1),
                ..Default::default()
            },
            // The retry budget is judged on the counter as it was before this
            // attempt.
            None if job.counter < config.max_attempts => JobPatch {
                status: Some(JobStatus::Pending),
                next_execution_time: Some(Utc::now() + config.failed_job_delay),
                counter: Some(job.counter + 1),
                ..Default::default()
            },
            None => JobPatch {
                status: Some(JobStatus::Error),
                counter: Some(job.counter + 1),
                ..Default::default()
            },
        };
        TickUpdate {
            entry: HistoryEntry::failure(error),
            patch,
        }
    }

    /// An action that aborted gets its failure recorded, but the job's
    /// status, counter and eligibility window stay exactly as they were: the
    /// job remains claimable on the very next tick.
    fn on_unhandled_failure(error: A::Error) -> TickUpdate {
        TickUpdate {
            entry: HistoryEntry::failure(AttemptError::Unhandled {
                message: error.to_string(),
            }),
            patch: JobPatch::default(),
        }
    }

    /// Writes the tick's outcome with a re-read-then-append of the history
    /// array, so entries written by concurrent processes since our claim are
    /// not clobbered.
    async fn persist(&self, job_id: JobId, update: TickUpdate) -> Result<(), StoreError> {
        let TickUpdate { entry, patch } = update;
        let current = self
            .store
            .find_one(&Filter::IdEquals(job_id))
            .await?
            .ok_or(StoreError::NotFound(job_id))?;

        let mut history = current.history;
        history.push(entry);

        self.store
            .conditional_update(
                job_id,
                JobPatch {
                    history: Some(history),
                    ..patch
                },
            )
            .await?
            .ok_or(StoreError::NotFound(job_id))?;
        Ok(())
    }
}

/// Handle to a running poller's timer.
pub struct PollerHandle {
    cancellation_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Stops the timer and waits for any in-flight tick to finish.
    pub async fn stop(mut self) -> Result<(), PollerError> {
        self.cancellation_token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await.map_err(|_| PollerError::ShutdownFailed)?;
        }
        Ok(())
    }
}
