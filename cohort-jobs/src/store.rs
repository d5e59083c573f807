//! Contract of the shared job store.
//!
//! The platform keeps jobs in a shared persistent document collection; the
//! scheduler and poller consume it exclusively through [`JobStore`]. The
//! engine needs only filtered reads, a single-document lookup, an atomic
//! `$set`-style partial update of one document, and an insert for enqueuing
//! callers. Correctness under concurrent pollers relies entirely on the
//! store's per-document atomicity of [`JobStore::conditional_update`].

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use crate::job::{HistoryEntry, Job, JobId, JobStatus};

pub mod memory;

#[async_trait]
pub trait JobStore: Clone {
    /// Returns every job matching the filter.
    async fn find_many(&self, filter: &Filter) -> Result<Vec<Job>, StoreError>;

    /// Returns one job matching the filter, if any.
    async fn find_one(&self, filter: &Filter) -> Result<Option<Job>, StoreError>;

    /// Atomically applies the patch to the job with the given id.
    ///
    /// Returns the updated job, or `None` when no document matches. The patch
    /// must be applied atomically with respect to concurrent updates of the
    /// same document.
    async fn conditional_update(
        &self,
        id: JobId,
        patch: JobPatch,
    ) -> Result<Option<Job>, StoreError>;

    /// Inserts a newly built job.
    async fn insert(&self, job: Job) -> Result<JobId, StoreError>;
}

/// Predicate over top-level job fields.
///
/// Equality and membership are the minimum the engine requires; store
/// implementations backed by a query engine translate these into their native
/// query language, while [`Filter::matches`] evaluates them directly against
/// an in-memory job.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    IdEquals(JobId),
    TypeEquals(String),
    StatusEquals(JobStatus),
    StatusIn(Vec<JobStatus>),
}

impl Filter {
    pub fn matches(&self, job: &Job) -> bool {
        match self {
            Filter::And(inner) => inner.iter().all(|filter| filter.matches(job)),
            Filter::IdEquals(id) => job.id == *id,
            Filter::TypeEquals(job_type) => job.job_type == *job_type,
            Filter::StatusEquals(status) => job.status == *status,
            Filter::StatusIn(statuses) => statuses.contains(&job.status),
        }
    }
}

/// `$set`-style partial update of a single job document.
///
/// `None` fields are left untouched by the update. The poller always writes
/// `history` as a full array it has just re-read and appended to, never as a
/// blind overwrite of the in-memory copy it executed against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub next_execution_time: Option<DateTime<Utc>>,
    /// `Some(None)` clears the period, turning a periodic job one-off.
    pub period: Option<Option<TimeDelta>>,
    pub priority: Option<i32>,
    pub counter: Option<u32>,
    pub history: Option<Vec<HistoryEntry>>,
}

impl JobPatch {
    /// Patch moving a job to a new execution time.
    ///
    /// Resets the status to `Pending` so a rescheduled job becomes claimable
    /// again, the way the platform's job-edit endpoint has always behaved.
    pub fn reschedule(next_execution_time: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Pending),
            next_execution_time: Some(next_execution_time),
            ..Default::default()
        }
    }

    pub(crate) fn apply(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(next_execution_time) = self.next_execution_time {
            job.next_execution_time = next_execution_time;
        }
        if let Some(period) = self.period {
            job.period = period;
        }
        if let Some(priority) = self.priority {
            job.priority = priority;
        }
        if let Some(counter) = self.counter {
            job.counter = counter;
        }
        if let Some(ref history) = self.history {
            job.history = history.clone();
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is unavailable or its internal state is corrupt.
    #[error("job store in bad state")]
    BadState,
    #[error("no job found with id {0}")]
    NotFound(JobId),
}
