//! Fluent construction of new jobs.
//!
//! Enqueuing callers (the platform's API layer, curation services, tests)
//! create jobs through [`JobBuilder`] so every job enters the store in the
//! same shape: `Pending`, zero attempts, empty history.

use chrono::{DateTime, TimeDelta, Utc};

use crate::store::{JobStore, StoreError};

use super::{Job, JobId, JobStatus};

/// Builder for a new job document.
///
/// # Example
///
/// ```
/// # use cohort_jobs::prelude::*;
/// # use chrono::TimeDelta;
/// # use serde_json::json;
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let store = InMemoryStore::new();
///
/// let job_id = Job::builder("data_upload")
///     .named("weekly cohort refresh")
///     .with_data(json!({"studyId": "study-1"}))
///     .with_priority(10)
///     .recurring_every(TimeDelta::days(7))
///     .requested_by("admin")
///     .insert_to_store(&store)
///     .await
///     .unwrap();
/// # let _ = job_id;
/// # });
/// ```
pub struct JobBuilder {
    name: Option<String>,
    job_type: String,
    data: Option<serde_json::Value>,
    parameters: Option<serde_json::Value>,
    metadata: Option<serde_json::Value>,
    priority: i32,
    next_execution_time: DateTime<Utc>,
    period: Option<TimeDelta>,
    created_by: Option<String>,
}

impl JobBuilder {
    pub(crate) fn new(job_type: impl Into<String>) -> Self {
        Self {
            name: None,
            job_type: job_type.into(),
            data: None,
            parameters: None,
            metadata: None,
            priority: 0,
            next_execution_time: Utc::now(),
            period: None,
            created_by: None,
        }
    }

    pub fn named(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    pub fn with_data(self, data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..self
        }
    }

    pub fn with_parameters(self, parameters: serde_json::Value) -> Self {
        Self {
            parameters: Some(parameters),
            ..self
        }
    }

    pub fn with_metadata(self, metadata: serde_json::Value) -> Self {
        Self {
            metadata: Some(metadata),
            ..self
        }
    }

    pub fn with_priority(self, priority: i32) -> Self {
        Self { priority, ..self }
    }

    /// Delays the first eligible execution to the given instant.
    pub fn schedule_at(self, next_execution_time: DateTime<Utc>) -> Self {
        Self {
            next_execution_time,
            ..self
        }
    }

    pub fn schedule_in(self, delay: TimeDelta) -> Self {
        Self {
            next_execution_time: Utc::now() + delay,
            ..self
        }
    }

    /// Marks the job periodic: it will re-run every `period` and never reach
    /// a terminal status.
    pub fn recurring_every(self, period: TimeDelta) -> Self {
        Self {
            period: Some(period),
            ..self
        }
    }

    /// Records who requested the job in the audit fields.
    pub fn requested_by(self, requester: impl Into<String>) -> Self {
        Self {
            created_by: Some(requester.into()),
            ..self
        }
    }

    /// Materializes the job document without persisting it.
    pub fn build(self) -> Job {
        Job {
            id: JobId::new(),
            name: self.name.unwrap_or_else(|| self.job_type.clone()),
            job_type: self.job_type,
            status: JobStatus::Pending,
            next_execution_time: self.next_execution_time,
            period: self.period,
            priority: self.priority,
            counter: 0,
            history: Vec::new(),
            data: self.data,
            parameters: self.parameters,
            metadata: self.metadata,
            created_at: Utc::now(),
            created_by: self.created_by.unwrap_or_else(|| "system".to_owned()),
        }
    }

    /// Builds the job and inserts it into the store.
    pub async fn insert_to_store<S: JobStore>(self, store: &S) -> Result<JobId, StoreError> {
        store.insert(self.build()).await
    }
}

#[cfg(test)]
mod test {
    use crate::store::{memory::InMemoryStore, Filter};

    use super::*;

    #[test]
    fn new_jobs_are_pending_with_no_attempts() {
        let job = Job::builder("data_upload").build();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.counter, 0);
        assert!(job.history.is_empty());
        assert!(job.period.is_none());
        assert_eq!(job.priority, 0);
        assert_eq!(job.name, "data_upload");
        assert_eq!(job.created_by, "system");
    }

    #[tokio::test]
    async fn insert_to_store() {
        let store = InMemoryStore::new();

        let job_id = Job::builder("data_upload")
            .named("first upload")
            .requested_by("admin")
            .insert_to_store(&store)
            .await
            .unwrap();

        let job = store
            .find_one(&Filter::IdEquals(job_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.name, "first upload");
        assert_eq!(job.created_by, "admin");
        assert_eq!(job.status, JobStatus::Pending);
    }
}
