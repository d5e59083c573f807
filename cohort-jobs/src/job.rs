//! The job document model shared between the platform's services and this
//! engine's scheduler and poller.

use std::fmt::Display;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod builder;

pub use builder::JobBuilder;

/// Identifier of a job document in the shared store.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<JobId> for Uuid {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The unit of schedulable work.
///
/// Jobs are created `Pending` with an empty history and are mutated only
/// through [`crate::store::JobStore::conditional_update`]: by the poller after
/// each attempt, and by the scheduler when it pre-reserves the next slot of a
/// periodic job. They are never deleted by this engine.
///
/// Field names serialize camelCased to line up with the platform's store
/// documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    /// Human readable label, defaults to the job type.
    pub name: String,
    /// Tag identifying the action family; pollers may restrict their claims
    /// to a single type.
    pub job_type: String,
    pub status: JobStatus,
    /// For one-off jobs, the instant before which the job must not be
    /// claimed. For periodic jobs, when the next run is due.
    pub next_execution_time: DateTime<Utc>,
    /// `Some` marks the job periodic; periodic jobs never reach a terminal
    /// status.
    #[serde(default, with = "period_millis")]
    pub period: Option<TimeDelta>,
    /// Ordering hint, higher runs first when the scheduler sorts by priority.
    pub priority: i32,
    /// Attempts executed so far, success or failure.
    pub counter: u32,
    /// Append-only record of every executed attempt.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Opaque payload handed through to the action untouched.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl Job {
    /// Starts building a new `Pending` job of the given type.
    pub fn builder(job_type: impl Into<String>) -> JobBuilder {
        JobBuilder::new(job_type)
    }

    pub fn is_periodic(&self) -> bool {
        self.period.is_some()
    }

    pub(crate) fn failed_attempts(&self) -> usize {
        self.history
            .iter()
            .filter(|entry| entry.status == AttemptStatus::Failed)
            .count()
    }
}

/// Lifecycle status of a job.
///
/// One-off jobs move from `Pending` to either terminal status exactly once
/// and are never re-claimed afterwards. Periodic jobs stay `Pending`
/// indefinitely.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Finished,
    Error,
}

/// One executed attempt, as recorded in a job's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub time: DateTime<Utc>,
    pub status: AttemptStatus,
    /// Result payload reported by a successful action, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<AttemptError>,
}

impl HistoryEntry {
    pub(crate) fn success(result: Option<serde_json::Value>) -> Self {
        Self {
            time: Utc::now(),
            status: AttemptStatus::Success,
            result,
            errors: Vec::new(),
        }
    }

    pub(crate) fn failure(error: AttemptError) -> Self {
        Self {
            time: Utc::now(),
            status: AttemptStatus::Failed,
            result: None,
            errors: vec![error],
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Success,
    Failed,
}

/// Error payload of a failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptError {
    /// Structured error reported by the action alongside its verdict.
    Reported { value: serde_json::Value },
    /// The action aborted instead of reporting; only its message survives.
    Unhandled { message: String },
}

/// Periods are stored as whole milliseconds in the job documents.
mod period_millis {
    use chrono::TimeDelta;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        period: &Option<TimeDelta>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        period.map(|p| p.num_milliseconds()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<TimeDelta>, D::Error> {
        Ok(Option::<i64>::deserialize(deserializer)?.map(TimeDelta::milliseconds))
    }
}
