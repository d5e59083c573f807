//! Job selection.
//!
//! Given the pending jobs in the store, the scheduler deterministically picks
//! at most one to execute now. Selection has a single side effect: when the
//! winner is periodic, its next run slot is reserved eagerly so a concurrent
//! poller is less likely to pick the same job inside the same due window. The
//! read-filter-sort-update sequence is not one transaction, so duplicate
//! selection under racing pollers remains possible; the store's per-document
//! atomicity is the only guarantee relied upon.

use chrono::{DateTime, TimeDelta, Utc};

use crate::job::{Job, JobId, JobStatus};
use crate::store::{Filter, JobPatch, JobStore, StoreError};

/// Selection and retry policy, immutable per scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Failed attempts tolerated for a one-off job before it is marked
    /// `Error` and excluded from selection for good.
    pub max_attempts: u32,
    /// How long a failed one-off job waits before its retry becomes due.
    pub failed_job_delay: TimeDelta,
    /// Sort candidates by priority (descending) before execution time.
    pub use_priority: bool,
    /// When set, one-off jobs whose FAILED history entries outnumber
    /// `max_attempts` are dropped from consideration; when unset they stay
    /// eligible. The name reads inverted relative to the effect; the platform
    /// has always shipped this polarity and consumers depend on it.
    pub re_execute_failed_jobs: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            failed_job_delay: TimeDelta::seconds(30),
            use_priority: true,
            re_execute_failed_jobs: true,
        }
    }
}

/// Pure selection logic over a [`JobStore`].
#[derive(Debug, Clone)]
pub struct JobScheduler {
    config: SchedulerConfig,
}

impl JobScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Selects the next job to execute, if any is due.
    ///
    /// Reads every `Pending` job (restricted to `job_type` when given),
    /// drops ineligible one-off jobs, orders the rest, and takes the first.
    /// Periodic jobs are always considered; their timing discipline comes
    /// solely from how far ahead `next_execution_time` was reserved on the
    /// previous selection.
    pub async fn find_next_job<S: JobStore>(
        &self,
        store: &S,
        job_type: Option<&str>,
    ) -> Result<Option<Job>, StoreError> {
        let filter = match job_type {
            Some(job_type) => Filter::And(vec![
                Filter::StatusEquals(JobStatus::Pending),
                Filter::TypeEquals(job_type.to_owned()),
            ]),
            None => Filter::StatusEquals(JobStatus::Pending),
        };
        let mut candidates = store.find_many(&filter).await?;

        let now = Utc::now();
        candidates.retain(|job| self.eligible(job, now));

        if self.config.use_priority {
            candidates.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.next_execution_time.cmp(&b.next_execution_time))
            });
        } else {
            candidates.sort_by(|a, b| a.next_execution_time.cmp(&b.next_execution_time));
        }

        let Some(mut job) = candidates.into_iter().next() else {
            return Ok(None);
        };

        if let Some(period) = job.period {
            let reserved = self.reserve_next_run(store, job.id, period).await?;
            job.next_execution_time = reserved;
        }

        Ok(Some(job))
    }

    fn eligible(&self, job: &Job, now: DateTime<Utc>) -> bool {
        if job.is_periodic() {
            return true;
        }
        if self.config.re_execute_failed_jobs
            && job.failed_attempts() > self.config.max_attempts as usize
        {
            return false;
        }
        job.next_execution_time <= now
    }

    /// Eagerly pushes a periodic job's `next_execution_time` one period out.
    ///
    /// Best effort: a reservation that matches no document is logged and the
    /// selection still stands.
    async fn reserve_next_run<S: JobStore>(
        &self,
        store: &S,
        job_id: JobId,
        period: TimeDelta,
    ) -> Result<DateTime<Utc>, StoreError> {
        let next_execution_time = Utc::now() + period;
        let patch = JobPatch {
            next_execution_time: Some(next_execution_time),
            ..Default::default()
        };
        if store.conditional_update(job_id, patch).await?.is_none() {
            tracing::warn!(%job_id, "Failed to reserve next run for periodic job {job_id}");
        }
        Ok(next_execution_time)
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeDelta;
    use serde_json::json;

    use crate::job::{AttemptError, HistoryEntry};
    use crate::store::memory::InMemoryStore;

    use super::*;

    fn scheduler(config: SchedulerConfig) -> JobScheduler {
        JobScheduler::new(config)
    }

    async fn insert_due(store: &InMemoryStore, job_type: &str, priority: i32) -> Job {
        let mut job = Job::builder(job_type).with_priority(priority).build();
        job.next_execution_time = Utc::now() - TimeDelta::seconds(1);
        store.insert(job.clone()).await.unwrap();
        job
    }

    #[tokio::test]
    async fn returns_none_when_nothing_is_due() {
        let store = InMemoryStore::new();
        Job::builder("data_upload")
            .schedule_in(TimeDelta::hours(1))
            .insert_to_store(&store)
            .await
            .unwrap();

        let selected = scheduler(SchedulerConfig::default())
            .find_next_job(&store, None)
            .await
            .unwrap();

        assert!(selected.is_none());
    }

    #[tokio::test]
    async fn higher_priority_wins_when_priority_ordering_is_on() {
        let store = InMemoryStore::new();
        insert_due(&store, "data_upload", 1).await;
        let urgent = insert_due(&store, "data_upload", 10).await;

        let selected = scheduler(SchedulerConfig::default())
            .find_next_job(&store, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(selected.id, urgent.id);
    }

    #[tokio::test]
    async fn equal_priorities_break_ties_on_earlier_execution_time() {
        let store = InMemoryStore::new();
        let mut late = Job::builder("data_upload").with_priority(5).build();
        late.next_execution_time = Utc::now() - TimeDelta::seconds(10);
        let mut early = Job::builder("data_upload").with_priority(5).build();
        early.next_execution_time = Utc::now() - TimeDelta::seconds(60);
        store.insert(late).await.unwrap();
        store.insert(early.clone()).await.unwrap();

        let selected = scheduler(SchedulerConfig::default())
            .find_next_job(&store, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(selected.id, early.id);
    }

    #[tokio::test]
    async fn without_priority_ordering_the_earliest_job_wins() {
        let store = InMemoryStore::new();
        let mut low_but_early = Job::builder("data_upload").with_priority(0).build();
        low_but_early.next_execution_time = Utc::now() - TimeDelta::minutes(5);
        let mut high_but_late = Job::builder("data_upload").with_priority(100).build();
        high_but_late.next_execution_time = Utc::now() - TimeDelta::seconds(1);
        store.insert(low_but_early.clone()).await.unwrap();
        store.insert(high_but_late).await.unwrap();

        let selected = scheduler(SchedulerConfig {
            use_priority: false,
            ..Default::default()
        })
        .find_next_job(&store, None)
        .await
        .unwrap()
        .unwrap();

        assert_eq!(selected.id, low_but_early.id);
    }

    #[tokio::test]
    async fn periodic_jobs_are_considered_even_before_they_are_due() {
        let store = InMemoryStore::new();
        Job::builder("refresh")
            .recurring_every(TimeDelta::minutes(10))
            .schedule_in(TimeDelta::hours(1))
            .insert_to_store(&store)
            .await
            .unwrap();

        let selected = scheduler(SchedulerConfig::default())
            .find_next_job(&store, None)
            .await
            .unwrap();

        assert!(selected.is_some());
    }

    #[tokio::test]
    async fn selecting_a_periodic_job_reserves_its_next_run() {
        let store = InMemoryStore::new();
        let period = TimeDelta::minutes(10);
        let id = Job::builder("refresh")
            .recurring_every(period)
            .insert_to_store(&store)
            .await
            .unwrap();

        let before = Utc::now();
        let selected = scheduler(SchedulerConfig::default())
            .find_next_job(&store, None)
            .await
            .unwrap()
            .unwrap();
        let after = Utc::now();

        assert!(selected.next_execution_time >= before + period);
        assert!(selected.next_execution_time <= after + period);

        let stored = store.find_one(&Filter::IdEquals(id)).await.unwrap().unwrap();
        assert_eq!(stored.next_execution_time, selected.next_execution_time);
        assert_eq!(stored.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn one_off_selection_writes_nothing() {
        let store = InMemoryStore::new();
        let job = insert_due(&store, "data_upload", 0).await;

        let selected = scheduler(SchedulerConfig::default())
            .find_next_job(&store, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(selected.id, job.id);
        let stored = store
            .find_one(&Filter::IdEquals(job.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, job);
    }

    #[tokio::test]
    async fn job_type_filter_restricts_claims() {
        let store = InMemoryStore::new();
        insert_due(&store, "data_upload", 0).await;
        let curation = insert_due(&store, "curation", 0).await;

        let selected = scheduler(SchedulerConfig::default())
            .find_next_job(&store, Some("curation"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.id, curation.id);

        let none = scheduler(SchedulerConfig::default())
            .find_next_job(&store, Some("unknown_type"))
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn terminal_jobs_are_never_selected() {
        let store = InMemoryStore::new();
        let mut errored = Job::builder("data_upload").build();
        errored.status = JobStatus::Error;
        errored.next_execution_time = Utc::now() - TimeDelta::hours(1);
        let mut finished = Job::builder("data_upload").build();
        finished.status = JobStatus::Finished;
        finished.next_execution_time = Utc::now() - TimeDelta::hours(1);
        store.insert(errored).await.unwrap();
        store.insert(finished).await.unwrap();

        let selected = scheduler(SchedulerConfig::default())
            .find_next_job(&store, None)
            .await
            .unwrap();

        assert!(selected.is_none());
    }

    // Counter-intuitively, setting `re_execute_failed_jobs` is what switches
    // the failure-count threshold ON: with the flag set, a one-off job whose
    // FAILED history exceeds `max_attempts` is skipped; with it unset the
    // same job keeps being selected.
    #[tokio::test]
    async fn failure_threshold_applies_only_when_flag_is_set() {
        let store = InMemoryStore::new();
        let mut job = Job::builder("data_upload").build();
        job.next_execution_time = Utc::now() - TimeDelta::seconds(1);
        for _ in 0..3 {
            job.history
                .push(HistoryEntry::failure(AttemptError::Reported {
                    value: json!("boom"),
                }));
        }
        store.insert(job.clone()).await.unwrap();

        let with_flag = scheduler(SchedulerConfig {
            max_attempts: 2,
            re_execute_failed_jobs: true,
            ..Default::default()
        })
        .find_next_job(&store, None)
        .await
        .unwrap();
        assert!(with_flag.is_none());

        let without_flag = scheduler(SchedulerConfig {
            max_attempts: 2,
            re_execute_failed_jobs: false,
            ..Default::default()
        })
        .find_next_job(&store, None)
        .await
        .unwrap();
        assert_eq!(without_flag.unwrap().id, job.id);
    }

    #[tokio::test]
    async fn failure_count_equal_to_max_attempts_does_not_trip_the_threshold() {
        let store = InMemoryStore::new();
        let mut job = Job::builder("data_upload").build();
        job.next_execution_time = Utc::now() - TimeDelta::seconds(1);
        for _ in 0..2 {
            job.history
                .push(HistoryEntry::failure(AttemptError::Reported {
                    value: json!("boom"),
                }));
        }
        store.insert(job.clone()).await.unwrap();

        let selected = scheduler(SchedulerConfig {
            max_attempts: 2,
            re_execute_failed_jobs: true,
            ..Default::default()
        })
        .find_next_job(&store, None)
        .await
        .unwrap();

        assert_eq!(selected.unwrap().id, job.id);
    }
}
