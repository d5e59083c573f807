//! Background job scheduling and polling for clinical research data
//! platforms.
//!
//! The platform keeps its units of background work (data curation runs, file
//! processing, cohort refreshes) as job documents in a shared persistent
//! store. This crate is the engine that executes them: a [`poller::JobPoller`]
//! repeatedly asks the [`scheduler::JobScheduler`] for the next eligible job,
//! runs an arbitrary asynchronous [`poller::JobAction`] against it, and
//! records the outcome durably in the job's history.
//!
//! One-off jobs run to a terminal `Finished` or `Error` status with a bounded
//! retry budget; periodic jobs re-schedule themselves forever. Several poller
//! instances may share one store; selection races are mitigated, not
//! eliminated, by eagerly reserving the next run slot of periodic jobs.
//!
//! The store itself is external: anything implementing [`store::JobStore`]
//! (filtered reads plus atomic single-document updates) will do, and
//! [`store::memory::InMemoryStore`] is provided for tests and embedded use.
//!
//! # Example
//!
//! ```
//! use cohort_jobs::prelude::*;
//! use std::time::Duration;
//!
//! struct Reindex;
//!
//! #[async_trait::async_trait]
//! impl JobAction for Reindex {
//!     type Error = std::convert::Infallible;
//!
//!     async fn run(&self, _job: &Job) -> Result<ActionReport, Self::Error> {
//!         Ok(ActionReport::success())
//!     }
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let store = InMemoryStore::new();
//!
//! Job::builder("reindex")
//!     .requested_by("admin")
//!     .insert_to_store(&store)
//!     .await
//!     .unwrap();
//!
//! let poller = JobPoller::new(JobPollerConfig {
//!     identity: "worker-1".to_owned(),
//!     job_type: Some("reindex".to_owned()),
//!     store,
//!     polling_interval: Duration::from_millis(50),
//!     action: Reindex,
//!     scheduler: SchedulerConfig::default(),
//! })
//! .unwrap();
//!
//! let handle = poller.start();
//! # handle.stop().await.unwrap();
//! # });
//! ```

pub mod job;
pub mod poller;
pub mod prelude;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod test {
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::job::Job;
    use crate::poller::{ActionReport, JobAction, JobPoller, JobPollerConfig};
    use crate::scheduler::SchedulerConfig;
    use crate::store::memory::InMemoryStore;

    struct Noop;

    #[async_trait]
    impl JobAction for Noop {
        type Error = std::convert::Infallible;

        async fn run(&self, _job: &Job) -> Result<ActionReport, Self::Error> {
            Ok(ActionReport::success())
        }
    }

    #[tokio::test]
    async fn setup_and_teardown() {
        let poller = JobPoller::new(JobPollerConfig {
            identity: "smoke".to_owned(),
            job_type: None,
            store: InMemoryStore::new(),
            polling_interval: Duration::from_millis(10),
            action: Noop,
            scheduler: SchedulerConfig::default(),
        })
        .unwrap();

        let handle = poller.start();
        handle.stop().await.unwrap();
    }
}
