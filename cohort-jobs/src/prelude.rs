//! The purpose of this module is to alleviate the need to import many of the
//! `cohort-jobs` types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use cohort_jobs::prelude::*;
//! ```
pub use crate::job::{AttemptError, AttemptStatus, HistoryEntry, Job, JobBuilder, JobId, JobStatus};
pub use crate::poller::{
    ActionReport, JobAction, JobPoller, JobPollerConfig, PollerError, PollerHandle,
};
pub use crate::scheduler::{JobScheduler, SchedulerConfig};
pub use crate::store::memory::InMemoryStore;
pub use crate::store::{Filter, JobPatch, JobStore, StoreError};
