//! Provides an in memory implementation of [`JobStore`].
//!
//! Primarily intended for tests and for embedding the engine without a real
//! document store. It is not optimized, instead it is designed to be a
//! correct implementation of the store contract.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::job::{Job, JobId};

use super::{Filter, JobPatch, JobStore, StoreError};

/// An in memory implementation of [`JobStore`].
///
/// All operations work against a single lock-guarded vector of job
/// documents. [`JobStore::conditional_update`] holds the write lock for the
/// whole read-modify-write of the matched document, giving the per-document
/// atomicity the contract requires.
///
/// **This is not designed for use in production systems.**
#[derive(Clone, Default)]
pub struct InMemoryStore {
    jobs: Arc<RwLock<Vec<Job>>>,
}

impl InMemoryStore {
    /// Creates a new empty instance of [`InMemoryStore`].
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn find_many(&self, filter: &Filter) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .map_err(|_| StoreError::BadState)?
            .iter()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect())
    }

    async fn find_one(&self, filter: &Filter) -> Result<Option<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .map_err(|_| StoreError::BadState)?
            .iter()
            .find(|job| filter.matches(job))
            .cloned())
    }

    async fn conditional_update(
        &self,
        id: JobId,
        patch: JobPatch,
    ) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        match jobs.iter_mut().find(|job| job.id == id) {
            None => Ok(None),
            Some(job) => {
                patch.apply(job);
                Ok(Some(job.clone()))
            }
        }
    }

    async fn insert(&self, job: Job) -> Result<JobId, StoreError> {
        let id = job.id;
        self.jobs
            .write()
            .map_err(|_| StoreError::BadState)?
            .push(job);
        Ok(id)
    }
}
