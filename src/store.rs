//! Durable storage for job records.
//!
//! The orchestrator treats storage as a durable map keyed by job id: records
//! go in at admission, get rewritten on every reconciled change, and are
//! removed when the caller discards them. Nothing here interprets job state.

use async_trait::async_trait;
use thiserror::Error;

use crate::job::{Job, JobId, UserId};

pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    JobNotFound(JobId),
    #[error("job store in bad state")]
    BadState,
}

/// CRUD store for [`Job`] records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a provisional job and returns its assigned id.
    async fn insert(&self, job: Job) -> Result<JobId, StoreError>;

    async fn fetch(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Rewrites the stored record for `job.id`.
    async fn update(&self, job: &Job) -> Result<(), StoreError>;

    async fn delete(&self, id: JobId) -> Result<(), StoreError>;

    /// All stored jobs for a user, oldest first.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Job>, StoreError>;
}
