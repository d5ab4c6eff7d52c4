//! Provides an in memory implementation of [`JobStore`].
//!
//! Correct but unoptimized; intended for tests and single-process setups
//! rather than production persistence.

use std::sync::{
    atomic::{AtomicI32, Ordering},
    Arc, RwLock,
};

use async_trait::async_trait;

use crate::job::{Job, JobId, JobRef, UserId};

use super::{JobStore, StoreError};

/// An in memory implementation of [`JobStore`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    jobs: Arc<RwLock<Vec<Job>>>,
    id_counter: Arc<AtomicI32>,
}

impl InMemoryStore {
    /// Creates a new instance of [`InMemoryStore`].
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn insert(&self, mut job: Job) -> Result<JobId, StoreError> {
        let id: JobId = self.id_counter.fetch_add(1, Ordering::SeqCst).into();
        job.id = JobRef::Persisted(id);
        self.jobs
            .write()
            .map_err(|_| StoreError::BadState)?
            .push(job);
        Ok(id)
    }

    async fn fetch(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .map_err(|_| StoreError::BadState)?
            .iter()
            .find(|job| job.id == JobRef::Persisted(id))
            .cloned())
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let id = match job.id.persisted() {
            Some(id) => id,
            None => return Err(StoreError::BadState),
        };
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        match jobs.iter_mut().find(|stored| stored.id == job.id) {
            None => Err(StoreError::JobNotFound(id)),
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
        }
    }

    async fn delete(&self, id: JobId) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        let before = jobs.len();
        jobs.retain(|job| job.id != JobRef::Persisted(id));
        if jobs.len() == before {
            Err(StoreError::JobNotFound(id))
        } else {
            Ok(())
        }
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .map_err(|_| StoreError::BadState)?
            .iter()
            .filter(|job| &job.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostConfig;
    use crate::job::settings::GenerationRequest;
    use assert_matches::assert_matches;

    fn job_for(user: &str) -> Job {
        let request = GenerationRequest::new("Lion", "a lion at sunset");
        let cost = CostConfig::new().compute(&request.settings);
        Job::admitted(user.into(), &request, cost, 0, 3)
    }

    #[tokio::test]
    async fn insert_assigns_sequential_persisted_ids() {
        let store = InMemoryStore::new();

        let first = store.insert(job_for("user-1")).await.unwrap();
        let second = store.insert(job_for("user-1")).await.unwrap();

        assert_ne!(first, second);
        let fetched = store.fetch(first).await.unwrap().unwrap();
        assert_eq!(fetched.id, JobRef::Persisted(first));
    }

    #[tokio::test]
    async fn update_rewrites_the_stored_record() {
        let store = InMemoryStore::new();
        let id = store.insert(job_for("user-1")).await.unwrap();

        let mut job = store.fetch(id).await.unwrap().unwrap();
        job.progress = 40;
        store.update(&job).await.unwrap();

        assert_eq!(store.fetch(id).await.unwrap().unwrap().progress, 40);
    }

    #[tokio::test]
    async fn update_of_unknown_job_errors() {
        let store = InMemoryStore::new();
        let id = store.insert(job_for("user-1")).await.unwrap();
        store.delete(id).await.unwrap();

        let mut job = job_for("user-1");
        job.id = JobRef::Persisted(id);

        assert_matches!(
            store.update(&job).await,
            Err(StoreError::JobNotFound(missing)) if missing == id
        );
    }

    #[tokio::test]
    async fn list_filters_by_user() {
        let store = InMemoryStore::new();
        store.insert(job_for("user-1")).await.unwrap();
        store.insert(job_for("user-2")).await.unwrap();
        store.insert(job_for("user-1")).await.unwrap();

        let jobs = store.list_for_user(&"user-1".into()).await.unwrap();

        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|job| job.user_id == "user-1".into()));
    }

    #[tokio::test]
    async fn delete_removes_the_record() {
        let store = InMemoryStore::new();
        let id = store.insert(job_for("user-1")).await.unwrap();

        store.delete(id).await.unwrap();

        assert!(store.fetch(id).await.unwrap().is_none());
        assert_matches!(store.delete(id).await, Err(StoreError::JobNotFound(_)));
    }
}
