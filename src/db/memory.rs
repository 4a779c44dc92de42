use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use super::{JobStore, StoreError};
use crate::models::job::AnalysisJob;

/// Single-process job store. No durability across restarts.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, AnalysisJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("job map lock poisoned".to_string())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn put(&self, job: AnalysisJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<AnalysisJob>, StoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        Ok(jobs.get(&id).cloned())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<AnalysisJob>, StoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut all: Vec<&AnalysisJob> = jobs.values().collect();
        // Newest first; id breaks ties so paging is stable.
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(all.into_iter().skip(offset).take(limit).cloned().collect())
    }
}
