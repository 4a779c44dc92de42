//! Keyed persistence for analysis jobs.
//!
//! The orchestrator is the only writer; any store that can put, get and list
//! by creation time can back it.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::job::AnalysisJob;

pub mod memory;

pub use memory::InMemoryJobStore;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a job record.
    async fn put(&self, job: AnalysisJob) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<AnalysisJob>, StoreError>;

    /// Jobs ordered by `created_at` descending.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<AnalysisJob>, StoreError>;

    /// Reachability probe for health checks.
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job store unavailable: {0}")]
    Unavailable(String),
}
