//! Job Store Trait

use crate::job::{Expected, JobEntry, JobId, Transition, TransitionError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Job already exists: {0}")]
    Duplicate(JobId),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
}

/// Durable storage for job records and the pending order.
///
/// Every state mutation goes through these primitives; callers never
/// read-modify-write a record themselves.
#[async_trait]
pub trait JobStore: Send + Sync {
    fn name(&self) -> &str;

    async fn is_healthy(&self) -> bool;

    /// Persist a new queued record and make it claimable at `job.eligible_at`.
    /// Either both happen or neither does.
    async fn enqueue(&self, job: JobEntry) -> Result<(), StoreError>;

    /// Take the earliest eligible queued job, moving it to `Started` and
    /// consuming one attempt. Concurrent callers never receive the same claim.
    async fn claim_next(&self) -> Result<Option<JobEntry>, StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<JobEntry>, StoreError>;

    /// Apply `transition` only if the record still matches `expected`.
    /// Returns `false` when another party finalized the attempt first.
    async fn compare_and_swap(
        &self,
        id: JobId,
        expected: Expected,
        transition: Transition,
    ) -> Result<bool, StoreError>;

    /// Jobs currently held by a worker
    async fn started(&self) -> Result<Vec<JobEntry>, StoreError>;

    /// Delete terminal records past their retention window
    async fn expire(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}
