//! Submission gateway

use std::sync::Arc;
use tracing::{error, info};

use crate::backend::{JobStore, StoreError};
use crate::job::{Document, JobEntry, JobId, JobPolicy};

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Job store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

/// Accepts documents and queues them. Never waits on execution and never
/// retries a failed store write.
pub struct SubmissionGateway<S: JobStore + ?Sized> {
    store: Arc<S>,
    policy: JobPolicy,
}

impl<S: JobStore + ?Sized> SubmissionGateway<S> {
    pub fn new(store: Arc<S>, policy: JobPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &JobPolicy {
        &self.policy
    }

    pub async fn submit(&self, bytes: Vec<u8>) -> Result<JobId, SubmissionError> {
        let size = bytes.len();
        let job = JobEntry::new(Document::new(bytes), self.policy.clone());
        let (id, kind) = (job.id, job.document.kind);

        if let Err(e) = self.store.enqueue(job).await {
            error!(error = %e, "Submission rejected by job store");
            return Err(e.into());
        }

        info!(job_id = %id, kind = kind.as_str(), size, "Job queued");
        Ok(id)
    }
}
