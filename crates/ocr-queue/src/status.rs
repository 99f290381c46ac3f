//! Read-only status queries

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::backend::{JobStore, StoreError};
use crate::extractor::ExtractionResult;
use crate::job::{JobState, JobStatus};

/// Client-facing view of a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub status: JobStatus,
    pub result: Option<ExtractionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusView {
    pub fn not_found() -> Self {
        Self {
            status: JobStatus::NotFound,
            result: None,
            error: None,
        }
    }
}

pub struct StatusService<S: JobStore + ?Sized> {
    store: Arc<S>,
}

impl<S: JobStore + ?Sized> StatusService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Point-in-time status. Unknown, malformed and expired ids all read as
    /// `not_found`; only store failures are errors.
    pub async fn get_status(&self, job_id: &str) -> Result<JobStatusView, StoreError> {
        let Ok(id) = Uuid::parse_str(job_id) else {
            return Ok(JobStatusView::not_found());
        };

        let job = match self.store.get(id).await? {
            Some(job) if !job.is_expired(Utc::now()) => job,
            _ => return Ok(JobStatusView::not_found()),
        };

        Ok(JobStatusView {
            status: job.state.into(),
            result: if job.state == JobState::Finished {
                job.result
            } else {
                None
            },
            error: if job.state == JobState::Failed {
                job.error
            } else {
                None
            },
        })
    }
}
