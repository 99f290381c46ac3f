//! Application State
//!
//! Shared handles to the job store and the services built on it.

use std::sync::Arc;

use ocr_queue::{JobPolicy, JobStore, StatusService, SubmissionGateway};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn JobStore>,
    gateway: Arc<SubmissionGateway<dyn JobStore>>,
    status: Arc<StatusService<dyn JobStore>>,
}

impl AppState {
    /// Create new application state; every submission is stamped with `policy`
    pub fn new(store: Arc<dyn JobStore>, policy: JobPolicy) -> Self {
        Self {
            gateway: Arc::new(SubmissionGateway::new(store.clone(), policy)),
            status: Arc::new(StatusService::new(store.clone())),
            store,
        }
    }

    /// Get job store (cloned Arc for sharing)
    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub fn gateway(&self) -> &SubmissionGateway<dyn JobStore> {
        &self.gateway
    }

    pub fn status(&self) -> &StatusService<dyn JobStore> {
        &self.status
    }
}
