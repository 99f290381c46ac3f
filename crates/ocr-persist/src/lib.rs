//! # OCR Persistence
//!
//! Durable storage for extraction jobs.
//!
//! Supports:
//! - SQLite (single node, file or in-memory)

pub mod queue;
pub mod sqlite;

pub use queue::SqliteJobStore;
pub use sqlite::{connect, SqliteConfig};

/// Connect with `config` and wrap the pool in a job store
pub async fn open_job_store(config: &SqliteConfig) -> Result<SqliteJobStore, ocr_queue::StoreError> {
    let pool = connect(config).await?;
    Ok(SqliteJobStore::new(pool))
}
