//! # OCR Queue
//!
//! Asynchronous document extraction jobs.
//!
//! Features:
//! - Job lifecycle state machine with compare-and-swap finalization
//! - Pluggable job store (Memory, SQLite via `ocr-persist`)
//! - Independent workers with retry backoff and per-attempt timeouts
//! - Reaper for stale attempts and expired results

pub mod backend;
pub mod extractor;
pub mod gateway;
pub mod job;
pub mod memory;
pub mod reaper;
pub mod status;
pub mod worker;

pub use backend::{JobStore, StoreError};
pub use extractor::{ExtractionError, ExtractionResult, Extractor, HttpExtractor, MockExtractor, PageText};
pub use gateway::{SubmissionError, SubmissionGateway};
pub use job::{Document, DocumentKind, JobEntry, JobId, JobPolicy, JobState, JobStatus};
pub use memory::MemoryStore;
pub use reaper::{Reaper, ReaperConfig};
pub use status::{JobStatusView, StatusService};
pub use worker::{AttemptFailure, AttemptOutcome, Worker, WorkerConfig, WorkerPool};
