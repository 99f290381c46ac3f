//! # OCR API
//!
//! HTTP surface for the OCR job queue.
//!
//! Features:
//! - Axum-based web server
//! - Document submission (multipart or raw body) and status polling
//! - Tower middleware (request id, tracing, limits, CORS)
//! - Environment-driven configuration
//! - Embedded worker pool and reaper with graceful shutdown

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{ConfigError, QueueConfig, RunMode, ServerConfig};
pub use error::{ApiError, ApiResult};
pub use server::OcrServer;
pub use state::AppState;
