//! OCR Server - Standalone entry point for the OCR job queue
//!
//! Thin wrapper around `ocr-api`. `OCR_MODE` selects `api`, `worker` or
//! `all` (default), so submission and execution can scale separately
//! against one shared database.

use anyhow::{Context, Result};
use ocr_api::{OcrServer, QueueConfig, RunMode, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    ocr_api::server::init_tracing();

    let mode = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<RunMode>()
            .map_err(anyhow::Error::msg)
            .context("usage: ocr-server [api|worker|all]")?,
        None => RunMode::from_env()?,
    };

    let queue_config = QueueConfig::from_env()?;
    let server_config = ServerConfig::from_env()?;

    tracing::info!(
        ?mode,
        queue = %queue_config.queue_name,
        database = %queue_config.database_url,
        "Starting OCR server"
    );

    let server = OcrServer::new(queue_config, server_config)
        .await
        .map_err(|e| {
            tracing::error!("Failed to initialize server: {}", e);
            e
        })?;

    server.run(mode).await.map_err(|e| {
        tracing::error!("Server error during execution: {}", e);
        e
    })?;

    Ok(())
}
