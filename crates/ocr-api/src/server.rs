//! OCR API server with workers, reaper and graceful shutdown

use axum::{extract::DefaultBodyLimit, middleware, Router};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use ocr_persist::{open_job_store, SqliteConfig};
use ocr_queue::{Extractor, HttpExtractor, JobStore, MockExtractor, Reaper, WorkerPool};

use crate::config::{QueueConfig, RunMode, ServerConfig};
use crate::error::ApiError;
use crate::middleware::{
    body_limit_layer, cors_layer, request_id_middleware, timeout_layer, tracing_middleware,
};
use crate::routes::api_router;
use crate::state::AppState;

/// Pick the extraction backend from configuration
pub fn build_extractor(config: &QueueConfig) -> Arc<dyn Extractor> {
    match &config.extractor_url {
        Some(url) => {
            tracing::info!(url = %url, "Using HTTP extractor");
            Arc::new(HttpExtractor::new(url))
        }
        None => {
            tracing::warn!("OCR_EXTRACTOR_URL not set. Using mock extractor.");
            Arc::new(MockExtractor::new())
        }
    }
}

/// OCR API server
pub struct OcrServer {
    server_config: ServerConfig,
    queue_config: QueueConfig,
    extractor: Arc<dyn Extractor>,
    app_state: AppState,
}

impl OcrServer {
    /// Open the configured store and build the server around it
    pub async fn new(queue_config: QueueConfig, server_config: ServerConfig) -> Result<Self, ApiError> {
        let store = open_job_store(&SqliteConfig::from_url(&queue_config.database_url))
            .await
            .map_err(|e| ApiError::Internal(format!("Store init failed: {}", e)))?;
        let extractor = build_extractor(&queue_config);

        Ok(Self::with_parts(
            Arc::new(store),
            extractor,
            queue_config,
            server_config,
        ))
    }

    /// Build from an existing store and extractor
    pub fn with_parts(
        store: Arc<dyn JobStore>,
        extractor: Arc<dyn Extractor>,
        queue_config: QueueConfig,
        server_config: ServerConfig,
    ) -> Self {
        let app_state = AppState::new(store, queue_config.policy.clone());
        Self {
            server_config,
            queue_config,
            extractor,
            app_state,
        }
    }

    pub fn state(&self) -> AppState {
        self.app_state.clone()
    }

    /// Get the configured router with the middleware stack applied
    pub fn router(&self) -> Router {
        api_router(self.app_state.clone())
            // Limits are enforced by the tower-http layer below
            .layer(DefaultBodyLimit::disable())
            .layer(body_limit_layer(self.server_config.max_body_size))
            .layer(timeout_layer(self.server_config.timeout))
            .layer(cors_layer())
            .layer(middleware::from_fn(tracing_middleware))
            // Request ID (outermost, so tracing sees it)
            .layer(middleware::from_fn(request_id_middleware))
    }

    /// Spawn the worker pool and reaper; both stop when `shutdown` flips
    pub fn spawn_background(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let store = self.app_state.store();

        let pool = WorkerPool::new(
            store.clone(),
            self.extractor.clone(),
            self.queue_config.worker,
        );
        let reaper = Reaper::new(store, self.queue_config.reaper);

        let pool_shutdown = shutdown.clone();
        vec![
            tokio::spawn(async move { pool.run(pool_shutdown).await }),
            tokio::spawn(async move { reaper.run(shutdown).await }),
        ]
    }

    /// Run until SIGINT/SIGTERM, then drain background tasks
    pub async fn run(self, mode: RunMode) -> Result<(), ApiError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let background = if mode.runs_workers() {
            tracing::info!(
                queue = %self.queue_config.queue_name,
                workers = self.queue_config.worker.workers,
                "Starting workers"
            );
            self.spawn_background(shutdown_rx)
        } else {
            Vec::new()
        };

        let served = self.serve(mode).await;

        // Workers finish their current attempt before exiting, on error paths too
        let _ = shutdown_tx.send(true);
        for result in futures::future::join_all(background).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Background task terminated abnormally");
            }
        }

        tracing::info!("Server shutdown complete");
        served
    }

    async fn serve(&self, mode: RunMode) -> Result<(), ApiError> {
        if !mode.serves_api() {
            shutdown_signal().await;
            return Ok(());
        }

        let addr = self.server_config.addr;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        tracing::info!("OCR API listening on http://{}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))
    }
}

/// Graceful shutdown signal handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Initialize tracing subscriber
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,ocr_queue=debug,ocr_persist=debug,ocr_api=debug,tower_http=debug")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
