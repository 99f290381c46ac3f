//! API routes for the OCR job queue

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{header, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use ocr_queue::{JobId, JobStatusView};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Multipart field carrying the document
pub const FILE_FIELD: &str = "file";

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<ComponentHealth>,
}

/// Component health status
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub store: ComponentStatus,
}

/// Individual component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Basic health check handler (lightweight)
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        components: None,
    })
}

/// Detailed health check with store connectivity
pub async fn health_detailed(State(state): State<AppState>) -> Json<HealthResponse> {
    let start = std::time::Instant::now();
    let store = state.store();
    let healthy = store.is_healthy().await;
    let latency = start.elapsed().as_millis() as u64;

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        components: Some(ComponentHealth {
            store: ComponentStatus {
                name: store.name().to_string(),
                status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
                latency_ms: Some(latency),
            },
        }),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// Accept a document and queue it. Returns as soon as the job is stored.
pub async fn process_file(
    State(state): State<AppState>,
    request: Request,
) -> ApiResult<Json<SubmitResponse>> {
    let bytes = read_document(request).await?;
    let job_id = state.gateway().submit(bytes).await?;
    Ok(Json(SubmitResponse { job_id }))
}

fn rejection(status: StatusCode, message: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(message)
    } else {
        ApiError::BadRequest(message)
    }
}

/// Document bytes from a `multipart/form-data` upload or a raw body
async fn read_document(request: Request) -> Result<Vec<u8>, ApiError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if !is_multipart {
        let body = Bytes::from_request(request, &())
            .await
            .map_err(|e| rejection(e.status(), e.body_text()))?;
        return Ok(body.to_vec());
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| rejection(e.status(), e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| rejection(e.status(), e.body_text()))?
    {
        if field.name() == Some(FILE_FIELD) {
            let data = field
                .bytes()
                .await
                .map_err(|e| rejection(e.status(), e.body_text()))?;
            return Ok(data.to_vec());
        }
    }

    Err(ApiError::BadRequest(format!(
        "Missing multipart field '{}'",
        FILE_FIELD
    )))
}

/// Job status handler. Unknown ids answer 200 with `not_found`.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    let view = state.status().get_status(&job_id).await?;
    Ok(Json(view))
}

/// Build the API router
pub fn api_router(state: AppState) -> Router {
    Router::new()
        // Public endpoints
        .route("/health", get(health))
        .route("/health/detailed", get(health_detailed))
        // Job endpoints
        .route("/process_file", post(process_file))
        .route("/jobs/{job_id}", get(get_job_status))
        // State
        .with_state(state)
}
