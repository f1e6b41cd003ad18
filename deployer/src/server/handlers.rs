//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use openapi_server::models::{
    CancelResponse, DeployRequest, DeployResponse, ErrorResponse, HealthResponse, JobStatus,
    JobStatusResponse, VersionResponse,
};
use tracing::error;

use crate::models::job::JobId;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error body plus status code
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: "not found".to_string(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "autodeploy".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Accept a deployment and start it in the background
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<DeployRequest>,
) -> Result<Json<DeployResponse>, ApiError> {
    if request.description.trim().is_empty() {
        return Err(ApiError::bad_request("description is required"));
    }
    if request.repo_url.trim().is_empty() {
        return Err(ApiError::bad_request("repo_url is required"));
    }

    let job_id = state
        .orchestrator
        .submit(request.description, request.repo_url)
        .map_err(|e| {
            error!("Failed to submit job: {}", e);
            ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: e.to_string(),
            }
        })?;

    Ok(Json(DeployResponse {
        job_id: job_id.to_string(),
        status: JobStatus::Running,
        message: "Deployment started.".to_string(),
    }))
}

/// Status and logs of one job
pub async fn job_status_handler(
    State(state): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    state
        .orchestrator
        .status(&JobId::from(job_id))
        .map(|job| Json(job.into()))
        .ok_or_else(ApiError::not_found)
}

/// Request cancellation of a running job
pub async fn cancel_handler(
    State(state): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let id = JobId::from(job_id);
    if state.orchestrator.status(&id).is_none() {
        return Err(ApiError::not_found());
    }
    let cancelled = state.orchestrator.cancel(&id);
    Ok(Json(CancelResponse {
        job_id: id.to_string(),
        cancelled,
    }))
}
