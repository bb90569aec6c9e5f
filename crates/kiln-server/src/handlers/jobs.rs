//! Handlers for the `/jobs` resource.
//!
//! Submission returns immediately with a job id; clients then poll
//! `GET /jobs/{id}` until `completed` is true and download the artifact
//! from the returned `download_url`.

use axum::Json;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use kiln_core::PollOutcome;
use kiln_core::domain::{JobInput, JobStatusView, KilnError};
use serde::Serialize;
use serde_json::json;
use tokio_util::io::ReaderStream;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Poll response: the status view plus a ready-to-use download link.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    #[serde(flatten)]
    pub status: JobStatusView,
    pub download_url: Option<String>,
}

pub fn download_url(job_id: &str, filename: &str) -> String {
    format!("/api/v1/jobs/{job_id}/artifacts/{filename}")
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Accept a job and return 202 with its id. The job runs in the background.
pub async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<JobInput>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let job_id = state.orchestrator.submit(input).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "job_id": job_id.to_string(),
        })),
    ))
}

// ---------------------------------------------------------------------------
// Poll
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<JobStatusResponse>> {
    match state.orchestrator.poll(&id).await? {
        PollOutcome::Found(status) => {
            let download_url = status
                .download_reference
                .as_deref()
                .map(|filename| download_url(&id, filename));
            Ok(Json(JobStatusResponse {
                status,
                download_url,
            }))
        }
        PollOutcome::NotFound => Err(KilnError::NotFound(format!("job {id}")).into()),
    }
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/artifacts/{filename}
///
/// Streams the artifact of a successfully completed job.
pub async fn download_artifact(
    State(state): State<AppState>,
    Path((id, filename)): Path<(String, String)>,
) -> AppResult<Response> {
    let artifact = state.orchestrator.fetch_artifact(&id, &filename).await?;

    tracing::info!(job_id = %id, size = artifact.size, "Serving artifact");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, artifact.size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from_stream(ReaderStream::new(artifact.file)))
        .map_err(|e| KilnError::Internal(format!("could not build response: {e}")).into())
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

/// DELETE /api/v1/jobs/{id}
///
/// Remove the job's record and artifacts now instead of waiting for the TTL.
/// Idempotent.
pub async fn cleanup_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let reclaimed = state.orchestrator.cleanup(&id).await?;
    let deleted = reclaimed.record || reclaimed.artifacts;

    tracing::info!(job_id = %id, deleted, "Job cleanup requested");

    Ok(Json(json!({
        "success": true,
        "deleted": deleted,
    })))
}
