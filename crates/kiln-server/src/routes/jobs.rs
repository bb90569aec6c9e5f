//! Route definitions for the `/jobs` resource.

use axum::Router;
use axum::routing::{get, post};

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// POST   /                             -> submit_job
/// GET    /{id}                         -> get_job
/// DELETE /{id}                         -> cleanup_job
/// GET    /{id}/artifacts/{filename}    -> download_artifact
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(jobs::submit_job))
        .route("/{id}", get(jobs::get_job).delete(jobs::cleanup_job))
        .route("/{id}/artifacts/{filename}", get(jobs::download_artifact))
}
