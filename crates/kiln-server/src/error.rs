use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kiln_core::domain::{ArtifactError, KilnError};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`KilnError`] for orchestrator errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// An orchestrator error from `kiln_core`.
    #[error(transparent)]
    Core(#[from] KilnError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "success": false,
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify an orchestrator error into an HTTP status, error code, and message.
///
/// - Invalid input maps to 400.
/// - Unknown jobs and unservable artifacts map to 404.
/// - A full queue or an unreachable store maps to 503 (retry later).
/// - Everything else maps to 500 with a sanitized message.
fn classify_core_error(err: &KilnError) -> (StatusCode, &'static str, String) {
    match err {
        KilnError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        KilnError::NotFound(what) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{what} not found"),
        ),
        KilnError::Artifact(ArtifactError::InvalidName(name)) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("artifact {name} not found"),
        ),
        KilnError::QueueFull { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "QUEUE_FULL",
            err.to_string(),
        ),
        KilnError::StoreUnavailable(msg) => {
            tracing::warn!(error = %msg, "State store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_UNAVAILABLE",
                "Job status is temporarily unavailable".to_string(),
            )
        }
        KilnError::Artifact(ArtifactError::Io(e)) => {
            tracing::error!(error = %e, "Artifact I/O error");
            internal()
        }
        KilnError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal error");
            internal()
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(KilnError::InvalidInput("source: blank".into()), StatusCode::BAD_REQUEST, "VALIDATION_ERROR")]
    #[case(KilnError::NotFound("job-x".into()), StatusCode::NOT_FOUND, "NOT_FOUND")]
    #[case(KilnError::QueueFull { capacity: 4 }, StatusCode::SERVICE_UNAVAILABLE, "QUEUE_FULL")]
    #[case(KilnError::StoreUnavailable("refused".into()), StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")]
    #[case(KilnError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")]
    fn core_errors_are_classified(
        #[case] err: KilnError,
        #[case] status: StatusCode,
        #[case] code: &str,
    ) {
        let (got_status, got_code, _) = classify_core_error(&err);
        assert_eq!(got_status, status);
        assert_eq!(got_code, code);
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let (_, _, message) = classify_core_error(&KilnError::Internal("secret path".into()));
        assert!(!message.contains("secret"));
    }
}
