//! End-to-end tests of the `/api/v1/jobs` resource through the full router.

mod common;

use std::sync::Arc;

use axum::http::{StatusCode, header};
use common::*;

#[tokio::test]
async fn submit_returns_accepted_with_job_id() {
    let app = build_test_app();

    let response = post_json(&app, "/api/v1/jobs", r#"{"source":"ok.py"}"#).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert!(json["job_id"].as_str().unwrap().starts_with("job-"));
}

#[tokio::test]
async fn blank_source_is_a_validation_error() {
    let app = build_test_app();

    let response = post_json(&app, "/api/v1/jobs", r#"{"source":"   "}"#).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(app.orchestrator.stats().queued, 0);
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let app = build_test_app();

    let response = post_json(&app, "/api/v1/jobs", r#"{"source":"#).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let app = build_test_app();

    for id in ["job-01ARZ3NDEKTSV4RRFFQ69G5FAV", "not-a-job-id"] {
        let response = get(&app, &format!("/api/v1/jobs/{id}")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{id}");
        let json = body_json(response).await;
        assert_eq!(json["code"], "NOT_FOUND");
    }
}

#[tokio::test]
async fn completed_job_links_to_a_downloadable_artifact() {
    let app = build_test_app();
    let job_id = submit(&app, "ok.py").await;

    let status = wait_completed(&app, &job_id).await;
    assert_eq!(status["success"], true);
    assert_eq!(status["progress"], 100);
    assert_eq!(status["phase"], "succeeded");
    let url = status["download_url"].as_str().unwrap().to_string();
    assert_eq!(url, format!("/api/v1/jobs/{job_id}/artifacts/{job_id}.zip"));

    let response = get(&app, &url).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment"), "{disposition}");
    assert!(disposition.contains(&format!("{job_id}.zip")));
    assert_eq!(body_bytes(response).await, b"PK\x05\x06fake");
}

#[tokio::test]
async fn failed_job_reports_message_and_has_no_artifact() {
    let app = build_test_app();
    let job_id = submit(&app, "broken.py").await;

    let status = wait_completed(&app, &job_id).await;
    assert_eq!(status["success"], false);
    assert_eq!(status["phase"], "failed");
    assert!(status["download_url"].is_null());
    assert!(
        status["message"]
            .as_str()
            .unwrap()
            .contains("unsupported source")
    );

    let response = get(&app, &format!("/api/v1/jobs/{job_id}/artifacts/{job_id}.zip")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_artifact_name_is_not_found() {
    let app = build_test_app();
    let job_id = submit(&app, "ok.py").await;
    wait_completed(&app, &job_id).await;

    for name in ["other.zip", "..%2F..%2Fetc%2Fpasswd"] {
        let response = get(&app, &format!("/api/v1/jobs/{job_id}/artifacts/{name}")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{name}");
    }
}

#[tokio::test]
async fn cleanup_is_idempotent_and_forgets_the_job() {
    let app = build_test_app();
    let job_id = submit(&app, "ok.py").await;
    wait_completed(&app, &job_id).await;

    let first = body_json(delete(&app, &format!("/api/v1/jobs/{job_id}")).await).await;
    assert_eq!(first["success"], true);
    assert_eq!(first["deleted"], true);

    let second = delete(&app, &format!("/api/v1/jobs/{job_id}")).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(body_json(second).await["deleted"], false);

    let poll = get(&app, &format!("/api/v1/jobs/{job_id}")).await;
    assert_eq!(poll.status(), StatusCode::NOT_FOUND);
    let download = get(&app, &format!("/api/v1/jobs/{job_id}/artifacts/{job_id}.zip")).await;
    assert_eq!(download.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn full_queue_is_service_unavailable() {
    let app = build_test_app_with(None, |config| {
        config.workers = 1;
        config.queue_capacity = 1;
    });

    submit(&app, "hang.py").await;
    wait_running(&app, 1).await;
    submit(&app, "hang.py").await;

    let response = post_json(&app, "/api/v1/jobs", r#"{"source":"hang.py"}"#).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["code"], "QUEUE_FULL");
}

#[tokio::test]
async fn unreachable_store_is_service_unavailable() {
    let app = build_test_app_with(Some(Arc::new(DownStore)), |_| {});

    let submit = post_json(&app, "/api/v1/jobs", r#"{"source":"ok.py"}"#).await;
    assert_eq!(submit.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(submit).await["code"], "STORE_UNAVAILABLE");

    let poll = get(&app, "/api/v1/jobs/job-01ARZ3NDEKTSV4RRFFQ69G5FAV").await;
    assert_eq!(poll.status(), StatusCode::SERVICE_UNAVAILABLE);
}
