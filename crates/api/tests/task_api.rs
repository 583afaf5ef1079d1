//! Integration tests for the per-domain task endpoints.

mod common;

use axum::http::StatusCode;
use common::{
    body_json, build_test_app, build_test_app_with, completing_script, delete, get, post_json,
    post_json_with_key, wait_for_terminal, ScriptedBackend,
};
use genrelay_backend::BackendEvent;
use serde_json::json;

fn create_body() -> serde_json::Value {
    json!({ "model": "gen-video-1", "prompt": "a cat surfing" })
}

// ---------------------------------------------------------------------------
// Test: submission returns 202 with id and Location headers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_returns_202_with_location_headers() {
    let app = build_test_app(ScriptedBackend::hanging());
    let response = post_json(app, "/api/v1/video/tasks", create_body()).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let location = response
        .headers()
        .get("location")
        .expect("Location header")
        .to_str()
        .unwrap()
        .to_string();
    let operation_location = response
        .headers()
        .get("operation-location")
        .expect("Operation-Location header")
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(location, operation_location);

    let json = body_json(response).await;
    let task_id = json["data"]["task_id"].as_str().expect("task_id");
    assert_eq!(location, format!("/api/v1/video/tasks/{task_id}"));
}

// ---------------------------------------------------------------------------
// Test: full happy path -- create, progress, completed with artifact
// ---------------------------------------------------------------------------

#[tokio::test]
async fn task_completes_with_artifact_from_scripted_backend() {
    let app = build_test_app(ScriptedBackend::new(vec![completing_script(
        "https://x/out.mp4",
    )]));

    let response = post_json(app.clone(), "/api/v1/video/tasks", create_body()).await;
    let task_id = body_json(response).await["data"]["task_id"]
        .as_str()
        .unwrap()
        .to_string();

    let json = wait_for_terminal(&app, &format!("/api/v1/video/tasks/{task_id}")).await;
    assert_eq!(json["data"]["status"], "completed");
    assert_eq!(json["data"]["progress"], 100);
    assert_eq!(json["data"]["result"]["url"], "https://x/out.mp4");

    // The result view agrees.
    let result = body_json(get(app, &format!("/api/v1/video/tasks/{task_id}/result")).await).await;
    assert_eq!(result["data"]["status"], "completed");
    assert_eq!(result["data"]["result"]["url"], "https://x/out.mp4");
}

// ---------------------------------------------------------------------------
// Test: validation failures allocate no task
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_body_returns_400_and_allocates_nothing() {
    let app = build_test_app(ScriptedBackend::hanging());

    // Missing prompt entirely.
    let response = post_json(
        app.clone(),
        "/api/v1/video/tasks",
        json!({ "model": "gen-video-1" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");

    // Empty model string.
    let response = post_json(
        app.clone(),
        "/api/v1/video/tasks",
        json!({ "model": "", "prompt": "a cat" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let list = body_json(get(app, "/api/v1/video/tasks").await).await;
    assert_eq!(list["data"].as_array().unwrap().len(), 0);
}

// ---------------------------------------------------------------------------
// Test: unknown ids are 404 across the id-addressed endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_task_id_returns_404() {
    let app = build_test_app(ScriptedBackend::hanging());

    for uri in [
        "/api/v1/video/tasks/nope",
        "/api/v1/video/tasks/nope/result",
        "/api/v1/video/tasks/nope/stream",
    ] {
        let response = get(app.clone(), uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }

    let response = post_json(app.clone(), "/api/v1/video/tasks/nope/cancel", json!({})).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = delete(app, "/api/v1/video/tasks/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: a task is invisible from the other domain's store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn task_is_scoped_to_its_domain() {
    let app = build_test_app(ScriptedBackend::hanging());
    let response = post_json(app.clone(), "/api/v1/video/tasks", create_body()).await;
    let task_id = body_json(response).await["data"]["task_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = get(app, &format!("/api/v1/image/tasks/{task_id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: cancellation interrupts a hanging execution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_drives_task_to_cancelled() {
    let app = build_test_app(ScriptedBackend::hanging());
    let response = post_json(app.clone(), "/api/v1/video/tasks", create_body()).await;
    let task_id = body_json(response).await["data"]["task_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = post_json(
        app.clone(),
        &format!("/api/v1/video/tasks/{task_id}/cancel"),
        json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = wait_for_terminal(&app, &format!("/api/v1/video/tasks/{task_id}")).await;
    assert_eq!(json["data"]["status"], "cancelled");
}

// ---------------------------------------------------------------------------
// Test: credential exhaustion fails the task asynchronously
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_credentials_fail_the_task_after_202() {
    let app = build_test_app_with(
        ScriptedBackend::hanging(),
        std::collections::HashMap::new(),
        common::test_config(),
    );

    let response = post_json(app.clone(), "/api/v1/video/tasks", create_body()).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let task_id = body_json(response).await["data"]["task_id"]
        .as_str()
        .unwrap()
        .to_string();

    let json = wait_for_terminal(&app, &format!("/api/v1/video/tasks/{task_id}")).await;
    assert_eq!(json["data"]["status"], "failed");
    assert!(json["data"]["error"]
        .as_str()
        .unwrap()
        .starts_with("rate limited"));
}

// ---------------------------------------------------------------------------
// Test: batch-delete counts only existing ids
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_delete_counts_only_existing_ids() {
    let app = build_test_app(ScriptedBackend::hanging());
    let response = post_json(app.clone(), "/api/v1/video/tasks", create_body()).await;
    let task_id = body_json(response).await["data"]["task_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = post_json(
        app.clone(),
        "/api/v1/video/tasks/batch-delete",
        json!({ "task_ids": [task_id, "missing"] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["deleted"], 1);

    let list = body_json(get(app, "/api/v1/video/tasks").await).await;
    assert_eq!(list["data"].as_array().unwrap().len(), 0);
}

// ---------------------------------------------------------------------------
// Test: clear removes matching tasks and reports the count
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clear_reports_removed_count() {
    let app = build_test_app(ScriptedBackend::hanging());
    for _ in 0..2 {
        post_json(app.clone(), "/api/v1/video/tasks", create_body()).await;
    }

    let response = post_json(app.clone(), "/api/v1/video/tasks/clear", json!({})).await;
    assert_eq!(body_json(response).await["data"]["deleted"], 2);

    // Clearing again removes nothing.
    let response = post_json(app, "/api/v1/video/tasks/clear", json!({})).await;
    assert_eq!(body_json(response).await["data"]["deleted"], 0);
}

// ---------------------------------------------------------------------------
// Test: list filters by status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_filters_by_status() {
    let app = build_test_app(ScriptedBackend::new(vec![vec![Ok(
        BackendEvent::Artifact {
            artifact: genrelay_core::extract::Artifact {
                url: "https://x/a.mp4".to_string(),
                thumbnail_url: None,
            },
        },
    )]]));

    let response = post_json(app.clone(), "/api/v1/video/tasks", create_body()).await;
    let done_id = body_json(response).await["data"]["task_id"]
        .as_str()
        .unwrap()
        .to_string();
    wait_for_terminal(&app, &format!("/api/v1/video/tasks/{done_id}")).await;

    // Second submission hangs (script queue exhausted).
    post_json(app.clone(), "/api/v1/video/tasks", create_body()).await;

    let completed = body_json(get(app.clone(), "/api/v1/video/tasks?status=completed").await).await;
    let items = completed["data"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["task_id"], done_id.as_str());

    let response = get(app, "/api/v1/video/tasks?status=bogus").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Test: SSE stream of a finished task replays snapshot + terminal event
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_of_finished_task_ends_with_terminal_event() {
    use http_body_util::BodyExt;

    let app = build_test_app(ScriptedBackend::new(vec![completing_script(
        "https://x/out.mp4",
    )]));
    let response = post_json(app.clone(), "/api/v1/video/tasks", create_body()).await;
    let task_id = body_json(response).await["data"]["task_id"]
        .as_str()
        .unwrap()
        .to_string();
    wait_for_terminal(&app, &format!("/api/v1/video/tasks/{task_id}")).await;

    let response = get(app, &format!("/api/v1/video/tasks/{task_id}/stream")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    let snapshot_pos = text.find("\"type\":\"snapshot\"").expect("snapshot frame");
    let final_pos = text.find("\"type\":\"completed\"").expect("final frame");
    assert!(snapshot_pos < final_pos);
}

// ---------------------------------------------------------------------------
// Test: configured app keys gate mutating endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn app_keys_gate_mutating_endpoints() {
    let mut config = common::test_config();
    config.app_keys = vec!["sekret".to_string()];
    let app = build_test_app_with(ScriptedBackend::hanging(), common::default_pools(), config);

    let response = post_json(app.clone(), "/api/v1/video/tasks", create_body()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "UNAUTHORIZED");

    let response = post_json_with_key(
        app.clone(),
        "/api/v1/video/tasks",
        create_body(),
        "wrong-key",
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response =
        post_json_with_key(app.clone(), "/api/v1/video/tasks", create_body(), "sekret").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Reads stay public.
    let response = get(app, "/api/v1/video/tasks").await;
    assert_eq!(response.status(), StatusCode::OK);
}
