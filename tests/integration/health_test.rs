//! Integration tests for health endpoints.

#![cfg(unix)]

mod helpers;

use axum::http::StatusCode;

use helpers::TestApp;

#[tokio::test]
async fn test_health_reports_version() {
    let app = TestApp::without_tool().await;

    let response = app.get("/api/health").await;

    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
    assert!(body["data"]["version"].is_string());
    assert!(body["data"]["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_detailed_health_with_tool() {
    let app = TestApp::with_tool(r#"printf 'glb' > "$6""#).await;

    let response = app.get("/api/health/detailed").await;

    assert_eq!(response.status, StatusCode::OK);
    let data = &response.json()["data"];
    assert_eq!(data["status"], "ok");
    assert_eq!(data["conversion"]["tool"]["available"], true);
    assert_eq!(data["conversion"]["tool"]["method"], "explicit_config");
    assert_eq!(data["conversion"]["script_present"], true);
    assert_eq!(data["conversion"]["available_slots"], 2);
    assert_eq!(data["conversion"]["max_slots"], 2);
    assert_eq!(data["conversion"]["shutting_down"], false);
}

#[tokio::test]
async fn test_detailed_health_degraded_without_tool() {
    let app = TestApp::without_tool().await;

    let response = app.get("/api/health/detailed").await;

    assert_eq!(response.status, StatusCode::OK);
    let data = &response.json()["data"];
    assert_eq!(data["status"], "degraded");
    assert_eq!(data["conversion"]["tool"]["available"], false);
    assert!(data["conversion"]["tool"]["error"].is_string());
}

#[tokio::test]
async fn test_detailed_health_counts_conversions() {
    let app = TestApp::with_tool(r#"printf 'glTF' > "$6""#).await;

    assert_eq!(app.convert("one.stl", b"solid").await.status, StatusCode::OK);
    assert_eq!(
        app.convert("two.obj", b"v 0 0 0").await.status,
        StatusCode::OK
    );

    let data = &app.get("/api/health/detailed").await.json()["data"];
    let metrics = &data["conversion"]["metrics"];
    assert_eq!(metrics["conversions_started"], 2);
    assert_eq!(metrics["conversions_succeeded"], 2);
    assert_eq!(metrics["total_output_bytes"], 8);
    assert_eq!(metrics["sample_count"], 2);
}

#[tokio::test]
async fn test_detailed_health_after_shutdown() {
    let app = TestApp::without_tool().await;
    app.processor.shutdown();

    let data = &app.get("/api/health/detailed").await.json()["data"];
    assert_eq!(data["status"], "shutting_down");
    assert_eq!(data["conversion"]["shutting_down"], true);
}

#[tokio::test]
async fn test_conversion_after_shutdown_is_unavailable() {
    let app = TestApp::with_tool(r#"printf 'glb' > "$6""#).await;
    app.processor.shutdown();

    let response = app.convert("late.stl", b"solid").await;

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.error_code(), "SERVICE_UNAVAILABLE");
    assert!(app.invocations().is_empty());
    assert_eq!(app.uploads(), 0);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = TestApp::without_tool().await;

    let response = app.get("/api/nope").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
