//! Integration tests for the conversion endpoint.

#![cfg(unix)]

mod helpers;

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode, header};

use tower::ServiceExt;

use helpers::{Part, TestApp, multipart_request};

const WRITE_GLB: &str = r#"printf 'glTF-stub-output' > "$6""#;

#[tokio::test]
async fn test_successful_conversion_returns_glb() {
    let app = TestApp::with_tool(WRITE_GLB).await;

    let response = app.convert("part one.stl", b"solid cube\nendsolid cube\n").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(&response.body[..], b"glTF-stub-output");
    assert_eq!(
        response.header(header::CONTENT_TYPE),
        Some("application/octet-stream")
    );
    assert_eq!(
        response.header(header::CONTENT_DISPOSITION),
        Some("inline; filename=\"part one.glb\"")
    );
    assert_eq!(response.header(header::CONTENT_LENGTH), Some("16"));

    assert_eq!(app.uploads(), 0);
    assert_eq!(app.outputs(), 0);

    let runs = app.invocations();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].starts_with("--background --python "));
    assert!(runs[0].contains("convert_to_glb.py -- "));
    assert!(runs[0].ends_with(".glb"));
}

#[tokio::test]
async fn test_api_prefixed_route_converts() {
    let app = TestApp::with_tool(WRITE_GLB).await;

    let response = app
        .post_multipart("/api/convert", &[Part::file("file", "bracket.obj", b"v 0 0 0")])
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.header(header::CONTENT_DISPOSITION),
        Some("inline; filename=\"bracket.glb\"")
    );
}

#[tokio::test]
async fn test_file_part_found_among_other_fields() {
    let app = TestApp::with_tool(WRITE_GLB).await;

    let response = app
        .post_multipart(
            "/convert",
            &[
                Part::text("note", "from the dashboard"),
                Part::file("model", "gear.PLY", b"ply\n"),
            ],
        )
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.header(header::CONTENT_DISPOSITION),
        Some("inline; filename=\"gear.glb\"")
    );
}

#[tokio::test]
async fn test_failed_conversion_cleans_up_and_hides_stderr() {
    let app = TestApp::with_tool(
        r#"printf 'partial' > "$6"; echo 'importer exploded: secret-detail' >&2; exit 1"#,
    )
    .await;

    let response = app.convert("bracket.step", b"ISO-10303-21;").await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.error_code(), "CONVERSION_FAILED");
    assert!(!String::from_utf8_lossy(&response.body).contains("secret-detail"));

    assert_eq!(app.uploads(), 0);
    assert_eq!(app.outputs(), 0);
    assert_eq!(app.invocations().len(), 1);
}

#[tokio::test]
async fn test_exit_zero_without_output_is_failure() {
    let app = TestApp::with_tool("exit 0").await;

    let response = app.convert("empty-result.stl", b"solid").await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.error_code(), "CONVERSION_FAILED");
    assert_eq!(app.uploads(), 0);
    assert_eq!(app.outputs(), 0);
}

#[tokio::test]
async fn test_missing_file_part_is_rejected_without_invocation() {
    let app = TestApp::with_tool(WRITE_GLB).await;

    let response = app
        .post_multipart("/convert", &[Part::text("note", "no model attached")])
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error_code(), "VALIDATION_ERROR");
    assert!(app.invocations().is_empty());
    assert_eq!(app.uploads(), 0);
    assert_eq!(app.outputs(), 0);
}

#[tokio::test]
async fn test_empty_file_is_rejected_without_invocation() {
    let app = TestApp::with_tool(WRITE_GLB).await;

    let response = app.convert("empty.stl", b"").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error_code(), "VALIDATION_ERROR");
    assert!(app.invocations().is_empty());
    assert_eq!(app.uploads(), 0);
}

#[tokio::test]
async fn test_non_multipart_body_is_rejected() {
    let app = TestApp::with_tool(WRITE_GLB).await;

    let req = Request::builder()
        .method("POST")
        .uri("/convert")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"file":"part.stl"}"#))
        .expect("Failed to build request");
    let response = app.send(req).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error_code(), "VALIDATION_ERROR");
    assert!(app.invocations().is_empty());
}

#[tokio::test]
async fn test_unsupported_extension_is_rejected() {
    let app = TestApp::with_tool(WRITE_GLB).await;

    let response = app.convert("notes.txt", b"hello").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error_code(), "VALIDATION_ERROR");
    assert!(
        response.json()["message"]
            .as_str()
            .unwrap_or_default()
            .contains("stl")
    );
    assert!(app.invocations().is_empty());
    assert_eq!(app.uploads(), 0);
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let app = TestApp::with_tool_and(WRITE_GLB, |config| {
        config.storage.max_upload_bytes = 16;
    })
    .await;

    let response = app.convert("huge.stl", &[b'x'; 64]).await;

    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.error_code(), "PAYLOAD_TOO_LARGE");
    assert!(app.invocations().is_empty());
    assert_eq!(app.uploads(), 0);
}

#[tokio::test]
async fn test_script_is_not_rewritten_per_request() {
    let app = TestApp::with_tool(WRITE_GLB).await;
    let script = app.config.storage.script_file();

    let before_content = std::fs::read(&script).expect("script installed at startup");
    let before_mtime = std::fs::metadata(&script)
        .and_then(|m| m.modified())
        .expect("mtime");

    tokio::time::sleep(Duration::from_millis(20)).await;
    for name in ["a.stl", "b.obj"] {
        let response = app.convert(name, b"data").await;
        assert_eq!(response.status, StatusCode::OK);
    }

    let after_mtime = std::fs::metadata(&script)
        .and_then(|m| m.modified())
        .expect("mtime");
    assert_eq!(std::fs::read(&script).expect("script"), before_content);
    assert_eq!(after_mtime, before_mtime);
}

#[tokio::test]
async fn test_missing_tool_reports_unavailable() {
    let app = TestApp::without_tool().await;

    let response = app.convert("part.stl", b"solid").await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.error_code(), "TOOL_UNAVAILABLE");
    assert_eq!(app.uploads(), 0);
    assert_eq!(app.outputs(), 0);
}

#[tokio::test]
async fn test_timeout_kills_tool() {
    let app = TestApp::with_tool_and("exec sleep 30", |config| {
        config.conversion.timeout_seconds = 1;
    })
    .await;

    let started = Instant::now();
    let response = app.convert("slow.dae", b"<COLLADA/>").await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.error_code(), "CONVERSION_TIMEOUT");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(app.uploads(), 0);
    assert_eq!(app.outputs(), 0);
    assert_eq!(app.processor.metrics_snapshot().conversions_timed_out, 1);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_timeout_kills_wrapped_tool() {
    // A launcher script that forks the real work instead of exec'ing it.
    let app = TestApp::with_tool_and(
        r#"sleep 30 & echo $! > "$(dirname "$0")/worker.pid"; wait"#,
        |config| {
            config.conversion.timeout_seconds = 1;
        },
    )
    .await;

    let started = Instant::now();
    let response = app.convert("wrapped.stl", b"solid").await;

    assert_eq!(response.error_code(), "CONVERSION_TIMEOUT");
    assert!(started.elapsed() < Duration::from_secs(4));

    let pid = std::fs::read_to_string(app.root.join("worker.pid")).expect("worker pid");
    tokio::time::sleep(Duration::from_millis(300)).await;
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid.trim())).unwrap_or_default();
    let running = stat
        .rsplit_once(')')
        .is_some_and(|(_, rest)| !rest.trim_start().starts_with('Z'));
    assert!(!running, "forked worker outlived the timeout");
    assert_eq!(app.uploads(), 0);
    assert_eq!(app.outputs(), 0);
}

#[tokio::test]
async fn test_busy_server_returns_rate_limited() {
    let app = TestApp::with_tool_and(r#"sleep 2; printf 'glb' > "$6""#, |config| {
        config.conversion.max_concurrent = 1;
        config.conversion.queue_timeout_seconds = 0;
    })
    .await;

    let first = {
        let router = app.router.clone();
        let req = multipart_request("/convert", &[Part::file("file", "first.stl", b"solid")]);
        tokio::spawn(async move { router.oneshot(req).await.expect("first request").status() })
    };

    app.wait_for_invocations(1).await;
    let second = app.convert("second.stl", b"solid").await;

    assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.error_code(), "RATE_LIMITED");
    assert_eq!(first.await.expect("join"), StatusCode::OK);
    assert_eq!(app.invocations().len(), 1);
    assert_eq!(app.uploads(), 0);
}

#[tokio::test]
async fn test_cors_preflight_allows_any_origin() {
    let app = TestApp::with_tool(WRITE_GLB).await;

    let req = Request::builder()
        .method("OPTIONS")
        .uri("/convert")
        .header(header::ORIGIN, "http://dashboard.local")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .expect("Failed to build request");
    let response = app.send(req).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN),
        Some("*")
    );
    assert!(app.invocations().is_empty());
}

#[tokio::test]
async fn test_cross_origin_response_exposes_disposition() {
    let app = TestApp::with_tool(WRITE_GLB).await;

    let mut req = multipart_request("/convert", &[Part::file("file", "part.stl", b"solid")]);
    req.headers_mut().insert(
        header::ORIGIN,
        header::HeaderValue::from_static("http://dashboard.local"),
    );
    let response = app.send(req).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.header(header::ACCESS_CONTROL_EXPOSE_HEADERS),
        Some("content-disposition")
    );
}
