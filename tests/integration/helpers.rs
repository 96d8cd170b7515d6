//! Shared test helpers for integration tests.
//!
//! Each `TestApp` owns a temporary directory holding the upload, output, and
//! script locations plus a shell script standing in for Blender. The stub
//! appends its arguments to `invocations.log` before running its body, so
//! tests can count how many times the tool was started.

#![allow(dead_code)]

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode, header};
use serde_json::Value;
use tower::ServiceExt;

use arcad_api::{AppState, build_app};
use arcad_converter::ConversionProcessor;
use arcad_core::config::AppConfig;

const BOUNDARY: &str = "arcad-test-boundary-7d1f";

/// Test application context
pub struct TestApp {
    _temp: tempfile::TempDir,
    /// Temporary root for every file the app touches.
    pub root: PathBuf,
    /// The Axum router for making test requests
    pub router: Router,
    /// Shared with the router.
    pub processor: ConversionProcessor,
    /// Application config
    pub config: AppConfig,
}

impl TestApp {
    /// App whose Blender stand-in runs `body` after logging its arguments.
    /// `$6` is the output path.
    pub async fn with_tool(body: &str) -> Self {
        Self::build(Some(body), |_| {}).await
    }

    /// Same as [`TestApp::with_tool`] with config tweaks applied first.
    pub async fn with_tool_and(body: &str, tweak: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(Some(body), tweak).await
    }

    /// App whose configured Blender path does not exist.
    pub async fn without_tool() -> Self {
        Self::build(None, |_| {}).await
    }

    async fn build(tool_body: Option<&str>, tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let temp = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp.path().to_path_buf();

        let tool_path = root.join("blender-stub");
        if let Some(body) = tool_body {
            write_tool(&tool_path, &root.join("invocations.log"), body);
        }

        let mut config = AppConfig::default();
        config.storage.upload_dir = path_string(&root.join("uploads"));
        config.storage.converted_dir = path_string(&root.join("converted"));
        config.storage.script_path = path_string(&root.join("scripts/convert_to_glb.py"));
        config.conversion.blender_path = Some(tool_path);
        tweak(&mut config);

        let processor = ConversionProcessor::initialize(config.conversion.clone(), &config.storage)
            .await
            .expect("Failed to initialize processor");
        let router = build_app(AppState::new(config.clone(), processor.clone()));

        Self {
            _temp: temp,
            root,
            router,
            processor,
            config,
        }
    }

    /// POST a multipart body to `path`.
    pub async fn post_multipart(&self, path: &str, parts: &[Part<'_>]) -> TestResponse {
        self.send(multipart_request(path, parts)).await
    }

    /// POST one file part named `file` to `/convert`.
    pub async fn convert(&self, file_name: &str, data: &[u8]) -> TestResponse {
        self.post_multipart("/convert", &[Part::file("file", file_name, data)])
            .await
    }

    /// GET `path`.
    pub async fn get(&self, path: &str) -> TestResponse {
        let req = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(req).await
    }

    pub async fn send(&self, req: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");

        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Files currently in the upload directory.
    pub fn uploads(&self) -> usize {
        count_entries(&self.config.storage.upload_path())
    }

    /// Files currently in the output directory.
    pub fn outputs(&self) -> usize {
        count_entries(&self.config.storage.converted_path())
    }

    /// Argument lines logged by the stub tool, one per run.
    pub fn invocations(&self) -> Vec<String> {
        match std::fs::read_to_string(self.root.join("invocations.log")) {
            Ok(log) => log.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Wait until the stub has been started `n` times.
    pub async fn wait_for_invocations(&self, n: usize) {
        for _ in 0..100 {
            if self.invocations().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("stub tool was not started {n} time(s)");
    }
}

/// One multipart part.
pub struct Part<'a> {
    pub name: &'a str,
    pub file_name: Option<&'a str>,
    pub data: &'a [u8],
}

impl<'a> Part<'a> {
    pub fn file(name: &'a str, file_name: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            file_name: Some(file_name),
            data,
        }
    }

    pub fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            file_name: None,
            data: value.as_bytes(),
        }
    }
}

/// A multipart POST request to `path`.
pub fn multipart_request(path: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .expect("Failed to build request")
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part.file_name {
            Some(file_name) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        part.name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            }
            None => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                        part.name
                    )
                    .as_bytes(),
                );
            }
        }
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn write_tool(path: &Path, log: &Path, body: &str) {
    // Written and closed in one step so exec never sees an open writer.
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o755)
        .open(path)
        .expect("Failed to create stub tool");
    write!(
        file,
        "#!/bin/sh\necho \"$@\" >> '{}'\n{}\n",
        log.display(),
        body
    )
    .expect("Failed to write stub tool");
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.count())
        .unwrap_or(0)
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Raw body
    pub body: Bytes,
}

impl TestResponse {
    /// Parse the body as JSON.
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    /// The `error` code of a JSON error body.
    pub fn error_code(&self) -> String {
        self.json()["error"].as_str().unwrap_or_default().to_string()
    }

    pub fn header(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
