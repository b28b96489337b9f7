use super::{body_bytes, body_json, TestApp};
use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn test_preview_serves_file_with_content_type() {
    let app = TestApp::new();
    app.workspace("W1", &[("css/site.css", "body{}")]);

    let response = app.get("/preview/W1/css/site.css").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/css");
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(body_bytes(response).await, b"body{}".to_vec());
}

#[tokio::test]
async fn test_preview_root_serves_index() {
    let app = TestApp::new();
    app.workspace("W1", &[("index.html", "<h1>home</h1>")]);

    let response = app.get("/preview/W1").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/html");
    assert_eq!(body_bytes(response).await, b"<h1>home</h1>".to_vec());
}

#[tokio::test]
async fn test_preview_missing_file_is_not_found() {
    let app = TestApp::new();
    app.workspace("W1", &[("index.html", "ok")]);

    let response = app.get("/preview/W1/missing.css").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_bytes(response).await, b"Not found".to_vec());
}

#[tokio::test]
async fn test_preview_traversal_looks_like_missing_file() {
    let app = TestApp::new();
    app.workspace("W1", &[("index.html", "ok")]);
    app.workspace("W2", &[("secret.txt", "do not leak")]);

    let response = app.get("/preview/W1/%2e%2e/W2/secret.txt").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_bytes(response).await, b"Not found".to_vec());
}

#[tokio::test]
async fn test_preview_works_while_execution_active() {
    let app = TestApp::new();
    app.workspace("W1", &[("server.php", "<?php"), ("logo.svg", "<svg/>")]);
    let (status, _) = app
        .json("POST", "/api/workspaces/W1/run", json!({ "file": "server.php" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let response = app.get("/preview/W1/logo.svg").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/svg+xml");
    app.registry.shutdown().await;
}

#[tokio::test]
async fn test_preview_simulated_network_failure() {
    let app = TestApp::new();
    app.workspace("W1", &[("index.html", "ok")]);
    let (status, _) = app
        .json(
            "PUT",
            "/api/workspaces/W1/network",
            json!({ "failureRate": 1.0 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let response = app.get("/preview/W1/index.html").await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({ "ok": false, "error": "Simulated network failure" })
    );
}

#[tokio::test]
async fn test_preview_applies_latency() {
    let app = TestApp::new();
    app.workspace("W1", &[("index.html", "ok")]);
    app.registry
        .network()
        .set(
            "W1",
            runbox_runner::NetworkProfile {
                latency_ms: 50,
                failure_rate: 0.0,
            },
        )
        .unwrap();

    let started = std::time::Instant::now();
    let response = app.get("/preview/W1/index.html").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(started.elapsed() >= std::time::Duration::from_millis(50));
}

#[rstest::rstest]
#[case("page.htm", "text/html")]
#[case("app.mjs", "application/javascript")]
#[case("data.json", "application/json")]
#[case("photo.jpeg", "image/jpeg")]
#[case("archive.bin", "application/octet-stream")]
#[tokio::test]
async fn test_preview_content_types(#[case] file: &str, #[case] expected: &str) {
    let app = TestApp::new();
    app.workspace("W1", &[(file, "x")]);

    let response = app.get(&format!("/preview/W1/{}", file)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], expected);
}
