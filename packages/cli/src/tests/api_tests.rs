use super::TestApp;
use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use runbox_runner::container::ContainerOutput;
use runbox_runner::StreamKind;
use serde_json::json;

#[tokio::test]
async fn test_run_static_file_returns_preview_url() {
    let app = TestApp::new();
    app.workspace("W1", &[("index.html", "<h1>hi</h1>")]);

    let (status, body) = app
        .json("POST", "/api/workspaces/W1/run", json!({ "file": "index.html" }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["strategy"], "static");
    assert_eq!(body["success"], true);
    assert_eq!(body["previewUrl"], "/preview/W1/index.html");
}

#[tokio::test]
async fn test_run_without_file_uses_index() {
    let app = TestApp::new();
    app.workspace("W1", &[("index.html", "<h1>hi</h1>")]);

    let (status, body) = app.json("POST", "/api/workspaces/W1/run", json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["previewUrl"], "/preview/W1/index.html");
}

#[tokio::test]
async fn test_run_script_returns_stdout() {
    let app = TestApp::new();
    app.workspace("W1", &[("main.js", "console.log('hi')")]);

    let (status, body) = app
        .json(
            "POST",
            "/api/workspaces/W1/run",
            json!({ "file": "main.js", "timeoutMs": 1000 }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["strategy"], "sandboxed-script");
    assert_eq!(body["success"], true);
    assert_eq!(body["stdout"], "hi\n");

    let (_, output) = app.get_json("/api/workspaces/W1/output").await;
    assert_eq!(output["workspaceId"], "W1");
    assert_eq!(output["output"], "hi\n");
}

#[tokio::test]
async fn test_run_unsupported_is_structured_result() {
    let app = TestApp::new();
    app.workspace("W1", &[("main.rb", "puts 1")]);

    let (status, body) = app
        .json("POST", "/api/workspaces/W1/run", json!({ "file": "main.rb" }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["strategy"], "unsupported");
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains(".html"));
}

#[tokio::test]
async fn test_run_traversal_is_not_found() {
    let app = TestApp::new();
    app.workspace("W1", &[("index.html", "ok")]);

    let (status, body) = app
        .json(
            "POST",
            "/api/workspaces/W1/run",
            json!({ "file": "../../etc/passwd" }),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_run_invalid_options_rejected() {
    let app = TestApp::new();
    app.workspace("W1", &[("main.js", "1")]);

    let (status, body) = app
        .json(
            "POST",
            "/api/workspaces/W1/run",
            json!({ "file": "main.js", "timeoutMs": 0 }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_OPTIONS");
}

#[tokio::test]
async fn test_container_run_then_stop() {
    let app = TestApp::new();
    app.workspace("W1", &[("server.php", "<?php echo 'hi';")]);
    app.runtime.script_next_launch(
        vec![ContainerOutput {
            stream: StreamKind::Stdout,
            line: "apache ready".to_string(),
        }],
        None,
    );

    let (status, body) = app
        .json("POST", "/api/workspaces/W1/run", json!({ "file": "server.php" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["strategy"], "container");
    assert_eq!(body["port"], 9100);
    assert_eq!(body["previewUrl"], "http://localhost:9100/server.php");

    let (_, executions) = app.get_json("/api/executions").await;
    assert_eq!(executions.as_array().unwrap().len(), 1);

    let (status, stopped) = app
        .json("POST", "/api/workspaces/W1/stop", json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stopped["ok"], true);
    assert_eq!(stopped["state"], "stopped");
    assert_eq!(app.runtime.live_count(), 0);
    assert!(!app.registry.ports().is_leased(9100));

    let (_, status_body) = app.get_json("/api/workspaces/W1/status").await;
    assert_eq!(status_body["state"], "idle");
    assert_eq!(status_body["execution"]["state"], "cleaned");
    assert_eq!(status_body["execution"]["outcome"], "stopped");
}

#[tokio::test]
async fn test_stop_idle_workspace_is_ok() {
    let app = TestApp::new();

    let (status, body) = app
        .json("POST", "/api/workspaces/W1/stop", json!({}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "state": "idle" }));
}

#[tokio::test]
async fn test_invalid_workspace_id_rejected() {
    let app = TestApp::new();

    let (status, body) = app.get_json("/api/workspaces/bad.id/status").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_WORKSPACE_ID");
}

#[tokio::test]
async fn test_list_files() {
    let app = TestApp::new();
    app.workspace("W1", &[("index.html", "ok"), ("css/site.css", "body{}")]);

    let (status, body) = app.get_json("/api/workspaces/W1/files").await;

    assert_eq!(status, StatusCode::OK);
    let paths: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .filter(|f| f["isDir"] == false)
        .map(|f| f["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["css/site.css", "index.html"]);
}

#[tokio::test]
async fn test_files_of_missing_workspace_is_not_found() {
    let app = TestApp::new();

    let (status, _) = app.get_json("/api/workspaces/nope/files").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_network_profile_lifecycle() {
    let app = TestApp::new();

    let (_, body) = app.get_json("/api/workspaces/W1/network").await;
    assert_eq!(body["custom"], false);

    let (status, body) = app
        .json(
            "PUT",
            "/api/workspaces/W1/network",
            json!({ "latencyMs": 20, "failureRate": 0.25 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["custom"], true);
    assert_eq!(body["profile"]["latencyMs"], 20);
    assert_eq!(body["profile"]["failureRate"], 0.25);

    let (_, body) = app.json("DELETE", "/api/workspaces/W1/network", json!({})).await;
    assert_eq!(body["custom"], false);
}

#[tokio::test]
async fn test_network_profile_out_of_range_rejected() {
    let app = TestApp::new();

    let (status, body) = app
        .json(
            "PUT",
            "/api/workspaces/W1/network",
            json!({ "failureRate": 2.0 }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_OPTIONS");
}

#[tokio::test]
async fn test_events_endpoint_is_event_stream() {
    let app = TestApp::new();

    let response = app.get("/api/workspaces/W1/events").await;

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
    assert_eq!(app.registry.relay().subscriber_count("W1"), 1);
}
