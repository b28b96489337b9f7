use super::TestApp;
use crate::api::health::health_check;
use axum::http::StatusCode;

#[tokio::test]
async fn test_health_check_returns_ok() {
    let result = health_check().await;
    assert!(result.is_ok());

    let value = result.unwrap().0;

    assert_eq!(
        value.get("status").and_then(|v| v.as_str()),
        Some("healthy")
    );
    assert_eq!(value.get("service").and_then(|v| v.as_str()), Some("runbox"));
    assert!(value.get("version").is_some());
    // Timestamp should be reasonable (after year 2020)
    let timestamp = value.get("timestamp").and_then(|v| v.as_u64());
    assert!(timestamp.unwrap() > 1577836800);
}

#[tokio::test]
async fn test_status_reports_runner_details() {
    let app = TestApp::new();

    let (status, body) = app.get_json("/api/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["runner"]["containerRuntime"], "scripted");
    assert_eq!(body["runner"]["jsStrategy"], "sandbox");
    assert_eq!(body["runner"]["activeExecutions"], 0);
    assert_eq!(body["runner"]["leasedPorts"], 0);
}
