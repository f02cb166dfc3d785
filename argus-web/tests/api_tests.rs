// Router-level tests exercised through tower's oneshot, against an agent
// whose log store points at an unreachable address.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use argus_core::{Agent, AgentConfig};
use argus_web::create_app;

fn test_app(dir: &tempfile::TempDir) -> axum::Router {
    let config = AgentConfig {
        log_store_url: "http://127.0.0.1:1".to_string(),
        baseline_path: dir.path().join("baselines.json"),
        ..Default::default()
    };
    create_app(Arc::new(Agent::new(config).expect("agent should build")))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should read");
    serde_json::from_slice(&bytes).expect("body should be json")
}

#[tokio::test]
async fn test_root_identity() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["service"], "argus-agent");
    assert_eq!(body["status"], "running");
    assert!(body["uptime_seconds"].as_i64().unwrap() >= 0);
}

#[tokio::test]
async fn test_health_degraded_without_store() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = body_json(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["log_store"], "disconnected");
}

#[tokio::test]
async fn test_status_starts_initializing() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    let response = app
        .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "initializing");
    assert_eq!(body["incidents_created"], 0);
}

#[tokio::test]
async fn test_incident_listing_and_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/incidents").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 0);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/incidents/INC-0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_baseline_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/ml/baseline").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total_samples"], 0);
    assert_eq!(body["confidence"], 0.0);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/ml/hourly-patterns")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["hours_learned"], 0);
}

#[tokio::test]
async fn test_check_anomaly_probe() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/ml/check-anomaly?error_rate=12.0&log_volume=100")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    // No learning has happened, so nothing can be anomalous yet.
    assert_eq!(body["is_anomalous"], false);
    assert_eq!(body["confidence"], 0.0);
}

#[tokio::test]
async fn test_timeseries_snapshot_empty() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/advanced/timeseries")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data_points"], 0);
    assert_eq!(body["window_size"], 12);
}

#[tokio::test]
async fn test_logs_search_maps_transport_failure() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/logs/search?query=timeout")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_alert_introspection() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/alerts/config").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["slack_enabled"], false);
    assert_eq!(body["alert_severities"], serde_json::json!(["high", "critical"]));

    let response = app
        .oneshot(Request::builder().uri("/api/alerts/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total_alerts_sent"], 0);
}

#[tokio::test]
async fn test_manual_analysis_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/analyze")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["status"], "analysis_triggered");
}

#[tokio::test]
async fn test_alertmanager_stub() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhook/alertmanager")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"alerts": []}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "received");
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir);

    let response = app
        .oneshot(Request::builder().uri("/api/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    assert_eq!(body["code"], "ROUTE_NOT_FOUND");
}
