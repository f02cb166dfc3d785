use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use crate::error_handling::AppResult;
use crate::AppState;

/// Identity and uptime snippet.
pub async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": "argus-agent",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "uptime_seconds": state.agent.uptime_seconds(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// 200 when both the log store and the monitor report healthy, 503
/// otherwise; the body always carries the details.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let monitor_state = state.agent.monitor.state().await;
    let store_healthy = state.agent.store.healthy().await;

    let healthy =
        store_healthy && monitor_state.status == argus_core::MonitorStatus::Healthy;

    let body = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "log_store": if store_healthy { "connected" } else { "disconnected" },
        "monitor_status": monitor_state.status,
        "uptime_seconds": state.agent.uptime_seconds(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// Full monitoring state.
pub async fn get_status(State(state): State<AppState>) -> Json<argus_core::MonitoringState> {
    Json(state.agent.monitor.state().await)
}

/// Aggregated counters plus a by-level breakdown from the store.
pub async fn get_stats(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let mut stats = state.agent.monitor.statistics().await;

    let total_logs = state.agent.store.count(None).await?;
    let error_count = state
        .agent
        .store
        .count(Some(json!({
            "bool": {
                "must": [
                    { "match": { "level": "ERROR" } },
                    { "range": { "@timestamp": { "gte": "now-24h" } } }
                ]
            }
        })))
        .await?;
    let level_counts = state.agent.store.group_by("level", None, 10).await?;

    stats["logs"] = json!({
        "total_count": total_logs,
        "error_count_24h": error_count,
        "by_level": level_counts,
    });
    stats["timestamp"] = json!(chrono::Utc::now().to_rfc3339());

    Ok(Json(stats))
}

/// Force one monitoring cycle in the background.
pub async fn trigger_analysis(State(state): State<AppState>) -> impl IntoResponse {
    info!("manual analysis triggered");

    let monitor = state.agent.monitor.clone();
    tokio::spawn(async move {
        if let Err(err) = monitor.check_logs().await {
            tracing::error!(error = %err, "manual analysis failed");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "analysis_triggered",
            "message": "Log analysis started in background",
        })),
    )
}

/// Reserved receiver for alertmanager-style pushes.
pub async fn alertmanager_webhook(Json(alert): Json<Value>) -> Json<Value> {
    info!(alert = %alert, "alert received from alertmanager");
    Json(json!({ "status": "received" }))
}
