use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use argus_core::Anomaly;

use crate::error_handling::AppResult;
use crate::AppState;

/// The raw time-series windows the pattern detector operates on.
pub async fn get_timeseries(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.agent.monitor.timeseries_snapshot().await;
    Json(json!({
        "error_rate_history": snapshot.error_rate_history,
        "log_volume_history": snapshot.log_volume_history,
        "window_size": snapshot.window_size,
        "data_points": snapshot.data_points,
    }))
}

/// Run the pattern detectors over the current window on demand.
pub async fn get_patterns(State(state): State<AppState>) -> Json<Value> {
    let anomalies = state.agent.monitor.pattern_scan().await;
    Json(json!({
        "patterns_detected": anomalies.len(),
        "patterns": describe(&anomalies),
    }))
}

/// Run the correlation engine over a fresh sample of recent logs.
pub async fn get_correlations(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let logs = state.agent.store.recent_logs(10, 500).await?;
    let anomalies = state.agent.monitor.correlation_scan(&logs);

    Ok(Json(json!({
        "correlations_found": anomalies.len(),
        "logs_analyzed": logs.len(),
        "correlations": describe(&anomalies),
    })))
}

fn describe(anomalies: &[Anomaly]) -> Vec<Value> {
    anomalies
        .iter()
        .map(|a| {
            json!({
                "type": a.kind,
                "severity": a.severity,
                "score": a.score,
                "description": a.description,
                "metrics": a.evidence,
            })
        })
        .collect()
}
