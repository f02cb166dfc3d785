use axum::extract::{Query, State};
use axum::Json;
use chrono::{Timelike, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::AppState;

/// Learned-baseline summary plus the distribution currently in effect.
pub async fn get_baseline(State(state): State<AppState>) -> Json<Value> {
    let summary = state.agent.monitor.baseline_summary().await;
    let expected = state.agent.monitor.expected_baseline(Utc::now()).await;

    Json(json!({
        "confidence": summary.confidence,
        "total_samples": summary.total_samples,
        "history_size": summary.history_size,
        "hours_with_data": summary.hours_with_data,
        "days_with_data": summary.days_with_data,
        "current_expected_baseline": expected,
        "overall_baseline": summary.overall,
    }))
}

/// Hour-of-day baselines that have accumulated enough samples.
pub async fn get_hourly_patterns(State(state): State<AppState>) -> Json<Value> {
    let patterns = state.agent.monitor.hourly_patterns().await;

    Json(json!({
        "hours_learned": patterns.len(),
        "patterns": patterns,
        "current_hour": Utc::now().hour(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CheckAnomalyParams {
    pub error_rate: f64,
    pub log_volume: u64,
}

/// Score a hypothetical observation against the learned baseline. Pure
/// probe: the baseline is never updated.
pub async fn check_anomaly(
    State(state): State<AppState>,
    Query(params): Query<CheckAnomalyParams>,
) -> Json<Value> {
    let (deviation, confidence) = state
        .agent
        .monitor
        .probe_anomaly(params.error_rate, params.log_volume)
        .await;

    Json(json!({
        "is_anomalous": deviation.is_some(),
        "details": deviation,
        "confidence": confidence,
    }))
}
