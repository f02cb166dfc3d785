use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use argus_core::model::{
    Anomaly, Evidence, Incident, IncidentStatus, MetricsSnapshot, MlContext, Severity,
};
use argus_core::{AlertRecord, AlertStatistics, AnomalyKind};

use crate::AppState;

/// Synthesize a canned incident and push it through the configured sinks.
pub async fn send_test_alert(State(state): State<AppState>) -> Json<Value> {
    let incident = test_incident();
    info!(incident_id = %incident.id, "test alert requested");

    let sent = state.agent.alerts.send_incident_alert(&incident).await;

    Json(json!({
        "incident_id": incident.id,
        "alert_sent": sent,
        "slack_enabled": state.agent.config.slack_enabled(),
        "webhook_enabled": state.agent.config.webhook_enabled(),
    }))
}

pub async fn get_alert_status(State(state): State<AppState>) -> Json<AlertStatistics> {
    Json(state.agent.alerts.statistics().await)
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

pub async fn get_alert_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Json<Vec<AlertRecord>> {
    let limit = params.limit.unwrap_or(10);
    Json(state.agent.alerts.recent_alerts(limit).await)
}

pub async fn get_alert_config(State(state): State<AppState>) -> Json<Value> {
    Json(state.agent.alerts.config_view())
}

fn test_incident() -> Incident {
    let now = Utc::now();
    let anomaly = Anomaly::new(
        Severity::High,
        0.75,
        "Error rate spiked to 42 (baseline: 3.0)",
        Evidence::ErrorSpike {
            current_errors: 42,
            baseline_avg: 3.0,
            threshold: 9.0,
            time_window: "5m".to_string(),
        },
    );

    let mut anomaly_breakdown = std::collections::BTreeMap::new();
    anomaly_breakdown.insert(AnomalyKind::ErrorSpike, 1usize);

    Incident {
        id: format!("INC-TEST-{}", now.timestamp()),
        title: "Test Incident: alert delivery check".to_string(),
        description: "[HIGH] Error rate spiked to 42 (baseline: 3.0)".to_string(),
        severity: Severity::High,
        status: IncidentStatus::Open,
        started_at: now - chrono::Duration::minutes(5),
        detected_at: now,
        resolved_at: None,
        anomalies: vec![anomaly],
        affected_services: vec!["sample-service".to_string()],
        log_count: 120,
        error_count: 42,
        sample_logs: Vec::new(),
        metrics_snapshot: MetricsSnapshot {
            total_logs: 120,
            error_logs: 42,
            error_rate: 0.35,
            anomaly_breakdown,
            ml_context: MlContext {
                baseline_confidence: 1.0,
                baseline_samples: 100,
                hours_learned: 0,
                detection_methods: vec![AnomalyKind::ErrorSpike],
            },
        },
        root_cause: None,
        recommendations: Vec::new(),
        rca_analysis: None,
    }
}
