use axum::{
    routing::{get, post},
    Router,
};

use crate::{handlers, AppState};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Monitoring state
        .route("/status", get(handlers::get_status))
        .route("/stats", get(handlers::get_stats))
        .route("/analyze", post(handlers::trigger_analysis))
        // Incidents
        .route("/incidents", get(handlers::list_incidents))
        .route("/incidents/:id", get(handlers::get_incident))
        .route("/incidents/:id/rca", get(handlers::get_incident_rca))
        // Log pass-through
        .route("/logs/search", get(handlers::search_logs))
        .route("/logs/errors", get(handlers::get_recent_errors))
        .route("/logs/aggregate", get(handlers::aggregate_logs))
        // Adaptive baseline
        .route("/ml/baseline", get(handlers::get_baseline))
        .route("/ml/hourly-patterns", get(handlers::get_hourly_patterns))
        .route("/ml/check-anomaly", post(handlers::check_anomaly))
        // Detector introspection
        .route("/advanced/timeseries", get(handlers::get_timeseries))
        .route("/advanced/patterns", get(handlers::get_patterns))
        .route("/advanced/correlations", get(handlers::get_correlations))
        // Alerting
        .route("/alerts/test", post(handlers::send_test_alert))
        .route("/alerts/status", get(handlers::get_alert_status))
        .route("/alerts/history", get(handlers::get_alert_history))
        .route("/alerts/config", get(handlers::get_alert_config))
        // Reserved receivers
        .route("/webhook/alertmanager", post(handlers::alertmanager_webhook))
}
