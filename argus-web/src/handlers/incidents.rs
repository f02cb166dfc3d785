use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use argus_core::Incident;

use crate::error_handling::{AppError, AppResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

/// Newest incidents first.
pub async fn list_incidents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<Incident>> {
    let limit = params.limit.unwrap_or(10);
    let incidents = state.agent.monitor.recent_incidents(limit).await;
    info!(count = incidents.len(), "incidents retrieved");
    Json(incidents)
}

pub async fn get_incident(
    State(state): State<AppState>,
    Path(incident_id): Path<String>,
) -> AppResult<Json<Incident>> {
    match state.agent.monitor.incident(&incident_id).await {
        Some(incident) => {
            info!(incident_id = %incident_id, "incident retrieved");
            Ok(Json(incident))
        }
        None => {
            warn!(incident_id = %incident_id, "incident not found");
            Err(AppError::not_found(format!("incident {}", incident_id)))
        }
    }
}

/// The RCA subtree for one incident, or `has_rca: false` when analysis
/// never ran or has not finished.
pub async fn get_incident_rca(
    State(state): State<AppState>,
    Path(incident_id): Path<String>,
) -> AppResult<Json<Value>> {
    let incident = state
        .agent
        .monitor
        .incident(&incident_id)
        .await
        .ok_or_else(|| AppError::not_found(format!("incident {}", incident_id)))?;

    match incident.rca_analysis {
        Some(rca) => Ok(Json(json!({
            "incident_id": incident.id,
            "has_rca": true,
            "rca": rca,
        }))),
        None => Ok(Json(json!({
            "incident_id": incident.id,
            "has_rca": false,
        }))),
    }
}
