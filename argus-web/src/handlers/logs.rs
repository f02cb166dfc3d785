use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error_handling::AppResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: Option<String>,
    pub level: Option<String>,
    pub service: Option<String>,
    pub limit: Option<usize>,
}

/// Filtered pass-through search, scoped to the last hour.
pub async fn search_logs(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<Value>> {
    let limit = params.limit.unwrap_or(100);

    let mut must = Vec::new();
    if let Some(query) = &params.query {
        must.push(json!({ "match": { "message": query } }));
    }
    if let Some(level) = &params.level {
        must.push(json!({ "match": { "level": level } }));
    }
    if let Some(service) = &params.service {
        must.push(json!({ "match": { "service": service } }));
    }
    must.push(json!({ "range": { "@timestamp": { "gte": "now-1h" } } }));

    let logs = state
        .agent
        .store
        .search(json!({ "bool": { "must": must } }), limit, None)
        .await?;

    info!(count = logs.len(), "logs searched");

    Ok(Json(json!({
        "count": logs.len(),
        "logs": logs,
        "filters": {
            "query": params.query,
            "level": params.level,
            "service": params.service,
            "limit": limit,
        }
    })))
}

#[derive(Debug, Deserialize)]
pub struct ErrorsParams {
    pub minutes: Option<i64>,
    pub limit: Option<usize>,
}

pub async fn get_recent_errors(
    State(state): State<AppState>,
    Query(params): Query<ErrorsParams>,
) -> AppResult<Json<Value>> {
    let minutes = params.minutes.unwrap_or(5);
    let limit = params.limit.unwrap_or(50);

    let errors = state.agent.store.recent_errors(minutes, limit).await?;
    info!(count = errors.len(), minutes, "recent errors retrieved");

    Ok(Json(json!({
        "count": errors.len(),
        "time_range": format!("last {} minutes", minutes),
        "errors": errors,
    })))
}

#[derive(Debug, Deserialize)]
pub struct AggregateParams {
    pub field: Option<String>,
    pub size: Option<usize>,
}

pub async fn aggregate_logs(
    State(state): State<AppState>,
    Query(params): Query<AggregateParams>,
) -> AppResult<Json<Value>> {
    let field = params.field.unwrap_or_else(|| "level".to_string());
    let size = params.size.unwrap_or(10);

    let aggregation = state.agent.store.group_by(&field, None, size).await?;
    info!(field = %field, buckets = aggregation.len(), "logs aggregated");

    Ok(Json(json!({
        "field": field,
        "aggregation": aggregation,
        "total_buckets": aggregation.len(),
    })))
}
