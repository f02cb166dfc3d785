use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{AgentError, Result};
use crate::model::LogRecord;

const QUERY_DEADLINE: Duration = Duration::from_secs(30);

/// Read-only façade over the backing log index. Count, search and
/// aggregate; never retries, the caller decides what a failure means.
pub struct LogStore {
    base_url: String,
    index: String,
    client: Client,
}

impl LogStore {
    pub fn new(base_url: &str, index: &str) -> Result<Self> {
        let client = Client::builder().timeout(QUERY_DEADLINE).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            client,
        })
    }

    /// True iff the cluster reports a non-critical state. A failed probe
    /// counts as unhealthy rather than an error.
    pub async fn healthy(&self) -> bool {
        match self.cluster_status().await {
            Ok(status) => {
                debug!(status = %status, "log store health probe");
                matches!(status.as_str(), "green" | "yellow")
            }
            Err(err) => {
                warn!(error = %err, "log store health probe failed");
                false
            }
        }
    }

    async fn cluster_status(&self) -> Result<String> {
        let url = format!("{}/_cluster/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        let body: Value = Self::ensure_success(response).await?.json().await?;
        body.get("status")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AgentError::Parse("cluster health payload missing status".to_string()))
    }

    /// Count documents matching `query` (all documents when `None`).
    pub async fn count(&self, query: Option<Value>) -> Result<u64> {
        let url = format!("{}/{}/_count", self.base_url, self.index);
        let response = match query {
            Some(query) => self.client.post(&url).json(&json!({ "query": query })).send().await?,
            None => self.client.get(&url).send().await?,
        };
        let body: Value = Self::ensure_success(response).await?.json().await?;
        body.get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| AgentError::Parse("count payload missing count".to_string()))
    }

    /// Search matching records, newest first unless a sort is given.
    pub async fn search(
        &self,
        query: Value,
        limit: usize,
        sort: Option<Value>,
    ) -> Result<Vec<LogRecord>> {
        let url = format!("{}/{}/_search", self.base_url, self.index);
        let body = json!({
            "size": limit,
            "query": query,
            "sort": sort.unwrap_or_else(|| json!([{ "@timestamp": "desc" }])),
        });

        let response = self.client.post(&url).json(&body).send().await?;
        let payload: Value = Self::ensure_success(response).await?.json().await?;

        let hits = payload
            .get("hits")
            .and_then(|h| h.get("hits"))
            .and_then(Value::as_array)
            .ok_or_else(|| AgentError::Parse("search payload missing hits".to_string()))?;

        // Individual documents are decoded leniently; one malformed record
        // must not sink the whole batch.
        let records = hits
            .iter()
            .filter_map(|hit| hit.get("_source"))
            .filter_map(|source| serde_json::from_value::<LogRecord>(source.clone()).ok())
            .collect();

        Ok(records)
    }

    /// Records from the last `minutes` minutes, capped at `limit`.
    pub async fn recent_logs(&self, minutes: i64, limit: usize) -> Result<Vec<LogRecord>> {
        let query = json!({
            "range": { "@timestamp": { "gte": format!("now-{}m", minutes) } }
        });
        self.search(query, limit, None).await
    }

    /// Recent ERROR-level records.
    pub async fn recent_errors(&self, minutes: i64, limit: usize) -> Result<Vec<LogRecord>> {
        let query = json!({
            "bool": {
                "must": [
                    { "match": { "level": "ERROR" } },
                    { "range": { "@timestamp": { "gte": format!("now-{}m", minutes) } } }
                ]
            }
        });
        self.search(query, limit, None).await
    }

    /// Term aggregation of matching documents, truncated to `limit` buckets.
    pub async fn group_by(
        &self,
        field: &str,
        query: Option<Value>,
        limit: usize,
    ) -> Result<BTreeMap<String, u64>> {
        let url = format!("{}/{}/_search", self.base_url, self.index);
        let body = json!({
            "size": 0,
            "query": query.unwrap_or_else(|| json!({ "match_all": {} })),
            "aggs": {
                "by_field": {
                    "terms": { "field": format!("{}.keyword", field), "size": limit }
                }
            }
        });

        let response = self.client.post(&url).json(&body).send().await?;
        let payload: Value = Self::ensure_success(response).await?.json().await?;

        let buckets = payload
            .get("aggregations")
            .and_then(|a| a.get("by_field"))
            .and_then(|f| f.get("buckets"))
            .and_then(Value::as_array)
            .ok_or_else(|| AgentError::Parse("aggregation payload missing buckets".to_string()))?;

        let mut result = BTreeMap::new();
        for bucket in buckets {
            let key = bucket.get("key").and_then(Value::as_str);
            let count = bucket.get("doc_count").and_then(Value::as_u64);
            if let (Some(key), Some(count)) = (key, count) {
                result.insert(key.to_string(), count);
            }
        }
        Ok(result)
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(AgentError::Transport(format!(
                "log store returned HTTP {}",
                status
            )))
        }
    }
}
