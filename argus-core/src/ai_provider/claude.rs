use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{parse_rca_response, RcaError, RcaProvider, RcaReport, RcaRequest};
use crate::model::truncate_chars;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ClaudeMessage>,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    text: String,
}

/// Root-cause narration via the Anthropic messages API.
pub struct ClaudeProvider {
    client: Client,
    api_key: String,
    model: String,
}

impl ClaudeProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            api_key,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    fn build_prompt(request: &RcaRequest) -> String {
        let mut prompt = format!(
            "You are a DevOps expert. Analyze this incident:\n\n# INCIDENT\n{}\n\n# ERRORS\n",
            request.incident_summary
        );

        for (i, log) in request.error_logs.iter().take(10).enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, truncate_chars(log, 100)));
        }

        prompt.push_str("\n# ANOMALIES\n");
        for anomaly in request.anomalies.iter().take(5) {
            prompt.push_str(&format!("- {}: {}\n", anomaly.kind, anomaly.description));
        }

        prompt.push_str(
            "\nProvide:\n\n\
             ## Root Cause\n[Identify root cause]\n\n\
             ## Immediate Actions\n1. [Action 1]\n2. [Action 2]\n3. [Action 3]\n\n\
             ## Confidence\n[High/Medium/Low]\n",
        );

        prompt
    }
}

#[async_trait::async_trait]
impl RcaProvider for ClaudeProvider {
    async fn analyze(&self, request: &RcaRequest) -> Result<RcaReport, RcaError> {
        let prompt = Self::build_prompt(request);

        let claude_request = ClaudeRequest {
            model: self.model.clone(),
            max_tokens: 2000,
            temperature: 0.3,
            messages: vec![ClaudeMessage {
                role: "user".to_string(),
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&claude_request)
            .send()
            .await?;

        if response.status() == 401 {
            return Err(RcaError::Authentication);
        }
        if response.status() == 429 {
            return Err(RcaError::RateLimited);
        }
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RcaError::InvalidResponse(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let claude_response: ClaudeResponse = response
            .json()
            .await
            .map_err(|e| RcaError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let content = claude_response
            .content
            .first()
            .ok_or_else(|| RcaError::InvalidResponse("No content in response".to_string()))?;

        Ok(parse_rca_response(&content.text))
    }

    fn provider_name(&self) -> &str {
        "claude"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_provider::{AnomalyDigest, RcaMetrics};
    use crate::model::{AnomalyKind, Severity};

    fn sample_request() -> RcaRequest {
        RcaRequest {
            incident_summary: "Incident: spike\nSeverity: high\nErrors: 50\nServices: api"
                .to_string(),
            error_logs: vec!["x".repeat(300), "connection refused".to_string()],
            anomalies: vec![AnomalyDigest {
                kind: AnomalyKind::ErrorSpike,
                severity: Severity::High,
                description: "Error rate spiked to 50 (baseline: 1.0)".to_string(),
            }],
            metrics: RcaMetrics {
                error_rate: 0.5,
                total_logs: 100,
                error_count: 50,
            },
            context: None,
        }
    }

    #[test]
    fn test_provider_defaults() {
        let provider = ClaudeProvider::new("test_key".to_string());
        assert_eq!(provider.api_key, "test_key");
        assert_eq!(provider.model, DEFAULT_MODEL);

        let provider = provider.with_model("claude-haiku-3".to_string());
        assert_eq!(provider.model, "claude-haiku-3");
    }

    #[test]
    fn test_prompt_truncates_logs() {
        let prompt = ClaudeProvider::build_prompt(&sample_request());
        assert!(prompt.contains("# INCIDENT"));
        assert!(prompt.contains("1. "));
        // Long error lines are clipped to 100 characters in the prompt.
        assert!(!prompt.contains(&"x".repeat(101)));
        assert!(prompt.contains(&"x".repeat(100)));
        assert!(prompt.contains("- error_spike: Error rate spiked"));
        assert!(prompt.contains("## Confidence"));
    }
}
