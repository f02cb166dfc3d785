use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::model::{AnomalyKind, Incident, Severity, truncate_chars};

pub mod claude;

pub use claude::ClaudeProvider;

#[derive(Error, Debug)]
pub enum RcaError {
    #[error("API request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Authentication failed")]
    Authentication,
    #[error("Rate limited")]
    RateLimited,
}

/// One anomaly, summarized for the prompt.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyDigest {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RcaMetrics {
    pub error_rate: f64,
    pub total_logs: usize,
    pub error_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RcaContext {
    pub affected_services: Vec<String>,
    pub started_at: DateTime<Utc>,
}

/// Everything the provider is given about one incident.
#[derive(Debug, Clone, Serialize)]
pub struct RcaRequest {
    pub incident_summary: String,
    pub error_logs: Vec<String>,
    pub anomalies: Vec<AnomalyDigest>,
    pub metrics: RcaMetrics,
    pub context: Option<RcaContext>,
}

impl RcaRequest {
    pub fn from_incident(incident: &Incident) -> Self {
        let incident_summary = format!(
            "Incident: {}\nSeverity: {}\nErrors: {}\nServices: {}",
            incident.title,
            incident.severity,
            incident.error_count,
            incident.affected_services.join(", ")
        );

        Self {
            incident_summary,
            error_logs: incident
                .sample_logs
                .iter()
                .map(|log| log.message.clone())
                .collect(),
            anomalies: incident
                .anomalies
                .iter()
                .map(|a| AnomalyDigest {
                    kind: a.kind,
                    severity: a.severity,
                    description: a.description.clone(),
                })
                .collect(),
            metrics: RcaMetrics {
                error_rate: if incident.log_count > 0 {
                    incident.error_count as f64 / incident.log_count as f64
                } else {
                    0.0
                },
                total_logs: incident.log_count,
                error_count: incident.error_count,
            },
            context: Some(RcaContext {
                affected_services: incident.affected_services.clone(),
                started_at: incident.started_at,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RcaConfidence {
    High,
    Medium,
    Low,
}

impl RcaConfidence {
    /// Lenient parse of the confidence section; anything unclear is Medium.
    fn parse(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if lower.contains("high") {
            RcaConfidence::High
        } else if lower.contains("low") {
            RcaConfidence::Low
        } else {
            RcaConfidence::Medium
        }
    }
}

impl fmt::Display for RcaConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RcaConfidence::High => "High",
            RcaConfidence::Medium => "Medium",
            RcaConfidence::Low => "Low",
        };
        f.write_str(s)
    }
}

/// Structured root-cause narration. `full_analysis` always retains the
/// provider's complete prose.
#[derive(Debug, Clone, Serialize)]
pub struct RcaReport {
    pub root_cause: String,
    pub impact: String,
    pub technical_explanation: String,
    pub immediate_actions: Vec<String>,
    pub prevention: Vec<String>,
    pub confidence: RcaConfidence,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub full_analysis: String,
}

#[async_trait::async_trait]
pub trait RcaProvider: Send + Sync {
    async fn analyze(&self, request: &RcaRequest) -> Result<RcaReport, RcaError>;
    fn provider_name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    RootCause,
    Impact,
    ImmediateActions,
    Confidence,
}

#[derive(Default)]
struct ParsedSections {
    root_cause: String,
    impact: String,
    immediate_actions: Vec<String>,
    confidence_text: String,
}

fn flush_section(section: Option<Section>, content: &mut Vec<String>, out: &mut ParsedSections) {
    if let Some(section) = section {
        match section {
            Section::RootCause => out.root_cause = content.join("\n").trim().to_string(),
            Section::Impact => out.impact = content.join("\n").trim().to_string(),
            Section::ImmediateActions => {
                out.immediate_actions = content
                    .iter()
                    .map(|line| line.trim().to_string())
                    .filter(|line| !line.is_empty())
                    .collect();
            }
            Section::Confidence => out.confidence_text = content.join("\n").trim().to_string(),
        }
    }
    content.clear();
}

/// Split the provider's prose on its section headers. Tolerates missing
/// sections and never drops text: the unsplit response is kept whole.
pub fn parse_rca_response(response: &str) -> RcaReport {
    let mut sections = ParsedSections::default();
    let mut current: Option<Section> = None;
    let mut content: Vec<String> = Vec::new();

    for line in response.lines() {
        let lower = line.to_lowercase();
        let next = if lower.contains("## root") {
            Some(Section::RootCause)
        } else if lower.contains("## impact") {
            Some(Section::Impact)
        } else if lower.contains("## immediate") {
            Some(Section::ImmediateActions)
        } else if lower.contains("## confidence") {
            Some(Section::Confidence)
        } else {
            None
        };

        if let Some(next) = next {
            flush_section(current, &mut content, &mut sections);
            current = Some(next);
            continue;
        }

        match current {
            Some(Section::ImmediateActions) => {
                let trimmed = line.trim();
                if trimmed.starts_with("1.")
                    || trimmed.starts_with("2.")
                    || trimmed.starts_with("3.")
                    || trimmed.starts_with('-')
                {
                    let clean = trimmed
                        .trim_start_matches(|c: char| {
                            c.is_ascii_digit() || matches!(c, '.' | '-' | '*')
                        })
                        .trim();
                    if !clean.is_empty() {
                        content.push(clean.to_string());
                    }
                }
            }
            Some(_) => content.push(line.to_string()),
            None => {}
        }
    }
    flush_section(current, &mut content, &mut sections);

    let ParsedSections {
        mut root_cause,
        impact,
        mut immediate_actions,
        confidence_text,
    } = sections;

    if root_cause.is_empty() {
        root_cause = truncate_chars(response, 200);
    }
    if immediate_actions.is_empty() {
        immediate_actions = vec![
            "Check logs".to_string(),
            "Review changes".to_string(),
            "Monitor system".to_string(),
        ];
    }

    RcaReport {
        root_cause,
        impact,
        technical_explanation: String::new(),
        immediate_actions,
        prevention: Vec::new(),
        confidence: RcaConfidence::parse(&confidence_text),
        analyzed_at: None,
        full_analysis: response.to_string(),
    }
}

/// Drives root-cause analysis for incidents. Holds no provider when the
/// API key is absent, in which case every analysis is a silent no-op.
pub struct IncidentAnalyzer {
    provider: Option<Box<dyn RcaProvider>>,
    total_analyses: AtomicU64,
}

impl IncidentAnalyzer {
    pub fn new(api_key: Option<&str>) -> Self {
        let provider: Option<Box<dyn RcaProvider>> = match api_key {
            Some(key) if !key.is_empty() => {
                info!("RCA provider initialized");
                Some(Box::new(ClaudeProvider::new(key.to_string())))
            }
            _ => {
                warn!("LLM API key not configured, RCA disabled");
                None
            }
        };
        Self {
            provider,
            total_analyses: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_provider(provider: Box<dyn RcaProvider>) -> Self {
        Self {
            provider: Some(provider),
            total_analyses: AtomicU64::new(0),
        }
    }

    pub fn enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn total_analyses(&self) -> u64 {
        self.total_analyses.load(Ordering::Relaxed)
    }

    /// Run RCA for one incident. Returns `None` when unconfigured or when
    /// the provider call fails; failures never propagate.
    pub async fn analyze(&self, incident: &Incident) -> Option<RcaReport> {
        let provider = self.provider.as_ref()?;
        info!(incident_id = %incident.id, "starting incident analysis");

        let request = RcaRequest::from_incident(incident);
        match provider.analyze(&request).await {
            Ok(mut report) => {
                report.analyzed_at = Some(Utc::now());
                self.total_analyses.fetch_add(1, Ordering::Relaxed);
                info!(incident_id = %incident.id, "RCA completed");
                Some(report)
            }
            Err(err) => {
                error!(incident_id = %incident.id, error = %err, "RCA failed");
                None
            }
        }
    }
}
