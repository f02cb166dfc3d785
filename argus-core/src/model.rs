use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ai_provider::RcaReport;
use crate::error::AgentError;

/// Anomaly and incident severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Map a detector score in [0, 1] onto a severity label.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Severity::Critical
        } else if score >= 0.6 {
            Severity::High
        } else if score >= 0.4 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(AgentError::Parse(format!("unknown severity '{}'", other))),
        }
    }
}

/// The closed set of detector findings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    ErrorSpike,
    DominantErrorPattern,
    ServiceDegradation,
    LogVolumeSpike,
    LogVolumeDrop,
    IncreasingTrend,
    Oscillation,
    SuddenLevelChange,
    EndpointErrorCorrelation,
    TimeBasedErrorPattern,
    ErrorCascade,
    ErrorClustering,
    AdaptiveBaselineDeviation,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::ErrorSpike => "error_spike",
            AnomalyKind::DominantErrorPattern => "dominant_error_pattern",
            AnomalyKind::ServiceDegradation => "service_degradation",
            AnomalyKind::LogVolumeSpike => "log_volume_spike",
            AnomalyKind::LogVolumeDrop => "log_volume_drop",
            AnomalyKind::IncreasingTrend => "increasing_trend",
            AnomalyKind::Oscillation => "oscillation",
            AnomalyKind::SuddenLevelChange => "sudden_level_change",
            AnomalyKind::EndpointErrorCorrelation => "endpoint_error_correlation",
            AnomalyKind::TimeBasedErrorPattern => "time_based_error_pattern",
            AnomalyKind::ErrorCascade => "error_cascade",
            AnomalyKind::ErrorClustering => "error_clustering",
            AnomalyKind::AdaptiveBaselineDeviation => "adaptive_baseline_deviation",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One metric compared against its learned distribution.
#[derive(Debug, Clone, Serialize)]
pub struct MetricDeviation {
    pub current: f64,
    pub expected: f64,
    pub std: f64,
    pub z_score: f64,
    pub is_anomalous: bool,
}

/// Evidence carried by an adaptive-baseline finding.
#[derive(Debug, Clone, Serialize)]
pub struct BaselineDeviation {
    pub error_rate: MetricDeviation,
    pub log_volume: MetricDeviation,
    pub baseline_samples: u64,
    pub sensitivity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointStat {
    pub endpoint: String,
    pub error_count: usize,
    pub total_requests: usize,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternCount {
    pub pattern: String,
    pub count: usize,
}

/// Per-kind evidence payload. Serialized under the anomaly's `metrics` key
/// so consumers see the raw figures each detector based its finding on.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Evidence {
    ErrorSpike {
        current_errors: u64,
        baseline_avg: f64,
        threshold: f64,
        time_window: String,
    },
    DominantErrorPattern {
        error_message: String,
        count: usize,
        percentage: f64,
        total_errors: usize,
    },
    ServiceDegradation {
        service: String,
        error_count: usize,
        total_logs: usize,
        error_rate: f64,
    },
    LogVolumeSpike {
        current_volume: u64,
        baseline_avg: f64,
        threshold: f64,
    },
    LogVolumeDrop {
        current_volume: u64,
        baseline_avg: f64,
        threshold: f64,
    },
    IncreasingTrend {
        slope: f64,
        r_squared: f64,
        data_points: usize,
        start_value: f64,
        end_value: f64,
    },
    Oscillation {
        coefficient_of_variation: f64,
        mean: f64,
        stdev: f64,
        data_points: usize,
    },
    SuddenLevelChange {
        before_avg: f64,
        after_avg: f64,
        ratio: f64,
        data_points: usize,
    },
    EndpointErrorCorrelation {
        endpoint: String,
        error_count: usize,
        total_requests: usize,
        error_rate: f64,
        all_problematic: Vec<EndpointStat>,
    },
    TimeBasedErrorPattern {
        problem_hour: u32,
        error_rate: f64,
        errors_by_hour: BTreeMap<u32, usize>,
        total_by_hour: BTreeMap<u32, usize>,
    },
    ErrorCascade {
        duration_seconds: f64,
        error_count: usize,
        unique_error_types: usize,
        cascade_count: usize,
    },
    ErrorClustering {
        dominant_pattern: String,
        occurrence_count: usize,
        percentage: f64,
        total_errors: usize,
        top_patterns: Vec<PatternCount>,
    },
    AdaptiveBaselineDeviation(BaselineDeviation),
}

impl Evidence {
    pub fn kind(&self) -> AnomalyKind {
        match self {
            Evidence::ErrorSpike { .. } => AnomalyKind::ErrorSpike,
            Evidence::DominantErrorPattern { .. } => AnomalyKind::DominantErrorPattern,
            Evidence::ServiceDegradation { .. } => AnomalyKind::ServiceDegradation,
            Evidence::LogVolumeSpike { .. } => AnomalyKind::LogVolumeSpike,
            Evidence::LogVolumeDrop { .. } => AnomalyKind::LogVolumeDrop,
            Evidence::IncreasingTrend { .. } => AnomalyKind::IncreasingTrend,
            Evidence::Oscillation { .. } => AnomalyKind::Oscillation,
            Evidence::SuddenLevelChange { .. } => AnomalyKind::SuddenLevelChange,
            Evidence::EndpointErrorCorrelation { .. } => AnomalyKind::EndpointErrorCorrelation,
            Evidence::TimeBasedErrorPattern { .. } => AnomalyKind::TimeBasedErrorPattern,
            Evidence::ErrorCascade { .. } => AnomalyKind::ErrorCascade,
            Evidence::ErrorClustering { .. } => AnomalyKind::ErrorClustering,
            Evidence::AdaptiveBaselineDeviation(_) => AnomalyKind::AdaptiveBaselineDeviation,
        }
    }
}

/// A single detector finding for one cycle. Immutable after emission.
#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub score: f64,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    #[serde(rename = "metrics")]
    pub evidence: Evidence,
}

impl Anomaly {
    pub fn new(
        severity: Severity,
        score: f64,
        description: impl Into<String>,
        evidence: Evidence,
    ) -> Self {
        Self {
            kind: evidence.kind(),
            severity,
            score,
            description: description.into(),
            detected_at: Utc::now(),
            evidence,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PodRef {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PodLabels {
    pub app: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PodDescriptor {
    pub pod: Option<PodRef>,
    pub namespace: Option<String>,
    pub labels: Option<PodLabels>,
}

/// One stored log document, read leniently: every field the pipeline
/// consumes is optional and defaults when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogRecord {
    #[serde(rename = "@timestamp", alias = "timestamp")]
    pub timestamp: Option<String>,
    pub level: Option<String>,
    pub message: String,
    pub service: Option<String>,
    pub endpoint: Option<String>,
    pub kubernetes: Option<PodDescriptor>,
}

impl LogRecord {
    /// A record counts as an error when its level carries `ERROR` or the
    /// message itself mentions an error.
    pub fn is_error(&self) -> bool {
        self.level.as_deref().map_or(false, |l| l.contains("ERROR"))
            || self.message.to_lowercase().contains("error")
    }

    /// Service attribution: explicit `service` field, falling back to the
    /// pod's `app` label.
    pub fn service_name(&self) -> Option<&str> {
        self.service.as_deref().or_else(|| {
            self.kubernetes
                .as_ref()?
                .labels
                .as_ref()?
                .app
                .as_deref()
        })
    }

    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.timestamp.as_deref()?)
    }

    pub fn to_sample(&self) -> SampleLog {
        SampleLog {
            timestamp: self.timestamp.clone().unwrap_or_default(),
            level: self.level.clone().unwrap_or_default(),
            message: truncate_chars(&self.message, 200),
            service: self.service.clone(),
            pod: self
                .kubernetes
                .as_ref()
                .and_then(|k| k.pod.as_ref())
                .and_then(|p| p.name.clone()),
            namespace: self.kubernetes.as_ref().and_then(|k| k.namespace.clone()),
        }
    }
}

/// Parse the timestamp formats the backing store is known to emit.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Character-safe prefix truncation.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Truncated log evidence attached to an incident (at most 5 entries).
#[derive(Debug, Clone, Serialize)]
pub struct SampleLog {
    pub timestamp: String,
    pub level: String,
    pub message: String,
    pub service: Option<String>,
    pub pod: Option<String>,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Investigating,
    Resolved,
}

#[derive(Debug, Clone, Serialize)]
pub struct MlContext {
    pub baseline_confidence: f64,
    pub baseline_samples: u64,
    pub hours_learned: usize,
    pub detection_methods: Vec<AnomalyKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_logs: usize,
    pub error_logs: usize,
    pub error_rate: f64,
    pub anomaly_breakdown: BTreeMap<AnomalyKind, usize>,
    pub ml_context: MlContext,
}

/// A materialized incident with its fused anomaly evidence.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub started_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub anomalies: Vec<Anomaly>,
    pub affected_services: Vec<String>,
    pub log_count: usize,
    pub error_count: usize,
    pub sample_logs: Vec<SampleLog>,
    pub metrics_snapshot: MetricsSnapshot,
    pub root_cause: Option<String>,
    pub recommendations: Vec<String>,
    pub rca_analysis: Option<RcaReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Initializing,
    Healthy,
    Degraded,
    Error,
    Stopped,
}

/// Counters exposed by the monitor; monotonically non-decreasing over the
/// process lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringState {
    pub last_check: DateTime<Utc>,
    pub logs_processed: u64,
    pub anomalies_detected: u64,
    pub incidents_created: u64,
    pub status: MonitorStatus,
}

impl MonitoringState {
    pub fn new() -> Self {
        Self {
            last_check: Utc::now(),
            logs_processed: 0,
            anomalies_detected: 0,
            incidents_created: 0,
            status: MonitorStatus::Initializing,
        }
    }
}

impl Default for MonitoringState {
    fn default() -> Self {
        Self::new()
    }
}
