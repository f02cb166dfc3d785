use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Timelike, Utc};
use regex::Regex;
use tracing::{info, warn};

use crate::model::{
    Anomaly, EndpointStat, Evidence, LogRecord, PatternCount, Severity, truncate_chars,
};

const HTTP_VERBS: [&str; 5] = ["GET", "POST", "PUT", "DELETE", "PATCH"];

/// Minimum requests before an endpoint or hour bucket is judged.
const MIN_BUCKET_SAMPLES: usize = 5;

/// Five errors inside this window form a cascade candidate.
const CASCADE_WINDOW_SECS: f64 = 30.0;
const CASCADE_EVENTS: usize = 5;

/// Per-batch co-occurrence analysis: endpoint↔error, hour↔error, cascades
/// and clustering. Stateless per invocation.
pub struct CorrelationEngine {
    digit_runs: Regex,
    hex_runs: Regex,
}

impl CorrelationEngine {
    pub fn new() -> Self {
        Self {
            digit_runs: Regex::new(r"\d+").expect("static pattern"),
            hex_runs: Regex::new(r"[a-f0-9]{8,}").expect("static pattern"),
        }
    }

    /// Run all correlation analyses over the batch.
    pub fn analyze(&self, logs: &[LogRecord]) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();
        if logs.is_empty() {
            return anomalies;
        }

        if let Some(anomaly) = self.correlate_endpoints(logs) {
            anomalies.push(anomaly);
        }
        if let Some(anomaly) = self.correlate_time_of_day(logs) {
            anomalies.push(anomaly);
        }
        if let Some(anomaly) = self.detect_cascade(logs) {
            anomalies.push(anomaly);
        }
        if let Some(anomaly) = self.detect_clustering(logs) {
            anomalies.push(anomaly);
        }

        if !anomalies.is_empty() {
            info!(count = anomalies.len(), "correlation analysis found correlations");
        }
        anomalies
    }

    /// Which endpoint is generating the errors.
    fn correlate_endpoints(&self, logs: &[LogRecord]) -> Option<Anomaly> {
        let mut totals: HashMap<String, usize> = HashMap::new();
        let mut errors: HashMap<String, usize> = HashMap::new();

        for log in logs {
            let endpoint = extract_endpoint(log);
            *totals.entry(endpoint.clone()).or_insert(0) += 1;
            if log.is_error() {
                *errors.entry(endpoint).or_insert(0) += 1;
            }
        }

        let mut problematic: Vec<EndpointStat> = errors
            .into_iter()
            .filter_map(|(endpoint, error_count)| {
                let total = *totals.get(&endpoint)?;
                if total < MIN_BUCKET_SAMPLES {
                    return None;
                }
                let error_rate = error_count as f64 / total as f64;
                (error_rate > 0.3).then_some(EndpointStat {
                    endpoint,
                    error_count,
                    total_requests: total,
                    error_rate,
                })
            })
            .collect();

        if problematic.is_empty() {
            return None;
        }
        problematic.sort_by(|a, b| b.error_rate.total_cmp(&a.error_rate));

        let top = problematic[0].clone();
        let score = top.error_rate.min(1.0);
        let severity = if score >= 0.8 { Severity::Critical } else { Severity::High };
        warn!(
            endpoint = %top.endpoint,
            error_rate = top.error_rate,
            "endpoint correlation detected"
        );

        Some(Anomaly::new(
            severity,
            score,
            format!(
                "Endpoint '{}' has {:.1}% error rate",
                top.endpoint,
                top.error_rate * 100.0
            ),
            Evidence::EndpointErrorCorrelation {
                endpoint: top.endpoint,
                error_count: top.error_count,
                total_requests: top.total_requests,
                error_rate: top.error_rate,
                all_problematic: problematic,
            },
        ))
    }

    /// Whether errors concentrate in one hour of the day.
    fn correlate_time_of_day(&self, logs: &[LogRecord]) -> Option<Anomaly> {
        let mut totals: BTreeMap<u32, usize> = BTreeMap::new();
        let mut errors: BTreeMap<u32, usize> = BTreeMap::new();

        for log in logs {
            let Some(timestamp) = log.parsed_timestamp() else {
                continue;
            };
            let hour = timestamp.hour();
            *totals.entry(hour).or_insert(0) += 1;
            if log.is_error() {
                *errors.entry(hour).or_insert(0) += 1;
            }
        }

        if errors.is_empty() {
            return None;
        }

        let mut problem_hour = None;
        let mut max_error_rate = 0.0;
        for (&hour, &error_count) in &errors {
            let total = totals.get(&hour).copied().unwrap_or(0);
            if total < MIN_BUCKET_SAMPLES {
                continue;
            }
            let error_rate = error_count as f64 / total as f64;
            if error_rate > max_error_rate {
                max_error_rate = error_rate;
                problem_hour = Some(hour);
            }
        }

        let problem_hour = problem_hour?;
        if max_error_rate <= 0.5 {
            return None;
        }

        let score = max_error_rate.min(1.0);
        info!(hour = problem_hour, error_rate = max_error_rate, "time-based correlation detected");

        Some(Anomaly::new(
            Severity::Medium,
            score,
            format!(
                "Errors concentrated around hour {}:00 UTC ({:.1}% error rate)",
                problem_hour,
                max_error_rate * 100.0
            ),
            Evidence::TimeBasedErrorPattern {
                problem_hour,
                error_rate: max_error_rate,
                errors_by_hour: errors,
                total_by_hour: totals,
            },
        ))
    }

    /// A burst of diverse errors in rapid succession.
    fn detect_cascade(&self, logs: &[LogRecord]) -> Option<Anomaly> {
        if logs.len() < 10 {
            return None;
        }

        let mut events: Vec<(DateTime<Utc>, String)> = logs
            .iter()
            .filter(|l| l.is_error())
            .filter_map(|l| Some((l.parsed_timestamp()?, truncate_chars(&l.message, 100))))
            .collect();
        if events.len() < CASCADE_EVENTS {
            return None;
        }
        events.sort_by_key(|(timestamp, _)| *timestamp);

        let mut cascades = Vec::new();
        for window in events.windows(CASCADE_EVENTS) {
            let duration = (window[CASCADE_EVENTS - 1].0 - window[0].0)
                .num_milliseconds() as f64
                / 1000.0;
            if duration > CASCADE_WINDOW_SECS {
                continue;
            }
            let unique: HashSet<&str> =
                window.iter().map(|(_, message)| message.as_str()).collect();
            if unique.len() >= 3 {
                cascades.push((duration, unique.len()));
            }
        }

        let (duration, unique_types) = *cascades.first()?;
        let score = (unique_types as f64 / CASCADE_EVENTS as f64).min(1.0);
        warn!(
            duration,
            error_count = CASCADE_EVENTS,
            unique_types,
            "error cascade detected"
        );

        Some(Anomaly::new(
            Severity::High,
            score,
            format!(
                "Error cascade detected: {} errors ({} types) in {:.1}s",
                CASCADE_EVENTS, unique_types, duration
            ),
            Evidence::ErrorCascade {
                duration_seconds: duration,
                error_count: CASCADE_EVENTS,
                unique_error_types: unique_types,
                cascade_count: cascades.len(),
            },
        ))
    }

    /// Many errors that are variations of the same message.
    fn detect_clustering(&self, logs: &[LogRecord]) -> Option<Anomaly> {
        let normalized: Vec<String> = logs
            .iter()
            .filter(|l| l.is_error())
            .map(|l| truncate_chars(&self.normalize_message(&l.message), 100))
            .collect();
        if normalized.len() < 10 {
            return None;
        }

        let mut counter: HashMap<&str, usize> = HashMap::new();
        for pattern in &normalized {
            *counter.entry(pattern.as_str()).or_insert(0) += 1;
        }
        let mut ranked: Vec<(&str, usize)> = counter.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let total_errors = normalized.len();
        let top_patterns: Vec<PatternCount> = ranked
            .iter()
            .take(3)
            .map(|(pattern, count)| PatternCount {
                pattern: truncate_chars(pattern, 50),
                count: *count,
            })
            .collect();

        for (pattern, count) in ranked.into_iter().take(3) {
            let percentage = count as f64 / total_errors as f64 * 100.0;
            if percentage > 60.0 {
                let score = (percentage / 100.0).min(1.0);
                let severity = if percentage > 80.0 { Severity::High } else { Severity::Medium };
                warn!(
                    pattern = %truncate_chars(pattern, 50),
                    count,
                    percentage,
                    "error clustering detected"
                );

                return Some(Anomaly::new(
                    severity,
                    score,
                    format!(
                        "Error pattern '{}...' accounts for {:.1}% of errors",
                        truncate_chars(pattern, 50),
                        percentage
                    ),
                    Evidence::ErrorClustering {
                        dominant_pattern: truncate_chars(pattern, 100),
                        occurrence_count: count,
                        percentage,
                        total_errors,
                        top_patterns: top_patterns.clone(),
                    },
                ));
            }
        }

        None
    }

    /// Collapse digit runs to `N` and long hex runs to `ID` so message
    /// variants fold onto one pattern.
    fn normalize_message(&self, message: &str) -> String {
        let step = self.digit_runs.replace_all(message, "N");
        self.hex_runs.replace_all(&step, "ID").into_owned()
    }
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP verb followed by a path token, else an explicit `endpoint` field.
fn extract_endpoint(record: &LogRecord) -> String {
    let tokens: Vec<&str> = record.message.split_whitespace().collect();
    for (i, token) in tokens.iter().enumerate() {
        if HTTP_VERBS.contains(token) {
            if let Some(path) = tokens.get(i + 1) {
                return (*path).to_string();
            }
        }
    }
    record.endpoint.clone().unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AnomalyKind;

    fn record(level: &str, message: &str, timestamp: &str) -> LogRecord {
        LogRecord {
            timestamp: Some(timestamp.to_string()),
            level: Some(level.to_string()),
            message: message.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_endpoint_correlation() {
        let mut logs = Vec::new();
        for i in 0..8 {
            logs.push(record(
                "ERROR",
                "GET /api/x returned 500",
                &format!("2024-03-01T10:00:{:02}Z", i),
            ));
        }
        for i in 0..2 {
            logs.push(record(
                "INFO",
                "GET /api/x returned 200",
                &format!("2024-03-01T10:01:{:02}Z", i),
            ));
        }
        for i in 0..10 {
            logs.push(record(
                "INFO",
                "background sweep finished",
                &format!("2024-03-01T10:02:{:02}Z", i),
            ));
        }

        let engine = CorrelationEngine::new();
        let anomaly = engine.correlate_endpoints(&logs).expect("expected correlation");
        assert_eq!(anomaly.kind, AnomalyKind::EndpointErrorCorrelation);
        assert_eq!(anomaly.severity, Severity::Critical);
        match &anomaly.evidence {
            Evidence::EndpointErrorCorrelation { endpoint, error_rate, .. } => {
                assert_eq!(endpoint, "/api/x");
                assert!((error_rate - 0.8).abs() < 1e-9);
            }
            other => panic!("unexpected evidence: {:?}", other),
        }
    }

    #[test]
    fn test_endpoint_needs_minimum_traffic() {
        let logs: Vec<LogRecord> = (0..4)
            .map(|i| record("ERROR", "GET /rare failed", &format!("2024-03-01T10:00:{:02}Z", i)))
            .collect();
        assert!(CorrelationEngine::new().correlate_endpoints(&logs).is_none());
    }

    #[test]
    fn test_endpoint_field_fallback() {
        let mut log = record("ERROR", "upstream refused connection", "2024-03-01T10:00:00Z");
        log.endpoint = Some("/api/orders".to_string());
        assert_eq!(extract_endpoint(&log), "/api/orders");

        let plain = record("INFO", "no verbs here", "2024-03-01T10:00:00Z");
        assert_eq!(extract_endpoint(&plain), "unknown");
    }

    #[test]
    fn test_time_of_day_correlation() {
        let mut logs = Vec::new();
        for i in 0..6 {
            logs.push(record(
                "ERROR",
                "nightly job failed",
                &format!("2024-03-01T03:00:{:02}Z", i),
            ));
        }
        for i in 0..4 {
            logs.push(record(
                "INFO",
                "nightly job progress",
                &format!("2024-03-01T03:01:{:02}Z", i),
            ));
        }

        let anomaly = CorrelationEngine::new()
            .correlate_time_of_day(&logs)
            .expect("expected time correlation");
        assert_eq!(anomaly.kind, AnomalyKind::TimeBasedErrorPattern);
        assert_eq!(anomaly.severity, Severity::Medium);
        match &anomaly.evidence {
            Evidence::TimeBasedErrorPattern { problem_hour, error_rate, .. } => {
                assert_eq!(*problem_hour, 3);
                assert!((error_rate - 0.6).abs() < 1e-9);
            }
            other => panic!("unexpected evidence: {:?}", other),
        }
    }

    #[test]
    fn test_error_cascade() {
        let mut logs = Vec::new();
        let messages = [
            "db pool exhausted",
            "query timed out",
            "circuit opened for payments",
            "retry budget exhausted",
            "db pool exhausted",
        ];
        for (i, message) in messages.iter().enumerate() {
            logs.push(record(
                "ERROR",
                message,
                &format!("2024-03-01T10:00:{:02}Z", i * 2),
            ));
        }
        for i in 0..6 {
            logs.push(record(
                "INFO",
                "heartbeat",
                &format!("2024-03-01T10:05:{:02}Z", i),
            ));
        }

        let anomaly = CorrelationEngine::new()
            .detect_cascade(&logs)
            .expect("expected cascade");
        assert_eq!(anomaly.kind, AnomalyKind::ErrorCascade);
        assert_eq!(anomaly.severity, Severity::High);
        match &anomaly.evidence {
            Evidence::ErrorCascade { unique_error_types, duration_seconds, .. } => {
                assert_eq!(*unique_error_types, 4);
                assert!(*duration_seconds <= 10.0);
            }
            other => panic!("unexpected evidence: {:?}", other),
        }
    }

    #[test]
    fn test_slow_errors_are_not_a_cascade() {
        let mut logs = Vec::new();
        for i in 0..5 {
            logs.push(record(
                "ERROR",
                &format!("failure mode {}", i),
                &format!("2024-03-01T10:{:02}:00Z", i * 2),
            ));
        }
        for i in 0..6 {
            logs.push(record("INFO", "ok", &format!("2024-03-01T11:00:{:02}Z", i)));
        }
        assert!(CorrelationEngine::new().detect_cascade(&logs).is_none());
    }

    #[test]
    fn test_error_clustering_normalizes_ids() {
        let mut logs = Vec::new();
        for i in 0..9 {
            logs.push(record(
                "ERROR",
                &format!("user {} lookup failed for request abcdef{:08x}", i, i),
                &format!("2024-03-01T10:00:{:02}Z", i),
            ));
        }
        for i in 0..3 {
            logs.push(record(
                "ERROR",
                &format!("cache miss on shard {}", i),
                &format!("2024-03-01T10:01:{:02}Z", i),
            ));
        }

        let anomaly = CorrelationEngine::new()
            .detect_clustering(&logs)
            .expect("expected clustering");
        assert_eq!(anomaly.kind, AnomalyKind::ErrorClustering);
        match &anomaly.evidence {
            Evidence::ErrorClustering { occurrence_count, percentage, .. } => {
                assert_eq!(*occurrence_count, 9);
                assert!((percentage - 75.0).abs() < 1e-9);
            }
            other => panic!("unexpected evidence: {:?}", other),
        }
        assert_eq!(anomaly.severity, Severity::Medium);
    }

    #[test]
    fn test_clustering_needs_ten_errors() {
        let logs: Vec<LogRecord> = (0..9)
            .map(|i| record("ERROR", "same failure", &format!("2024-03-01T10:00:{:02}Z", i)))
            .collect();
        assert!(CorrelationEngine::new().detect_clustering(&logs).is_none());
    }
}
