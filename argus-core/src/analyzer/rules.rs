use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::{mean, sample_stddev};
use crate::model::{Anomaly, Evidence, LogRecord, Severity, truncate_chars};

/// Spike detection needs this many cycles of history, current included.
const MIN_HISTORY_POINTS: usize = 5;

/// A spike must also clear an absolute floor to matter.
const MIN_SPIKE_ERRORS: u64 = 10;

#[derive(Debug, Clone)]
struct CyclePoint {
    at: DateTime<Utc>,
    value: u64,
}

/// Stateless-per-cycle heuristics over a log batch, backed by an hour of
/// per-cycle totals.
pub struct RuleDetector {
    error_history: VecDeque<CyclePoint>,
    volume_history: VecDeque<CyclePoint>,
}

impl RuleDetector {
    pub fn new() -> Self {
        Self {
            error_history: VecDeque::new(),
            volume_history: VecDeque::new(),
        }
    }

    /// Run every heuristic against the current batch.
    pub fn analyze(&mut self, logs: &[LogRecord], now: DateTime<Utc>) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();
        if logs.is_empty() {
            debug!("no logs to analyze");
            return anomalies;
        }

        info!(log_count = logs.len(), "analyzing logs for anomalies");

        let error_count = logs.iter().filter(|l| l.is_error()).count() as u64;

        if let Some(anomaly) = self.detect_error_spike(error_count, now) {
            anomalies.push(anomaly);
        }
        anomalies.extend(detect_dominant_pattern(logs));
        if let Some(anomaly) = detect_service_degradation(logs) {
            anomalies.push(anomaly);
        }
        if let Some(anomaly) = self.detect_volume_shift(logs.len() as u64, now) {
            anomalies.push(anomaly);
        }

        if anomalies.is_empty() {
            debug!("no anomalies detected");
        } else {
            warn!(count = anomalies.len(), "anomalies detected");
        }
        anomalies
    }

    /// Current error count versus the rolling mean of prior cycles.
    fn detect_error_spike(&mut self, current: u64, now: DateTime<Utc>) -> Option<Anomaly> {
        push_pruned(&mut self.error_history, current, now);

        if self.error_history.len() < MIN_HISTORY_POINTS {
            debug!("insufficient history for error spike detection");
            return None;
        }

        let previous: Vec<f64> = self
            .error_history
            .iter()
            .take(self.error_history.len() - 1)
            .map(|p| p.value as f64)
            .collect();
        let avg = mean(&previous);
        let std = sample_stddev(&previous);
        let threshold = avg + 2.0 * std;

        if current as f64 > threshold && current > MIN_SPIKE_ERRORS {
            let score = ((current as f64 - threshold) / (threshold + 1.0)).clamp(0.0, 1.0);
            warn!(
                current,
                baseline = avg,
                threshold,
                score,
                "error spike detected"
            );

            return Some(Anomaly::new(
                Severity::from_score(score),
                score,
                format!("Error rate spiked to {} (baseline: {:.1})", current, avg),
                Evidence::ErrorSpike {
                    current_errors: current,
                    baseline_avg: avg,
                    threshold,
                    time_window: "5m".to_string(),
                },
            ));
        }

        None
    }

    /// Rolling μ ± 3σ on cycle volume; a drop only counts on systems that
    /// actually carry traffic.
    fn detect_volume_shift(&mut self, current: u64, now: DateTime<Utc>) -> Option<Anomaly> {
        push_pruned(&mut self.volume_history, current, now);

        if self.volume_history.len() < MIN_HISTORY_POINTS {
            return None;
        }

        let previous: Vec<f64> = self
            .volume_history
            .iter()
            .take(self.volume_history.len() - 1)
            .map(|p| p.value as f64)
            .collect();
        let avg = mean(&previous);
        let std = sample_stddev(&previous);
        let upper = avg + 3.0 * std;
        let lower = (avg - 3.0 * std).max(0.0);

        if current as f64 > upper {
            let score = ((current as f64 - upper) / (upper + 1.0)).clamp(0.0, 1.0);
            let severity = if score < 0.7 {
                Severity::Medium
            } else {
                Severity::High
            };
            info!(current, baseline = avg, threshold = upper, "log volume spike detected");

            return Some(Anomaly::new(
                severity,
                score,
                format!("Log volume spiked to {} (baseline: {:.1})", current, avg),
                Evidence::LogVolumeSpike {
                    current_volume: current,
                    baseline_avg: avg,
                    threshold: upper,
                },
            ));
        }

        if (current as f64) < lower && avg > 100.0 {
            let score = ((avg - current as f64) / (avg + 1.0)).clamp(0.0, 1.0);
            let severity = if score > 0.5 {
                Severity::High
            } else {
                Severity::Medium
            };
            warn!(current, baseline = avg, threshold = lower, "log volume drop detected");

            return Some(Anomaly::new(
                severity,
                score,
                format!(
                    "Log volume dropped to {} (baseline: {:.1}) - possible service issue",
                    current, avg
                ),
                Evidence::LogVolumeDrop {
                    current_volume: current,
                    baseline_avg: avg,
                    threshold: lower,
                },
            ));
        }

        None
    }
}

impl Default for RuleDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn push_pruned(history: &mut VecDeque<CyclePoint>, value: u64, now: DateTime<Utc>) {
    history.push_back(CyclePoint { at: now, value });
    let cutoff = now - Duration::hours(1);
    history.retain(|p| p.at > cutoff);
}

/// One identical error message accounting for most of the batch.
fn detect_dominant_pattern(logs: &[LogRecord]) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    let error_messages: Vec<&str> = logs
        .iter()
        .filter(|l| l.is_error())
        .map(|l| l.message.as_str())
        .collect();
    if error_messages.is_empty() {
        return anomalies;
    }

    let mut counter: HashMap<&str, usize> = HashMap::new();
    for message in &error_messages {
        *counter.entry(*message).or_insert(0) += 1;
    }
    let mut ranked: Vec<(&str, usize)> = counter.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let total_errors = error_messages.len();
    for (message, count) in ranked.into_iter().take(5) {
        let percentage = count as f64 / total_errors as f64 * 100.0;
        if percentage > 50.0 && count > 5 {
            let score = (percentage / 100.0).min(1.0);
            warn!(
                error_type = %truncate_chars(message, 50),
                count,
                percentage,
                "dominant error pattern detected"
            );

            anomalies.push(Anomaly::new(
                Severity::from_score(score),
                score,
                format!(
                    "Error '{}' accounts for {:.1}% of errors",
                    truncate_chars(message, 50),
                    percentage
                ),
                Evidence::DominantErrorPattern {
                    error_message: truncate_chars(message, 100),
                    count,
                    percentage,
                    total_errors,
                },
            ));
        }
    }

    anomalies
}

/// A single service drowning in its own errors.
fn detect_service_degradation(logs: &[LogRecord]) -> Option<Anomaly> {
    let mut totals: HashMap<&str, usize> = HashMap::new();
    let mut errors: HashMap<&str, usize> = HashMap::new();

    for log in logs {
        let service = log.service_name().unwrap_or("unknown");
        *totals.entry(service).or_insert(0) += 1;
        if log.is_error() {
            *errors.entry(service).or_insert(0) += 1;
        }
    }

    // Report the worst offender over the thresholds.
    let worst = errors
        .iter()
        .filter_map(|(service, &error_count)| {
            let total = *totals.get(service)?;
            let error_rate = error_count as f64 / total as f64;
            (error_rate > 0.3 && error_count > 10).then_some((*service, error_count, total, error_rate))
        })
        .max_by(|a, b| a.3.total_cmp(&b.3))?;

    let (service, error_count, total, error_rate) = worst;
    let score = error_rate.min(1.0);
    warn!(
        service,
        error_count,
        total_logs = total,
        error_rate,
        "service degradation detected"
    );

    Some(Anomaly::new(
        Severity::from_score(score),
        score,
        format!("Service '{}' has {:.1}% error rate", service, error_rate * 100.0),
        Evidence::ServiceDegradation {
            service: service.to_string(),
            error_count,
            total_logs: total,
            error_rate,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AnomalyKind;

    fn record(level: &str, message: &str) -> LogRecord {
        LogRecord {
            level: Some(level.to_string()),
            message: message.to_string(),
            ..Default::default()
        }
    }

    fn service_record(level: &str, message: &str, service: &str) -> LogRecord {
        LogRecord {
            service: Some(service.to_string()),
            ..record(level, message)
        }
    }

    fn batch(errors: usize, infos: usize) -> Vec<LogRecord> {
        let mut logs = Vec::new();
        for i in 0..errors {
            logs.push(record("ERROR", &format!("request {} failed", i)));
        }
        for i in 0..infos {
            logs.push(record("INFO", &format!("request {} ok", i)));
        }
        logs
    }

    #[test]
    fn test_error_spike_after_quiet_cycles() {
        let mut detector = RuleDetector::new();
        let start = Utc::now();

        for i in 0..5 {
            let anomalies = detector.analyze(&batch(1, 99), start + Duration::seconds(30 * i));
            assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::ErrorSpike));
        }

        let anomalies = detector.analyze(&batch(50, 50), start + Duration::seconds(180));
        let spike = anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::ErrorSpike)
            .expect("expected an error spike");
        assert!(spike.severity >= Severity::High);
        assert!((spike.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_spike_needs_history() {
        let mut detector = RuleDetector::new();
        let anomalies = detector.analyze(&batch(50, 0), Utc::now());
        assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::ErrorSpike));
    }

    #[test]
    fn test_error_spike_history_pruned() {
        let mut detector = RuleDetector::new();
        let start = Utc::now();

        for i in 0..5 {
            detector.analyze(&batch(1, 99), start + Duration::seconds(30 * i));
        }
        // Two hours later all prior points have aged out; no baseline left.
        let anomalies = detector.analyze(&batch(50, 50), start + Duration::hours(2));
        assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::ErrorSpike));
    }

    #[test]
    fn test_dominant_pattern() {
        let mut logs = Vec::new();
        for _ in 0..15 {
            logs.push(record("ERROR", "DB timeout"));
        }
        for i in 0..5 {
            logs.push(record("ERROR", &format!("other failure {}", i)));
        }

        let anomalies = detect_dominant_pattern(&logs);
        assert_eq!(anomalies.len(), 1);
        let anomaly = &anomalies[0];
        assert_eq!(anomaly.kind, AnomalyKind::DominantErrorPattern);
        assert!((anomaly.score - 0.75).abs() < 1e-9);
        assert_eq!(anomaly.severity, Severity::High);
        match &anomaly.evidence {
            Evidence::DominantErrorPattern { percentage, count, .. } => {
                assert!((percentage - 75.0).abs() < 1e-9);
                assert_eq!(*count, 15);
            }
            other => panic!("unexpected evidence: {:?}", other),
        }
    }

    #[test]
    fn test_dominant_pattern_respects_minimum_count() {
        let mut logs = Vec::new();
        for _ in 0..4 {
            logs.push(record("ERROR", "rare failure"));
        }
        logs.push(record("ERROR", "something else"));
        assert!(detect_dominant_pattern(&logs).is_empty());
    }

    #[test]
    fn test_service_degradation_picks_worst_service() {
        let mut logs = Vec::new();
        for _ in 0..12 {
            logs.push(service_record("ERROR", "payment declined", "billing"));
        }
        for _ in 0..8 {
            logs.push(service_record("INFO", "payment ok", "billing"));
        }
        for _ in 0..30 {
            logs.push(service_record("INFO", "page served", "frontend"));
        }

        let anomaly = detect_service_degradation(&logs).expect("expected degradation");
        assert_eq!(anomaly.kind, AnomalyKind::ServiceDegradation);
        match &anomaly.evidence {
            Evidence::ServiceDegradation { service, error_rate, .. } => {
                assert_eq!(service, "billing");
                assert!((error_rate - 0.6).abs() < 1e-9);
            }
            other => panic!("unexpected evidence: {:?}", other),
        }
    }

    #[test]
    fn test_service_degradation_uses_pod_label_fallback() {
        use crate::model::{PodDescriptor, PodLabels};

        let mut logs = Vec::new();
        for _ in 0..12 {
            logs.push(LogRecord {
                kubernetes: Some(PodDescriptor {
                    labels: Some(PodLabels {
                        app: Some("checkout".to_string()),
                    }),
                    ..Default::default()
                }),
                ..record("ERROR", "cart lookup failed")
            });
        }
        for _ in 0..10 {
            logs.push(service_record("INFO", "ok", "frontend"));
        }

        let anomaly = detect_service_degradation(&logs).expect("expected degradation");
        match &anomaly.evidence {
            Evidence::ServiceDegradation { service, .. } => assert_eq!(service, "checkout"),
            other => panic!("unexpected evidence: {:?}", other),
        }
    }

    #[test]
    fn test_volume_drop_needs_real_traffic() {
        let mut detector = RuleDetector::new();
        let start = Utc::now();

        // Low-traffic system: a drop to near zero stays quiet.
        for i in 0..6 {
            detector.analyze(&batch(0, 20), start + Duration::seconds(30 * i));
        }
        let anomalies = detector.analyze(&batch(0, 1), start + Duration::seconds(200));
        assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::LogVolumeDrop));
    }

    #[test]
    fn test_volume_drop_on_busy_system() {
        let mut detector = RuleDetector::new();
        let start = Utc::now();

        for (i, volume) in [500usize, 510, 490, 505, 495, 500].iter().enumerate() {
            detector.analyze(&batch(0, *volume), start + Duration::seconds(30 * i as i64));
        }
        let anomalies = detector.analyze(&batch(0, 5), start + Duration::seconds(250));
        let drop = anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::LogVolumeDrop)
            .expect("expected a volume drop");
        assert_eq!(drop.severity, Severity::High);
    }

    #[test]
    fn test_volume_spike() {
        let mut detector = RuleDetector::new();
        let start = Utc::now();

        for (i, volume) in [100usize, 102, 98, 101, 99, 100].iter().enumerate() {
            detector.analyze(&batch(0, *volume), start + Duration::seconds(30 * i as i64));
        }
        let anomalies = detector.analyze(&batch(0, 480), start + Duration::seconds(250));
        let spike = anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::LogVolumeSpike)
            .expect("expected a volume spike");
        assert!(spike.score > 0.0);
    }
}
