use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use super::{mean, sample_stddev};
use crate::model::{Anomaly, Evidence, Severity};

/// 12 points ≈ 6 minutes of history at a 30-second cadence.
const DEFAULT_WINDOW: usize = 12;

const TREND_MIN_POINTS: usize = 5;
const OSCILLATION_MIN_POINTS: usize = 6;
const LEVEL_CHANGE_MIN_POINTS: usize = 6;

#[derive(Debug, Clone, Serialize)]
pub struct TimePoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeSeriesSnapshot {
    pub error_rate_history: Vec<TimePoint>,
    pub log_volume_history: Vec<TimePoint>,
    pub window_size: usize,
    pub data_points: usize,
}

/// Streaming window over recent per-cycle metrics; detects upward trends,
/// oscillation and step changes on the error stream.
pub struct TimeSeriesAnalyzer {
    window_size: usize,
    error_history: VecDeque<TimePoint>,
    log_volume_history: VecDeque<TimePoint>,
}

impl TimeSeriesAnalyzer {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window_size: usize) -> Self {
        Self {
            window_size,
            error_history: VecDeque::with_capacity(window_size),
            log_volume_history: VecDeque::with_capacity(window_size),
        }
    }

    pub fn add_point(&mut self, error_count: u64, log_volume: u64, timestamp: DateTime<Utc>) {
        push_bounded(
            &mut self.error_history,
            TimePoint { timestamp, value: error_count as f64 },
            self.window_size,
        );
        push_bounded(
            &mut self.log_volume_history,
            TimePoint { timestamp, value: log_volume as f64 },
            self.window_size,
        );
    }

    /// Run every pattern detection over the error stream. At most one
    /// anomaly per kind per call.
    pub fn analyze(&self) -> Vec<Anomaly> {
        let values: Vec<f64> = self.error_history.iter().map(|p| p.value).collect();

        let mut anomalies = Vec::new();
        if let Some(anomaly) = detect_increasing_trend(&values) {
            anomalies.push(anomaly);
        }
        if let Some(anomaly) = detect_oscillation(&values) {
            anomalies.push(anomaly);
        }
        if let Some(anomaly) = detect_level_change(&values) {
            anomalies.push(anomaly);
        }
        anomalies
    }

    pub fn snapshot(&self) -> TimeSeriesSnapshot {
        TimeSeriesSnapshot {
            error_rate_history: self.error_history.iter().cloned().collect(),
            log_volume_history: self.log_volume_history.iter().cloned().collect(),
            window_size: self.window_size,
            data_points: self.error_history.len(),
        }
    }
}

impl Default for TimeSeriesAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded(history: &mut VecDeque<TimePoint>, point: TimePoint, cap: usize) {
    if history.len() == cap {
        history.pop_front();
    }
    history.push_back(point);
}

/// Ordinary least squares over (index, value); a strong fit with positive
/// slope means the metric is climbing.
fn detect_increasing_trend(values: &[f64]) -> Option<Anomaly> {
    if values.len() < TREND_MIN_POINTS {
        return None;
    }

    let n = values.len();
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, value) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        numerator += dx * (value - y_mean);
        denominator += dx * dx;
    }
    if denominator == 0.0 {
        return None;
    }
    let slope = numerator / denominator;
    if slope <= 0.1 {
        return None;
    }

    let intercept = y_mean - slope * x_mean;
    let mut ss_tot = 0.0;
    let mut ss_res = 0.0;
    for (i, value) in values.iter().enumerate() {
        let predicted = slope * i as f64 + intercept;
        ss_tot += (value - y_mean) * (value - y_mean);
        ss_res += (value - predicted) * (value - predicted);
    }
    let r_squared = if ss_tot != 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };
    if r_squared <= 0.7 {
        return None;
    }

    let score = (slope * r_squared).clamp(0.0, 1.0);
    let severity = if score > 0.6 { Severity::High } else { Severity::Medium };
    warn!(slope, r_squared, score, "increasing trend detected");

    Some(Anomaly::new(
        severity,
        score,
        format!(
            "Detected upward trend with slope {:.2} (R²={:.2})",
            slope, r_squared
        ),
        Evidence::IncreasingTrend {
            slope,
            r_squared,
            data_points: n,
            start_value: values[0],
            end_value: values[n - 1],
        },
    ))
}

/// High coefficient of variation marks an unstable stream.
fn detect_oscillation(values: &[f64]) -> Option<Anomaly> {
    if values.len() < OSCILLATION_MIN_POINTS {
        return None;
    }

    let m = mean(values);
    let stdev = sample_stddev(values);
    if m <= 0.0 {
        return None;
    }

    let cv = stdev / m;
    if cv <= 0.5 || stdev <= 5.0 {
        return None;
    }

    let score = cv.min(1.0);
    warn!(coefficient_of_variation = cv, mean = m, stdev, "oscillation detected");

    Some(Anomaly::new(
        Severity::Medium,
        score,
        format!("Unstable behavior detected (CV={:.2})", cv),
        Evidence::Oscillation {
            coefficient_of_variation: cv,
            mean: m,
            stdev,
            data_points: values.len(),
        },
    ))
}

/// Compare the window's halves; a doubled mean is a step change.
fn detect_level_change(values: &[f64]) -> Option<Anomaly> {
    if values.len() < LEVEL_CHANGE_MIN_POINTS {
        return None;
    }

    let mid = values.len() / 2;
    let before = mean(&values[..mid]);
    let after = mean(&values[mid..]);
    if before <= 0.0 {
        return None;
    }

    let ratio = after / before;
    if ratio <= 2.0 {
        return None;
    }

    let score = ((ratio - 2.0) / 2.0).clamp(0.0, 1.0);
    let severity = if score > 0.5 { Severity::High } else { Severity::Medium };
    warn!(before, after, ratio, "sudden level change detected");

    Some(Anomaly::new(
        severity,
        score,
        format!("Sudden increase from {:.1} to {:.1}", before, after),
        Evidence::SuddenLevelChange {
            before_avg: before,
            after_avg: after,
            ratio,
            data_points: values.len(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AnomalyKind;

    fn feed(values: &[u64]) -> TimeSeriesAnalyzer {
        let mut analyzer = TimeSeriesAnalyzer::new();
        let start = Utc::now();
        for (i, v) in values.iter().enumerate() {
            analyzer.add_point(*v, 100, start + chrono::Duration::seconds(30 * i as i64));
        }
        analyzer
    }

    #[test]
    fn test_linear_growth_is_a_trend() {
        let anomalies = feed(&[2, 4, 6, 8, 10, 12]).analyze();
        let trend = anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::IncreasingTrend)
            .expect("expected a trend");

        assert_eq!(trend.severity, Severity::High);
        match &trend.evidence {
            Evidence::IncreasingTrend { slope, r_squared, .. } => {
                assert!((slope - 2.0).abs() < 1e-9);
                assert!((r_squared - 1.0).abs() < 1e-9);
            }
            other => panic!("unexpected evidence: {:?}", other),
        }
    }

    #[test]
    fn test_trend_needs_five_points() {
        assert!(feed(&[2, 4, 6, 8]).analyze().is_empty());
    }

    #[test]
    fn test_flat_series_is_quiet() {
        assert!(feed(&[10, 10, 10, 10, 10, 10]).analyze().is_empty());
    }

    #[test]
    fn test_oscillation() {
        let anomalies = feed(&[2, 40, 3, 45, 1, 50]).analyze();
        let oscillation = anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::Oscillation)
            .expect("expected oscillation");
        assert_eq!(oscillation.severity, Severity::Medium);
        match &oscillation.evidence {
            Evidence::Oscillation { coefficient_of_variation, .. } => {
                assert!(*coefficient_of_variation > 0.5);
            }
            other => panic!("unexpected evidence: {:?}", other),
        }
    }

    #[test]
    fn test_small_amplitude_is_not_oscillation() {
        // CV is high but the absolute deviation stays under the floor.
        let anomalies = feed(&[1, 3, 1, 3, 1, 3]).analyze();
        assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::Oscillation));
    }

    #[test]
    fn test_level_change() {
        let anomalies = feed(&[10, 10, 10, 50, 50, 50]).analyze();
        let change = anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::SuddenLevelChange)
            .expect("expected a level change");
        assert_eq!(change.severity, Severity::High);
        match &change.evidence {
            Evidence::SuddenLevelChange { ratio, .. } => assert!((ratio - 5.0).abs() < 1e-9),
            other => panic!("unexpected evidence: {:?}", other),
        }
    }

    #[test]
    fn test_window_evicts_oldest() {
        let values: Vec<u64> = (0..20).collect();
        let analyzer = feed(&values);
        let snapshot = analyzer.snapshot();
        assert_eq!(snapshot.data_points, DEFAULT_WINDOW);
        assert_eq!(snapshot.error_rate_history[0].value, 8.0);
        assert_eq!(snapshot.log_volume_history.len(), DEFAULT_WINDOW);
    }
}
