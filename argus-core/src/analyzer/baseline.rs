use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{AgentError, Result};
use crate::model::{BaselineDeviation, MetricDeviation};

/// Minimum standard deviations, keeping z-scores finite on flat streams.
const ERROR_RATE_STD_FLOOR: f64 = 0.1;
const LOG_VOLUME_STD_FLOOR: f64 = 1.0;

/// 24 hours of samples at a 30-second cadence.
const HISTORY_CAPACITY: usize = 2880;

/// Persist after every 10 accepted overall samples.
const PERSIST_EVERY: u64 = 10;

/// A bucket needs this many samples before it is preferred over a less
/// specific one.
const SLOT_PREFERENCE_MIN_SAMPLES: u64 = 10;

/// Below this many samples the baseline refuses to score at all.
const DETECTION_MIN_SAMPLES: u64 = 5;

/// Online `(mean, stddev, samples)` maintained with Welford's recurrence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricStats {
    pub mean: f64,
    pub std: f64,
    pub samples: u64,
}

impl MetricStats {
    fn new(mean: f64, std: f64) -> Self {
        Self { mean, std, samples: 0 }
    }

    fn update(&mut self, value: f64, floor: f64) {
        let n = self.samples + 1;
        let old_mean = self.mean;
        let new_mean = old_mean + (value - old_mean) / n as f64;

        let new_std = if n > 1 {
            let old_var = self.std * self.std;
            let new_var =
                ((n - 1) as f64 * old_var + (value - old_mean) * (value - new_mean)) / n as f64;
            new_var.sqrt()
        } else {
            0.0
        };

        self.mean = new_mean;
        self.std = new_std.max(floor);
        self.samples = n;
    }

    fn z_score(&self, value: f64) -> f64 {
        if self.std > 0.0 {
            (value - self.mean) / self.std
        } else {
            0.0
        }
    }
}

/// Paired error-rate / log-volume statistics for one temporal bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineSlot {
    pub error_rate: MetricStats,
    pub log_volume: MetricStats,
}

impl BaselineSlot {
    fn empty() -> Self {
        Self {
            error_rate: MetricStats::new(0.0, 0.0),
            log_volume: MetricStats::new(0.0, 0.0),
        }
    }

    fn overall_default() -> Self {
        Self {
            error_rate: MetricStats::new(0.0, 1.0),
            log_volume: MetricStats::new(100.0, 50.0),
        }
    }

    fn update(&mut self, error_rate: f64, log_volume: f64) {
        self.error_rate.update(error_rate, ERROR_RATE_STD_FLOOR);
        self.log_volume.update(log_volume, LOG_VOLUME_STD_FLOOR);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BaselineSample {
    pub timestamp: DateTime<Utc>,
    pub error_rate: f64,
    pub log_volume: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BaselineSummary {
    pub overall: BaselineSlot,
    pub confidence: f64,
    pub total_samples: u64,
    pub history_size: usize,
    pub hours_with_data: usize,
    pub days_with_data: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HourlyPattern {
    pub error_rate_mean: f64,
    pub log_volume_mean: f64,
    pub samples: u64,
}

/// The persisted JSON document. Integer bucket keys serialize as strings;
/// readers tolerate missing subkeys.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct BaselineDocument {
    hourly: BTreeMap<u32, BaselineSlot>,
    weekday: BTreeMap<u32, BaselineSlot>,
    overall: Option<BaselineSlot>,
    last_updated: Option<String>,
}

impl Default for BaselineDocument {
    fn default() -> Self {
        Self {
            hourly: BTreeMap::new(),
            weekday: BTreeMap::new(),
            overall: None,
            last_updated: None,
        }
    }
}

/// Learns normal error-rate and volume per hour-of-day and weekday, with an
/// overall fallback, and persists itself across restarts.
pub struct AdaptiveBaseline {
    persistence_path: PathBuf,
    hourly: [BaselineSlot; 24],
    weekday: [BaselineSlot; 7],
    overall: BaselineSlot,
    error_rate_history: VecDeque<BaselineSample>,
    log_volume_history: VecDeque<BaselineSample>,
}

impl AdaptiveBaseline {
    pub fn new(persistence_path: impl Into<PathBuf>) -> Self {
        let mut baseline = Self {
            persistence_path: persistence_path.into(),
            hourly: std::array::from_fn(|_| BaselineSlot::empty()),
            weekday: std::array::from_fn(|_| BaselineSlot::empty()),
            overall: BaselineSlot::overall_default(),
            error_rate_history: VecDeque::with_capacity(HISTORY_CAPACITY),
            log_volume_history: VecDeque::with_capacity(HISTORY_CAPACITY),
        };
        baseline.load();
        info!(path = %baseline.persistence_path.display(), "adaptive baseline initialized");
        baseline
    }

    /// Accept one `(error_rate, log_volume)` observation for `timestamp`.
    pub fn update(&mut self, error_rate: f64, log_volume: u64, timestamp: DateTime<Utc>) {
        let sample = BaselineSample {
            timestamp,
            error_rate,
            log_volume,
        };
        push_bounded(&mut self.error_rate_history, sample.clone());
        push_bounded(&mut self.log_volume_history, sample);

        let hour = timestamp.hour() as usize;
        let day = timestamp.weekday().num_days_from_monday() as usize;

        self.hourly[hour].update(error_rate, log_volume as f64);
        self.weekday[day].update(error_rate, log_volume as f64);
        self.overall.update(error_rate, log_volume as f64);

        if self.overall.error_rate.samples % PERSIST_EVERY == 0 {
            if let Err(err) = self.save() {
                error!(error = %err, "failed to save baselines");
            }
        }

        debug!(
            hour,
            day,
            error_rate,
            log_volume,
            total_samples = self.overall.error_rate.samples,
            "baseline updated"
        );
    }

    /// The most specific baseline with enough samples: hourly, then
    /// weekday, then overall.
    pub fn expected(&self, timestamp: DateTime<Utc>) -> &BaselineSlot {
        let hour = timestamp.hour() as usize;
        let day = timestamp.weekday().num_days_from_monday() as usize;

        if self.hourly[hour].error_rate.samples >= SLOT_PREFERENCE_MIN_SAMPLES {
            return &self.hourly[hour];
        }
        if self.weekday[day].error_rate.samples >= SLOT_PREFERENCE_MIN_SAMPLES {
            return &self.weekday[day];
        }
        &self.overall
    }

    /// Score the pair against the learned baseline. `None` until enough
    /// samples exist or when both z-scores stay within `sensitivity`.
    pub fn is_anomalous(
        &self,
        error_rate: f64,
        log_volume: u64,
        timestamp: DateTime<Utc>,
        sensitivity: f64,
    ) -> Option<BaselineDeviation> {
        let baseline = self.expected(timestamp);
        if baseline.error_rate.samples < DETECTION_MIN_SAMPLES {
            return None;
        }

        let error_z = baseline.error_rate.z_score(error_rate);
        let volume_z = baseline.log_volume.z_score(log_volume as f64);

        let error_anomalous = error_z.abs() > sensitivity;
        let volume_anomalous = volume_z.abs() > sensitivity;

        if !error_anomalous && !volume_anomalous {
            return None;
        }

        let deviation = BaselineDeviation {
            error_rate: MetricDeviation {
                current: error_rate,
                expected: baseline.error_rate.mean,
                std: baseline.error_rate.std,
                z_score: error_z,
                is_anomalous: error_anomalous,
            },
            log_volume: MetricDeviation {
                current: log_volume as f64,
                expected: baseline.log_volume.mean,
                std: baseline.log_volume.std,
                z_score: volume_z,
                is_anomalous: volume_anomalous,
            },
            baseline_samples: baseline.error_rate.samples,
            sensitivity,
        };

        warn!(
            error_z_score = error_z,
            volume_z_score = volume_z,
            "anomaly detected via adaptive baseline"
        );

        Some(deviation)
    }

    /// Confidence in the learned baseline; full after 100 overall samples.
    pub fn confidence(&self) -> f64 {
        (self.overall.error_rate.samples as f64 / 100.0).min(1.0)
    }

    pub fn summary(&self) -> BaselineSummary {
        BaselineSummary {
            overall: self.overall.clone(),
            confidence: self.confidence(),
            total_samples: self.overall.error_rate.samples,
            history_size: self.error_rate_history.len(),
            hours_with_data: self
                .hourly
                .iter()
                .filter(|slot| slot.error_rate.samples >= SLOT_PREFERENCE_MIN_SAMPLES)
                .count(),
            days_with_data: self
                .weekday
                .iter()
                .filter(|slot| slot.error_rate.samples >= SLOT_PREFERENCE_MIN_SAMPLES)
                .count(),
        }
    }

    /// Hour-of-day buckets with at least five samples.
    pub fn hourly_patterns(&self) -> BTreeMap<u32, HourlyPattern> {
        self.hourly
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.error_rate.samples >= DETECTION_MIN_SAMPLES)
            .map(|(hour, slot)| {
                (
                    hour as u32,
                    HourlyPattern {
                        error_rate_mean: slot.error_rate.mean,
                        log_volume_mean: slot.log_volume.mean,
                        samples: slot.error_rate.samples,
                    },
                )
            })
            .collect()
    }

    pub fn overall(&self) -> &BaselineSlot {
        &self.overall
    }

    /// Write the full document via a temp file and rename, so a crash
    /// mid-write cannot truncate the previous state.
    pub fn save(&self) -> Result<()> {
        let document = BaselineDocument {
            hourly: index_map(&self.hourly),
            weekday: index_map(&self.weekday),
            overall: Some(self.overall.clone()),
            last_updated: Some(Utc::now().to_rfc3339()),
        };

        if let Some(parent) = self.persistence_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| AgentError::State(format!("cannot create state dir: {}", e)))?;
            }
        }

        let payload = serde_json::to_string_pretty(&document)
            .map_err(|e| AgentError::State(format!("cannot serialize baselines: {}", e)))?;

        let tmp_path = self.persistence_path.with_extension("json.tmp");
        fs::write(&tmp_path, payload)
            .map_err(|e| AgentError::State(format!("cannot write baselines: {}", e)))?;
        fs::rename(&tmp_path, &self.persistence_path)
            .map_err(|e| AgentError::State(format!("cannot replace baselines: {}", e)))?;

        info!(path = %self.persistence_path.display(), "baselines saved");
        Ok(())
    }

    fn load(&mut self) {
        if !Path::new(&self.persistence_path).exists() {
            info!("no existing baselines found, starting fresh");
            return;
        }

        let raw = match fs::read_to_string(&self.persistence_path) {
            Ok(raw) => raw,
            Err(err) => {
                error!(error = %err, "failed to read baselines, starting fresh");
                return;
            }
        };

        let document: BaselineDocument = match serde_json::from_str(&raw) {
            Ok(document) => document,
            Err(err) => {
                error!(error = %err, "failed to parse baselines, starting fresh");
                return;
            }
        };

        for (index, slot) in document.hourly {
            if let Some(target) = self.hourly.get_mut(index as usize) {
                *target = slot;
            }
        }
        for (index, slot) in document.weekday {
            if let Some(target) = self.weekday.get_mut(index as usize) {
                *target = slot;
            }
        }
        if let Some(overall) = document.overall {
            self.overall = overall;
        }

        info!(
            samples = self.overall.error_rate.samples,
            last_updated = document.last_updated.as_deref().unwrap_or("unknown"),
            "baselines loaded"
        );
    }
}

fn push_bounded(history: &mut VecDeque<BaselineSample>, sample: BaselineSample) {
    if history.len() == HISTORY_CAPACITY {
        history.pop_front();
    }
    history.push_back(sample);
}

fn index_map(slots: &[BaselineSlot]) -> BTreeMap<u32, BaselineSlot> {
    slots
        .iter()
        .enumerate()
        .map(|(index, slot)| (index as u32, slot.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scratch_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("baselines.json")
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_welford_matches_batch_statistics() {
        let values = [2.0f64, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut stats = MetricStats::new(0.0, 0.0);
        for v in values {
            stats.update(v, 0.0);
        }

        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;

        assert!((stats.mean - mean).abs() < 1e-9);
        assert!((stats.std - variance.sqrt()).abs() < 1e-9);
        assert_eq!(stats.samples, values.len() as u64);
    }

    #[test]
    fn test_std_floor_applied() {
        let mut stats = MetricStats::new(0.0, 0.0);
        for _ in 0..20 {
            stats.update(5.0, 0.1);
        }
        assert_eq!(stats.std, 0.1);
    }

    #[test]
    fn test_sample_counts_strictly_increase() {
        let dir = tempfile::tempdir().unwrap();
        let mut baseline = AdaptiveBaseline::new(scratch_path(&dir));

        let mut last = 0;
        for i in 0..25 {
            baseline.update(1.0, 100, at(i % 24));
            let n = baseline.overall().error_rate.samples;
            assert_eq!(n, last + 1);
            last = n;
        }
        // Overall count never exceeds the per-bucket totals it feeds.
        let hourly_total: u64 = baseline.hourly.iter().map(|s| s.error_rate.samples).sum();
        assert_eq!(hourly_total, last);
    }

    #[test]
    fn test_detection_needs_five_samples() {
        let dir = tempfile::tempdir().unwrap();
        let mut baseline = AdaptiveBaseline::new(scratch_path(&dir));

        for _ in 0..4 {
            baseline.update(1.0, 100, at(10));
        }
        assert!(baseline.is_anomalous(500.0, 100, at(10), 2.0).is_none());

        baseline.update(1.0, 100, at(10));
        assert!(baseline.is_anomalous(500.0, 100, at(10), 2.0).is_some());
    }

    #[test]
    fn test_z_score_symmetry() {
        let dir = tempfile::tempdir().unwrap();
        let mut baseline = AdaptiveBaseline::new(scratch_path(&dir));

        for v in [10.0, 11.0, 9.0, 10.0, 11.0, 9.0, 10.0, 10.0] {
            baseline.update(v, 100, at(10));
        }

        let slot = baseline.expected(at(10));
        let mean = slot.error_rate.mean;
        let std = slot.error_rate.std;

        for k in [1.0f64, 2.5, 4.0] {
            let above = baseline.is_anomalous(mean + k * std, 100, at(10), 2.0);
            let below = baseline.is_anomalous(mean - k * std, 100, at(10), 2.0);
            assert_eq!(above.is_some(), below.is_some(), "asymmetric at k={}", k);
        }
    }

    #[test]
    fn test_expected_prefers_specific_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let mut baseline = AdaptiveBaseline::new(scratch_path(&dir));

        // Nine samples: overall wins.
        for _ in 0..9 {
            baseline.update(3.0, 100, at(7));
        }
        assert_eq!(
            baseline.expected(at(7)).error_rate.samples,
            baseline.overall().error_rate.samples
        );

        // Tenth sample promotes the hourly bucket.
        baseline.update(3.0, 100, at(7));
        assert_eq!(baseline.expected(at(7)).error_rate.samples, 10);
        // A different hour still falls through (weekday has 10 too here).
        assert!(baseline.expected(at(8)).error_rate.samples >= 10);
    }

    #[test]
    fn test_confidence_ramp() {
        let dir = tempfile::tempdir().unwrap();
        let mut baseline = AdaptiveBaseline::new(scratch_path(&dir));
        assert_eq!(baseline.confidence(), 0.0);

        for _ in 0..4 {
            baseline.update(0.0, 100, at(0));
        }
        assert!((baseline.confidence() - 0.04).abs() < 1e-12);

        for _ in 0..200 {
            baseline.update(0.0, 100, at(0));
        }
        assert_eq!(baseline.confidence(), 1.0);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = scratch_path(&dir);

        let mut baseline = AdaptiveBaseline::new(&path);
        for i in 0..37u32 {
            baseline.update(1.0 + f64::from(i) * 0.3, u64::from(90 + i), at(i % 24));
        }
        baseline.save().unwrap();

        let restored = AdaptiveBaseline::new(&path);
        let a = baseline.overall();
        let b = restored.overall();
        assert_eq!(a.error_rate.samples, b.error_rate.samples);
        assert!((a.error_rate.mean - b.error_rate.mean).abs() < 1e-12);
        assert!((a.error_rate.std - b.error_rate.std).abs() < 1e-12);
        assert!((a.log_volume.mean - b.log_volume.mean).abs() < 1e-12);
        assert!((a.log_volume.std - b.log_volume.std).abs() < 1e-12);

        for hour in 0..24 {
            let x = &baseline.hourly[hour];
            let y = &restored.hourly[hour];
            assert_eq!(x.error_rate.samples, y.error_rate.samples);
            assert!((x.error_rate.mean - y.error_rate.mean).abs() < 1e-12);
        }
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = scratch_path(&dir);
        fs::write(&path, "{not json").unwrap();

        let baseline = AdaptiveBaseline::new(&path);
        assert_eq!(baseline.overall().error_rate.samples, 0);
    }

    #[test]
    fn test_history_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut baseline = AdaptiveBaseline::new(scratch_path(&dir));
        for i in 0..(HISTORY_CAPACITY + 50) {
            baseline.update(0.0, 100, at((i % 24) as u32));
        }
        assert_eq!(baseline.error_rate_history.len(), HISTORY_CAPACITY);
        assert_eq!(baseline.log_volume_history.len(), HISTORY_CAPACITY);
    }
}
