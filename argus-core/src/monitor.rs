use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, info, warn};

use crate::ai_provider::IncidentAnalyzer;
use crate::alerts::AlertManager;
use crate::analyzer::baseline::{BaselineSummary, HourlyPattern};
use crate::analyzer::timeseries::TimeSeriesSnapshot;
use crate::analyzer::{AdaptiveBaseline, CorrelationEngine, RuleDetector, TimeSeriesAnalyzer};
use crate::config::AgentConfig;
use crate::error::Result;
use crate::model::{
    Anomaly, AnomalyKind, BaselineDeviation, Evidence, Incident, IncidentStatus, LogRecord,
    MetricsSnapshot, MlContext, MonitorStatus, MonitoringState, Severity,
};
use crate::store::LogStore;

/// Each cycle examines the trailing five minutes of logs.
const QUERY_WINDOW_MINUTES: i64 = 5;

/// Hard cap on the per-cycle batch.
const BATCH_LIMIT: usize = 500;

/// Standard deviations before the adaptive baseline flags a cycle.
const BASELINE_SENSITIVITY: f64 = 2.0;

/// Time-series patterns run on every 3rd cycle, correlation on every 2nd.
const TIMESERIES_CADENCE: u64 = 3;
const CORRELATION_CADENCE: u64 = 2;

/// Drives the periodic detection cycle and owns all detector state, the
/// monitoring counters and the incident log. Single writer; the HTTP
/// surface reads through snapshot accessors.
pub struct Monitor {
    config: AgentConfig,
    store: Arc<LogStore>,
    analyzer: Arc<IncidentAnalyzer>,
    alerts: Arc<AlertManager>,
    baseline: RwLock<AdaptiveBaseline>,
    rules: RwLock<RuleDetector>,
    timeseries: RwLock<TimeSeriesAnalyzer>,
    correlation: CorrelationEngine,
    state: RwLock<MonitoringState>,
    incidents: Arc<RwLock<Vec<Incident>>>,
    check_count: AtomicU64,
    started_at: DateTime<Utc>,
    running: AtomicBool,
    shutdown: Notify,
}

impl Monitor {
    pub fn new(
        config: AgentConfig,
        store: Arc<LogStore>,
        analyzer: Arc<IncidentAnalyzer>,
        alerts: Arc<AlertManager>,
    ) -> Self {
        let baseline = AdaptiveBaseline::new(config.baseline_path.clone());
        Self {
            config,
            store,
            analyzer,
            alerts,
            baseline: RwLock::new(baseline),
            rules: RwLock::new(RuleDetector::new()),
            timeseries: RwLock::new(TimeSeriesAnalyzer::new()),
            correlation: CorrelationEngine::new(),
            state: RwLock::new(MonitoringState::new()),
            incidents: Arc::new(RwLock::new(Vec::new())),
            check_count: AtomicU64::new(0),
            started_at: Utc::now(),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// The long-running monitoring loop. One cycle at a time; errors log,
    /// mark the state and back off for one interval. The loop never exits
    /// on its own.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        self.state.write().await.status = MonitorStatus::Healthy;

        let interval = Duration::from_secs(self.config.check_interval_secs);
        let confidence = self.baseline.read().await.confidence();
        info!(
            interval_secs = self.config.check_interval_secs,
            baseline_confidence = confidence,
            "starting log monitor"
        );

        while self.running.load(Ordering::SeqCst) {
            if let Err(err) = self.check_logs().await {
                error!(error = %err, "error in monitoring loop");
                self.state.write().await.status = MonitorStatus::Error;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown.notified() => break,
            }
        }

        self.state.write().await.status = MonitorStatus::Stopped;
        info!("log monitor stopped");
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// One full monitoring cycle: sample the store, run the detection
    /// stack, synthesize an incident when warranted.
    pub async fn check_logs(&self) -> Result<()> {
        let cycle_start = Utc::now();
        debug!(
            check_number = self.check_count.load(Ordering::Relaxed),
            "monitoring cycle"
        );

        if !self.store.healthy().await {
            error!("log store unhealthy");
            self.state.write().await.status = MonitorStatus::Degraded;
            return Ok(());
        }

        let batch = match self.store.recent_logs(QUERY_WINDOW_MINUTES, BATCH_LIMIT).await {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, "failed to sample logs, skipping cycle");
                self.state.write().await.status = MonitorStatus::Degraded;
                return Ok(());
            }
        };

        self.state.write().await.logs_processed += batch.len() as u64;

        if batch.is_empty() {
            debug!("no recent logs found");
            self.state.write().await.last_check = cycle_start;
            return Ok(());
        }

        self.process_batch(&batch, cycle_start).await;
        Ok(())
    }

    /// The detection pipeline for one sampled batch. Split from the store
    /// access so a manually supplied batch runs the identical path.
    pub async fn process_batch(&self, batch: &[LogRecord], now: DateTime<Utc>) {
        let error_count = batch.iter().filter(|l| l.is_error()).count();
        let log_volume = batch.len();
        let check = self.check_count.load(Ordering::Relaxed);

        info!(count = log_volume, check, "processing logs");

        let mut anomalies: Vec<Anomaly> = Vec::new();

        // Learn first, then score against what was learned; both under one
        // lock so updates and queries never interleave.
        let deviation = {
            let mut baseline = self.baseline.write().await;
            baseline.update(error_count as f64, log_volume as u64, now);
            baseline.is_anomalous(
                error_count as f64,
                log_volume as u64,
                now,
                BASELINE_SENSITIVITY,
            )
        };

        if let Some(deviation) = deviation {
            anomalies.push(baseline_anomaly(deviation));
        }

        self.timeseries
            .write()
            .await
            .add_point(error_count as u64, log_volume as u64, now);

        anomalies.extend(self.rules.write().await.analyze(batch, now));

        if check % TIMESERIES_CADENCE == 0 {
            debug!("running time-series analysis");
            let found = self.timeseries.read().await.analyze();
            if !found.is_empty() {
                info!(count = found.len(), "time-series patterns detected");
            }
            anomalies.extend(found);
        }

        if check % CORRELATION_CADENCE == 0 {
            debug!("running correlation analysis");
            let found = self.correlation.analyze(batch);
            if !found.is_empty() {
                info!(count = found.len(), "correlations detected");
            }
            anomalies.extend(found);
        }

        self.state.write().await.anomalies_detected += anomalies.len() as u64;

        let severe: Vec<Anomaly> = anomalies
            .iter()
            .filter(|a| a.severity >= Severity::High)
            .cloned()
            .collect();

        if severe.is_empty() {
            debug!(total_anomalies = anomalies.len(), "cycle complete - system healthy");
        } else {
            let incident = self.build_incident(batch, severe, now).await;

            warn!(
                incident_id = %incident.id,
                severity = %incident.severity,
                anomaly_count = incident.anomalies.len(),
                "incident created"
            );

            {
                let mut incidents = self.incidents.write().await;
                incidents.push(incident.clone());
            }
            self.state.write().await.incidents_created += 1;

            self.spawn_enrichment(incident);
        }

        {
            let mut state = self.state.write().await;
            state.last_check = now;
            state.status = MonitorStatus::Healthy;
        }
        self.check_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Fuse the cycle's severe anomalies into one incident record.
    async fn build_incident(
        &self,
        batch: &[LogRecord],
        anomalies: Vec<Anomaly>,
        now: DateTime<Utc>,
    ) -> Incident {
        let error_logs: Vec<&LogRecord> = batch.iter().filter(|l| l.is_error()).collect();

        let mut services: Vec<String> = error_logs
            .iter()
            .filter_map(|l| l.service_name().map(str::to_string))
            .collect();
        services.sort();
        services.dedup();

        let severity = anomalies
            .iter()
            .map(|a| a.severity)
            .max()
            .unwrap_or(Severity::Low);

        let mut kinds: Vec<AnomalyKind> = Vec::new();
        for anomaly in &anomalies {
            if !kinds.contains(&anomaly.kind) {
                kinds.push(anomaly.kind);
            }
        }
        let mut title = format!(
            "ML-Detected Incident: {}",
            kinds
                .iter()
                .take(3)
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        if kinds.len() > 3 {
            title.push_str(&format!(" (+{} more)", kinds.len() - 3));
        }

        let baseline_summary = self.baseline.read().await.summary();

        let mut lines: Vec<String> = Vec::new();
        if anomalies
            .iter()
            .any(|a| a.kind == AnomalyKind::AdaptiveBaselineDeviation)
        {
            lines.push(format!(
                "[BASELINE] System deviating from learned normal behavior (confidence: {:.0}%)",
                baseline_summary.confidence * 100.0
            ));
        }
        for anomaly in anomalies.iter().take(5) {
            lines.push(format!(
                "[{}] {}",
                anomaly.severity.as_str().to_uppercase(),
                anomaly.description
            ));
        }
        let mut description = lines.join("\n");
        if anomalies.len() > 5 {
            description.push_str(&format!(
                "\n\n... and {} more anomalies",
                anomalies.len() - 5
            ));
        }

        let sample_logs = error_logs.iter().take(5).map(|l| l.to_sample()).collect();

        let mut anomaly_breakdown: BTreeMap<AnomalyKind, usize> = BTreeMap::new();
        for anomaly in &anomalies {
            *anomaly_breakdown.entry(anomaly.kind).or_insert(0) += 1;
        }

        let metrics_snapshot = MetricsSnapshot {
            total_logs: batch.len(),
            error_logs: error_logs.len(),
            error_rate: if batch.is_empty() {
                0.0
            } else {
                error_logs.len() as f64 / batch.len() as f64
            },
            anomaly_breakdown,
            ml_context: MlContext {
                baseline_confidence: baseline_summary.confidence,
                baseline_samples: baseline_summary.total_samples,
                hours_learned: baseline_summary.hours_with_data,
                detection_methods: kinds,
            },
        };

        Incident {
            id: format!("INC-{}", now.timestamp()),
            title,
            description,
            severity,
            status: IncidentStatus::Open,
            started_at: now - chrono::Duration::minutes(QUERY_WINDOW_MINUTES),
            detected_at: now,
            resolved_at: None,
            anomalies,
            affected_services: services,
            log_count: batch.len(),
            error_count: error_logs.len(),
            sample_logs,
            metrics_snapshot,
            root_cause: None,
            recommendations: Vec::new(),
            rca_analysis: None,
        }
    }

    /// RCA and alert fan-out run after the incident is recorded, off the
    /// cycle's critical path. Either may fail without consequence for the
    /// incident itself.
    fn spawn_enrichment(&self, incident: Incident) {
        let analyzer = Arc::clone(&self.analyzer);
        let alerts = Arc::clone(&self.alerts);
        let incidents = Arc::clone(&self.incidents);

        tokio::spawn(async move {
            let enriched = match analyzer.analyze(&incident).await {
                Some(report) => {
                    let mut incidents = incidents.write().await;
                    match incidents.iter_mut().find(|i| i.id == incident.id) {
                        Some(stored) => {
                            stored.root_cause = Some(report.root_cause.clone());
                            stored.recommendations = report.immediate_actions.clone();
                            stored.rca_analysis = Some(report);
                            stored.clone()
                        }
                        None => incident,
                    }
                }
                None => incident,
            };

            if alerts.send_incident_alert(&enriched).await {
                info!(incident_id = %enriched.id, "alert sent for incident");
            }
        });
    }

    // Snapshot accessors for the HTTP surface.

    pub async fn state(&self) -> MonitoringState {
        self.state.read().await.clone()
    }

    pub async fn recent_incidents(&self, limit: usize) -> Vec<Incident> {
        let incidents = self.incidents.read().await;
        incidents.iter().rev().take(limit).cloned().collect()
    }

    pub async fn incident(&self, id: &str) -> Option<Incident> {
        let incidents = self.incidents.read().await;
        incidents.iter().find(|i| i.id == id).cloned()
    }

    pub async fn baseline_summary(&self) -> BaselineSummary {
        self.baseline.read().await.summary()
    }

    pub async fn expected_baseline(&self, at: DateTime<Utc>) -> crate::analyzer::BaselineSlot {
        self.baseline.read().await.expected(at).clone()
    }

    pub async fn hourly_patterns(&self) -> BTreeMap<u32, HourlyPattern> {
        self.baseline.read().await.hourly_patterns()
    }

    /// Read-only scoring probe; never feeds the baseline.
    pub async fn probe_anomaly(
        &self,
        error_rate: f64,
        log_volume: u64,
    ) -> (Option<BaselineDeviation>, f64) {
        let baseline = self.baseline.read().await;
        let deviation =
            baseline.is_anomalous(error_rate, log_volume, Utc::now(), BASELINE_SENSITIVITY);
        (deviation, baseline.confidence())
    }

    pub async fn timeseries_snapshot(&self) -> TimeSeriesSnapshot {
        self.timeseries.read().await.snapshot()
    }

    /// On-demand pattern scan over the current time-series window.
    pub async fn pattern_scan(&self) -> Vec<Anomaly> {
        self.timeseries.read().await.analyze()
    }

    /// On-demand correlation scan over a caller-supplied batch.
    pub fn correlation_scan(&self, batch: &[LogRecord]) -> Vec<Anomaly> {
        self.correlation.analyze(batch)
    }

    pub fn check_count(&self) -> u64 {
        self.check_count.load(Ordering::Relaxed)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Aggregated monitoring and learning statistics.
    pub async fn statistics(&self) -> Value {
        let state = self.state().await;
        let baseline = self.baseline_summary().await;

        json!({
            "monitoring": {
                "total_checks": self.check_count(),
                "logs_processed": state.logs_processed,
                "anomalies_detected": state.anomalies_detected,
                "incidents_created": state.incidents_created,
                "status": state.status,
                "last_check": state.last_check.to_rfc3339(),
            },
            "ml_baseline": {
                "confidence": baseline.confidence,
                "total_samples": baseline.total_samples,
                "history_size": baseline.history_size,
                "hours_with_data": baseline.hours_with_data,
                "days_with_data": baseline.days_with_data,
                "overall_baseline": baseline.overall,
            },
            "rca": {
                "enabled": self.analyzer.enabled(),
                "total_analyses": self.analyzer.total_analyses(),
            },
            "uptime_seconds": (Utc::now() - self.started_at).num_seconds(),
        })
    }
}

fn baseline_anomaly(deviation: BaselineDeviation) -> Anomaly {
    let error_z = deviation.error_rate.z_score;
    let severity = if error_z.abs() > 3.0 {
        Severity::Critical
    } else {
        Severity::High
    };
    let score = (error_z.abs() / 3.0).min(1.0);

    warn!(
        error_z_score = error_z,
        volume_z_score = deviation.log_volume.z_score,
        "adaptive baseline anomaly detected"
    );

    Anomaly::new(
        severity,
        score,
        format!(
            "Deviation from learned baseline: {:.1} errors (expected {:.1}±{:.1})",
            deviation.error_rate.current, deviation.error_rate.expected, deviation.error_rate.std
        ),
        Evidence::AdaptiveBaselineDeviation(deviation),
    )
}
