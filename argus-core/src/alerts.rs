use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::config::AgentConfig;
use crate::model::{Incident, Severity, truncate_chars};

const ALERT_DEADLINE: Duration = Duration::from_secs(10);
const HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub incident_id: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertStatistics {
    pub total_alerts_sent: u64,
    pub failed_alerts: u64,
    pub success_rate: f64,
    pub recent_alerts: usize,
    pub slack_enabled: bool,
    pub webhook_enabled: bool,
}

/// Formats and posts per-incident notifications to the configured sinks
/// and keeps a rolling record of outcomes.
pub struct AlertManager {
    client: reqwest::Client,
    slack_webhook_url: Option<String>,
    generic_webhook_url: Option<String>,
    alert_on_severities: Vec<Severity>,
    history: RwLock<VecDeque<AlertRecord>>,
    total_sent: AtomicU64,
    total_failed: AtomicU64,
}

impl AlertManager {
    pub fn new(config: &AgentConfig) -> Self {
        info!(
            slack_enabled = config.slack_enabled(),
            webhook_enabled = config.webhook_enabled(),
            alert_severities = ?config.alert_severities,
            "alert manager initialized"
        );

        Self {
            client: reqwest::Client::builder()
                .timeout(ALERT_DEADLINE)
                .build()
                .expect("Failed to create HTTP client"),
            slack_webhook_url: config.slack_webhook_url.clone(),
            generic_webhook_url: config.generic_webhook_url.clone(),
            alert_on_severities: config.alert_severities.clone(),
            history: RwLock::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            total_sent: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
        }
    }

    /// Fan the incident out to every configured sink. The incident counts
    /// as alerted when at least one sink accepted it.
    pub async fn send_incident_alert(&self, incident: &Incident) -> bool {
        if !self.alert_on_severities.contains(&incident.severity) {
            debug!(
                incident_id = %incident.id,
                severity = %incident.severity,
                "skipping alert - severity not in alert list"
            );
            return false;
        }

        if self.slack_webhook_url.is_none() && self.generic_webhook_url.is_none() {
            debug!(incident_id = %incident.id, "skipping alert - no sinks configured");
            return false;
        }

        info!(
            incident_id = %incident.id,
            severity = %incident.severity,
            "sending incident alerts"
        );

        let mut outcomes = Vec::new();
        if let Some(url) = &self.slack_webhook_url {
            outcomes.push(self.send_slack_alert(url, incident).await);
        }
        if let Some(url) = &self.generic_webhook_url {
            outcomes.push(self.send_webhook_alert(url, incident).await);
        }

        let success = outcomes.iter().any(|&ok| ok);
        if success {
            self.total_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.record_alert(incident, success).await;
        success
    }

    /// Chat sinks only accept a plain 200.
    async fn send_slack_alert(&self, url: &str, incident: &Incident) -> bool {
        let message = slack_message(incident);
        match self.client.post(url).json(&message).send().await {
            Ok(response) if response.status() == 200 => {
                info!(incident_id = %incident.id, "chat alert sent successfully");
                true
            }
            Ok(response) => {
                error!(
                    incident_id = %incident.id,
                    status_code = response.status().as_u16(),
                    "chat alert failed"
                );
                false
            }
            Err(err) => {
                error!(incident_id = %incident.id, error = %err, "chat alert failed");
                false
            }
        }
    }

    /// Generic webhooks may answer 200, 201 or 202.
    async fn send_webhook_alert(&self, url: &str, incident: &Incident) -> bool {
        let payload = webhook_payload(incident);
        match self.client.post(url).json(&payload).send().await {
            Ok(response) if matches!(response.status().as_u16(), 200 | 201 | 202) => {
                info!(incident_id = %incident.id, "webhook alert sent successfully");
                true
            }
            Ok(response) => {
                error!(
                    incident_id = %incident.id,
                    status_code = response.status().as_u16(),
                    "webhook alert failed"
                );
                false
            }
            Err(err) => {
                error!(incident_id = %incident.id, error = %err, "webhook alert failed");
                false
            }
        }
    }

    async fn record_alert(&self, incident: &Incident, success: bool) {
        let mut history = self.history.write().await;
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(AlertRecord {
            incident_id: incident.id.clone(),
            severity: incident.severity,
            timestamp: Utc::now(),
            success,
        });
    }

    pub async fn statistics(&self) -> AlertStatistics {
        let sent = self.total_sent.load(Ordering::Relaxed);
        let failed = self.total_failed.load(Ordering::Relaxed);
        AlertStatistics {
            total_alerts_sent: sent,
            failed_alerts: failed,
            success_rate: if sent + failed > 0 {
                sent as f64 / (sent + failed) as f64
            } else {
                0.0
            },
            recent_alerts: self.history.read().await.len(),
            slack_enabled: self.slack_webhook_url.is_some(),
            webhook_enabled: self.generic_webhook_url.is_some(),
        }
    }

    pub async fn recent_alerts(&self, limit: usize) -> Vec<AlertRecord> {
        let history = self.history.read().await;
        history.iter().rev().take(limit).cloned().collect()
    }

    pub fn config_view(&self) -> Value {
        json!({
            "alert_severities": self.alert_on_severities,
            "slack_enabled": self.slack_webhook_url.is_some(),
            "webhook_enabled": self.generic_webhook_url.is_some(),
        })
    }
}

fn severity_emoji(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🚨",
        Severity::High => "⚠️",
        Severity::Medium => "⚡",
        Severity::Low => "ℹ️",
    }
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "#FF0000",
        Severity::High => "#FFA500",
        Severity::Medium => "#FFFF00",
        Severity::Low => "#00FF00",
    }
}

/// Block-formatted chat message: header, a 4-field grid, optional RCA
/// summary, a timestamp footer and a colour-coded attachment.
fn slack_message(incident: &Incident) -> Value {
    let emoji = severity_emoji(incident.severity);
    let color = severity_color(incident.severity);

    let mut blocks = vec![
        json!({
            "type": "header",
            "text": {
                "type": "plain_text",
                "text": format!("{} {}", emoji, incident.title),
                "emoji": true
            }
        }),
        json!({
            "type": "section",
            "fields": [
                { "type": "mrkdwn", "text": format!("*Incident ID:*\n{}", incident.id) },
                { "type": "mrkdwn", "text": format!("*Severity:*\n{}", incident.severity.as_str().to_uppercase()) },
                { "type": "mrkdwn", "text": format!("*Error Rate:*\n{}/{} logs", incident.error_count, incident.log_count) },
                { "type": "mrkdwn", "text": format!("*Services:*\n{}", incident.affected_services.join(", ")) }
            ]
        }),
    ];

    if let Some(rca) = &incident.rca_analysis {
        blocks.push(json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!("*🤖 AI Root Cause:*\n{}...", truncate_chars(&rca.root_cause, 200))
            }
        }));

        if !rca.immediate_actions.is_empty() {
            let actions = rca
                .immediate_actions
                .iter()
                .take(3)
                .enumerate()
                .map(|(i, action)| format!("{}. {}", i + 1, truncate_chars(action, 80)))
                .collect::<Vec<_>>()
                .join("\n");
            blocks.push(json!({
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("*⚡ Immediate Actions:*\n{}", actions)
                }
            }));
        }
    }

    blocks.push(json!({
        "type": "context",
        "elements": [{
            "type": "mrkdwn",
            "text": format!(
                "Detected at {}",
                incident.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            )
        }]
    }));

    json!({
        "text": format!("{} Incident: {}", emoji, incident.title),
        "blocks": blocks,
        "attachments": [{
            "color": color,
            "fallback": format!("Incident {}: {}", incident.id, incident.title)
        }]
    })
}

/// Flat payload carrying every incident field, plus the RCA subtree when
/// it exists.
fn webhook_payload(incident: &Incident) -> Value {
    let mut payload = json!({
        "incident_id": incident.id,
        "title": incident.title,
        "description": incident.description,
        "severity": incident.severity,
        "status": incident.status,
        "started_at": incident.started_at.to_rfc3339(),
        "detected_at": incident.detected_at.to_rfc3339(),
        "error_count": incident.error_count,
        "log_count": incident.log_count,
        "error_rate": if incident.log_count > 0 {
            incident.error_count as f64 / incident.log_count as f64
        } else {
            0.0
        },
        "affected_services": incident.affected_services,
        "anomalies": incident.anomalies.iter().map(|a| json!({
            "type": a.kind,
            "severity": a.severity,
            "score": a.score,
            "description": a.description,
        })).collect::<Vec<_>>(),
    });

    if let Some(rca) = &incident.rca_analysis {
        payload["rca"] = json!({
            "root_cause": rca.root_cause,
            "impact": rca.impact,
            "immediate_actions": rca.immediate_actions,
            "confidence": rca.confidence.to_string(),
        });
    }

    payload
}
