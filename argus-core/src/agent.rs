use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::ai_provider::IncidentAnalyzer;
use crate::alerts::AlertManager;
use crate::config::AgentConfig;
use crate::error::Result;
use crate::monitor::Monitor;
use crate::store::LogStore;

/// The process-wide aggregate: built once at startup, shared by reference
/// with the monitor task and the HTTP surface.
pub struct Agent {
    pub config: AgentConfig,
    pub store: Arc<LogStore>,
    pub monitor: Arc<Monitor>,
    pub alerts: Arc<AlertManager>,
    pub analyzer: Arc<IncidentAnalyzer>,
    started_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let store = Arc::new(LogStore::new(&config.log_store_url, &config.log_index)?);
        let alerts = Arc::new(AlertManager::new(&config));
        let analyzer = Arc::new(IncidentAnalyzer::new(config.anthropic_api_key.as_deref()));
        let monitor = Arc::new(Monitor::new(
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&analyzer),
            Arc::clone(&alerts),
        ));

        Ok(Self {
            config,
            store,
            monitor,
            alerts,
            analyzer,
            started_at: Utc::now(),
        })
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
