use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::Severity;

/// Agent configuration: defaults, overridden by an optional TOML file,
/// overridden by environment variables. Sink and LLM enablement derive
/// from the presence of their values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub log_store_url: String,
    pub log_index: String,
    pub check_interval_secs: u64,
    pub baseline_path: PathBuf,
    pub port: u16,
    pub slack_webhook_url: Option<String>,
    pub generic_webhook_url: Option<String>,
    pub alert_severities: Vec<Severity>,
    pub anthropic_api_key: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_store_url: "http://localhost:9200".to_string(),
            log_index: "logs-*".to_string(),
            check_interval_secs: 30,
            baseline_path: default_state_dir().join("baselines.json"),
            port: 8000,
            slack_webhook_url: None,
            generic_webhook_url: None,
            alert_severities: vec![Severity::High, Severity::Critical],
            anthropic_api_key: None,
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("argus"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

impl AgentConfig {
    pub fn load() -> Result<Self> {
        let path = env::var("ARGUS_CONFIG").unwrap_or_else(|_| "argus.toml".to_string());

        let mut config = if Path::new(&path).exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {}", path))?;
            toml::from_str(&raw).with_context(|| format!("invalid config file {}", path))?
        } else {
            Self::default()
        };

        if let Ok(url) = env::var("ARGUS_LOG_STORE_URL") {
            config.log_store_url = url;
        }
        if let Ok(index) = env::var("ARGUS_LOG_INDEX") {
            config.log_index = index;
        }
        if let Ok(interval) = env::var("ARGUS_CHECK_INTERVAL") {
            config.check_interval_secs = interval
                .parse()
                .context("ARGUS_CHECK_INTERVAL must be an integer number of seconds")?;
        }
        if let Ok(path) = env::var("ARGUS_BASELINE_PATH") {
            config.baseline_path = PathBuf::from(path);
        }
        if let Ok(port) = env::var("ARGUS_PORT") {
            config.port = port.parse().context("ARGUS_PORT must be a port number")?;
        }
        if let Ok(url) = env::var("ARGUS_SLACK_WEBHOOK_URL") {
            config.slack_webhook_url = Some(url);
        }
        if let Ok(url) = env::var("ARGUS_WEBHOOK_URL") {
            config.generic_webhook_url = Some(url);
        }
        if let Ok(raw) = env::var("ARGUS_ALERT_SEVERITIES") {
            config.alert_severities = raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.parse())
                .collect::<std::result::Result<_, _>>()
                .context("ARGUS_ALERT_SEVERITIES must be a comma-separated severity list")?;
        }
        if let Ok(key) = env::var("ARGUS_ANTHROPIC_API_KEY").or_else(|_| env::var("ANTHROPIC_API_KEY")) {
            if !key.is_empty() {
                config.anthropic_api_key = Some(key);
            }
        }

        Ok(config)
    }

    pub fn slack_enabled(&self) -> bool {
        self.slack_webhook_url.is_some()
    }

    pub fn webhook_enabled(&self) -> bool {
        self.generic_webhook_url.is_some()
    }

    pub fn rca_enabled(&self) -> bool {
        self.anthropic_api_key.as_deref().map_or(false, |k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.check_interval_secs, 30);
        assert_eq!(config.log_index, "logs-*");
        assert_eq!(
            config.alert_severities,
            vec![Severity::High, Severity::Critical]
        );
        assert!(!config.slack_enabled());
        assert!(!config.rca_enabled());
    }

    #[test]
    fn test_toml_overlay() {
        let config: AgentConfig = toml::from_str(
            r#"
            log_store_url = "http://elastic:9200"
            check_interval_secs = 10
            alert_severities = ["medium", "high", "critical"]
            slack_webhook_url = "https://hooks.example.com/T0/B0/x"
            "#,
        )
        .unwrap();
        assert_eq!(config.log_store_url, "http://elastic:9200");
        assert_eq!(config.check_interval_secs, 10);
        assert_eq!(config.alert_severities.len(), 3);
        assert!(config.slack_enabled());
        // Unspecified keys keep their defaults.
        assert_eq!(config.port, 8000);
    }
}
