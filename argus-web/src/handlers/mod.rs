pub mod advanced;
pub mod alerts;
pub mod incidents;
pub mod logs;
pub mod ml;
pub mod system;

pub use advanced::{get_correlations, get_patterns, get_timeseries};
pub use alerts::{get_alert_config, get_alert_history, get_alert_status, send_test_alert};
pub use incidents::{get_incident, get_incident_rca, list_incidents};
pub use logs::{aggregate_logs, get_recent_errors, search_logs};
pub use ml::{check_anomaly, get_baseline, get_hourly_patterns};
pub use system::{
    alertmanager_webhook, get_stats, get_status, health_check, root, trigger_analysis,
};
