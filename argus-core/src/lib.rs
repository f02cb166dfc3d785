// Argus - autonomous log-observability agent
//
// This library holds the detection and incident-synthesis pipeline: the
// log-store façade, the four-pronged detector stack, the monitor scheduler
// that fuses detector output into incidents, and the outbound RCA and
// alerting clients. The HTTP control surface lives in `argus-web`.

pub mod agent;
pub mod ai_provider;
pub mod alerts;
pub mod analyzer;
pub mod config;
pub mod error;
pub mod model;
pub mod monitor;
pub mod store;

pub use agent::Agent;
pub use ai_provider::{
    ClaudeProvider, IncidentAnalyzer, RcaConfidence, RcaError, RcaProvider, RcaReport, RcaRequest,
};
pub use alerts::{AlertManager, AlertRecord, AlertStatistics};
pub use analyzer::{
    AdaptiveBaseline, BaselineSummary, CorrelationEngine, RuleDetector, TimeSeriesAnalyzer,
};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use model::{
    Anomaly, AnomalyKind, Evidence, Incident, IncidentStatus, LogRecord, MonitorStatus,
    MonitoringState, SampleLog, Severity,
};
pub use monitor::Monitor;
pub use store::LogStore;
