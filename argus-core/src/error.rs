use thiserror::Error;

/// Failure taxonomy for the agent. External I/O problems surface as
/// `Transport`, malformed upstream payloads as `Parse`; an unconfigured
/// collaborator is downgraded to a no-op by its owner and never fatal.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{0} is not configured")]
    ConfigurationMissing(&'static str),

    #[error("state invariant violated: {0}")]
    State(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AgentError::DeadlineExceeded(err.to_string())
        } else if err.is_decode() {
            AgentError::Parse(err.to_string())
        } else {
            AgentError::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
