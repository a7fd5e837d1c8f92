//! Error types for QFlip Core
//!
//! Transport and malformed-response failures are always recovered by the
//! agent's local fallback. Application errors reported by the external
//! service are surfaced from the single-flip path only.

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Main error type for core operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Network failure, timeout or non-2xx status reaching the external service
    #[error("Transport error: {0}")]
    Transport(String),

    /// The external service answered but reported `success: false`
    #[error("Service application error: {0}")]
    ServiceApplication(String),

    /// The external service answered with a body we could not interpret
    #[error("Malformed service response: {0}")]
    MalformedResponse(String),

    #[error("Requested {requested} trials, maximum is {max}")]
    BatchTooLarge { requested: usize, max: usize },

    #[error("A batch must contain at least one trial")]
    EmptyBatch,

    #[error("Privacy parameter epsilon must be finite and positive, got {0}")]
    InvalidEpsilon(f64),
}

impl CoreError {
    /// Whether the agent should silently fall back to local generation
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::Transport(_) | CoreError::MalformedResponse(_)
        )
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CoreError::MalformedResponse(e.to_string())
        } else {
            CoreError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::MalformedResponse(e.to_string())
    }
}
