//! Errors raised while talking to the backend chat/session service

use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single backend call.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Backend unreachable, connection reset, or the HTTP client timed out
    #[error("backend transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Backend answered with a non-success status
    #[error("backend returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// Backend answered 2xx but the payload could not be used
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    /// The caller went away before the backend answered
    #[error("backend call cancelled")]
    Cancelled,
}

impl BackendError {
    /// True for gateway-style failures (unreachable, timeout, reset)
    pub fn is_transport(&self) -> bool {
        matches!(self, BackendError::Transport(_))
    }

    /// Status reported by the backend, if it answered at all
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            BackendError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(Box::new(err))
    }
}
