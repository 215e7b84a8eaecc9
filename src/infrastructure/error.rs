use crate::domain::models::ConflictInterval;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("not authorized (http {status}): {message}")]
    Unauthorized { status: u16, message: String },
    #[error("booking conflict: {message}")]
    Conflict {
        conflicts: Vec<ConflictInterval>,
        message: String,
    },
    #[error("marketplace api error (http {status}): {message}")]
    Http { status: u16, message: String },
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl InfraError {
    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { status, .. } | Self::Http { status, .. } => Some(*status),
            Self::Conflict { .. } => Some(409),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
