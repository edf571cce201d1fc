//! Error types for the challenge client
//!
//! Payloads are strings so one failure can be handed to every caller waiting
//! on the same refresh.

use reqwest::StatusCode;

/// Main error type for client operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Token refresh failed: {detail}")]
    RefreshFailed { status: Option<u16>, detail: String },

    #[error("Session expired, login required")]
    SessionExpired,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Token storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// HTTP status carried by the failure, if the server produced one
    pub fn status_code(&self) -> Option<StatusCode> {
        let raw = match self {
            Self::Status { status, .. } => Some(*status),
            Self::RefreshFailed { status, .. } => *status,
            _ => None,
        }?;
        StatusCode::from_u16(raw).ok()
    }

    /// Whether this failure is a 401 from the server.
    ///
    /// 403 is deliberately not included: only 401 starts token recovery.
    pub fn is_unauthorized(&self) -> bool {
        self.status_code() == Some(StatusCode::UNAUTHORIZED)
    }

    /// Whether the failure ends the current session
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RefreshFailed { .. } | Self::SessionExpired)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<reqwest::header::InvalidHeaderValue> for ClientError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        Self::Internal(format!("Invalid header value: {}", err))
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
