use thiserror::Error;

/// Message shown when the transport itself failed.
pub const NETWORK_FAILURE_MESSAGE: &str = "Network request failed";

/// Message shown when the server rejected a request without saying why.
pub const REJECTED_FALLBACK_MESSAGE: &str = "Request failed";

#[derive(Debug, Error)]
pub enum DetectError {
    /// Transport-level failure: unreachable host, timeout, connection reset.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// Transport succeeded but the server answered `success: false` or a non-2xx status.
    #[error("server rejected request: {message}")]
    ServerRejected { message: String },

    /// A precondition of the call was not met.
    #[error("invalid call: {0}")]
    CallerError(String),

    /// The server answered with a body we could not interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A reset superseded the request before its response arrived.
    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DetectError {
    pub fn rejected(message: impl Into<String>) -> Self {
        DetectError::ServerRejected {
            message: message.into(),
        }
    }

    pub fn caller(message: impl Into<String>) -> Self {
        DetectError::CallerError(message.into())
    }

    /// Short text suitable for direct display (toast, status line).
    pub fn user_message(&self) -> String {
        match self {
            DetectError::NetworkFailure(_) => NETWORK_FAILURE_MESSAGE.to_string(),
            DetectError::ServerRejected { message } if message.trim().is_empty() => {
                REJECTED_FALLBACK_MESSAGE.to_string()
            }
            DetectError::ServerRejected { message } => message.clone(),
            DetectError::CallerError(message) | DetectError::Cancelled(message) => message.clone(),
            DetectError::InvalidResponse(_) => "Unexpected response from server".to_string(),
            DetectError::Storage(_) | DetectError::Json(_) => {
                "Could not save data on this device".to_string()
            }
        }
    }

    /// Whether the failure came from talking to the server (and may go away on retry).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DetectError::NetworkFailure(_)
                | DetectError::ServerRejected { .. }
                | DetectError::InvalidResponse(_)
        )
    }
}

impl From<reqwest::Error> for DetectError {
    fn from(e: reqwest::Error) -> Self {
        DetectError::NetworkFailure(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DetectError>;
