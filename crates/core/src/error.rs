use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy for snapshot fetches. Stream failures never appear here;
/// the stream client recovers them internally and only moves the connection
/// status.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    /// No credential, or the server rejected it (expired/revoked).
    #[error("unauthenticated")]
    Unauthenticated,
    /// Credential is valid but lacks access to the organization.
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    /// The response decoded but failed the schema check, or the request was
    /// rejected as malformed.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Transport failure or timeout.
    #[error("network error: {0}")]
    Network(String),
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Unauthenticated => "unauthenticated",
            SyncError::Forbidden => "forbidden",
            SyncError::NotFound => "not_found",
            SyncError::Validation(_) => "validation",
            SyncError::Network(_) => "network",
        }
    }
}

/// Structured error body: `{"error": {"code": "...", "message": "..."}}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}
