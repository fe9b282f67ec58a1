//! Error taxonomy surfaced to callers of the sync client.

use ffb_shared::{try_error_message, ApiError};
use reqwest::StatusCode;

use crate::config::ConfigError;

/// Every way a sync-client operation can fail.
///
/// Action failures are returned to the caller as values and are also
/// reflected in the status line; nothing here is raised across a task
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Non-2xx response. `message` is the server's `error` text when it sent
    /// one, otherwise the status reason.
    #[error("{message}")]
    Transport { status: u16, message: String },
    /// No HTTP response at all.
    #[error("network error: {0}")]
    Network(String),
    /// A response or frame that could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
    /// Local validation failed; no request was made.
    #[error("{0}")]
    Precondition(String),
    /// The matchmaker has no free car.
    #[error("{0}")]
    NoCapacity(String),
    /// The server refused a claim or release as not applicable to the caller.
    #[error("{0}")]
    InvalidOperation(String),
    /// The sync client was shut down before the result could be applied.
    #[error("sync client is shut down")]
    Closed,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Classify a failed `/claim` exchange.
    pub fn from_claim(err: ApiError) -> Self {
        match Self::from(err) {
            SyncError::Transport { status, message }
                if matches!(status, 409 | 503) || message.to_lowercase().contains("no free") =>
            {
                SyncError::NoCapacity(message)
            }
            other => other,
        }
    }

    /// Classify a failed `/release` exchange.
    pub fn from_release(err: ApiError) -> Self {
        match Self::from(err) {
            SyncError::Transport { status, message }
                if matches!(status, 400 | 403 | 404 | 409) || {
                    let lower = message.to_lowercase();
                    lower.contains("not found") || lower.contains("not owned")
                } =>
            {
                SyncError::InvalidOperation(message)
            }
            other => other,
        }
    }
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Network(msg) => SyncError::Network(msg),
            ApiError::Http { status, body } => SyncError::Transport {
                status,
                message: http_message(status, &body),
            },
            ApiError::Deserialize(msg) => SyncError::Decode(msg),
        }
    }
}

/// User-facing text for a non-2xx response.
pub fn http_message(status: u16, body: &str) -> String {
    if let Some(message) = try_error_message(body) {
        return message;
    }
    if let Some(reason) = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
    {
        return reason.to_string();
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {status}")
    } else {
        trimmed.to_string()
    }
}

/// Reject blank identifiers before they reach the network.
pub(crate) fn require(value: &str, what: &str) -> Result<(), SyncError> {
    if value.trim().is_empty() {
        return Err(SyncError::Precondition(format!("{what} is required")));
    }
    Ok(())
}
