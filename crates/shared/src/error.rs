//! Error body handling shared by both services.

use serde::{Deserialize, Serialize};

/// Error envelope returned by the matchmaker and gateway on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

/// Attempt to pull the user-facing message out of an error body.
/// Returns `None` for bodies that are not an `{"error": "..."}` object or carry a blank message.
pub fn try_error_message(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;
    let message = parsed.error.trim();
    if message.is_empty() {
        return None;
    }
    Some(message.to_string())
}

/// Outcome of a single failed HTTP exchange, before it is given a domain meaning.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_error_field() {
        assert_eq!(
            try_error_message(r#"{"error":"no free cars"}"#).as_deref(),
            Some("no free cars")
        );
    }

    #[test]
    fn rejects_non_envelope_bodies() {
        assert_eq!(try_error_message("bad gateway"), None);
        assert_eq!(try_error_message(r#"{"error":"   "}"#), None);
        assert_eq!(try_error_message(r#"{"message":"nope"}"#), None);
    }
}
