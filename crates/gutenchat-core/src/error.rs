//! The single error kind shared by every client operation.
//!
//! Network failures, non-2xx responses, malformed streams, bad tool-call
//! arguments, and zero-choices responses all normalize into
//! [`ChatCompletionError`] before reaching callers. The HTTP status and the
//! upstream error code are preserved so callers can branch on them.

use thiserror::Error;

/// Error returned by chat completion calls.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ChatCompletionError {
    /// Human-readable description of the failure.
    pub message: String,
    /// HTTP status code, when the failure came from a non-2xx response.
    pub status: Option<u16>,
    /// Upstream error code (e.g. `"invalid_api_key"`), when one was supplied.
    pub code: Option<String>,
}

impl ChatCompletionError {
    /// A failure with no transport status attached (parse errors,
    /// zero-choices responses, malformed streams).
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            code: None,
        }
    }

    /// A failure carrying the HTTP status and optional upstream code.
    pub fn with_status(message: impl Into<String>, status: u16, code: Option<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
            code,
        }
    }

    /// Wrap a raw transport error. No status: the request never produced
    /// a response.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::new(format!("chat endpoint request failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_message() {
        let err = ChatCompletionError::with_status("rate limited", 429, Some("rate_limit".into()));
        assert_eq!(err.to_string(), "rate limited");
        assert_eq!(err.status, Some(429));
        assert_eq!(err.code.as_deref(), Some("rate_limit"));
    }

    #[test]
    fn test_plain_error_has_no_status() {
        let err = ChatCompletionError::new("no choices");
        assert_eq!(err.status, None);
        assert_eq!(err.code, None);
    }
}
