//! Classification of failures reported by the HTTP transport.
//!
//! The governance layer never performs I/O itself. It only needs to know
//! whether a failed operation got an HTTP response at all and, if so, which
//! status code came back.

use thiserror::Error;

/// HTTP status returned when the backend asks the client to slow down.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Implemented by error types produced by the caller-supplied transport.
pub trait TransportFailure: std::fmt::Display {
    /// Status code of the response, or `None` when no response arrived.
    fn status(&self) -> Option<u16>;

    /// Rate-limited responses and network-level failures are worth retrying.
    fn is_retryable(&self) -> bool {
        match self.status() {
            None => true,
            Some(status) => status == TOO_MANY_REQUESTS,
        }
    }
}

/// Plain transport error for callers that do not bring their own type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", describe(.status, .message))]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
}

fn describe(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("request failed with status {status}: {message}"),
        None => format!("request failed without a response: {message}"),
    }
}

impl TransportError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn rate_limited() -> Self {
        Self::http(TOO_MANY_REQUESTS, "too many requests")
    }
}

impl TransportFailure for TransportError {
    fn status(&self) -> Option<u16> {
        self.status
    }
}
