//! Error taxonomy for the request layer
//!
//! Every failure surfaced to a caller carries a stable machine-readable
//! [`ErrorCode`] so consumers can branch on behavior (retryable, timeout,
//! cancelled) instead of inspecting message text.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Stable machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Queue admission rejected due to backpressure
    Overflow,
    /// Task exceeded its allotted time
    Timeout,
    /// Explicit abort by the caller
    Cancelled,
    /// Transport-level failure without a structured response
    NetworkError,
    /// Transport returned a 5xx response
    ServerError,
    /// Transport returned a 4xx response
    ClientError,
    /// Pending work dropped by a queue clear
    QueueCleared,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Overflow => "overflow",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::NetworkError => "network_error",
            ErrorCode::ServerError => "server_error",
            ErrorCode::ClientError => "client_error",
            ErrorCode::QueueCleared => "queue_cleared",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trait for errors that can be retried
pub trait Retryable {
    /// Whether this error is retryable
    fn is_retryable(&self) -> bool;
}

/// Error type for queue and request operations
///
/// Each variant maps to exactly one [`ErrorCode`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// Queue is at capacity; the request was never admitted
    #[error("Queue overflow: {size} pending requests (limit {limit})")]
    Overflow { size: usize, limit: usize },

    /// The request exceeded its allotted time
    #[error("Request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The request was cancelled by the caller
    #[error("Request cancelled")]
    Cancelled,

    /// Transport-level failure (connection refused, DNS, reset, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// Backend returned a server error (status >= 500)
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Backend returned a client error (4xx), not retryable by policy
    #[error("Client error {status}: {message}")]
    Client { status: u16, message: String },

    /// Pending request dropped because the queue was cleared
    #[error("Request dropped: queue cleared")]
    QueueCleared,
}

impl ApiError {
    /// The stable machine-readable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Overflow { .. } => ErrorCode::Overflow,
            ApiError::Timeout { .. } => ErrorCode::Timeout,
            ApiError::Cancelled => ErrorCode::Cancelled,
            ApiError::Network(_) => ErrorCode::NetworkError,
            ApiError::Server { .. } => ErrorCode::ServerError,
            ApiError::Client { .. } => ErrorCode::ClientError,
            ApiError::QueueCleared => ErrorCode::QueueCleared,
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } | ApiError::Client { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Build an error from an HTTP response status
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if status >= 500 {
            ApiError::Server {
                status,
                message: message.into(),
            }
        } else {
            ApiError::Client {
                status,
                message: message.into(),
            }
        }
    }
}

impl Retryable for ApiError {
    /// Timeouts, network failures and 5xx responses are transient; 4xx,
    /// cancellation, overflow and clears surface immediately.
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout { .. } | ApiError::Network(_) | ApiError::Server { .. }
        )
    }
}
