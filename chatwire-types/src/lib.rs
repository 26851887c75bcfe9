//! Shared types for the Chatwire request layer
//!
//! This crate provides the error taxonomy, status enums, circuit breaker
//! snapshot types, the error-sink interface and the observer registry used
//! by the queue, monitor and client crates.

pub mod error;
pub mod http;
pub mod observer;
pub mod report;
pub mod status;

// Re-export main types for convenience
pub use error::{ApiError, ErrorCode, Retryable};
pub use http::{HttpMethod, HttpResponse, RequestConfig};
pub use observer::{Listeners, Subscription};
pub use report::{ErrorCategory, ErrorReport, ErrorSeverity, ErrorSink, NullErrorSink, TracingErrorSink};
pub use status::{CircuitBreakerStatus, CircuitState, ConnectionStatus, RequestStatus};
