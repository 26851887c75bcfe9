//! Error-sink interface
//!
//! Terminal errors are reported to an external logging/persistence
//! subsystem as structured records. Reporting is fire-and-forget: the sink
//! signature is infallible and a sink must never disturb the caller-visible
//! result of the request it describes.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

/// Category of a reported error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transport-level failures
    Network,
    /// Queue backpressure, timeouts, cleared work
    Performance,
}

/// Severity of a reported error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Structured error record accepted by the sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
    pub context: JsonValue,
}

impl ErrorReport {
    pub fn new(category: ErrorCategory, severity: ErrorSeverity, message: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
            context: JsonValue::Null,
        }
    }

    pub fn with_context(mut self, context: JsonValue) -> Self {
        self.context = context;
        self
    }
}

/// Sink accepting structured error records
pub trait ErrorSink: Send + Sync {
    fn report(&self, report: ErrorReport);
}

/// Default sink that forwards reports to `tracing`
#[derive(Debug, Default, Clone)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, report: ErrorReport) {
        match report.severity {
            ErrorSeverity::Info => info!(
                category = ?report.category,
                context = %report.context,
                "{}", report.message
            ),
            ErrorSeverity::Warning => warn!(
                category = ?report.category,
                context = %report.context,
                "{}", report.message
            ),
            ErrorSeverity::Error | ErrorSeverity::Critical => error!(
                category = ?report.category,
                context = %report.context,
                "{}", report.message
            ),
        }
    }
}

/// Sink that discards all reports, for tests
#[derive(Debug, Default, Clone)]
pub struct NullErrorSink;

impl ErrorSink for NullErrorSink {
    fn report(&self, _report: ErrorReport) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_builder() {
        let report = ErrorReport::new(ErrorCategory::Network, ErrorSeverity::Error, "connect failed")
            .with_context(serde_json::json!({ "url": "http://localhost:3000/api/chat" }));

        assert_eq!(report.category, ErrorCategory::Network);
        assert_eq!(report.message, "connect failed");
        assert_eq!(report.context["url"], "http://localhost:3000/api/chat");
    }

    #[test]
    fn severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::Error);
        assert!(ErrorSeverity::Error > ErrorSeverity::Warning);
        assert!(ErrorSeverity::Warning > ErrorSeverity::Info);
    }
}
