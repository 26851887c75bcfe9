//! Health and proxy monitoring for Chatwire
//!
//! Periodic liveness probing with connection-state classification, plus the
//! proxy-path monitor that derives performance metrics, a composite health
//! score and a qualitative connection assessment from probe history and an
//! injected circuit breaker snapshot.

pub mod config;
pub mod health;
pub mod proxy;
pub mod stats;

// Re-export main types for convenience
pub use config::MonitorConfig;
pub use health::{
    AlwaysOnline, HealthMonitor, HealthProbe, HealthStatus, HttpHealthProbe, OfflineSignal,
    StatusChange,
};
pub use proxy::{
    health_score, CircuitBreakerProvider, ConnectionQuality, NoBreaker, ProxyDiagnostics,
    ProxyMonitor, ProxyStats, ProxyStatsProvider, QualityAssessment, ResponseTimeMetrics,
    SharedProxyStats,
};
pub use stats::{calculate_average, calculate_median, calculate_percentile};
