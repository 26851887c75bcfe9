//! Proxy monitor
//!
//! Specialized monitor for the dev-proxy path. On top of the plain health
//! cycle it tracks request counters and a rolling response-time history,
//! derives percentile metrics and a composite health score, and folds an
//! injected circuit breaker snapshot into a qualitative connection
//! assessment with human-readable issues and recommendations.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use chatwire_types::{CircuitBreakerStatus, CircuitState, ConnectionStatus, Subscription};

use crate::config::MonitorConfig;
use crate::health::{HealthMonitor, HealthProbe, HealthStatus, StatusChange};
use crate::stats::{calculate_average, calculate_median, calculate_percentile};

/// Read-only source of the proxy's circuit breaker snapshot
///
/// The breaker lives in the proxying layer; the monitor only observes it.
pub trait CircuitBreakerProvider: Send + Sync {
    fn status(&self) -> CircuitBreakerStatus;
}

/// Provider for environments without a breaker; always reports closed
#[derive(Debug, Default, Clone)]
pub struct NoBreaker;

impl CircuitBreakerProvider for NoBreaker {
    fn status(&self) -> CircuitBreakerStatus {
        CircuitBreakerStatus::default()
    }
}

/// Aggregate request counters observed at the proxy
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProxyStats {
    pub total_requests: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub retries: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Read-only source of proxy request statistics
pub trait ProxyStatsProvider: Send + Sync {
    fn snapshot(&self) -> ProxyStats;
}

/// Shared, writable stats implementation for wiring into a request layer
#[derive(Clone, Default)]
pub struct SharedProxyStats {
    inner: Arc<Mutex<ProxyStats>>,
}

impl SharedProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        let mut stats = self.inner.lock();
        stats.total_requests += 1;
        stats.last_success_at = Some(Utc::now());
    }

    pub fn record_error(&self) {
        let mut stats = self.inner.lock();
        stats.total_requests += 1;
        stats.errors += 1;
        stats.last_error_at = Some(Utc::now());
    }

    pub fn record_timeout(&self) {
        let mut stats = self.inner.lock();
        stats.total_requests += 1;
        stats.timeouts += 1;
        stats.last_error_at = Some(Utc::now());
    }

    pub fn record_retry(&self) {
        self.inner.lock().retries += 1;
    }
}

impl ProxyStatsProvider for SharedProxyStats {
    fn snapshot(&self) -> ProxyStats {
        self.inner.lock().clone()
    }
}

/// Qualitative connection quality label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// Quality label plus the observations that produced it
#[derive(Debug, Clone, Serialize)]
pub struct QualityAssessment {
    pub quality: ConnectionQuality,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Derived response-time metrics over the rolling history
#[derive(Debug, Clone, Serialize)]
pub struct ResponseTimeMetrics {
    pub average_ms: Option<f64>,
    pub median_ms: Option<f64>,
    pub p95_ms: Option<f64>,
}

/// Full diagnostics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ProxyDiagnostics {
    pub health: HealthStatus,
    pub stats: ProxyStats,
    pub circuit_breaker: CircuitBreakerStatus,
    pub response_times: ResponseTimeMetrics,
    pub health_score: f64,
    pub assessment: QualityAssessment,
}

/// Health monitor for the dev-proxy path with derived diagnostics
pub struct ProxyMonitor {
    health: HealthMonitor,
    stats_provider: Arc<dyn ProxyStatsProvider>,
    breaker: Arc<dyn CircuitBreakerProvider>,
    history: Arc<Mutex<VecDeque<f64>>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl ProxyMonitor {
    pub fn new(
        probe: Arc<dyn HealthProbe>,
        stats_provider: Arc<dyn ProxyStatsProvider>,
        breaker: Arc<dyn CircuitBreakerProvider>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            health: HealthMonitor::new(probe, config),
            stats_provider,
            breaker,
            history: Arc::new(Mutex::new(VecDeque::new())),
            shutdown: Mutex::new(None),
        }
    }

    /// Start the periodic probe loop
    pub fn start(self: &Arc<Self>) {
        let mut shutdown = self.shutdown.lock();
        if shutdown.is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        *shutdown = Some(tx);
        drop(shutdown);

        let monitor = Arc::clone(self);
        let interval = self.health.config().interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.check_now().await;
                    }
                    _ = rx.changed() => {
                        debug!("proxy monitor stopping");
                        break;
                    }
                }
            }
        });
        info!(interval = ?interval, "proxy monitor started");
    }

    pub fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.lock().is_some()
    }

    /// Run one probe cycle, recording a successful probe's response time
    /// into the rolling history; failed probes contribute no sample
    pub async fn check_now(&self) -> ConnectionStatus {
        let status = self.health.check_now().await;
        if let Some(rt) = self.health.status().response_time {
            let mut history = self.history.lock();
            history.push_back(rt.as_secs_f64() * 1000.0);
            let cap = self.health.config().history_size;
            while history.len() > cap {
                history.pop_front();
            }
        }
        status
    }

    /// Snapshot of the underlying health status
    pub fn status(&self) -> HealthStatus {
        self.health.status()
    }

    pub fn on_status_change<F>(&self, listener: F) -> Subscription<StatusChange>
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        self.health.on_status_change(listener)
    }

    /// Derived response-time metrics over the rolling history
    pub fn response_time_metrics(&self) -> ResponseTimeMetrics {
        let history: Vec<f64> = self.history.lock().iter().copied().collect();
        ResponseTimeMetrics {
            average_ms: calculate_average(&history),
            median_ms: calculate_median(&history),
            p95_ms: calculate_percentile(&history, 95.0),
        }
    }

    /// Composite 0-100 health score
    pub fn health_score(&self) -> f64 {
        health_score(
            &self.stats_provider.snapshot(),
            self.health.status().consecutive_errors,
        )
    }

    /// Map breaker state and thresholded stats into a quality label with
    /// issues and matching recommendations
    pub fn assess_quality(&self) -> QualityAssessment {
        let breaker = self.breaker.status();
        let stats = self.stats_provider.snapshot();
        let health = self.health.status();
        let config = self.health.config();

        let mut quality = ConnectionQuality::Excellent;
        let mut issues = Vec::new();

        match breaker.state {
            CircuitState::Open => {
                issues.push("Circuit breaker is open, requests are blocked".to_string());
                quality = quality.max(ConnectionQuality::Poor);
            }
            CircuitState::HalfOpen => {
                issues.push("Circuit breaker is half-open, recovery in progress".to_string());
                quality = quality.max(ConnectionQuality::Fair);
            }
            CircuitState::Closed => {}
        }

        if stats.total_requests > 0 {
            let error_rate = stats.errors as f64 / stats.total_requests as f64 * 100.0;
            if error_rate >= 20.0 {
                issues.push(format!("High error rate: {:.1}%", error_rate));
                quality = quality.max(ConnectionQuality::Poor);
            } else if error_rate >= 5.0 {
                issues.push(format!("Elevated error rate: {:.1}%", error_rate));
                quality = quality.max(ConnectionQuality::Good);
            }
        }

        let slow_ms = config.slow_threshold.as_secs_f64() * 1000.0;
        if let Some(avg) = calculate_average(&self.history.lock().iter().copied().collect::<Vec<_>>()) {
            if avg >= slow_ms {
                issues.push(format!("Slow response times: {:.0}ms average", avg));
                quality = quality.max(ConnectionQuality::Fair);
            }
        }

        if health.consecutive_errors >= config.max_consecutive_failures {
            issues.push(format!(
                "{} consecutive failures reaching the backend",
                health.consecutive_errors
            ));
            quality = quality.max(ConnectionQuality::Poor);
        }

        let recommendations = recommendations_for(&issues);
        QualityAssessment {
            quality,
            issues,
            recommendations,
        }
    }

    /// Full diagnostics snapshot for debugging and dashboards
    pub fn diagnostics(&self) -> ProxyDiagnostics {
        ProxyDiagnostics {
            health: self.health.status(),
            stats: self.stats_provider.snapshot(),
            circuit_breaker: self.breaker.status(),
            response_times: self.response_time_metrics(),
            health_score: self.health_score(),
            assessment: self.assess_quality(),
        }
    }
}

/// Composite health score over aggregate counters
///
/// Starts at 100 and subtracts the error-rate percentage, twice the
/// timeout-rate percentage, and 10 points per consecutive failure (capped at
/// 50); adds a recovery bonus when the latest success postdates the latest
/// error. No requests means no evidence of failure, so the score is 100.
pub fn health_score(stats: &ProxyStats, consecutive_failures: u32) -> f64 {
    if stats.total_requests == 0 {
        return 100.0;
    }
    let total = stats.total_requests as f64;
    let error_rate = stats.errors as f64 / total * 100.0;
    let timeout_rate = stats.timeouts as f64 / total * 100.0;
    let failure_penalty = (consecutive_failures as f64 * 10.0).min(50.0);

    let mut score = 100.0 - error_rate - 2.0 * timeout_rate - failure_penalty;

    if let (Some(success), Some(error)) = (stats.last_success_at, stats.last_error_at) {
        if success > error {
            score += 10.0;
        }
    }
    score.clamp(0.0, 100.0)
}

fn recommendations_for(issues: &[String]) -> Vec<String> {
    let mut recommendations = Vec::new();
    for issue in issues {
        let suggestion = if issue.contains("error rate") {
            "Review backend logs for recurring errors"
        } else if issue.contains("response times") {
            "Check backend performance and load"
        } else if issue.contains("consecutive failures") {
            "Check network stability between the proxy and backend"
        } else if issue.contains("Circuit breaker") {
            "Wait for the breaker's automatic recovery before retrying"
        } else {
            continue;
        };
        if !recommendations.iter().any(|r| r == suggestion) {
            recommendations.push(suggestion.to_string());
        }
    }
    recommendations
}
