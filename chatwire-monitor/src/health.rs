//! Health monitor
//!
//! Probes a health endpoint on a fixed interval, classifies the connection
//! (connected / slow / disconnected / unknown) and notifies subscribers when
//! the classification changes. Isolated probe failures do not flip the
//! status; only a run of consecutive failures does.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use chatwire_types::{ApiError, ConnectionStatus, Listeners, Subscription};

use crate::config::MonitorConfig;

/// A single liveness probe against the backend
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<(), ApiError>;
}

/// Probe implementation issuing a lightweight GET against a health endpoint
pub struct HttpHealthProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpHealthProbe {
    pub fn new(url: impl Into<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> Result<(), ApiError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ApiError::from_status(
                status.as_u16(),
                status.canonical_reason().unwrap_or("health probe failed"),
            ))
        }
    }
}

/// Environment-reported offline condition
///
/// When the environment already knows it is offline, the probe is skipped
/// entirely and the monitor reports disconnected without a network call.
pub trait OfflineSignal: Send + Sync {
    fn is_offline(&self) -> bool;
}

/// Default signal for environments with no offline notification
#[derive(Debug, Default, Clone)]
pub struct AlwaysOnline;

impl OfflineSignal for AlwaysOnline {
    fn is_offline(&self) -> bool {
        false
    }
}

/// Snapshot of the monitor's view of the connection
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: ConnectionStatus,
    pub last_check: Option<DateTime<Utc>>,
    #[serde(with = "humantime_serde")]
    pub response_time: Option<Duration>,
    pub error_count: u64,
    pub consecutive_errors: u32,
}

impl HealthStatus {
    fn unknown() -> Self {
        Self {
            status: ConnectionStatus::Unknown,
            last_check: None,
            response_time: None,
            error_count: 0,
            consecutive_errors: 0,
        }
    }
}

/// Status transition delivered to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub old: ConnectionStatus,
    pub new: ConnectionStatus,
}

struct MonitorInner {
    probe: Arc<dyn HealthProbe>,
    offline: Arc<dyn OfflineSignal>,
    config: MonitorConfig,
    state: Mutex<HealthStatus>,
    listeners: Listeners<StatusChange>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

/// Periodic health prober with subscriber notification
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl Clone for HealthMonitor {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl HealthMonitor {
    pub fn new(probe: Arc<dyn HealthProbe>, config: MonitorConfig) -> Self {
        Self::with_offline_signal(probe, Arc::new(AlwaysOnline), config)
    }

    pub fn with_offline_signal(
        probe: Arc<dyn HealthProbe>,
        offline: Arc<dyn OfflineSignal>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                probe,
                offline,
                config,
                state: Mutex::new(HealthStatus::unknown()),
                listeners: Listeners::new(),
                shutdown: Mutex::new(None),
            }),
        }
    }

    /// Start the periodic probe loop; the first probe fires immediately
    pub fn start(&self) {
        let mut shutdown = self.inner.shutdown.lock();
        if shutdown.is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        *shutdown = Some(tx);
        drop(shutdown);

        let monitor = self.clone();
        let interval = self.inner.config.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.check_now().await;
                    }
                    _ = rx.changed() => {
                        debug!("health monitor stopping");
                        break;
                    }
                }
            }
        });
        info!(interval = ?interval, "health monitor started");
    }

    /// Stop the probe loop; the last observed status remains readable
    pub fn stop(&self) {
        if let Some(tx) = self.inner.shutdown.lock().take() {
            let _ = tx.send(true);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.shutdown.lock().is_some()
    }

    /// Run one probe cycle and return the resulting classification
    pub async fn check_now(&self) -> ConnectionStatus {
        let config = &self.inner.config;
        let old = self.inner.state.lock().status;

        let new = if self.inner.offline.is_offline() {
            let mut state = self.inner.state.lock();
            state.status = ConnectionStatus::Disconnected;
            state.last_check = Some(Utc::now());
            state.response_time = None;
            ConnectionStatus::Disconnected
        } else {
            let started = Instant::now();
            let result =
                tokio::time::timeout(config.probe_timeout, self.inner.probe.probe()).await;
            let elapsed = started.elapsed();

            let mut state = self.inner.state.lock();
            state.last_check = Some(Utc::now());
            match result {
                Ok(Ok(())) => {
                    state.consecutive_errors = 0;
                    state.response_time = Some(elapsed);
                    // A response slower than the threshold is alive but
                    // degraded.
                    state.status = if elapsed >= config.slow_threshold {
                        ConnectionStatus::Slow
                    } else {
                        ConnectionStatus::Connected
                    };
                }
                Ok(Err(err)) => {
                    state.error_count += 1;
                    state.consecutive_errors += 1;
                    // No measurement from a failed probe
                    state.response_time = None;
                    debug!(error = %err, consecutive = state.consecutive_errors, "health probe failed");
                    if state.consecutive_errors >= config.max_consecutive_failures {
                        state.status = ConnectionStatus::Disconnected;
                    }
                }
                Err(_) => {
                    state.error_count += 1;
                    state.consecutive_errors += 1;
                    state.response_time = None;
                    debug!(consecutive = state.consecutive_errors, "health probe timed out");
                    if state.consecutive_errors >= config.max_consecutive_failures {
                        state.status = ConnectionStatus::Disconnected;
                    }
                }
            }
            state.status
        };

        if old != new {
            warn!(%old, %new, "connection status changed");
            self.inner.listeners.emit(&StatusChange { old, new });
        }
        new
    }

    /// Snapshot of the current health status
    pub fn status(&self) -> HealthStatus {
        self.inner.state.lock().clone()
    }

    /// Subscribe to coarse status transitions; fires only when the enum
    /// value actually changes, not on every probe
    pub fn on_status_change<F>(&self, listener: F) -> Subscription<StatusChange>
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    pub(crate) fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct ScriptedProbe {
        delay: Duration,
        fail: AtomicBool,
    }

    impl ScriptedProbe {
        fn healthy() -> Self {
            Self {
                delay: Duration::ZERO,
                fail: AtomicBool::new(false),
            }
        }

        fn failing() -> Self {
            Self {
                delay: Duration::ZERO,
                fail: AtomicBool::new(true),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self) -> Result<(), ApiError> {
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                Err(ApiError::Network("probe refused".into()))
            } else {
                Ok(())
            }
        }
    }

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_millis(10),
            probe_timeout: Duration::from_millis(100),
            slow_threshold: Duration::from_millis(30),
            max_consecutive_failures: 3,
            history_size: 10,
        }
    }

    #[tokio::test]
    async fn successful_probe_classifies_connected() {
        let monitor = HealthMonitor::new(Arc::new(ScriptedProbe::healthy()), fast_config());
        assert_eq!(monitor.check_now().await, ConnectionStatus::Connected);

        let status = monitor.status();
        assert_eq!(status.consecutive_errors, 0);
        assert!(status.response_time.is_some());
        assert!(status.last_check.is_some());
    }

    #[tokio::test]
    async fn slow_probe_classifies_slow_not_connected() {
        let monitor = HealthMonitor::new(
            Arc::new(ScriptedProbe::slow(Duration::from_millis(40))),
            fast_config(),
        );
        assert_eq!(monitor.check_now().await, ConnectionStatus::Slow);
    }

    #[tokio::test]
    async fn isolated_failures_do_not_flip_status() {
        let probe = Arc::new(ScriptedProbe::healthy());
        let monitor = HealthMonitor::new(probe.clone(), fast_config());
        assert_eq!(monitor.check_now().await, ConnectionStatus::Connected);

        probe.fail.store(true, Ordering::SeqCst);
        assert_eq!(monitor.check_now().await, ConnectionStatus::Connected);
        assert_eq!(monitor.check_now().await, ConnectionStatus::Connected);
        // Third consecutive failure crosses the threshold
        assert_eq!(monitor.check_now().await, ConnectionStatus::Disconnected);
        assert_eq!(monitor.status().error_count, 3);
    }

    #[tokio::test]
    async fn failed_probe_clears_response_time() {
        let probe = Arc::new(ScriptedProbe::healthy());
        let monitor = HealthMonitor::new(probe.clone(), fast_config());

        monitor.check_now().await;
        assert!(monitor.status().response_time.is_some());

        probe.fail.store(true, Ordering::SeqCst);
        monitor.check_now().await;
        assert!(monitor.status().response_time.is_none());
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let probe = Arc::new(ScriptedProbe::failing());
        let monitor = HealthMonitor::new(probe.clone(), fast_config());

        monitor.check_now().await;
        monitor.check_now().await;
        probe.fail.store(false, Ordering::SeqCst);
        assert_eq!(monitor.check_now().await, ConnectionStatus::Connected);
        assert_eq!(monitor.status().consecutive_errors, 0);
        // Total error count is preserved
        assert_eq!(monitor.status().error_count, 2);
    }

    #[tokio::test]
    async fn notifies_only_on_transition() {
        let probe = Arc::new(ScriptedProbe::healthy());
        let monitor = HealthMonitor::new(probe.clone(), fast_config());

        let notifications = Arc::new(AtomicU32::new(0));
        let notifications_clone = notifications.clone();
        let _sub = monitor.on_status_change(move |_| {
            notifications_clone.fetch_add(1, Ordering::SeqCst);
        });

        monitor.check_now().await; // Unknown -> Connected
        monitor.check_now().await; // no change
        monitor.check_now().await; // no change
        assert_eq!(notifications.load(Ordering::SeqCst), 1);

        probe.fail.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            monitor.check_now().await;
        }
        // Connected -> Disconnected fired exactly once more
        assert_eq!(notifications.load(Ordering::SeqCst), 2);
    }

    struct ForcedOffline;

    impl OfflineSignal for ForcedOffline {
        fn is_offline(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn offline_signal_short_circuits_probe() {
        // A failing probe would eventually disconnect anyway; a panicking
        // one proves the probe is never called.
        struct PanickingProbe;

        #[async_trait]
        impl HealthProbe for PanickingProbe {
            async fn probe(&self) -> Result<(), ApiError> {
                panic!("probe must not run while offline");
            }
        }

        let monitor = HealthMonitor::with_offline_signal(
            Arc::new(PanickingProbe),
            Arc::new(ForcedOffline),
            fast_config(),
        );
        assert_eq!(monitor.check_now().await, ConnectionStatus::Disconnected);
        assert_eq!(monitor.status().error_count, 0);
    }

    #[tokio::test]
    async fn start_and_stop_probe_loop() {
        let monitor = HealthMonitor::new(Arc::new(ScriptedProbe::healthy()), fast_config());
        assert!(!monitor.is_running());

        monitor.start();
        assert!(monitor.is_running());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(monitor.status().status, ConnectionStatus::Connected);

        monitor.stop();
        assert!(!monitor.is_running());
    }
}
