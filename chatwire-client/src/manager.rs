//! Request manager
//!
//! The HTTP-request-shaped facade over the queue: assigns request ids,
//! deduplicates identical in-flight requests, infers priority / timeout /
//! batchability from the request shape, executes the transport call with
//! cooperative cancellation, and tracks a bounded history plus aggregate
//! statistics.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info};
use uuid::Uuid;

use chatwire_queue::{EnqueueOptions, QueueConfig, QueuePriority, QueueStats, RequestQueue};
use chatwire_types::{
    ApiError, ErrorCategory, ErrorCode, ErrorReport, ErrorSeverity, ErrorSink, HttpMethod,
    HttpResponse, RequestConfig, RequestStatus, TracingErrorSink,
};

use crate::transport::Transport;

/// Manager configuration; embeds the queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Number of completed requests retained in the history
    pub history_size: usize,

    /// Whether identical in-flight requests are coalesced by default
    pub dedup_default: bool,

    #[serde(default)]
    pub queue: QueueConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            history_size: 100,
            dedup_default: true,
            queue: QueueConfig::default(),
        }
    }
}

/// Per-request overrides; unset fields are inferred from the request shape
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub priority: Option<QueuePriority>,
    pub timeout: Option<Duration>,
    pub batchable: Option<bool>,
    pub dedup: Option<bool>,
}

impl RequestOptions {
    pub fn with_priority(mut self, priority: QueuePriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn batchable(mut self, batchable: bool) -> Self {
        self.batchable = Some(batchable);
        self
    }

    pub fn dedup(mut self, dedup: bool) -> Self {
        self.dedup = Some(dedup);
        self
    }
}

/// One completed request in the bounded history
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub id: Uuid,
    pub url: String,
    pub method: HttpMethod,
    pub status: RequestStatus,
    pub started_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub error_code: Option<ErrorCode>,
}

/// Aggregate request statistics
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub active: usize,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    pub success_rate: f64,
    pub queue: QueueStats,
}

type SharedResult = Shared<BoxFuture<'static, Result<HttpResponse, ApiError>>>;

/// Handle to a submitted request; awaits to its settlement
///
/// The id is usable with [`RequestManager::cancel`] while the request is
/// still pending. Deduplicated callers receive the original request's id.
pub struct PendingRequest {
    pub id: Uuid,
    shared: SharedResult,
}

impl Future for PendingRequest {
    type Output = Result<HttpResponse, ApiError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.shared.poll_unpin(cx)
    }
}

struct Tracked {
    queue_id: u64,
    cancel: watch::Sender<bool>,
    dedup_key: Option<String>,
}

/// Resolves once the cancel flag flips; never resolves if the sender is
/// dropped without cancelling
async fn wait_cancelled(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[derive(Default)]
struct Counters {
    total: u64,
    succeeded: u64,
    failed: u64,
    cancelled: u64,
    timed_out: u64,
}

struct Inflight {
    id: Uuid,
    shared: SharedResult,
}

struct ManagerInner {
    queue: RequestQueue<HttpResponse>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn ErrorSink>,
    config: ManagerConfig,
    inflight: Mutex<HashMap<String, Inflight>>,
    tracked: Mutex<HashMap<Uuid, Tracked>>,
    history: Mutex<VecDeque<RequestRecord>>,
    counters: Mutex<Counters>,
}

/// Request-id assignment, deduplication, option inference, cancellation,
/// history and stats over a [`RequestQueue`]
pub struct RequestManager {
    inner: Arc<ManagerInner>,
}

impl Clone for RequestManager {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl RequestManager {
    pub fn new(transport: Arc<dyn Transport>, config: ManagerConfig) -> Self {
        Self::with_sink(transport, Arc::new(TracingErrorSink), config)
    }

    pub fn with_sink(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn ErrorSink>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                queue: RequestQueue::new(config.queue.clone()),
                transport,
                sink,
                config,
                inflight: Mutex::new(HashMap::new()),
                tracked: Mutex::new(HashMap::new()),
                history: Mutex::new(VecDeque::new()),
                counters: Mutex::new(Counters::default()),
            }),
        }
    }

    /// Submit a request; unset options are inferred from its shape
    ///
    /// With deduplication enabled, an identical pending request (same method
    /// and URL) is joined instead of issuing a second transport call.
    pub fn submit(&self, config: RequestConfig, options: RequestOptions) -> PendingRequest {
        let resolved = resolve(&config, &options, &self.inner.config);
        let key = config.dedup_key();
        let id = Uuid::new_v4();

        // Callers await a relay of the settlement so the dedup entry can be
        // reserved before the queue is touched
        let (relay_tx, relay_rx) = oneshot::channel::<Result<HttpResponse, ApiError>>();
        let shared: SharedResult = async move {
            match relay_rx.await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Cancelled),
            }
        }
        .boxed()
        .shared();

        if resolved.dedup {
            // One lock acquisition covers the lookup and the reservation, so
            // concurrent identical submits cannot both miss the map
            let mut inflight = self.inner.inflight.lock();
            if let Some(entry) = inflight.get(&key) {
                debug!(key = %key, id = %entry.id, "joining in-flight request");
                return PendingRequest {
                    id: entry.id,
                    shared: entry.shared.clone(),
                };
            }
            inflight.insert(
                key.clone(),
                Inflight {
                    id,
                    shared: shared.clone(),
                },
            );
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);

        let mut enqueue = EnqueueOptions::default().with_priority(resolved.priority);
        if resolved.batchable {
            enqueue = enqueue.batchable();
        }
        if let Some(timeout) = resolved.timeout {
            enqueue = enqueue.with_timeout(timeout);
        }

        // The cancel signal reaches into the task itself so an abort stops
        // the transport call mid-flight, not just the caller's view of it
        let transport = Arc::clone(&self.inner.transport);
        let task_config = config.clone();
        let (queue_id, settled) = self.inner.queue.enqueue_with_id(
            move || {
                let transport = Arc::clone(&transport);
                let config = task_config.clone();
                let cancel = cancel_rx.clone();
                async move {
                    tokio::select! {
                        result = transport.send(&config) => result,
                        _ = wait_cancelled(cancel) => Err(ApiError::Cancelled),
                    }
                }
            },
            enqueue,
        );

        self.inner.tracked.lock().insert(
            id,
            Tracked {
                queue_id,
                cancel: cancel_tx,
                dedup_key: resolved.dedup.then(|| key.clone()),
            },
        );

        debug!(
            %id,
            method = %config.method,
            url = %config.url,
            priority = ?resolved.priority,
            batchable = resolved.batchable,
            "request submitted"
        );

        // Settlement bookkeeping runs regardless of whether the caller keeps
        // polling its handle
        let manager = self.clone();
        let url = config.url;
        let method = config.method;
        let started_at = Utc::now();
        let started = Instant::now();
        tokio::spawn(async move {
            let result = settled.await;
            let _ = relay_tx.send(result.clone());
            manager.settle(id, url, method, started_at, started.elapsed(), &result);
        });

        PendingRequest { id, shared }
    }

    /// Cancel a tracked request; returns whether one was found
    ///
    /// A still-pending request is removed from the queue outright, its task
    /// never invoked; an in-flight request has its transport call aborted.
    pub fn cancel(&self, id: Uuid) -> bool {
        let queue_id = {
            let tracked = self.inner.tracked.lock();
            match tracked.get(&id) {
                Some(entry) => {
                    let _ = entry.cancel.send(true);
                    entry.queue_id
                }
                None => return false,
            }
        };
        debug!(%id, "cancelling request");
        self.inner.queue.cancel_pending(queue_id);
        true
    }

    /// Clear the queue and cancel every tracked request; returns the count
    pub fn cancel_all(&self) -> usize {
        let cleared = self.inner.queue.clear();
        let count = {
            let tracked = self.inner.tracked.lock();
            for entry in tracked.values() {
                let _ = entry.cancel.send(true);
            }
            tracked.len()
        };
        info!(cancelled = count, cleared, "cancelled all requests");
        count
    }

    /// Completed requests, most recent first, bounded by `history_size`
    pub fn history(&self) -> Vec<RequestRecord> {
        self.inner.history.lock().iter().cloned().collect()
    }

    pub fn stats(&self) -> ManagerStats {
        let counters = self.inner.counters.lock();
        let success_rate = if counters.total == 0 {
            1.0
        } else {
            counters.succeeded as f64 / counters.total as f64
        };
        ManagerStats {
            active: self.inner.tracked.lock().len(),
            total: counters.total,
            succeeded: counters.succeeded,
            failed: counters.failed,
            cancelled: counters.cancelled,
            timed_out: counters.timed_out,
            success_rate,
            queue: self.inner.queue.stats(),
        }
    }

    /// The underlying queue, for pause/resume and event subscription
    pub fn queue(&self) -> &RequestQueue<HttpResponse> {
        &self.inner.queue
    }

    fn settle(
        &self,
        id: Uuid,
        url: String,
        method: HttpMethod,
        started_at: DateTime<Utc>,
        duration: Duration,
        result: &Result<HttpResponse, ApiError>,
    ) {
        let removed = self.inner.tracked.lock().remove(&id);
        if let Some(tracked) = removed {
            if let Some(key) = tracked.dedup_key {
                let mut inflight = self.inner.inflight.lock();
                // A later request may have re-used the key already
                if inflight.get(&key).map(|e| e.id) == Some(id) {
                    inflight.remove(&key);
                }
            }
        }

        let (status, error_code) = match result {
            Ok(_) => (RequestStatus::Success, None),
            Err(err) => (
                match err.code() {
                    ErrorCode::Timeout => RequestStatus::Timeout,
                    ErrorCode::Cancelled => RequestStatus::Cancelled,
                    _ => RequestStatus::Error,
                },
                Some(err.code()),
            ),
        };

        {
            let mut counters = self.inner.counters.lock();
            counters.total += 1;
            match status {
                RequestStatus::Success => counters.succeeded += 1,
                RequestStatus::Timeout => counters.timed_out += 1,
                RequestStatus::Cancelled => counters.cancelled += 1,
                _ => counters.failed += 1,
            }
        }

        {
            let mut history = self.inner.history.lock();
            history.push_front(RequestRecord {
                id,
                url: url.clone(),
                method,
                status,
                started_at,
                duration,
                error_code,
            });
            history.truncate(self.inner.config.history_size);
        }

        if let Err(err) = result {
            self.report(id, &url, method, err);
        }
    }

    /// Report a terminal error to the sink. Cancellation is caller-initiated
    /// and not reported.
    fn report(&self, id: Uuid, url: &str, method: HttpMethod, err: &ApiError) {
        if matches!(err, ApiError::Cancelled) {
            return;
        }
        let (category, severity) = match err.code() {
            ErrorCode::Overflow | ErrorCode::Timeout | ErrorCode::QueueCleared => {
                (ErrorCategory::Performance, ErrorSeverity::Warning)
            }
            _ => (ErrorCategory::Network, ErrorSeverity::Error),
        };
        self.inner.sink.report(
            ErrorReport::new(category, severity, err.to_string()).with_context(json!({
                "request_id": id,
                "url": url,
                "method": method.as_str(),
                "code": err.code().as_str(),
            })),
        );
    }
}

struct Resolved {
    priority: QueuePriority,
    timeout: Option<Duration>,
    batchable: bool,
    dedup: bool,
}

fn resolve(config: &RequestConfig, options: &RequestOptions, defaults: &ManagerConfig) -> Resolved {
    Resolved {
        priority: options.priority.unwrap_or_else(|| infer_priority(config)),
        timeout: options.timeout.or_else(|| infer_timeout(config)),
        batchable: options.batchable.unwrap_or_else(|| infer_batchable(config)),
        dedup: options.dedup.unwrap_or(defaults.dedup_default),
    }
}

fn is_chat_url(url: &str) -> bool {
    url.contains("/chat") || url.contains("/message")
}

fn is_health_url(url: &str) -> bool {
    url.contains("/health") || url.contains("/ping")
}

/// Chat sends are interactive; health probes can wait behind everything else
fn infer_priority(config: &RequestConfig) -> QueuePriority {
    if is_chat_url(&config.url) && config.method == HttpMethod::Post {
        QueuePriority::High
    } else if is_health_url(&config.url) {
        QueuePriority::Low
    } else {
        QueuePriority::Normal
    }
}

/// Chat endpoints get a long timeout, health endpoints a short one; `None`
/// falls through to the queue's default
fn infer_timeout(config: &RequestConfig) -> Option<Duration> {
    if is_chat_url(&config.url) {
        Some(Duration::from_secs(60))
    } else if is_health_url(&config.url) {
        Some(Duration::from_secs(5))
    } else {
        None
    }
}

/// Low-stakes polling GETs coalesce well into batches
fn infer_batchable(config: &RequestConfig) -> bool {
    if config.method != HttpMethod::Get {
        return false;
    }
    is_health_url(&config.url)
        || ["/analytics", "/log", "/status", "/metrics"]
            .iter()
            .any(|p| config.url.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatwire_types::NullErrorSink;
    use serde_json::Value as JsonValue;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ok_response() -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: json!({ "ok": true }),
        }
    }

    struct CountingTransport {
        calls: AtomicU32,
        delay: Duration,
    }

    impl CountingTransport {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicU32::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, _config: &RequestConfig) -> Result<HttpResponse, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(ok_response())
        }
    }

    /// Fails with 503 a fixed number of times, then succeeds
    struct FlakyTransport {
        calls: AtomicU32,
        failures: u32,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn send(&self, _config: &RequestConfig) -> Result<HttpResponse, ApiError> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                Err(ApiError::from_status(503, "unavailable"))
            } else {
                Ok(ok_response())
            }
        }
    }

    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn send(&self, _config: &RequestConfig) -> Result<HttpResponse, ApiError> {
            std::future::pending().await
        }
    }

    struct RejectingTransport(u16);

    #[async_trait]
    impl Transport for RejectingTransport {
        async fn send(&self, _config: &RequestConfig) -> Result<HttpResponse, ApiError> {
            Err(ApiError::from_status(self.0, "rejected"))
        }
    }

    fn fast_config() -> ManagerConfig {
        ManagerConfig {
            queue: QueueConfig {
                base_retry_delay: Duration::from_millis(5),
                max_retry_delay: Duration::from_millis(20),
                batch_delay: Duration::from_millis(10),
                ..QueueConfig::default()
            },
            ..ManagerConfig::default()
        }
    }

    fn manager_with(transport: Arc<dyn Transport>) -> RequestManager {
        RequestManager::with_sink(transport, Arc::new(NullErrorSink), fast_config())
    }

    // Settlement bookkeeping runs on a spawned task; give it a beat
    async fn settle_delay() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn identical_concurrent_requests_share_one_transport_call() {
        let transport = Arc::new(CountingTransport::new(Duration::from_millis(30)));
        let manager = manager_with(transport.clone());

        let first = manager.submit(RequestConfig::get("/api/messages"), RequestOptions::default());
        let second = manager.submit(RequestConfig::get("/api/messages"), RequestOptions::default());
        assert_eq!(first.id, second.id);

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.unwrap().body, b.unwrap().body);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dedup_opt_out_issues_separate_calls() {
        let transport = Arc::new(CountingTransport::new(Duration::from_millis(30)));
        let manager = manager_with(transport.clone());

        let options = RequestOptions::default().dedup(false);
        let first = manager.submit(RequestConfig::get("/api/messages"), options.clone());
        let second = manager.submit(RequestConfig::get("/api/messages"), options);
        assert_ne!(first.id, second.id);

        let _ = tokio::join!(first, second);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn different_urls_are_not_deduplicated() {
        let transport = Arc::new(CountingTransport::new(Duration::from_millis(10)));
        let manager = manager_with(transport.clone());

        let first = manager.submit(RequestConfig::get("/api/messages"), RequestOptions::default());
        let second = manager.submit(RequestConfig::get("/api/users"), RequestOptions::default());
        let _ = tokio::join!(first, second);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retryable_failures_are_retried_through_the_queue() {
        let transport = Arc::new(FlakyTransport {
            calls: AtomicU32::new(0),
            failures: 2,
        });
        let manager = manager_with(transport.clone());

        let result = manager
            .submit(RequestConfig::get("/api/users"), RequestOptions::default())
            .await;
        assert!(result.is_ok());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_surface_once_and_count_as_failed() {
        let transport = Arc::new(RejectingTransport(404));
        let manager = manager_with(transport);

        let err = manager
            .submit(RequestConfig::get("/api/missing"), RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ClientError);

        settle_delay().await;
        let stats = manager.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[tokio::test]
    async fn cancel_pending_request() {
        let manager = manager_with(Arc::new(HangingTransport));

        let pending = manager.submit(RequestConfig::get("/api/slow"), RequestOptions::default());
        let id = pending.id;
        assert!(manager.cancel(id));

        let err = pending.await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Cancelled);

        settle_delay().await;
        let stats = manager.stats();
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.active, 0);
        // A second cancel finds nothing
        assert!(!manager.cancel(id));
    }

    #[tokio::test]
    async fn cancelled_request_waiting_behind_another_never_reaches_the_transport() {
        let transport = Arc::new(CountingTransport::new(Duration::from_millis(40)));
        let manager = RequestManager::with_sink(
            transport.clone(),
            Arc::new(NullErrorSink),
            ManagerConfig {
                queue: QueueConfig {
                    max_concurrent: 1,
                    ..fast_config().queue
                },
                ..ManagerConfig::default()
            },
        );

        let first = manager.submit(RequestConfig::get("/api/a"), RequestOptions::default());
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = manager.submit(RequestConfig::get("/api/b"), RequestOptions::default());
        assert!(manager.cancel(second.id));

        assert_eq!(second.await.unwrap_err().code(), ErrorCode::Cancelled);
        assert!(first.await.is_ok());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        settle_delay().await;
        assert_eq!(manager.queue().len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_identical_submits_issue_one_transport_call() {
        let transport = Arc::new(CountingTransport::new(Duration::from_millis(30)));
        let manager = Arc::new(manager_with(transport.clone()));

        let mut pending = Vec::new();
        let mut workers = Vec::new();
        for _ in 0..10 {
            let manager = Arc::clone(&manager);
            workers.push(tokio::spawn(async move {
                manager.submit(RequestConfig::get("/api/messages"), RequestOptions::default())
            }));
        }
        for worker in workers {
            pending.push(worker.await.unwrap());
        }

        for handle in pending {
            assert!(handle.await.is_ok());
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_unknown_id_returns_false() {
        let manager = manager_with(Arc::new(HangingTransport));
        assert!(!manager.cancel(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn cancel_all_aborts_every_tracked_request() {
        let manager = manager_with(Arc::new(HangingTransport));

        let first = manager.submit(RequestConfig::get("/api/a"), RequestOptions::default());
        let second = manager.submit(RequestConfig::get("/api/b"), RequestOptions::default());
        assert_eq!(manager.cancel_all(), 2);

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.unwrap_err().code(), ErrorCode::Cancelled);
        assert_eq!(b.unwrap_err().code(), ErrorCode::Cancelled);
    }

    #[tokio::test]
    async fn history_is_bounded_and_most_recent_first() {
        let transport = Arc::new(CountingTransport::new(Duration::ZERO));
        let manager = RequestManager::with_sink(
            transport,
            Arc::new(NullErrorSink),
            ManagerConfig {
                history_size: 2,
                ..fast_config()
            },
        );

        for url in ["/api/one", "/api/two", "/api/three"] {
            manager
                .submit(RequestConfig::get(url), RequestOptions::default())
                .await
                .unwrap();
        }

        settle_delay().await;
        let history = manager.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].url, "/api/three");
        assert_eq!(history[1].url, "/api/two");
        assert_eq!(history[0].status, RequestStatus::Success);
    }

    #[tokio::test]
    async fn success_rate_defaults_to_one() {
        let manager = manager_with(Arc::new(HangingTransport));
        assert_eq!(manager.stats().success_rate, 1.0);
    }

    #[test]
    fn chat_posts_infer_high_priority_and_long_timeout() {
        let config = RequestConfig::post("/api/chat");
        assert_eq!(infer_priority(&config), QueuePriority::High);
        assert_eq!(infer_timeout(&config), Some(Duration::from_secs(60)));
        assert!(!infer_batchable(&config));
    }

    #[test]
    fn health_gets_infer_low_priority_short_timeout_batchable() {
        let config = RequestConfig::get("/health");
        assert_eq!(infer_priority(&config), QueuePriority::Low);
        assert_eq!(infer_timeout(&config), Some(Duration::from_secs(5)));
        assert!(infer_batchable(&config));
    }

    #[test]
    fn metrics_gets_are_batchable_at_normal_priority() {
        let config = RequestConfig::get("/api/metrics");
        assert_eq!(infer_priority(&config), QueuePriority::Normal);
        assert_eq!(infer_timeout(&config), None);
        assert!(infer_batchable(&config));
    }

    #[test]
    fn plain_requests_use_defaults() {
        let config = RequestConfig::get("/api/users");
        assert_eq!(infer_priority(&config), QueuePriority::Normal);
        assert_eq!(infer_timeout(&config), None);
        assert!(!infer_batchable(&config));
    }

    #[test]
    fn explicit_options_override_inference() {
        let config = RequestConfig::post("/api/chat");
        let options = RequestOptions::default()
            .with_priority(QueuePriority::Low)
            .with_timeout(Duration::from_secs(1))
            .batchable(true);
        let resolved = resolve(&config, &options, &ManagerConfig::default());
        assert_eq!(resolved.priority, QueuePriority::Low);
        assert_eq!(resolved.timeout, Some(Duration::from_secs(1)));
        assert!(resolved.batchable);
        assert!(resolved.dedup);
    }

    #[tokio::test]
    async fn sink_receives_transport_failures_with_network_category() {
        struct CapturingSink(Mutex<Vec<ErrorReport>>);

        impl ErrorSink for CapturingSink {
            fn report(&self, report: ErrorReport) {
                self.0.lock().push(report);
            }
        }

        let sink = Arc::new(CapturingSink(Mutex::new(Vec::new())));
        let manager = RequestManager::with_sink(
            Arc::new(RejectingTransport(404)),
            sink.clone(),
            fast_config(),
        );

        let _ = manager
            .submit(RequestConfig::get("/api/missing"), RequestOptions::default())
            .await;
        settle_delay().await;

        let reports = sink.0.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].category, ErrorCategory::Network);
        assert_eq!(reports[0].context["code"], JsonValue::from("client_error"));
    }
}
