//! API client
//!
//! Thin domain layer over the request manager: chat and health calls,
//! proxy-to-direct fallback driven by monitor status transitions, and
//! translation of error codes into user-facing copy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use chatwire_monitor::{HealthMonitor, StatusChange};
use chatwire_types::{ApiError, ConnectionStatus, ErrorCode, RequestConfig, Subscription};

use crate::manager::{RequestManager, RequestOptions};

struct ClientInner {
    manager: RequestManager,
    proxy_base: String,
    direct_base: String,
    use_direct: AtomicBool,
}

/// Domain calls over the request manager with proxy fallback
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl Clone for ApiClient {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ApiClient {
    pub fn new(
        manager: RequestManager,
        proxy_base: impl Into<String>,
        direct_base: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                manager,
                proxy_base: proxy_base.into(),
                direct_base: direct_base.into(),
                use_direct: AtomicBool::new(false),
            }),
        }
    }

    /// Whether requests currently bypass the proxy
    pub fn is_direct(&self) -> bool {
        self.inner.use_direct.load(Ordering::SeqCst)
    }

    pub fn manager(&self) -> &RequestManager {
        &self.inner.manager
    }

    /// Follow the proxy monitor's transitions: switch to the direct backend
    /// when the proxy goes down, back to the proxy when it recovers
    ///
    /// The returned subscription keeps the fallback active; drop it to
    /// detach.
    pub fn follow_connection(&self, monitor: &HealthMonitor) -> Subscription<StatusChange> {
        let inner = Arc::downgrade(&self.inner);
        monitor.on_status_change(move |change| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            match change.new {
                ConnectionStatus::Disconnected => {
                    if !inner.use_direct.swap(true, Ordering::SeqCst) {
                        warn!("proxy unreachable, falling back to direct backend connection");
                    }
                }
                ConnectionStatus::Connected => {
                    if inner.use_direct.swap(false, Ordering::SeqCst) {
                        info!("proxy recovered, routing through it again");
                    }
                }
                ConnectionStatus::Slow | ConnectionStatus::Unknown => {}
            }
        })
    }

    fn url(&self, path: &str) -> String {
        let base = if self.is_direct() {
            &self.inner.direct_base
        } else {
            &self.inner.proxy_base
        };
        format!("{base}{path}")
    }

    /// Send one chat message; returns the backend's response body
    pub async fn send_chat_message(&self, content: &str) -> Result<JsonValue, ApiError> {
        let config = RequestConfig::post(self.url("/api/chat"))
            .with_body(json!({ "content": content }));
        let response = self
            .inner
            .manager
            .submit(config, RequestOptions::default())
            .await?;
        Ok(response.body)
    }

    /// Fetch the most recent chat messages
    pub async fn fetch_history(&self, limit: usize) -> Result<JsonValue, ApiError> {
        let config = RequestConfig::get(self.url(&format!("/api/messages?limit={limit}")));
        let response = self
            .inner
            .manager
            .submit(config, RequestOptions::default())
            .await?;
        Ok(response.body)
    }

    /// Probe the backend's health endpoint
    ///
    /// Backend and transport failures read as "unhealthy" rather than
    /// surfacing an error; only caller-side conditions propagate.
    pub async fn check_health(&self) -> Result<bool, ApiError> {
        let config = RequestConfig::get(self.url("/health"));
        match self
            .inner
            .manager
            .submit(config, RequestOptions::default())
            .await
        {
            Ok(response) => Ok(response.is_success()),
            Err(err) => match err.code() {
                ErrorCode::Cancelled | ErrorCode::QueueCleared | ErrorCode::Overflow => Err(err),
                _ => Ok(false),
            },
        }
    }
}

/// Human-facing summary for an error code, for display at the UI boundary
pub fn user_message(err: &ApiError) -> &'static str {
    match err.code() {
        ErrorCode::Overflow => "Too many requests are in flight. Please wait a moment and try again.",
        ErrorCode::Timeout => "The server is taking too long to respond. Please try again.",
        ErrorCode::Cancelled => "The request was cancelled.",
        ErrorCode::NetworkError => "Unable to reach the server. Check your connection and try again.",
        ErrorCode::ServerError => "The server ran into a problem. Please try again shortly.",
        ErrorCode::ClientError => "The request could not be processed.",
        ErrorCode::QueueCleared => "The request was dropped before it was sent.",
    }
}
