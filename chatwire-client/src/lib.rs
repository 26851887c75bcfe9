//! Request manager and API client for Chatwire
//!
//! The manager wraps the queue with HTTP-request-shaped concerns: request
//! ids, in-flight deduplication, option inference, cooperative cancellation,
//! bounded history and aggregate statistics. The API client builds domain
//! calls (chat, health) on top of it and handles proxy fallback.

pub mod api;
pub mod manager;
pub mod transport;

// Re-export main types for convenience
pub use api::{user_message, ApiClient};
pub use manager::{
    ManagerConfig, ManagerStats, PendingRequest, RequestManager, RequestOptions, RequestRecord,
};
pub use transport::{ReqwestTransport, Transport};
