//! Request queueing and concurrency control for Chatwire
//!
//! This crate provides the scheduling engine of the request layer: it admits
//! asynchronous tasks, orders them by priority, bounds the number running
//! concurrently, coalesces batchable work, retries transient failures with
//! exponential backoff and enforces per-task timeouts.

pub mod backoff;
pub mod config;
pub mod events;
pub mod queue;
pub mod stats;

// Re-export commonly used types
pub use backoff::BackoffCalculator;
pub use config::QueueConfig;
pub use events::{QueueEvent, QueueStatus};
pub use queue::{ActiveInfo, EnqueueOptions, QueuePriority, RequestQueue};
pub use stats::QueueStats;
