//! Queue status and lifecycle events

use serde::{Deserialize, Serialize};

/// Informational queue status
///
/// Status does not gate scheduling by itself; `Paused` reflects the
/// externally-triggered pause flag and `Overflow` is set transiently when an
/// admission is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Nothing active or pending
    Idle,
    /// At least one task in flight
    Processing,
    /// An admission was just rejected for capacity
    Overflow,
    /// Dispatch is paused; admission continues
    Paused,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueStatus::Idle => write!(f, "idle"),
            QueueStatus::Processing => write!(f, "processing"),
            QueueStatus::Overflow => write!(f, "overflow"),
            QueueStatus::Paused => write!(f, "paused"),
        }
    }
}

/// Lifecycle events emitted by the queue
///
/// Listeners receive events synchronously after the originating state change;
/// a panicking listener is isolated and never aborts its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// The coarse queue status changed
    StatusChange { old: QueueStatus, new: QueueStatus },
    /// An admission was rejected for capacity
    Overflow { queue_size: usize, max_size: usize },
    /// Active count reached zero with no pending work
    Empty,
    /// A task settled
    RequestComplete { id: u64, success: bool },
}
