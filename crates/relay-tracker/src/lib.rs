//! Polling orchestrator for in-flight transfer requests.
//!
//! One recurring timer drives poll cycles over every tracked, non-terminal
//! transfer. Each cycle fans out one `GET /transfer-requests/{id}` per id,
//! merges whatever came back, and drops ids that reached a terminal status.
//! The timer retires itself when nothing is left to poll.

pub mod tracker;

use std::time::Duration;

use relay_types::{ApiErrorKind, BlockchainStatus};

pub use tracker::Tracker;

/// Polling configuration.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval_ms: u64,
    /// Start the timer as soon as a live transfer is admitted.
    pub auto_start: bool,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            auto_start: true,
        }
    }
}

/// Poll progress reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    CycleStarted { ids: usize },
    StatusChanged {
        id: String,
        previous: BlockchainStatus,
        current: BlockchainStatus,
    },
    /// Reached a terminal status and left the poll set.
    Settled { id: String, status: BlockchainStatus },
    /// The relayer no longer knows this id.
    Evicted { id: String },
    /// A single fetch failed; the id stays eligible for the next cycle.
    FetchFailed {
        id: String,
        kind: ApiErrorKind,
        message: String,
    },
    /// Poll set drained, timer retired.
    Idle,
    Stopped,
}

/// Callback type for poll events.
pub type PollEventHandler = Box<dyn Fn(PollEvent) + Send + Sync>;

/// What a single poll cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub polled: usize,
    pub updated: usize,
    pub failed: usize,
    pub settled: Vec<String>,
    pub evicted: Vec<String>,
    /// Ids still in the poll set after the cycle.
    pub remaining: usize,
    /// Polling was stopped while the cycle was in flight; nothing was merged.
    pub cancelled: bool,
}
