//! In-memory client state for tracked transfers.
//!
//! - `TransferCache`: id → last accepted server view, with lost-update guards
//! - `PollSet`: ids still eligible for polling
//!
//! Nothing here is persisted; the relayer is the system of record.

pub mod cache;
pub mod poll_set;

pub use cache::{CacheEntry, MergeOutcome, Snapshot, TransferCache};
pub use poll_set::PollSet;
