//! Single-writer index from transfer id to the last accepted server view.

use std::collections::HashMap;

use relay_types::{BlockchainStatus, TransferRequest};
use tracing::{debug, warn};

/// Position of the cache's retry clock when a request was dispatched.
///
/// Take one with [`TransferCache::snapshot`] before awaiting the network and
/// hand it back to [`TransferCache::merge`] when the response arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Snapshot(u64);

/// A cached transfer plus merge bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub transfer: TransferRequest,
    /// Retry clock value of the last manual retry applied to this id, 0 if none.
    pub epoch: u64,
    /// Arrival sequence of the response currently held.
    pub arrival: u64,
}

/// Result of offering a server response to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First time this id was seen.
    Inserted { status: BlockchainStatus },
    /// Replaced the cached view. `previous == current` for a same-rank refresh.
    Updated {
        previous: BlockchainStatus,
        current: BlockchainStatus,
    },
    /// Less advanced than the cached view; dropped.
    Stale {
        cached: BlockchainStatus,
        incoming: BlockchainStatus,
    },
    /// Dispatched before a manual retry of this id was applied; dropped.
    Superseded,
    /// Same id with a different nonce; dropped.
    NonceConflict,
}

impl MergeOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, MergeOutcome::Inserted { .. } | MergeOutcome::Updated { .. })
    }
}

#[derive(Debug, Default)]
pub struct TransferCache {
    entries: HashMap<String, CacheEntry>,
    retry_clock: u64,
    arrivals: u64,
}

impl TransferCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.retry_clock)
    }

    pub fn get(&self, id: &str) -> Option<&TransferRequest> {
        self.entries.get(id).map(|e| &e.transfer)
    }

    pub fn entry(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    pub fn status(&self, id: &str) -> Option<BlockchainStatus> {
        self.get(id).map(|t| t.blockchain_status)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offer a response from submission, polling, or a list page.
    ///
    /// Within one epoch the more advanced status wins; on a tie the later
    /// arrival wins. Responses dispatched before the id's last manual retry
    /// are discarded regardless of status.
    pub fn merge(&mut self, incoming: TransferRequest, seen: Snapshot) -> MergeOutcome {
        self.arrivals += 1;
        let arrival = self.arrivals;

        let Some(entry) = self.entries.get_mut(&incoming.id) else {
            let status = incoming.blockchain_status;
            debug!(id = %incoming.id, %status, "caching new transfer");
            self.entries.insert(
                incoming.id.clone(),
                CacheEntry {
                    transfer: incoming,
                    epoch: 0,
                    arrival,
                },
            );
            return MergeOutcome::Inserted { status };
        };

        if entry.epoch > seen.0 {
            debug!(id = %incoming.id, "dropping response dispatched before retry");
            return MergeOutcome::Superseded;
        }

        if let (Some(cached), Some(new)) = (&entry.transfer.nonce, &incoming.nonce) {
            if cached != new {
                warn!(id = %incoming.id, cached_nonce = %cached, incoming_nonce = %new, "nonce changed for transfer id");
                return MergeOutcome::NonceConflict;
            }
        }

        let cached = entry.transfer.blockchain_status;
        let current = incoming.blockchain_status;
        if current.progress_rank() < cached.progress_rank() {
            debug!(id = %incoming.id, %cached, incoming = %current, "dropping stale response");
            return MergeOutcome::Stale {
                cached,
                incoming: current,
            };
        }

        if !cached.can_transition(current) {
            warn!(id = %incoming.id, %cached, incoming = %current, "relayer reported an unexpected transition");
        }

        entry.transfer = incoming;
        entry.arrival = arrival;
        MergeOutcome::Updated {
            previous: cached,
            current,
        }
    }

    /// Apply the relayer's answer to a manual retry.
    ///
    /// The retry response is authoritative even when it moves the status
    /// backwards (e.g. `failed → processing`), and it opens a new epoch so
    /// that polls already in flight cannot undo it.
    pub fn replace_after_retry(&mut self, transfer: TransferRequest) -> MergeOutcome {
        self.arrivals += 1;
        self.retry_clock += 1;
        let current = transfer.blockchain_status;
        let entry = CacheEntry {
            transfer,
            epoch: self.retry_clock,
            arrival: self.arrivals,
        };
        match self.entries.insert(entry.transfer.id.clone(), entry) {
            Some(old) => MergeOutcome::Updated {
                previous: old.transfer.blockchain_status,
                current,
            },
            None => MergeOutcome::Inserted { status: current },
        }
    }

    pub fn evict(&mut self, id: &str) -> Option<TransferRequest> {
        self.entries.remove(id).map(|e| e.transfer)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Cached transfers sorted newest first by `created_at`.
    pub fn list_newest_first(&self) -> Vec<TransferRequest> {
        let mut items: Vec<TransferRequest> =
            self.entries.values().map(|e| e.transfer.clone()).collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        items
    }
}
