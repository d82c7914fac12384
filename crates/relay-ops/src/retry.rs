//! Manual retry gate.
//!
//! A retry is always an explicit user action. It re-requests blockchain
//! submission for a transfer the relayer marked `failed`, reusing the original
//! signed payload server-side: no new nonce, no new `POST /transfer-requests`.

use thiserror::Error;
use tracing::{info, warn};

use relay_tracker::Tracker;
use relay_types::{
    retry_policy_allows, ApiError, ApiErrorKind, BlockchainStatus, TransferRequest, MAX_RETRY_COUNT,
};

/// Why a retry was refused or failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    #[error("transfer {0} is not tracked by this client")]
    NotTracked(String),

    #[error("transfer {id} is {status}; sign and submit a new request instead")]
    RequiresResign { id: String, status: BlockchainStatus },

    #[error("transfer {id} is {status}; the relayer will submit it on its own")]
    PolicySuppressed { id: String, status: BlockchainStatus },

    #[error("transfer {id} reached the retry limit ({retry_count}/{max})")]
    RetryLimit {
        id: String,
        retry_count: u32,
        max: u32,
    },

    #[error("transfer {id} is {status}; only failed transfers can be retried")]
    NotRetriable { id: String, status: BlockchainStatus },

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Decide whether `transfer` may be retried by the user.
pub fn check_retry(transfer: &TransferRequest) -> Result<(), RetryError> {
    let status = transfer.blockchain_status;
    let retry_count = transfer.blockchain_retry_count;
    if retry_policy_allows(status, retry_count) {
        return Ok(());
    }

    let id = transfer.id.clone();
    Err(match status {
        s if s.requires_resign() => RetryError::RequiresResign { id, status },
        BlockchainStatus::Failed => RetryError::RetryLimit {
            id,
            retry_count,
            max: MAX_RETRY_COUNT,
        },
        BlockchainStatus::PendingSubmission => RetryError::PolicySuppressed { id, status },
        _ => RetryError::NotRetriable { id, status },
    })
}

/// Gate in front of `POST /transfer-requests/{id}/retry`.
#[derive(Clone)]
pub struct RetryGate {
    tracker: Tracker,
}

impl RetryGate {
    pub fn new(tracker: Tracker) -> Self {
        Self { tracker }
    }

    /// Retry a tracked transfer.
    ///
    /// The gate is evaluated against the cached view; refresh first if it may
    /// be out of date. On success the relayer's answer replaces the cached
    /// entry and the id goes back to polling. Errors are returned as-is and
    /// never re-attempted.
    pub async fn retry(&self, id: &str) -> Result<TransferRequest, RetryError> {
        let cached = self
            .tracker
            .get(id)
            .await
            .ok_or_else(|| RetryError::NotTracked(id.to_string()))?;

        if let Err(e) = check_retry(&cached) {
            warn!(target: "relay::ops", %id, status = %cached.blockchain_status, reason = %e, "retry refused");
            return Err(e);
        }
        self.tracker.check_backoff()?;

        let updated = match self.tracker.api().retry_transfer(id).await {
            Ok(t) => t,
            Err(e) => {
                if e.kind == ApiErrorKind::NotFound {
                    self.tracker.evict(id).await;
                }
                self.tracker.note_error(&e);
                warn!(target: "relay::ops", %id, kind = %e.kind, error = %e.message, "retry rejected");
                return Err(e.into());
            }
        };

        info!(
            target: "relay::ops",
            %id,
            previous = %cached.blockchain_status,
            current = %updated.blockchain_status,
            retry_count = updated.blockchain_retry_count,
            "retry accepted"
        );
        self.tracker.track_retry(updated.clone()).await;
        Ok(updated)
    }
}
