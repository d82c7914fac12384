//! Blockchain submission status and the client-side lifecycle rules over it.
//!
//! Flow:
//!
//! ```text
//! received → pending_submission → processing → submitted → confirmed
//!                     ↘ expired ↙          ↘ failed ↙
//! ```
//!
//! The legacy wire value `pending` is folded into [`BlockchainStatus::Received`]
//! at deserialization, so nothing downstream ever sees it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Maximum number of blockchain submission attempts the relayer allows.
pub const MAX_RETRY_COUNT: u32 = 10;

/// Blockchain submission status of a transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockchainStatus {
    /// Persisted, compliance check in progress.
    #[serde(alias = "pending")]
    Received,
    /// Compliance approved, queued for the submission worker.
    PendingSubmission,
    /// Worker claimed the task.
    Processing,
    /// On-chain, awaiting finalization.
    Submitted,
    /// Terminal: finalized on chain.
    Confirmed,
    /// Terminal: max retries exceeded server-side.
    Failed,
    /// Terminal: blockhash window elapsed, the signature is dead.
    Expired,
}

impl BlockchainStatus {
    pub const ALL: [BlockchainStatus; 7] = [
        BlockchainStatus::Received,
        BlockchainStatus::PendingSubmission,
        BlockchainStatus::Processing,
        BlockchainStatus::Submitted,
        BlockchainStatus::Confirmed,
        BlockchainStatus::Failed,
        BlockchainStatus::Expired,
    ];

    /// No further transitions are expected from the server.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BlockchainStatus::Confirmed | BlockchainStatus::Failed | BlockchainStatus::Expired
        )
    }

    /// Raw retry predicate: the relayer accepts a retry request for this status.
    ///
    /// `PendingSubmission` is structurally retriable, but retrying it races the
    /// worker; user-facing code should go through [`retry_policy_allows`].
    #[inline]
    pub fn can_retry(&self, retry_count: u32) -> bool {
        matches!(
            self,
            BlockchainStatus::PendingSubmission | BlockchainStatus::Failed
        ) && retry_count < MAX_RETRY_COUNT
    }

    /// The signed blockhash expired; only a brand-new signed transfer can recover.
    #[inline]
    pub fn requires_resign(&self) -> bool {
        matches!(self, BlockchainStatus::Expired)
    }

    /// Forward ordering along the lifecycle. All terminal states share the top rank.
    pub fn progress_rank(&self) -> u8 {
        match self {
            BlockchainStatus::Received => 0,
            BlockchainStatus::PendingSubmission => 1,
            BlockchainStatus::Processing => 2,
            BlockchainStatus::Submitted => 3,
            BlockchainStatus::Confirmed | BlockchainStatus::Failed | BlockchainStatus::Expired => 4,
        }
    }

    /// Whether the server may legally move a transfer from `self` to `next`.
    ///
    /// Self-loops are allowed (a poll that observes no change). Forward skips
    /// along the success path are allowed because polling may miss
    /// intermediate states. `Failed` may move back into the pipeline only
    /// through a manual retry.
    pub fn can_transition(&self, next: BlockchainStatus) -> bool {
        use BlockchainStatus::*;

        if *self == next {
            return true;
        }
        match (self, next) {
            (Failed, PendingSubmission | Processing | Submitted) => true,
            (Confirmed | Failed | Expired, _) => false,
            (_, Expired) => matches!(self, Received | PendingSubmission | Processing),
            (_, Failed) => matches!(self, Processing | Submitted),
            (_, _) => next.progress_rank() > self.progress_rank(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockchainStatus::Received => "received",
            BlockchainStatus::PendingSubmission => "pending_submission",
            BlockchainStatus::Processing => "processing",
            BlockchainStatus::Submitted => "submitted",
            BlockchainStatus::Confirmed => "confirmed",
            BlockchainStatus::Failed => "failed",
            BlockchainStatus::Expired => "expired",
        }
    }

    /// Short human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            BlockchainStatus::Received => "Validating",
            BlockchainStatus::PendingSubmission => "Queued",
            BlockchainStatus::Processing => "Processing",
            BlockchainStatus::Submitted => "Submitted",
            BlockchainStatus::Confirmed => "Confirmed",
            BlockchainStatus::Failed => "Failed",
            BlockchainStatus::Expired => "Expired",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BlockchainStatus::Received => "Request received, running compliance checks",
            BlockchainStatus::PendingSubmission => "Approved, waiting for blockchain submission",
            BlockchainStatus::Processing => "Submitting to Solana",
            BlockchainStatus::Submitted => "On-chain, awaiting finalization",
            BlockchainStatus::Confirmed => "Transaction finalized on Solana",
            BlockchainStatus::Failed => "Submission failed after max retries",
            BlockchainStatus::Expired => "Blockhash expired, please re-sign and resubmit",
        }
    }
}

impl fmt::Display for BlockchainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockchainStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" | "pending" => Ok(BlockchainStatus::Received),
            "pending_submission" => Ok(BlockchainStatus::PendingSubmission),
            "processing" => Ok(BlockchainStatus::Processing),
            "submitted" => Ok(BlockchainStatus::Submitted),
            "confirmed" => Ok(BlockchainStatus::Confirmed),
            "failed" => Ok(BlockchainStatus::Failed),
            "expired" => Ok(BlockchainStatus::Expired),
            other => Err(format!("unknown blockchain status: {}", other)),
        }
    }
}

/// User-facing retry policy layered over [`BlockchainStatus::can_retry`].
///
/// Only `Failed` transfers under the ceiling may be retried from the UI;
/// `PendingSubmission` is suppressed because the worker still owns it.
pub fn retry_policy_allows(status: BlockchainStatus, retry_count: u32) -> bool {
    status == BlockchainStatus::Failed && status.can_retry(retry_count)
}

/// Compliance decision, set by the relayer's compliance engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComplianceStatus::Pending => "pending",
            ComplianceStatus::Approved => "approved",
            ComplianceStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(BlockchainStatus::Confirmed.is_terminal());
        assert!(BlockchainStatus::Failed.is_terminal());
        assert!(BlockchainStatus::Expired.is_terminal());

        assert!(!BlockchainStatus::Received.is_terminal());
        assert!(!BlockchainStatus::PendingSubmission.is_terminal());
        assert!(!BlockchainStatus::Processing.is_terminal());
        assert!(!BlockchainStatus::Submitted.is_terminal());
    }

    #[test]
    fn test_requires_resign_implies_terminal_and_not_retriable() {
        for status in BlockchainStatus::ALL {
            for retry_count in [0, 3, MAX_RETRY_COUNT - 1, MAX_RETRY_COUNT] {
                if status.requires_resign() {
                    assert!(status.is_terminal(), "{} must be terminal", status);
                    assert!(!status.can_retry(retry_count), "{} must not be retriable", status);
                }
            }
        }
    }

    #[test]
    fn test_can_retry_respects_ceiling() {
        assert!(BlockchainStatus::Failed.can_retry(3));
        assert!(BlockchainStatus::Failed.can_retry(MAX_RETRY_COUNT - 1));
        assert!(!BlockchainStatus::Failed.can_retry(MAX_RETRY_COUNT));
        assert!(BlockchainStatus::PendingSubmission.can_retry(0));
        assert!(!BlockchainStatus::Expired.can_retry(0));
        assert!(!BlockchainStatus::Confirmed.can_retry(0));
        assert!(!BlockchainStatus::Processing.can_retry(0));
    }

    #[test]
    fn test_retry_policy_suppresses_pending_submission() {
        assert!(BlockchainStatus::PendingSubmission.can_retry(0));
        assert!(!retry_policy_allows(BlockchainStatus::PendingSubmission, 0));
        assert!(retry_policy_allows(BlockchainStatus::Failed, 3));
        assert!(!retry_policy_allows(BlockchainStatus::Failed, MAX_RETRY_COUNT));
        assert!(!retry_policy_allows(BlockchainStatus::Expired, 0));
    }

    #[test]
    fn test_legacy_pending_alias() {
        let status: BlockchainStatus = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(status, BlockchainStatus::Received);
        assert_eq!("pending".parse::<BlockchainStatus>().unwrap(), BlockchainStatus::Received);
        // Re-serialization never emits the alias.
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"received\"");
    }

    #[test]
    fn test_transitions() {
        use BlockchainStatus::*;

        assert!(Received.can_transition(PendingSubmission));
        assert!(PendingSubmission.can_transition(Processing));
        assert!(Processing.can_transition(Submitted));
        assert!(Submitted.can_transition(Confirmed));
        assert!(Received.can_transition(Confirmed));

        assert!(Processing.can_transition(Failed));
        assert!(Submitted.can_transition(Failed));
        assert!(!Received.can_transition(Failed));
        assert!(!PendingSubmission.can_transition(Failed));
        assert!(PendingSubmission.can_transition(Expired));
        assert!(Processing.can_transition(Expired));
        assert!(!Submitted.can_transition(Expired));

        assert!(Failed.can_transition(Processing));
        assert!(!Expired.can_transition(Processing));
        assert!(!Confirmed.can_transition(Failed));
        assert!(!Submitted.can_transition(Processing));
    }

    #[test]
    fn test_progress_rank_is_forward_only_on_success_path() {
        let path = [
            BlockchainStatus::Received,
            BlockchainStatus::PendingSubmission,
            BlockchainStatus::Processing,
            BlockchainStatus::Submitted,
            BlockchainStatus::Confirmed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].progress_rank() < pair[1].progress_rank());
        }
    }

    #[test]
    fn test_display_roundtrip() {
        for status in BlockchainStatus::ALL {
            assert_eq!(status.to_string().parse::<BlockchainStatus>().unwrap(), status);
        }
    }
}
