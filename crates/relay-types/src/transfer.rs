//! Transfer request entity and the relayer's request/response shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{BlockchainStatus, ComplianceStatus};

/// Lamports per whole SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Token label used in the signing message when no mint is given.
pub const NATIVE_ASSET: &str = "SOL";

/// Transfer details, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferDetails {
    /// Visible amount in lamports.
    Public { amount: u64 },
    /// Token-2022 confidential transfer. The proofs are opaque to this client.
    Confidential {
        new_decryptable_available_balance: String,
        equality_proof: String,
        ciphertext_validity_proof: String,
        range_proof: String,
    },
}

impl TransferDetails {
    pub fn public(amount: u64) -> Self {
        TransferDetails::Public { amount }
    }

    pub fn is_confidential(&self) -> bool {
        matches!(self, TransferDetails::Confidential { .. })
    }

    /// Amount in lamports, `None` for confidential transfers.
    pub fn amount_lamports(&self) -> Option<u64> {
        match self {
            TransferDetails::Public { amount } => Some(*amount),
            TransferDetails::Confidential { .. } => None,
        }
    }
}

/// A transfer request as returned by the relayer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub id: String,
    pub from_address: String,
    pub to_address: String,
    pub transfer_details: TransferDetails,
    #[serde(default)]
    pub token_mint: Option<String>,
    pub compliance_status: ComplianceStatus,
    pub blockchain_status: BlockchainStatus,
    #[serde(default)]
    pub blockchain_signature: Option<String>,
    #[serde(default)]
    pub blockchain_retry_count: u32,
    #[serde(default)]
    pub blockchain_last_error: Option<String>,
    #[serde(default)]
    pub blockchain_next_retry_at: Option<DateTime<Utc>>,
    /// Idempotency key used at creation. Null for rows created before nonces existed.
    #[serde(default)]
    pub nonce: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRequest {
    pub fn is_terminal(&self) -> bool {
        self.blockchain_status.is_terminal()
    }

    pub fn can_retry(&self) -> bool {
        self.blockchain_status.can_retry(self.blockchain_retry_count)
    }

    pub fn requires_resign(&self) -> bool {
        self.blockchain_status.requires_resign()
    }

    pub fn is_confidential(&self) -> bool {
        self.transfer_details.is_confidential()
    }

    pub fn amount_lamports(&self) -> Option<u64> {
        self.transfer_details.amount_lamports()
    }

    /// Token label: the mint address, or `SOL` for the native asset.
    pub fn asset_label(&self) -> &str {
        self.token_mint.as_deref().unwrap_or(NATIVE_ASSET)
    }

    /// `updated_at` must not precede `created_at`.
    pub fn validate_timestamps(&self) -> bool {
        self.updated_at >= self.created_at
    }
}

/// Body of `POST /transfer-requests`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitTransferRequest {
    pub from_address: String,
    pub to_address: String,
    pub transfer_details: TransferDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_mint: Option<String>,
    /// Idempotency key; also sent as the `Idempotency-Key` header.
    pub nonce: String,
    /// Base58 Ed25519 signature over the canonical message.
    pub signature: String,
}

/// Cursor-paginated list response, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Component health as reported by `GET /health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub blockchain: HealthStatus,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub version: String,
}

/// Convert whole SOL to lamports, `None` on overflow or a negative/non-finite input.
pub fn sol_to_lamports(sol: f64) -> Option<u64> {
    if !sol.is_finite() || sol < 0.0 {
        return None;
    }
    let lamports = (sol * LAMPORTS_PER_SOL as f64).round();
    if lamports > u64::MAX as f64 {
        return None;
    }
    Some(lamports as u64)
}

/// Format lamports as a decimal SOL string without floating point loss.
pub fn lamports_to_sol_string(lamports: u64) -> String {
    let whole = lamports / LAMPORTS_PER_SOL;
    let frac = lamports % LAMPORTS_PER_SOL;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:09}", frac);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}
