//! Shared domain types for the compliance relayer client.
//!
//! - Transfer request entity and wire shapes
//! - Blockchain status state machine
//! - Relayer error taxonomy

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod status;
pub mod transfer;

pub use status::{retry_policy_allows, BlockchainStatus, ComplianceStatus, MAX_RETRY_COUNT};
pub use transfer::{
    lamports_to_sol_string, sol_to_lamports, HealthResponse, HealthStatus, PaginatedResponse,
    SubmitTransferRequest, TransferDetails, TransferRequest, LAMPORTS_PER_SOL, NATIVE_ASSET,
};

/// Error categories reported by the relayer (the `error.type` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    /// Malformed input. Fix the input; resubmitting the same payload will fail again.
    ValidationError,
    /// Signature rejected. The caller must re-sign.
    AuthorizationError,
    /// The sender cannot cover amount plus fees. Fund the account and send again.
    InsufficientFunds,
    /// Back off for `retry_after` seconds before any further call.
    RateLimited,
    /// Transient chain-side failure, retriable only through the manual retry gate.
    BlockchainError,
    /// Transient timeout, retriable only through the manual retry gate.
    Timeout,
    /// The entity vanished; stop tracking it.
    NotFound,
    /// Transport failure before a response was received.
    NetworkError,
    /// Anything else. Treated as non-retriable.
    Unknown,
}

impl ApiErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiErrorKind::ValidationError => "validation_error",
            ApiErrorKind::AuthorizationError => "authorization_error",
            ApiErrorKind::InsufficientFunds => "insufficient_funds",
            ApiErrorKind::RateLimited => "rate_limited",
            ApiErrorKind::BlockchainError => "blockchain_error",
            ApiErrorKind::Timeout => "timeout",
            ApiErrorKind::NotFound => "not_found",
            ApiErrorKind::NetworkError => "network_error",
            ApiErrorKind::Unknown => "unknown",
        }
    }

    /// Transient failures that the manual retry gate may act on.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiErrorKind::BlockchainError | ApiErrorKind::Timeout)
    }

    pub fn requires_resign(&self) -> bool {
        matches!(self, ApiErrorKind::AuthorizationError)
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiErrorKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "validation_error" => Ok(ApiErrorKind::ValidationError),
            "authorization_error" => Ok(ApiErrorKind::AuthorizationError),
            "insufficient_funds" => Ok(ApiErrorKind::InsufficientFunds),
            "rate_limited" => Ok(ApiErrorKind::RateLimited),
            "blockchain_error" => Ok(ApiErrorKind::BlockchainError),
            "timeout" => Ok(ApiErrorKind::Timeout),
            "not_found" => Ok(ApiErrorKind::NotFound),
            "network_error" => Ok(ApiErrorKind::NetworkError),
            "unknown" => Ok(ApiErrorKind::Unknown),
            _ => Err(()),
        }
    }
}

/// A classified relayer failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    /// HTTP status, `None` for transport failures.
    pub status: Option<u16>,
    /// Seconds to wait before the next call, set for `rate_limited`.
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    /// Required back-off before the next call, if the server asked for one.
    pub fn backoff(&self) -> Option<Duration> {
        match self.kind {
            ApiErrorKind::RateLimited => self.retry_after.map(Duration::from_secs),
            _ => None,
        }
    }
}

/// Error body returned by the relayer on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
    /// Present on 429 responses.
    #[serde(default)]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, ApiError>;
