//! Submission client for the compliance relayer.
//!
//! - `RelayerApi`: the transport seam used by the tracker and the ops facade
//! - `RelayerClient`: reqwest implementation
//! - `MemoryRelayer`: in-process relayer for tests and offline demos
//!
//! Nothing in this crate retries on its own. Every call maps to exactly one
//! request; back-off and retry decisions belong to the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use relay_types::{
    HealthResponse, PaginatedResponse, Result, SubmitTransferRequest, TransferRequest,
};

pub mod memory;
pub mod relayer_client;

pub use memory::{MemoryRelayer, RecordedCall};
pub use relayer_client::{classify_error, ClientOptions, RelayerClient, IDEMPOTENCY_KEY_HEADER};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Page request for `GET /transfer-requests`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub limit: u32,
    /// Id of the last item of the previous page.
    pub cursor: Option<String>,
}

impl ListQuery {
    pub fn new(limit: u32, cursor: Option<String>) -> Self {
        Self { limit, cursor }
    }

    /// Limit clamped to what the relayer accepts.
    pub fn limit(&self) -> u32 {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            cursor: None,
        }
    }
}

/// Relayer operations used by the client.
#[async_trait]
pub trait RelayerApi: Send + Sync {
    /// POST /transfer-requests. The payload's nonce doubles as the idempotency key.
    async fn submit_transfer(&self, request: &SubmitTransferRequest) -> Result<TransferRequest>;

    /// GET /transfer-requests/{id}
    async fn get_transfer(&self, id: &str) -> Result<TransferRequest>;

    /// GET /transfer-requests, newest first.
    async fn list_transfers(&self, query: &ListQuery) -> Result<PaginatedResponse<TransferRequest>>;

    /// POST /transfer-requests/{id}/retry. Only valid for `failed` transfers.
    async fn retry_transfer(&self, id: &str) -> Result<TransferRequest>;

    /// GET /health
    async fn health(&self) -> Result<HealthResponse>;
}
