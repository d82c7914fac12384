//! In-memory relayer (for testing and offline use).
//!
//! Behaves like the real service where the client can observe it: nonces are
//! deduplicated, unknown ids are `not_found`, retries are only accepted for
//! `pending_submission`/`failed`. Status progression is scripted per id.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use uuid::Uuid;

use relay_types::{
    ApiError, ApiErrorKind, BlockchainStatus, ComplianceStatus, HealthResponse, HealthStatus,
    PaginatedResponse, Result, SubmitTransferRequest, TransferRequest,
};

use crate::{ListQuery, RelayerApi};

/// A request the relayer received, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Submit { nonce: String },
    Get { id: String },
    List { limit: u32, cursor: Option<String> },
    Retry { id: String },
    Health,
}

#[derive(Default)]
struct State {
    transfers: HashMap<String, TransferRequest>,
    /// Insertion order, oldest first.
    order: Vec<String>,
    by_nonce: HashMap<String, String>,
    scripts: HashMap<String, VecDeque<BlockchainStatus>>,
    get_failures: HashMap<String, VecDeque<ApiError>>,
    submit_failures: VecDeque<ApiError>,
    retry_failures: VecDeque<ApiError>,
    calls: Vec<RecordedCall>,
}

/// In-memory relayer.
pub struct MemoryRelayer {
    state: Mutex<State>,
    initial_status: BlockchainStatus,
    get_gate: Option<Arc<Semaphore>>,
}

impl MemoryRelayer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            initial_status: BlockchainStatus::Received,
            get_gate: None,
        }
    }

    /// Status assigned to newly submitted transfers.
    pub fn with_initial_status(mut self, status: BlockchainStatus) -> Self {
        self.initial_status = status;
        self
    }

    /// Every `get_transfer` waits for one permit before answering.
    pub fn with_get_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.get_gate = Some(gate);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed a transfer as if it had been created earlier.
    pub fn insert(&self, transfer: TransferRequest) {
        let mut state = self.state();
        if let Some(ref nonce) = transfer.nonce {
            state.by_nonce.insert(nonce.clone(), transfer.id.clone());
        }
        if !state.transfers.contains_key(&transfer.id) {
            state.order.push(transfer.id.clone());
        }
        state.transfers.insert(transfer.id.clone(), transfer);
    }

    /// Server-side view of a transfer.
    pub fn transfer(&self, id: &str) -> Option<TransferRequest> {
        self.state().transfers.get(id).cloned()
    }

    /// Mutate the server-side view of a transfer, as the worker would.
    pub fn update(&self, id: &str, f: impl FnOnce(&mut TransferRequest)) {
        let mut state = self.state();
        if let Some(t) = state.transfers.get_mut(id) {
            f(t);
            t.updated_at = Utc::now();
        }
    }

    pub fn set_status(&self, id: &str, status: BlockchainStatus) {
        self.update(id, |t| t.blockchain_status = status);
    }

    /// Delete a transfer so later lookups return `not_found`.
    pub fn remove(&self, id: &str) {
        let mut state = self.state();
        state.transfers.remove(id);
        state.order.retain(|x| x != id);
    }

    /// Each subsequent `get_transfer(id)` advances the transfer to the next status.
    pub fn script(&self, id: &str, statuses: impl IntoIterator<Item = BlockchainStatus>) {
        self.state()
            .scripts
            .entry(id.to_string())
            .or_default()
            .extend(statuses);
    }

    pub fn fail_next_get(&self, id: &str, err: ApiError) {
        self.state()
            .get_failures
            .entry(id.to_string())
            .or_default()
            .push_back(err);
    }

    pub fn fail_next_submit(&self, err: ApiError) {
        self.state().submit_failures.push_back(err);
    }

    pub fn fail_next_retry(&self, err: ApiError) {
        self.state().retry_failures.push_back(err);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    pub fn get_count(&self, id: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, RecordedCall::Get { id: x } if x == id))
            .count()
    }

    pub fn submit_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, RecordedCall::Submit { .. }))
            .count()
    }

    fn not_found(id: &str) -> ApiError {
        ApiError::new(ApiErrorKind::NotFound, format!("transfer request {} not found", id))
            .with_status(404)
    }
}

impl Default for MemoryRelayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayerApi for MemoryRelayer {
    async fn submit_transfer(&self, request: &SubmitTransferRequest) -> Result<TransferRequest> {
        let mut state = self.state();
        state.calls.push(RecordedCall::Submit {
            nonce: request.nonce.clone(),
        });

        if let Some(err) = state.submit_failures.pop_front() {
            return Err(err);
        }

        // Replayed nonce: answer with the original transfer.
        if let Some(id) = state.by_nonce.get(&request.nonce).cloned() {
            if let Some(existing) = state.transfers.get(&id) {
                return Ok(existing.clone());
            }
        }

        let now = Utc::now();
        let transfer = TransferRequest {
            id: Uuid::now_v7().to_string(),
            from_address: request.from_address.clone(),
            to_address: request.to_address.clone(),
            transfer_details: request.transfer_details.clone(),
            token_mint: request.token_mint.clone(),
            compliance_status: ComplianceStatus::Pending,
            blockchain_status: self.initial_status,
            blockchain_signature: None,
            blockchain_retry_count: 0,
            blockchain_last_error: None,
            blockchain_next_retry_at: None,
            nonce: Some(request.nonce.clone()),
            created_at: now,
            updated_at: now,
        };
        state.by_nonce.insert(request.nonce.clone(), transfer.id.clone());
        state.order.push(transfer.id.clone());
        state.transfers.insert(transfer.id.clone(), transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&self, id: &str) -> Result<TransferRequest> {
        self.state().calls.push(RecordedCall::Get { id: id.to_string() });

        if let Some(ref gate) = self.get_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let mut state = self.state();
        if let Some(err) = state.get_failures.get_mut(id).and_then(|q| q.pop_front()) {
            return Err(err);
        }

        let next = state.scripts.get_mut(id).and_then(|q| q.pop_front());
        let transfer = state.transfers.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        if let Some(status) = next {
            transfer.blockchain_status = status;
            transfer.updated_at = Utc::now();
        }
        Ok(transfer.clone())
    }

    async fn list_transfers(&self, query: &ListQuery) -> Result<PaginatedResponse<TransferRequest>> {
        let mut state = self.state();
        state.calls.push(RecordedCall::List {
            limit: query.limit(),
            cursor: query.cursor.clone(),
        });

        let newest_first: Vec<&String> = state.order.iter().rev().collect();
        let start = match query.cursor {
            Some(ref cursor) => newest_first
                .iter()
                .position(|id| *id == cursor)
                .map(|p| p + 1)
                .unwrap_or(newest_first.len()),
            None => 0,
        };

        let limit = query.limit() as usize;
        let page: Vec<TransferRequest> = newest_first
            .iter()
            .skip(start)
            .take(limit)
            .filter_map(|id| state.transfers.get(*id).cloned())
            .collect();
        let has_more = start + page.len() < newest_first.len();
        let next_cursor = if has_more {
            page.last().map(|t| t.id.clone())
        } else {
            None
        };

        Ok(PaginatedResponse {
            items: page,
            next_cursor,
            has_more,
        })
    }

    async fn retry_transfer(&self, id: &str) -> Result<TransferRequest> {
        let mut state = self.state();
        state.calls.push(RecordedCall::Retry { id: id.to_string() });

        if let Some(err) = state.retry_failures.pop_front() {
            return Err(err);
        }

        let transfer = state.transfers.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        if !transfer
            .blockchain_status
            .can_retry(transfer.blockchain_retry_count)
        {
            return Err(ApiError::new(
                ApiErrorKind::ValidationError,
                "Request is not pending submission or failed",
            )
            .with_status(400));
        }

        transfer.blockchain_status = BlockchainStatus::Processing;
        transfer.blockchain_last_error = None;
        transfer.blockchain_next_retry_at = None;
        transfer.updated_at = Utc::now();
        Ok(transfer.clone())
    }

    async fn health(&self) -> Result<HealthResponse> {
        self.state().calls.push(RecordedCall::Health);
        Ok(HealthResponse {
            status: HealthStatus::Healthy,
            database: HealthStatus::Healthy,
            blockchain: HealthStatus::Healthy,
            timestamp: Some(Utc::now()),
            version: "memory".to_string(),
        })
    }
}
