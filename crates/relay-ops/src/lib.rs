//! End-to-end transfer operations: sign, submit, track, retry.
//!
//! `TransferClient` ties the signer, the relayer API, and the tracker
//! together:
//! - `send`: fresh nonce → sign → `POST /transfer-requests` → admit to polling
//! - `retry`: manual retry gate (see [`retry`])
//! - `load_transfers` / `load_more`: paginated history merged into the cache
//!
//! Nothing here re-submits on its own. A failed submission is returned to
//! the caller; sending again means a new intent and therefore a new nonce.

pub mod retry;

use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, info, warn};

use relay_api::{ListQuery, RelayerApi, DEFAULT_PAGE_SIZE};
use relay_signer::{sign_with_keypair, Keypair, Nonce, NonceGenerator, SignedTransfer, SigningError};
use relay_tracker::{PollConfig, PollEventHandler, Tracker};
use relay_types::{ApiError, ApiErrorKind, HealthResponse, TransferDetails, TransferRequest};

pub use retry::{check_retry, RetryError, RetryGate};

/// Errors surfaced by client operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpsError {
    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("relayer error: {0}")]
    Api(#[from] ApiError),

    #[error("retry failed: {0}")]
    Retry(#[from] RetryError),
}

impl OpsError {
    /// Relayer error kind, if the failure came from the relayer.
    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            OpsError::Api(e) | OpsError::Retry(RetryError::Api(e)) => Some(e.kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, OpsError>;

#[derive(Debug, Default)]
struct PageCursor {
    loaded: bool,
    next: Option<String>,
    has_more: bool,
}

/// Client for the transfer request lifecycle.
pub struct TransferClient {
    api: Arc<dyn RelayerApi>,
    tracker: Tracker,
    retry_gate: RetryGate,
    nonces: NonceGenerator,
    page_size: u32,
    cursor: Mutex<PageCursor>,
}

impl TransferClient {
    pub fn new(
        api: Arc<dyn RelayerApi>,
        poll: PollConfig,
        on_event: Option<PollEventHandler>,
    ) -> Self {
        let tracker = Tracker::new(api.clone(), poll, on_event);
        Self {
            api,
            retry_gate: RetryGate::new(tracker.clone()),
            tracker,
            nonces: NonceGenerator::new(),
            page_size: DEFAULT_PAGE_SIZE,
            cursor: Mutex::new(PageCursor::default()),
        }
    }

    /// History page size (clamped to 1..=100 on the wire).
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn generate_keypair() -> Keypair {
        Keypair::generate()
    }

    /// Idempotency key for a new submission intent.
    pub fn next_nonce(&self) -> Nonce {
        self.nonces.next()
    }

    /// Sign and submit a new transfer under a fresh nonce.
    pub async fn send(
        &self,
        keypair: &Keypair,
        to_address: &str,
        details: TransferDetails,
        token_mint: Option<&str>,
    ) -> Result<TransferRequest> {
        let nonce = self.next_nonce();
        let signed = sign_with_keypair(keypair, to_address, details, token_mint, nonce.as_str())?;
        self.submit_signed(&signed).await
    }

    /// Same as [`send`](Self::send), with a Base58 secret key.
    pub async fn send_with_secret(
        &self,
        secret_key: &str,
        to_address: &str,
        details: TransferDetails,
        token_mint: Option<&str>,
    ) -> Result<TransferRequest> {
        let keypair = Keypair::from_base58(secret_key)?;
        self.send(&keypair, to_address, details, token_mint).await
    }

    /// Submit an already-signed payload once and start tracking it.
    ///
    /// Errors are returned as-is; nothing is re-submitted.
    pub async fn submit_signed(&self, signed: &SignedTransfer) -> Result<TransferRequest> {
        self.tracker.check_backoff()?;

        let transfer = match self.api.submit_transfer(&signed.request).await {
            Ok(t) => t,
            Err(e) => {
                self.tracker.note_error(&e);
                warn!(target: "relay::ops", nonce = %signed.nonce, kind = %e.kind, error = %e.message, "submission failed");
                return Err(e.into());
            }
        };

        info!(
            target: "relay::ops",
            id = %transfer.id,
            nonce = %signed.nonce,
            status = %transfer.blockchain_status,
            "transfer submitted"
        );
        self.tracker.admit(transfer.clone()).await;
        Ok(transfer)
    }

    /// Manual retry of a failed transfer.
    pub async fn retry(&self, id: &str) -> std::result::Result<TransferRequest, RetryError> {
        self.retry_gate.retry(id).await
    }

    /// Fetch one transfer now. Errors are surfaced, unlike background polls.
    pub async fn refresh(&self, id: &str) -> Result<TransferRequest> {
        Ok(self.tracker.refresh(id).await?)
    }

    /// Load the first history page.
    ///
    /// Without `refresh`, a history that was already loaded is served from
    /// the cache. Returns every cached transfer, newest first.
    pub async fn load_transfers(&self, refresh: bool) -> Result<Vec<TransferRequest>> {
        let loaded = self.cursor().loaded;
        if !refresh && loaded {
            return Ok(self.tracker.transfers().await);
        }
        self.fetch_page(None).await?;
        Ok(self.tracker.transfers().await)
    }

    /// Load the next history page. Returns only the transfers on that page.
    pub async fn load_more(&self) -> Result<Vec<TransferRequest>> {
        let next = {
            let cursor = self.cursor();
            if !cursor.loaded {
                None
            } else if !cursor.has_more {
                return Ok(Vec::new());
            } else {
                cursor.next.clone()
            }
        };
        self.fetch_page(next).await
    }

    pub fn has_more(&self) -> bool {
        let cursor = self.cursor();
        !cursor.loaded || cursor.has_more
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.tracker.check_backoff()?;
        let health = self.api.health().await.map_err(|e| {
            self.tracker.note_error(&e);
            e
        })?;
        debug!(target: "relay::ops", status = ?health.status, version = %health.version, "relayer health");
        Ok(health)
    }

    /// Resume polling every live cached transfer.
    pub async fn start_polling(&self) -> bool {
        self.tracker.start().await
    }

    pub async fn stop_polling(&self) {
        self.tracker.stop().await
    }

    async fn fetch_page(&self, cursor: Option<String>) -> Result<Vec<TransferRequest>> {
        self.tracker.check_backoff()?;

        let query = ListQuery::new(self.page_size, cursor);
        let snapshot = self.tracker.snapshot().await;
        let page = match self.api.list_transfers(&query).await {
            Ok(p) => p,
            Err(e) => {
                self.tracker.note_error(&e);
                return Err(e.into());
            }
        };

        let items = page.items.clone();
        let applied = self.tracker.merge_page(page.items, snapshot).await;
        debug!(
            target: "relay::ops",
            count = items.len(),
            applied,
            has_more = page.has_more,
            "history page loaded"
        );

        let mut state = self.cursor();
        state.loaded = true;
        state.next = page.next_cursor;
        state.has_more = page.has_more && state.next.is_some();
        Ok(items)
    }

    fn cursor(&self) -> MutexGuard<'_, PageCursor> {
        self.cursor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
