//! HTTP client for the compliance relayer service.
//!
//! Endpoints:
//! - POST /transfer-requests            (Idempotency-Key: <nonce>)
//! - GET  /transfer-requests/{id}
//! - GET  /transfer-requests?limit=<1..100>&cursor=<id>
//! - POST /transfer-requests/{id}/retry
//! - GET  /health

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

use relay_types::{
    ApiError, ApiErrorKind, ErrorResponse, HealthResponse, PaginatedResponse, Result,
    SubmitTransferRequest, TransferRequest,
};

use crate::{ListQuery, RelayerApi};

/// Header carrying the submission nonce.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Relayer client configuration.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

/// Relayer client for submitting and tracking transfer requests.
pub struct RelayerClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl RelayerClient {
    pub fn new(base_url: &str, options: ClientOptions) -> Self {
        let timeout = Duration::from_millis(options.timeout_ms);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_error(status.as_u16(), &body, retry_after));
        }

        resp.json::<T>().await.map_err(|e| {
            ApiError::new(
                ApiErrorKind::Unknown,
                format!("failed to parse relayer response: {}", e),
            )
            .with_status(status.as_u16())
        })
    }
}

#[async_trait]
impl RelayerApi for RelayerClient {
    async fn submit_transfer(&self, request: &SubmitTransferRequest) -> Result<TransferRequest> {
        let url = format!("{}/transfer-requests", self.base_url);
        info!(target: "relay::api", nonce = %request.nonce, to = %request.to_address, "submitting transfer");

        let resp = self
            .client
            .post(&url)
            .header(IDEMPOTENCY_KEY_HEADER, request.nonce.as_str())
            .json(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport_error)?;

        let result = Self::handle_response(resp).await;
        if let Err(ref e) = result {
            warn!(target: "relay::api", nonce = %request.nonce, kind = %e.kind, error = %e.message, "submission rejected");
        }
        result
    }

    async fn get_transfer(&self, id: &str) -> Result<TransferRequest> {
        let url = format!("{}/transfer-requests/{}", self.base_url, id);
        debug!(target: "relay::api", %id, "fetching transfer");

        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport_error)?;

        Self::handle_response(resp).await
    }

    async fn list_transfers(&self, query: &ListQuery) -> Result<PaginatedResponse<TransferRequest>> {
        let url = format!("{}/transfer-requests", self.base_url);

        let mut params = vec![("limit", query.limit().to_string())];
        if let Some(ref cursor) = query.cursor {
            params.push(("cursor", cursor.clone()));
        }

        let resp = self
            .client
            .get(&url)
            .query(&params)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport_error)?;

        Self::handle_response(resp).await
    }

    async fn retry_transfer(&self, id: &str) -> Result<TransferRequest> {
        let url = format!("{}/transfer-requests/{}/retry", self.base_url, id);
        info!(target: "relay::api", %id, "requesting blockchain retry");

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport_error)?;

        Self::handle_response(resp).await
    }

    async fn health(&self) -> Result<HealthResponse> {
        let url = format!("{}/health", self.base_url);

        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport_error)?;

        Self::handle_response(resp).await
    }
}

fn transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::new(ApiErrorKind::Timeout, format!("relayer request timed out: {}", e))
    } else {
        ApiError::new(ApiErrorKind::NetworkError, format!("relayer request failed: {}", e))
    }
}

/// Map a non-2xx response to the error taxonomy.
///
/// The body's `error.type` wins when it names a known kind; otherwise the
/// HTTP status decides. For 429 the body's `retry_after` takes precedence
/// over the `Retry-After` header.
pub fn classify_error(status: u16, body: &str, retry_after_header: Option<u64>) -> ApiError {
    let parsed = serde_json::from_str::<ErrorResponse>(body).ok();

    let kind_from_body = parsed
        .as_ref()
        .and_then(|p| p.error.error_type.parse::<ApiErrorKind>().ok());
    let kind = kind_from_body.unwrap_or_else(|| kind_from_status(status));

    let message = match parsed {
        Some(ref p) => p.error.message.clone(),
        None if body.trim().is_empty() => format!("HTTP {}", status),
        None => format!("HTTP {}: {}", status, body.trim()),
    };

    let mut err = ApiError::new(kind, message).with_status(status);
    if kind == ApiErrorKind::RateLimited {
        if let Some(secs) = parsed.and_then(|p| p.retry_after).or(retry_after_header) {
            err = err.with_retry_after(secs);
        }
    }
    err
}

fn kind_from_status(status: u16) -> ApiErrorKind {
    match status {
        400 | 422 => ApiErrorKind::ValidationError,
        401 | 403 => ApiErrorKind::AuthorizationError,
        404 => ApiErrorKind::NotFound,
        408 | 504 => ApiErrorKind::Timeout,
        429 => ApiErrorKind::RateLimited,
        502 | 503 => ApiErrorKind::BlockchainError,
        _ => ApiErrorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_with_body_retry_after() {
        let body = r#"{"error":{"type":"rate_limited","message":"Too many requests"},"retry_after":10}"#;
        let err = classify_error(429, body, None);
        assert_eq!(err.kind, ApiErrorKind::RateLimited);
        assert_eq!(err.retry_after, Some(10));
        assert_eq!(err.status, Some(429));
        assert_eq!(err.backoff(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_rate_limited_falls_back_to_header() {
        let err = classify_error(429, "", Some(7));
        assert_eq!(err.kind, ApiErrorKind::RateLimited);
        assert_eq!(err.retry_after, Some(7));
    }

    #[test]
    fn test_body_type_wins_over_status() {
        let body = r#"{"error":{"type":"authorization_error","message":"Invalid signature"}}"#;
        let err = classify_error(400, body, None);
        assert_eq!(err.kind, ApiErrorKind::AuthorizationError);
        assert_eq!(err.message, "Invalid signature");

        let body = r#"{"error":{"type":"insufficient_funds","message":"Balance too low"}}"#;
        assert_eq!(classify_error(400, body, None).kind, ApiErrorKind::InsufficientFunds);
    }

    #[test]
    fn test_status_fallbacks() {
        assert_eq!(classify_error(400, "", None).kind, ApiErrorKind::ValidationError);
        assert_eq!(classify_error(401, "", None).kind, ApiErrorKind::AuthorizationError);
        assert_eq!(classify_error(404, "", None).kind, ApiErrorKind::NotFound);
        assert_eq!(classify_error(503, "", None).kind, ApiErrorKind::BlockchainError);
        assert_eq!(classify_error(504, "", None).kind, ApiErrorKind::Timeout);
        assert_eq!(classify_error(500, "oops", None).kind, ApiErrorKind::Unknown);
        assert_eq!(classify_error(500, "oops", None).message, "HTTP 500: oops");
    }

    #[test]
    fn test_unrecognized_body_type_uses_status() {
        let body = r#"{"error":{"type":"database_error","message":"db down"}}"#;
        let err = classify_error(502, body, None);
        assert_eq!(err.kind, ApiErrorKind::BlockchainError);
        assert_eq!(err.message, "db down");
    }

    #[test]
    fn test_retry_after_ignored_for_other_kinds() {
        let err = classify_error(503, "", Some(5));
        assert_eq!(err.retry_after, None);
    }

    #[test]
    fn test_base_url_trimmed() {
        let client = RelayerClient::new("http://localhost:3001/", ClientOptions::default());
        assert_eq!(client.base_url(), "http://localhost:3001");
    }
}
