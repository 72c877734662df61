//! Platform adapter contract.
//!
//! A platform adapter is the narrow interface to one external marketplace
//! API. The engine owns everything around the call: payload shaping, the
//! idempotency key, the timeout, retry scheduling and error classification.
//! Adapters only move bytes.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// One outbound product-creation request. The idempotency key is derived
/// deterministically from `(item, platform, attempt)` so a retried call
/// cannot create a duplicate remote object.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub platform: String,
    pub payload: Value,
    pub idempotency_key: String,
}

/// Deterministic idempotency key for a registration attempt.
pub fn idempotency_key(item_id: &str, platform: &str, attempt: u32) -> String {
    format!("{item_id}:{platform}:{attempt}")
}

/// Classified failure of a platform call.
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Rate limited by platform")]
    RateLimited,

    #[error("Platform call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Platform rejected the payload: {0}")]
    Validation(String),

    #[error("Authentication irrecoverable: {0}")]
    AuthFailed(String),

    #[error("Account is banned on the platform")]
    AccountBanned,

    /// The call succeeded but no product id could be extracted: usually
    /// API contract drift, kept distinct so operators can diagnose it.
    #[error("Response did not contain a platform product id")]
    MissingProductId,
}

impl PlatformError {
    /// Permanent errors terminate a registration regardless of the attempt
    /// cap; everything else is retried under the backoff schedule.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited | Self::Timeout { .. } => false,
            // 429 is rate limiting in disguise; other 4xx are contract
            // violations that retries cannot fix.
            Self::Http { status, .. } => (400..500).contains(status) && *status != 429,
            Self::Validation(_)
            | Self::AuthFailed(_)
            | Self::AccountBanned
            | Self::MissingProductId => true,
        }
    }

    /// Stable tag used in persisted error strings and alert payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Http { .. } => "http",
            Self::RateLimited => "rate_limited",
            Self::Timeout { .. } => "timeout",
            Self::Validation(_) => "validation",
            Self::AuthFailed(_) => "auth_failed",
            Self::AccountBanned => "account_banned",
            Self::MissingProductId => "missing_product_id",
        }
    }
}

/// Client for one external marketplace.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Platform tag this adapter serves, e.g. `"coupang"`.
    fn platform(&self) -> &str;

    /// Create a product listing; returns the raw response blob.
    async fn create_product(&self, request: &RegistrationRequest) -> Result<Value, PlatformError>;

    /// Fetch a listing by platform product id. Optional; used by
    /// post-registration monitoring.
    async fn get_product(&self, platform_product_id: &str) -> Result<Value, PlatformError> {
        let _ = platform_product_id;
        Err(PlatformError::Validation(
            "get_product not supported by this adapter".to_string(),
        ))
    }
}

/// Run `create_product` under the configured per-call timeout. Exceeding it
/// counts as a failed attempt eligible for retry.
pub async fn create_product_with_timeout(
    adapter: &dyn PlatformAdapter,
    request: &RegistrationRequest,
    timeout: Duration,
) -> Result<Value, PlatformError> {
    match tokio::time::timeout(timeout, adapter.create_product(request)).await {
        Ok(result) => result,
        Err(_) => Err(PlatformError::Timeout {
            seconds: timeout.as_secs(),
        }),
    }
}
