//! HTTP client for the PayPal REST API.
//!
//! Responsibilities: deriving the base URL from the configured mode, caching
//! the OAuth bearer token, and making idempotent POSTs that carry a
//! caller-chosen `PayPal-Request-Id`. The provider guarantees at-most-once
//! effect per distinct request id, so transport retries with the same id are
//! always safe.

use crate::error::{PayPalError, PayPalResult};
use crate::models::{OrderCaptured, OrderCreated, OrderRequest, RefundCreated, RefundRequest};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Provider environment selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Sandbox environment (`api.sandbox.paypal.com`).
    Sandbox,
    /// Live environment (`api.paypal.com`).
    Live,
}

impl Mode {
    /// Parses the conventional `PAYPAL_MODE` value; anything but `live`
    /// falls back to sandbox, matching how the platform is deployed.
    #[must_use]
    pub fn from_str_lossy(value: &str) -> Self {
        if value.eq_ignore_ascii_case("live") {
            Self::Live
        } else {
            Self::Sandbox
        }
    }

    /// Base URL for this environment.
    #[must_use]
    pub const fn base_url(self) -> &'static str {
        match self {
            Self::Sandbox => "https://api.sandbox.paypal.com",
            Self::Live => "https://api.paypal.com",
        }
    }
}

/// Static configuration for [`PayPalClient`].
#[derive(Clone, Debug)]
pub struct PayPalConfig {
    /// Sandbox or live.
    pub mode: Mode,
    /// REST application client id.
    pub client_id: String,
    /// REST application secret.
    pub client_secret: String,
    /// Per-request timeout. A timed-out call has an *unknown* outcome and
    /// must be retried with the same request id.
    pub timeout: Duration,
}

/// How long before the reported expiry we stop trusting a cached token.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct CachedToken {
    bearer: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// A plain view of an HTTP exchange with the provider: status, parsed JSON
/// (or `Value::Null` when the body is not JSON), and the raw text for the
/// ledger and for error messages.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed body, `Value::Null` when unparsable.
    pub body: Value,
    /// Raw body text.
    pub text: String,
}

impl ApiResponse {
    /// True for any 2xx status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// PayPal REST client with token caching and idempotent POSTs.
#[derive(Debug)]
pub struct PayPalClient {
    config: PayPalConfig,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl PayPalClient {
    /// Builds a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PayPalError::Unavailable`] when the underlying HTTP client
    /// cannot be constructed (TLS backend initialisation).
    pub fn new(config: PayPalConfig) -> PayPalResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PayPalError::Unavailable(e.to_string()))?;
        Ok(Self {
            config,
            http,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.mode.base_url(), path)
    }

    /// Returns a valid bearer token, minting a new one when the cache is
    /// empty or stale. Concurrent callers serialize on the cache lock so a
    /// cold start performs a single token request.
    ///
    /// # Errors
    ///
    /// [`PayPalError::Auth`] when the provider rejects the credentials,
    /// [`PayPalError::Unavailable`] on transport failure.
    pub async fn access_token(&self) -> PayPalResult<String> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.bearer.clone());
            }
        }

        let response = self
            .http
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| PayPalError::transport(&e))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            tracing::warn!(status, "PayPal token request rejected");
            return Err(PayPalError::Auth { status });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PayPalError::InvalidResponse(format!("token response: {e}")))?;

        let ttl = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        let bearer = token.access_token;
        *guard = Some(CachedToken {
            bearer: bearer.clone(),
            expires_at: Instant::now() + ttl,
        });
        tracing::debug!(ttl_secs = ttl.as_secs(), "PayPal token refreshed");
        Ok(bearer)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// POSTs `body` to `path` with the caller's idempotency `request_id`.
    ///
    /// A stale cached token (provider answers 401) is refreshed once and the
    /// request is replayed with the **same** request id, which the provider
    /// deduplicates.
    ///
    /// # Errors
    ///
    /// [`PayPalError::Unavailable`] on transport failure, token errors per
    /// [`Self::access_token`]. Non-2xx business answers are returned as a
    /// normal [`ApiResponse`]; mapping them to errors is the typed
    /// endpoints' job, since some callers need the raw body.
    pub async fn post(&self, path: &str, body: &Value, request_id: &str) -> PayPalResult<ApiResponse> {
        let first = self.post_once(path, body, request_id).await?;
        if first.status != 401 {
            return Ok(first);
        }
        tracing::debug!(path, "PayPal answered 401; refreshing token and replaying");
        self.invalidate_token().await;
        self.post_once(path, body, request_id).await
    }

    async fn post_once(&self, path: &str, body: &Value, request_id: &str) -> PayPalResult<ApiResponse> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .header("PayPal-Request-Id", request_id)
            .json(body)
            .send()
            .await
            .map_err(|e| PayPalError::transport(&e))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| PayPalError::transport(&e))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        tracing::debug!(path, status, request_id, "PayPal POST completed");
        Ok(ApiResponse { status, body, text })
    }

    fn decode<T: serde::de::DeserializeOwned>(response: &ApiResponse, what: &str) -> PayPalResult<T> {
        if !response.is_success() {
            return Err(PayPalError::Rejected {
                status: response.status,
                body: response.text.clone(),
            });
        }
        serde_json::from_value(response.body.clone())
            .map_err(|e| PayPalError::InvalidResponse(format!("{what}: {e}")))
    }

    /// Creates a checkout order.
    ///
    /// Returns the typed response together with the raw JSON body, which the
    /// transaction ledger persists verbatim.
    ///
    /// # Errors
    ///
    /// [`PayPalError::Rejected`] on a non-2xx answer; transport and token
    /// errors as in [`Self::post`].
    pub async fn create_order(
        &self,
        request: &OrderRequest,
        request_id: &str,
    ) -> PayPalResult<(OrderCreated, Value)> {
        let body = serde_json::to_value(request)
            .map_err(|e| PayPalError::InvalidResponse(format!("order request: {e}")))?;
        let response = self.post("/v2/checkout/orders", &body, request_id).await?;
        let created: OrderCreated = Self::decode(&response, "order create response")?;
        tracing::info!(order_id = %created.id, request_id, "PayPal order created");
        Ok((created, response.body))
    }

    /// Captures an approved order. Callers use the stable request id
    /// `capture:<order_id>` so replays return the original capture.
    ///
    /// # Errors
    ///
    /// [`PayPalError::Rejected`] on a non-2xx answer; transport and token
    /// errors as in [`Self::post`].
    pub async fn capture_order(
        &self,
        order_id: &str,
        request_id: &str,
    ) -> PayPalResult<(OrderCaptured, Value)> {
        let path = format!("/v2/checkout/orders/{order_id}/capture");
        let response = self.post(&path, &Value::Object(serde_json::Map::new()), request_id).await?;
        let captured: OrderCaptured = Self::decode(&response, "order capture response")?;
        tracing::info!(order_id, request_id, "PayPal order captured");
        Ok((captured, response.body))
    }

    /// Refunds part (or all) of a capture.
    ///
    /// # Errors
    ///
    /// [`PayPalError::Rejected`] on a non-2xx answer; transport and token
    /// errors as in [`Self::post`].
    pub async fn refund_capture(
        &self,
        capture_id: &str,
        request: &RefundRequest,
        request_id: &str,
    ) -> PayPalResult<(RefundCreated, Value)> {
        let body = serde_json::to_value(request)
            .map_err(|e| PayPalError::InvalidResponse(format!("refund request: {e}")))?;
        let path = format!("/v2/payments/captures/{capture_id}/refund");
        let response = self.post(&path, &body, request_id).await?;
        let refund: RefundCreated = Self::decode(&response, "refund response")?;
        tracing::info!(capture_id, refund_id = %refund.id, request_id, "PayPal refund created");
        Ok((refund, response.body))
    }
}
