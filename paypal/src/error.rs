//! Error types for the PayPal client.

use thiserror::Error;

/// Result alias used across the crate.
pub type PayPalResult<T> = Result<T, PayPalError>;

/// Errors surfaced by the PayPal client.
///
/// The split matters to callers: `Unavailable` is a transport-level failure
/// and is safe to retry with the **same** request id (the provider
/// deduplicates on `PayPal-Request-Id`), while `Rejected` carries a definite
/// provider answer and must not be blindly retried.
#[derive(Error, Debug)]
pub enum PayPalError {
    /// Transport-level failure (DNS, TLS, timeout, connection reset).
    ///
    /// The outcome of the request is unknown; retry with the same request id.
    #[error("PayPal unreachable: {0}")]
    Unavailable(String),

    /// The provider rejected our credentials while minting a token.
    #[error("PayPal rejected credentials (status {status})")]
    Auth {
        /// HTTP status returned by the token endpoint.
        status: u16,
    },

    /// The provider answered a business call with a non-2xx status.
    #[error("PayPal rejected request (status {status}): {body}")]
    Rejected {
        /// HTTP status of the response.
        status: u16,
        /// Raw response body, for operator diagnostics.
        body: String,
    },

    /// A 2xx response that does not carry the fields we rely on.
    #[error("unexpected PayPal response shape: {0}")]
    InvalidResponse(String),
}

impl PayPalError {
    pub(crate) fn transport(err: &reqwest::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}
