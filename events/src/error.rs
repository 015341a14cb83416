//! Error types for the event core.
//!
//! One variant per failure disposition: callers (the HTTP layer) map these
//! onto structured `{success, msg}` envelopes, so variants carry everything
//! an operator needs and nothing transport-specific.

use chapel_paypal::PayPalError;
use thiserror::Error;

/// Result alias used across the event core.
pub type CoreResult<T> = Result<T, CoreError>;

/// Failures surfaced by the event core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A payload or effective event breaks a model invariant. No side
    /// effects were performed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The change conflicts with current registration state (already
    /// registered, not registered, ...).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The seat predicate failed inside the conditional write: the request
    /// lost a capacity race or would underflow the counter.
    #[error("registration would exceed event capacity")]
    CapacityExceeded,

    /// Registration window closed, not yet open, or the event already
    /// happened.
    #[error("registration closed: {0}")]
    Closed(String),

    /// A referenced document does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport failure talking to the provider; outcome unknown, safe to
    /// retry with the same request id.
    #[error("payment provider unreachable: {0}")]
    ProviderUnavailable(String),

    /// The provider rejected our credentials.
    #[error("payment provider rejected credentials")]
    ProviderAuth,

    /// The provider answered with a definite non-2xx. Not auto-retried; the
    /// raw body is preserved for diagnostics.
    #[error("payment provider rejected request (status {status}): {body}")]
    ProviderRejected {
        /// HTTP status returned by the provider.
        status: u16,
        /// Raw provider response body.
        body: String,
    },

    /// A ledger write targeted a line that is missing or not captured. The
    /// operation fails; nothing is rolled back.
    #[error("transaction ledger inconsistent: {0}")]
    LedgerInconsistent(String),

    /// A user-initiated removal arrived after the automatic refund deadline
    /// without a per-line eligibility override. The whole removal batch is
    /// rejected and the registration change is not committed.
    #[error("the automatic refund window for this event has expired")]
    RefundDeadlinePassed,

    /// Capture reconciliation found a new addition without a captured
    /// ledger line. The preliminary transaction is left for operator
    /// reconciliation.
    #[error("capture mismatch: {0}")]
    CaptureMismatch(String),

    /// Refunds for a removal failed after the registration write. When
    /// `rollback_failed` is set the compensating write also failed: the
    /// ledger is authoritative but the seat counter needs operator
    /// attention.
    #[error("refund processing failed (rollback_failed={rollback_failed}): {source}")]
    RefundFailed {
        /// True when the compensating registration write also failed.
        rollback_failed: bool,
        /// The underlying refund failure.
        source: Box<CoreError>,
    },

    /// Document store failure.
    #[error("store error: {0}")]
    Store(String),

    /// Snapshot store failure; blueprint deletion aborts on this.
    #[error("snapshot write failed: {0}")]
    Snapshot(String),
}

impl From<PayPalError> for CoreError {
    fn from(err: PayPalError) -> Self {
        match err {
            PayPalError::Unavailable(msg) => Self::ProviderUnavailable(msg),
            PayPalError::Auth { .. } => Self::ProviderAuth,
            PayPalError::Rejected { status, body } => Self::ProviderRejected { status, body },
            PayPalError::InvalidResponse(msg) => Self::ProviderRejected { status: 0, body: msg },
        }
    }
}

impl CoreError {
    /// True when the error means "retry with the same request id is safe".
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_))
    }
}
