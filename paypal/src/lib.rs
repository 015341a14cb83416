//! PayPal REST client for the chapel platform.
//!
//! This crate wraps the three provider endpoints the platform uses —
//! order creation, order capture and capture refund — behind a client that
//! handles OAuth token caching and idempotent POSTs via the
//! `PayPal-Request-Id` header.
//!
//! # Idempotency contract
//!
//! Every POST carries a caller-chosen request id. The provider guarantees
//! at-most-once effect per distinct id, which is what makes retries after
//! timeouts safe: a replay with the same id returns the original resource
//! instead of charging (or refunding) twice. Callers own the id scheme;
//! see the event core for the concrete conventions
//! (`capture:<order_id>`, `refund:<order_id>:<line_id>:<nonce>`).
//!
//! # Example
//!
//! ```no_run
//! use chapel_paypal::{Mode, PayPalClient, PayPalConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), chapel_paypal::PayPalError> {
//! let client = PayPalClient::new(PayPalConfig {
//!     mode: Mode::Sandbox,
//!     client_id: "client-id".into(),
//!     client_secret: "client-secret".into(),
//!     timeout: Duration::from_secs(30),
//! })?;
//! let (captured, _raw) = client.capture_order("5O190127TN364715T", "capture:5O190127TN364715T").await?;
//! println!("capture id: {:?}", captured.capture_id());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;

pub use client::{ApiResponse, Mode, PayPalClient, PayPalConfig};
pub use error::{PayPalError, PayPalResult};
pub use models::{
    Amount, AmountBreakdown, AmountWithBreakdown, ApplicationContext, CaptureRecord, LineItem,
    OrderCaptured, OrderCreated, OrderRequest, PurchaseUnit, RefundCreated, RefundRequest,
};
