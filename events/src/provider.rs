//! Payment provider seam.
//!
//! The core depends on this trait, not on the concrete client, so tests
//! drive the full registration flows against [`MockProvider`] while
//! production wires in [`chapel_paypal::PayPalClient`].

use crate::error::{CoreError, CoreResult};
use crate::types::{CaptureId, Money, OrderId};
use async_trait::async_trait;
use chapel_paypal::{OrderCaptured, OrderCreated, OrderRequest, PayPalClient, RefundCreated, RefundRequest};
use serde_json::{json, Value};
use tokio::sync::Mutex;

/// Provider operations the core relies on. Every call carries a
/// caller-chosen request id; implementations must pass it through to the
/// provider's idempotency header.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Creates a checkout order. Returns the typed response plus the raw
    /// body for the ledger.
    async fn create_order(
        &self,
        request: &OrderRequest,
        request_id: &str,
    ) -> CoreResult<(OrderCreated, Value)>;

    /// Captures an approved order.
    async fn capture_order(
        &self,
        order_id: &OrderId,
        request_id: &str,
    ) -> CoreResult<(OrderCaptured, Value)>;

    /// Refunds part of a capture.
    async fn refund_capture(
        &self,
        capture_id: &CaptureId,
        request: &RefundRequest,
        request_id: &str,
    ) -> CoreResult<(RefundCreated, Value)>;
}

#[async_trait]
impl PaymentProvider for PayPalClient {
    async fn create_order(
        &self,
        request: &OrderRequest,
        request_id: &str,
    ) -> CoreResult<(OrderCreated, Value)> {
        Ok(PayPalClient::create_order(self, request, request_id).await?)
    }

    async fn capture_order(
        &self,
        order_id: &OrderId,
        request_id: &str,
    ) -> CoreResult<(OrderCaptured, Value)> {
        Ok(PayPalClient::capture_order(self, order_id.as_str(), request_id).await?)
    }

    async fn refund_capture(
        &self,
        capture_id: &CaptureId,
        request: &RefundRequest,
        request_id: &str,
    ) -> CoreResult<(RefundCreated, Value)> {
        Ok(PayPalClient::refund_capture(self, capture_id.as_str(), request, request_id).await?)
    }
}

// ============================================================================
// Mock provider
// ============================================================================

/// A refund call the mock observed, for test assertions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRefund {
    /// Capture the refund was issued against.
    pub capture_id: CaptureId,
    /// Two-decimal amount string sent on the wire.
    pub amount: String,
    /// Idempotency request id.
    pub request_id: String,
}

#[derive(Debug, Default)]
struct MockState {
    order_counter: u64,
    refund_counter: u64,
    orders: Vec<(OrderRequest, String)>,
    captures: Vec<(OrderId, String)>,
    refunds: Vec<RecordedRefund>,
    fee: Option<Money>,
    fail_order_create: bool,
    fail_capture: bool,
    fail_refunds: bool,
}

/// Scriptable in-process provider (always succeeds unless told otherwise).
///
/// Capture ids are derived from the order id, so replaying a capture is
/// naturally idempotent the way the real provider's request-id
/// deduplication makes it.
#[derive(Debug, Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
}

impl MockProvider {
    /// Creates a mock that approves everything and reports no fee.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent captures report this provider fee.
    pub async fn set_fee(&self, fee: Money) {
        self.state.lock().await.fee = Some(fee);
    }

    /// Makes order creation fail with a provider rejection.
    pub async fn fail_order_create(&self, fail: bool) {
        self.state.lock().await.fail_order_create = fail;
    }

    /// Makes captures fail with a provider rejection.
    pub async fn fail_capture(&self, fail: bool) {
        self.state.lock().await.fail_capture = fail;
    }

    /// Makes refunds fail with a provider rejection.
    pub async fn fail_refunds(&self, fail: bool) {
        self.state.lock().await.fail_refunds = fail;
    }

    /// Orders created so far (request + request id).
    pub async fn orders(&self) -> Vec<(OrderRequest, String)> {
        self.state.lock().await.orders.clone()
    }

    /// Capture calls observed so far.
    pub async fn captures(&self) -> Vec<(OrderId, String)> {
        self.state.lock().await.captures.clone()
    }

    /// Refund calls observed so far.
    pub async fn refunds(&self) -> Vec<RecordedRefund> {
        self.state.lock().await.refunds.clone()
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> CoreResult<(T, Value)> {
        let typed = serde_json::from_value(value.clone())
            .map_err(|e| CoreError::ProviderRejected { status: 0, body: e.to_string() })?;
        Ok((typed, value))
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    async fn create_order(
        &self,
        request: &OrderRequest,
        request_id: &str,
    ) -> CoreResult<(OrderCreated, Value)> {
        let mut state = self.state.lock().await;
        if state.fail_order_create {
            return Err(CoreError::ProviderRejected {
                status: 422,
                body: "ORDER_CREATE_DECLINED".into(),
            });
        }
        state.order_counter += 1;
        let id = format!("MOCK-ORDER-{}", state.order_counter);
        state.orders.push((request.clone(), request_id.to_string()));
        Self::decode(json!({
            "id": id,
            "status": "CREATED",
            "links": [
                {"rel": "self", "href": format!("https://mock/orders/{id}")},
                {"rel": "approve", "href": format!("https://mock/approve/{id}")}
            ]
        }))
    }

    async fn capture_order(
        &self,
        order_id: &OrderId,
        request_id: &str,
    ) -> CoreResult<(OrderCaptured, Value)> {
        let mut state = self.state.lock().await;
        if state.fail_capture {
            return Err(CoreError::ProviderRejected {
                status: 422,
                body: "CAPTURE_DECLINED".into(),
            });
        }
        state
            .captures
            .push((order_id.clone(), request_id.to_string()));
        let breakdown = state.fee.map(|fee| {
            json!({"paypal_fee": {"currency_code": "USD", "value": fee.to_wire()}})
        });
        let mut capture = json!({"id": format!("CAP-{order_id}")});
        if let Some(b) = breakdown {
            capture["seller_receivable_breakdown"] = b;
        }
        Self::decode(json!({
            "id": order_id.as_str(),
            "status": "COMPLETED",
            "purchase_units": [{"payments": {"captures": [capture]}}]
        }))
    }

    async fn refund_capture(
        &self,
        capture_id: &CaptureId,
        request: &RefundRequest,
        request_id: &str,
    ) -> CoreResult<(RefundCreated, Value)> {
        let mut state = self.state.lock().await;
        if state.fail_refunds {
            return Err(CoreError::ProviderRejected {
                status: 422,
                body: "REFUND_DECLINED".into(),
            });
        }
        state.refund_counter += 1;
        let id = format!("MOCK-REFUND-{}", state.refund_counter);
        state.refunds.push(RecordedRefund {
            capture_id: capture_id.clone(),
            amount: request.amount.value.clone(),
            request_id: request_id.to_string(),
        });
        Self::decode(json!({"id": id, "status": "COMPLETED"}))
    }
}
