//! Request and response models for the PayPal v2 checkout and payments APIs.
//!
//! Response models are deliberately tolerant: every field PayPal does not
//! guarantee is an `Option`, and raw payloads are preserved by the caller
//! for the transaction ledger.

use serde::{Deserialize, Serialize};

// ============================================================================
// Shared
// ============================================================================

/// A monetary amount on the wire (`{"currency_code": "USD", "value": "16.66"}`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    /// ISO currency code.
    pub currency_code: String,
    /// Two-decimal string value.
    pub value: String,
}

impl Amount {
    /// Builds an amount from a currency code and an already-formatted value.
    #[must_use]
    pub fn new(currency_code: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            currency_code: currency_code.into(),
            value: value.into(),
        }
    }
}

/// HATEOAS link attached to an order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkDescription {
    /// Link relation (`approve`, `self`, `capture`, ...).
    pub rel: String,
    /// Target URL.
    pub href: String,
}

// ============================================================================
// Order creation
// ============================================================================

/// Body of `POST /v2/checkout/orders`.
#[derive(Clone, Debug, Serialize)]
pub struct OrderRequest {
    /// Always `CAPTURE` for this platform.
    pub intent: String,
    /// Purchase units; we always send exactly one.
    pub purchase_units: Vec<PurchaseUnit>,
    /// Approval-flow configuration (return/cancel URLs).
    pub application_context: ApplicationContext,
}

/// A single purchase unit carrying all registrant line items.
#[derive(Clone, Debug, Serialize)]
pub struct PurchaseUnit {
    /// Our event-instance id, echoed back by PayPal.
    pub reference_id: String,
    /// The paying user's uid.
    pub custom_id: String,
    /// Human-readable order description.
    pub description: String,
    /// Order total with item breakdown.
    pub amount: AmountWithBreakdown,
    /// One item per registrant.
    pub items: Vec<LineItem>,
}

/// Order total plus the item-total breakdown PayPal requires when items
/// are itemized.
#[derive(Clone, Debug, Serialize)]
pub struct AmountWithBreakdown {
    /// ISO currency code.
    pub currency_code: String,
    /// Two-decimal string total.
    pub value: String,
    /// Breakdown; `item_total` must equal the sum of line amounts.
    pub breakdown: AmountBreakdown,
}

/// Breakdown block inside [`AmountWithBreakdown`].
#[derive(Clone, Debug, Serialize)]
pub struct AmountBreakdown {
    /// Sum of `unit_amount * quantity` across items.
    pub item_total: Amount,
}

/// One registrant line inside the purchase unit.
#[derive(Clone, Debug, Serialize)]
pub struct LineItem {
    /// Display name shown in the PayPal checkout.
    pub name: String,
    /// Quantity as a string, per the PayPal schema. Always `"1"` here.
    pub quantity: String,
    /// Per-unit price.
    pub unit_amount: Amount,
    /// PayPal item category.
    pub category: String,
    /// Opaque sku carrying our (instance, line, person) lineage.
    pub sku: String,
}

/// `application_context` block controlling the approval redirect flow.
#[derive(Clone, Debug, Serialize)]
pub struct ApplicationContext {
    /// Brand name shown on the PayPal review page.
    pub brand_name: String,
    /// `NO_SHIPPING`: registrations ship nothing.
    pub shipping_preference: String,
    /// `PAY_NOW` so the approval completes in one step.
    pub user_action: String,
    /// Where PayPal sends the payer after approval.
    pub return_url: String,
    /// Where PayPal sends the payer after cancelling.
    pub cancel_url: String,
}

/// Response of `POST /v2/checkout/orders`.
#[derive(Clone, Debug, Deserialize)]
pub struct OrderCreated {
    /// Provider-assigned order id.
    pub id: String,
    /// Order status (`CREATED`, `APPROVED`, ...).
    pub status: Option<String>,
    /// HATEOAS links; the `approve` link is what the frontend redirects to.
    #[serde(default)]
    pub links: Vec<LinkDescription>,
}

impl OrderCreated {
    /// Returns the approval URL the payer must visit, if present.
    #[must_use]
    pub fn approve_url(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == "approve")
            .map(|l| l.href.as_str())
    }
}

// ============================================================================
// Order capture
// ============================================================================

/// Response of `POST /v2/checkout/orders/{id}/capture`.
#[derive(Clone, Debug, Deserialize)]
pub struct OrderCaptured {
    /// Provider order id.
    pub id: Option<String>,
    /// `COMPLETED` or `APPROVED` on success.
    pub status: Option<String>,
    /// Purchase units carrying the capture records.
    #[serde(default)]
    pub purchase_units: Vec<CapturedPurchaseUnit>,
}

/// Purchase unit inside a capture response.
#[derive(Clone, Debug, Deserialize)]
pub struct CapturedPurchaseUnit {
    /// Payments block with the capture list.
    pub payments: Option<CapturedPayments>,
}

/// `payments` block inside a captured purchase unit.
#[derive(Clone, Debug, Deserialize)]
pub struct CapturedPayments {
    /// Capture records; a single-capture order carries exactly one.
    #[serde(default)]
    pub captures: Vec<CaptureRecord>,
}

/// A single capture record.
#[derive(Clone, Debug, Deserialize)]
pub struct CaptureRecord {
    /// Provider capture id, the handle later refunds are issued against.
    pub id: Option<String>,
    /// Captured amount.
    pub amount: Option<Amount>,
    /// Fee breakdown, present once the capture settles.
    pub seller_receivable_breakdown: Option<SellerReceivableBreakdown>,
}

/// `seller_receivable_breakdown` on a capture record.
#[derive(Clone, Debug, Deserialize)]
pub struct SellerReceivableBreakdown {
    /// Gross amount captured.
    pub gross_amount: Option<Amount>,
    /// Provider fee withheld from the gross amount.
    pub paypal_fee: Option<Amount>,
    /// Net amount after fees.
    pub net_amount: Option<Amount>,
}

impl OrderCaptured {
    /// First capture record across all purchase units, if any.
    #[must_use]
    pub fn first_capture(&self) -> Option<&CaptureRecord> {
        self.purchase_units
            .iter()
            .filter_map(|pu| pu.payments.as_ref())
            .flat_map(|p| p.captures.iter())
            .next()
    }

    /// The capture id all ledger lines are stamped with.
    #[must_use]
    pub fn capture_id(&self) -> Option<&str> {
        self.first_capture().and_then(|c| c.id.as_deref())
    }

    /// The total PayPal fee as a two-decimal string, when reported.
    #[must_use]
    pub fn paypal_fee(&self) -> Option<&str> {
        self.first_capture()
            .and_then(|c| c.seller_receivable_breakdown.as_ref())
            .and_then(|b| b.paypal_fee.as_ref())
            .map(|a| a.value.as_str())
    }
}

// ============================================================================
// Refunds
// ============================================================================

/// Body of `POST /v2/payments/captures/{id}/refund`.
#[derive(Clone, Debug, Serialize)]
pub struct RefundRequest {
    /// Amount to refund; omitting it would refund the full capture, which
    /// this platform never does (refunds are always per-line amounts).
    pub amount: Amount,
}

/// Response of a capture refund.
#[derive(Clone, Debug, Deserialize)]
pub struct RefundCreated {
    /// Provider refund id.
    pub id: String,
    /// Refund status (`COMPLETED`, `PENDING`, ...).
    pub status: Option<String>,
}
