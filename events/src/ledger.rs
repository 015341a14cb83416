//! Transaction ledger: one row per provider order, one line per registrant.
//!
//! The ledger is the monetary source of truth. Capture marking is
//! idempotent by capture id, refund appending is idempotent by refund id,
//! and the transaction status is always re-derived from line state — never
//! written directly. State transitions live here as pure methods so every
//! store backend shares them.

use crate::error::{CoreError, CoreResult};
use crate::instance::PaymentKind;
use crate::types::{CaptureId, DiscountCodeId, EventId, InstanceId, LineId, Money, OrderId, PersonId, Uid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a whole transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Order created at the provider, not yet captured.
    Preliminary,
    /// Funds captured.
    Captured,
    /// At least one refund recorded, not all lines fully refunded.
    PartiallyRefunded,
    /// Every captured line fully refunded.
    FullyRefunded,
    /// Capture failed. Terminal.
    Failed,
}

/// Lifecycle of a single registrant line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    /// Awaiting capture.
    Pending,
    /// Captured, no or partial refunds.
    Captured,
    /// Some money refunded, some remaining.
    RefundedPartial,
    /// The full unit price refunded.
    RefundedFull,
}

/// A refund recorded against a line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionRefund {
    /// Provider-issued refund id (or a synthesized one for legacy rows).
    pub refund_id: String,
    /// Amount refunded.
    pub amount: Money,
    /// Refund currency.
    pub currency: String,
    /// Why the refund happened (`user_unregistration`,
    /// `admin_manual_refund`, `event_deleted`, ...).
    pub reason: String,
    /// When the refund was recorded.
    pub created_at: DateTime<Utc>,
    /// Who triggered it.
    pub by_uid: Option<Uid>,
    /// Which channel issued it (`user`, `admin`, `system`).
    pub source: String,
    /// Raw provider payload for diagnostics.
    pub raw: Value,
}

/// One registrant line inside a transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionItem {
    /// Opaque unique token for this line.
    pub line_id: LineId,
    /// Who this line funds.
    pub person_id: PersonId,
    /// Display name at the time of purchase.
    pub display_name: String,
    /// Price charged on this line.
    pub unit_price: Money,
    /// Line lifecycle state.
    pub status: LineStatus,
    /// Payment type; always paypal for ledgered lines.
    pub payment_type: PaymentKind,
    /// Capture id, assigned when the order is captured.
    pub capture_id: Option<CaptureId>,
    /// Total refunded so far. Monotonic, never above `unit_price`.
    pub refunded_total: Money,
    /// Individual refunds, in append order.
    pub refunds: Vec<TransactionRefund>,
}

impl TransactionItem {
    /// A fresh pending paypal line.
    #[must_use]
    pub fn new(line_id: LineId, person_id: PersonId, display_name: String, unit_price: Money) -> Self {
        Self {
            line_id,
            person_id,
            display_name,
            unit_price,
            status: LineStatus::Pending,
            payment_type: PaymentKind::PayPal,
            capture_id: None,
            refunded_total: Money::ZERO,
            refunds: Vec::new(),
        }
    }

    /// What the ledger will still allow refunding on this line.
    #[must_use]
    pub fn remaining(&self) -> Money {
        self.unit_price.saturating_sub(self.refunded_total)
    }

    /// True once the line carries a capture id.
    #[must_use]
    pub const fn is_captured(&self) -> bool {
        self.capture_id.is_some()
    }
}

/// Free-form metadata stamped on a transaction at creation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMeta {
    /// Which flow created the order (`event_registration`).
    pub flow: String,
    /// Number of registrants paid for. Always present; downstream tooling
    /// must not fall back to counting attendees.
    pub people_count: u32,
    /// Discount code applied, if any.
    pub discount_code_id: Option<DiscountCodeId>,
    /// How many of the registrants received the discounted price.
    pub discounted_count: Option<u32>,
}

/// A provider order mirrored into the ledger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    /// Provider order id; the ledger key.
    pub order_id: OrderId,
    /// The paying user.
    pub payer_uid: Uid,
    /// Instance the registrants belong to.
    pub event_instance_id: InstanceId,
    /// Blueprint of that instance.
    pub event_id: EventId,
    /// Order currency.
    pub currency: String,
    /// Derived lifecycle status.
    pub status: TransactionStatus,
    /// One line per registrant.
    pub items: Vec<TransactionItem>,
    /// Total provider fee reported at capture, when available.
    pub fee_amount: Option<Money>,
    /// Raw order-create request payload.
    pub raw_create_payload: Value,
    /// Raw order-create response.
    pub raw_create_response: Value,
    /// Raw capture response, once captured.
    pub raw_capture_response: Option<Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Flow metadata.
    pub meta: TransactionMeta,
}

/// Per-line capture outcome handed to [`Transaction::apply_capture`].
pub type CapturedLine = (LineId, Option<CaptureId>, LineStatus);

impl Transaction {
    /// Builds a preliminary transaction for a freshly created order.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn preliminary(
        order_id: OrderId,
        payer_uid: Uid,
        event_instance_id: InstanceId,
        event_id: EventId,
        currency: String,
        items: Vec<TransactionItem>,
        raw_create_payload: Value,
        raw_create_response: Value,
        meta: TransactionMeta,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            payer_uid,
            event_instance_id,
            event_id,
            currency,
            status: TransactionStatus::Preliminary,
            items,
            fee_amount: None,
            raw_create_payload,
            raw_create_response,
            raw_capture_response: None,
            created_at: now,
            updated_at: now,
            meta,
        }
    }

    /// Looks a line up by id.
    #[must_use]
    pub fn item(&self, line_id: &LineId) -> Option<&TransactionItem> {
        self.items.iter().find(|it| &it.line_id == line_id)
    }

    /// Marks the transaction captured, stamping per-line capture ids.
    ///
    /// Idempotent: lines that already carry the same capture id are left
    /// untouched, and a transaction already past `Preliminary` only picks
    /// up a missing fee amount.
    pub fn apply_capture(
        &mut self,
        capture_response: Value,
        captured_lines: &[CapturedLine],
        fee_amount: Option<Money>,
        now: DateTime<Utc>,
    ) {
        if self.status != TransactionStatus::Preliminary {
            if self.fee_amount.is_none() {
                self.fee_amount = fee_amount;
            }
            return;
        }
        for (line_id, capture_id, status) in captured_lines {
            if let Some(item) = self.items.iter_mut().find(|it| &it.line_id == line_id) {
                if item.capture_id.is_some() && item.capture_id == *capture_id {
                    continue;
                }
                item.capture_id = capture_id.clone();
                item.status = *status;
            }
        }
        self.raw_capture_response = Some(capture_response);
        if fee_amount.is_some() {
            self.fee_amount = fee_amount;
        }
        self.status = TransactionStatus::Captured;
        self.updated_at = now;
    }

    /// Marks a failed capture. Terminal.
    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.status = TransactionStatus::Failed;
        self.updated_at = now;
    }

    /// Appends a refund to a line and re-derives statuses.
    ///
    /// Returns `Ok(false)` when the refund id is already recorded
    /// (duplicate suppression, no state change).
    ///
    /// # Errors
    ///
    /// [`CoreError::LedgerInconsistent`] when the line is missing, not
    /// captured, or the refund would push `refunded_total` past
    /// `unit_price`.
    pub fn append_refund(
        &mut self,
        line_id: &LineId,
        refund: TransactionRefund,
        now: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let item = self
            .items
            .iter_mut()
            .find(|it| &it.line_id == line_id)
            .ok_or_else(|| {
                CoreError::LedgerInconsistent(format!(
                    "no line {line_id} on order {}",
                    self.order_id
                ))
            })?;

        if !item.is_captured() {
            return Err(CoreError::LedgerInconsistent(format!(
                "line {line_id} on order {} is not captured",
                self.order_id
            )));
        }

        if item.refunds.iter().any(|r| r.refund_id == refund.refund_id) {
            tracing::debug!(
                order_id = %self.order_id,
                line_id = %line_id,
                refund_id = %refund.refund_id,
                "duplicate refund id suppressed"
            );
            return Ok(false);
        }

        let new_total = item
            .refunded_total
            .checked_add(refund.amount)
            .unwrap_or(Money::from_cents(u64::MAX));
        if new_total > item.unit_price {
            return Err(CoreError::LedgerInconsistent(format!(
                "refund of {} would exceed unit price {} on line {line_id}",
                refund.amount, item.unit_price
            )));
        }

        item.refunded_total = new_total;
        item.status = if new_total == item.unit_price {
            LineStatus::RefundedFull
        } else {
            LineStatus::RefundedPartial
        };
        item.refunds.push(refund);

        self.derive_status();
        self.updated_at = now;
        Ok(true)
    }

    /// Re-derives the transaction status from line state. Only meaningful
    /// once captured; preliminary and failed transactions are left alone.
    fn derive_status(&mut self) {
        if matches!(self.status, TransactionStatus::Preliminary | TransactionStatus::Failed) {
            return;
        }
        let captured: Vec<&TransactionItem> =
            self.items.iter().filter(|it| it.is_captured()).collect();
        let any_refund = captured.iter().any(|it| !it.refunds.is_empty());
        if !any_refund {
            self.status = TransactionStatus::Captured;
            return;
        }
        let all_full = captured
            .iter()
            .all(|it| it.status == LineStatus::RefundedFull);
        self.status = if all_full {
            TransactionStatus::FullyRefunded
        } else {
            TransactionStatus::PartiallyRefunded
        };
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn refund(id: &str, cents: u64) -> TransactionRefund {
        TransactionRefund {
            refund_id: id.to_string(),
            amount: Money::from_cents(cents),
            currency: "USD".into(),
            reason: "user_unregistration".into(),
            created_at: now(),
            by_uid: Some(Uid::new("u1")),
            source: "user".into(),
            raw: Value::Null,
        }
    }

    fn captured_transaction() -> Transaction {
        let items = vec![
            TransactionItem::new(
                LineId::new("000-aaaa"),
                PersonId::User,
                "Ada Lovelace".into(),
                Money::from_cents(2500),
            ),
            TransactionItem::new(
                LineId::new("001-bbbb"),
                PersonId::Family("fam-1".into()),
                "Linus Lovelace".into(),
                Money::from_cents(2500),
            ),
        ];
        let mut tx = Transaction::preliminary(
            OrderId::new("ORD-1"),
            Uid::new("u1"),
            InstanceId::new("inst-1"),
            EventId::new("evt-1"),
            "USD".into(),
            items,
            Value::Null,
            Value::Null,
            TransactionMeta {
                flow: "event_registration".into(),
                people_count: 2,
                ..TransactionMeta::default()
            },
            now(),
        );
        let lines: Vec<CapturedLine> = tx
            .items
            .iter()
            .map(|it| {
                (
                    it.line_id.clone(),
                    Some(CaptureId::new("CAP-1")),
                    LineStatus::Captured,
                )
            })
            .collect();
        tx.apply_capture(Value::Null, &lines, Some(Money::from_cents(150)), now());
        tx
    }

    #[test]
    fn capture_is_idempotent() {
        let mut tx = captured_transaction();
        assert_eq!(tx.status, TransactionStatus::Captured);
        let before = tx.clone();
        let lines: Vec<CapturedLine> = tx
            .items
            .iter()
            .map(|it| {
                (
                    it.line_id.clone(),
                    Some(CaptureId::new("CAP-1")),
                    LineStatus::Captured,
                )
            })
            .collect();
        tx.apply_capture(Value::Null, &lines, Some(Money::from_cents(150)), now());
        assert_eq!(tx.status, before.status);
        assert_eq!(tx.items, before.items);
    }

    #[test]
    fn refunds_accumulate_and_derive_status() {
        let mut tx = captured_transaction();
        let line = LineId::new("000-aaaa");

        assert!(tx.append_refund(&line, refund("R-1", 1000), now()).unwrap());
        assert_eq!(tx.status, TransactionStatus::PartiallyRefunded);
        assert_eq!(tx.item(&line).unwrap().status, LineStatus::RefundedPartial);
        assert_eq!(tx.item(&line).unwrap().refunded_total.cents(), 1000);

        assert!(tx.append_refund(&line, refund("R-2", 1500), now()).unwrap());
        assert_eq!(tx.item(&line).unwrap().status, LineStatus::RefundedFull);
        assert_eq!(tx.status, TransactionStatus::PartiallyRefunded);

        let other = LineId::new("001-bbbb");
        assert!(tx.append_refund(&other, refund("R-3", 2500), now()).unwrap());
        assert_eq!(tx.status, TransactionStatus::FullyRefunded);
    }

    #[test]
    fn duplicate_refund_ids_are_suppressed() {
        let mut tx = captured_transaction();
        let line = LineId::new("000-aaaa");
        assert!(tx.append_refund(&line, refund("R-1", 1000), now()).unwrap());
        assert!(!tx.append_refund(&line, refund("R-1", 1000), now()).unwrap());
        assert_eq!(tx.item(&line).unwrap().refunded_total.cents(), 1000);
        assert_eq!(tx.item(&line).unwrap().refunds.len(), 1);
    }

    #[test]
    fn over_refund_is_rejected() {
        let mut tx = captured_transaction();
        let line = LineId::new("000-aaaa");
        assert!(tx.append_refund(&line, refund("R-1", 2000), now()).unwrap());
        let err = tx.append_refund(&line, refund("R-2", 600), now()).unwrap_err();
        assert!(matches!(err, CoreError::LedgerInconsistent(_)));
        // The failed append left no trace.
        assert_eq!(tx.item(&line).unwrap().refunded_total.cents(), 2000);
    }

    #[test]
    fn refund_against_uncaptured_line_fails() {
        let mut tx = captured_transaction();
        tx.items.push(TransactionItem::new(
            LineId::new("002-cccc"),
            PersonId::Family("fam-2".into()),
            "Charlie".into(),
            Money::from_cents(2500),
        ));
        let err = tx
            .append_refund(&LineId::new("002-cccc"), refund("R-9", 100), now())
            .unwrap_err();
        assert!(matches!(err, CoreError::LedgerInconsistent(_)));
    }
}
