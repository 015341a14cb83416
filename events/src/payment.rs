//! Payment orchestration: provider order creation and idempotent capture
//! reconciliation.
//!
//! Order creation never touches registration state; it validates, opens the
//! provider order, persists a preliminary ledger row and hands back the
//! approval URL. The registration itself is applied during capture, where
//! the client-supplied final state is re-validated and every new registrant
//! is matched to a captured ledger line.

use crate::core::EventsCore;
use crate::error::{CoreError, CoreResult};
use crate::instance::{ChangeRegistration, PaymentKind};
use crate::ledger::{CapturedLine, LineStatus, Transaction, TransactionItem, TransactionMeta};
use crate::registration::{LineageMap, RefundableMap, RegistrationOutcome};
use crate::types::{CaptureId, InstanceId, LineId, Money, OrderId, PersonId};
use chapel_paypal::{
    Amount, AmountBreakdown, AmountWithBreakdown, ApplicationContext, LineItem, OrderRequest,
    PurchaseUnit,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Flow tag stamped on event-registration transactions.
const FLOW_EVENT_REGISTRATION: &str = "event_registration";

/// Capture request: the order to capture plus the client's desired final
/// registration state for reconciliation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptureRegistration {
    /// Provider order id returned at creation.
    pub order_id: OrderId,
    /// The instance the order was created against.
    pub event_instance_id: InstanceId,
    /// Desired final state: the account holder flag and the full family
    /// roster after the change.
    pub final_self_registered: bool,
    /// Desired final family roster.
    pub final_family_registered: Vec<crate::types::FamilyId>,
}

impl EventsCore {
    /// Creates a provider order for the additions in `change` and persists
    /// the preliminary transaction. Returns `(order_id, approve_url)`.
    pub(crate) async fn create_paid_registration(
        &self,
        caller: &crate::types::Caller,
        change: &ChangeRegistration,
    ) -> CoreResult<(OrderId, String)> {
        let instance = self
            .assembled_instance(&change.event_instance_id, None)
            .await?;
        let validated = self.validate_change(caller, change, &instance).await?;
        let unit_price = validated.unit_price;

        if validated.additions.is_empty() {
            return Err(CoreError::Validation(
                "no attendees to register; nothing to pay".into(),
            ));
        }

        let currency = &self.settings.currency;
        let mut items = Vec::new();
        let mut txn_items = Vec::new();
        for (idx, person) in validated.additions.iter().enumerate() {
            let line_id = LineId::new(format!(
                "{idx:03}-{}",
                &Uuid::new_v4().simple().to_string()[..8]
            ));
            let fallback = match person {
                PersonId::User => "You",
                PersonId::Family(_) => person.as_key(),
            };
            let full_name = validated
                .person_infos
                .get(person)
                .map_or_else(|| fallback.to_string(), |info| info.display_name(fallback));

            items.push(LineItem {
                name: format!(
                    "{} - Event Registration for {full_name}",
                    instance.default_title
                ),
                quantity: "1".into(),
                unit_amount: Amount::new(currency.clone(), unit_price.to_wire()),
                category: "DIGITAL_GOODS".into(),
                sku: format!(
                    "evt:{}:line:{}:person:{}",
                    instance.id,
                    line_id,
                    person.as_key()
                ),
            });
            txn_items.push(TransactionItem::new(
                line_id,
                person.clone(),
                full_name,
                unit_price,
            ));
        }

        let people = u32::try_from(txn_items.len()).unwrap_or(u32::MAX);
        let total = Money::from_cents(unit_price.cents().saturating_mul(u64::from(people)));

        let order_request = OrderRequest {
            intent: "CAPTURE".into(),
            purchase_units: vec![PurchaseUnit {
                reference_id: instance.id.to_string(),
                custom_id: caller.uid.to_string(),
                description: format!(
                    "Event registrations for {} - {people} people",
                    instance.default_title
                ),
                amount: AmountWithBreakdown {
                    currency_code: currency.clone(),
                    value: total.to_wire(),
                    breakdown: AmountBreakdown {
                        item_total: Amount::new(currency.clone(), total.to_wire()),
                    },
                },
                items,
            }],
            application_context: ApplicationContext {
                brand_name: self.settings.brand_name.clone(),
                shipping_preference: "NO_SHIPPING".into(),
                user_action: "PAY_NOW".into(),
                return_url: format!(
                    "{}/event_payments/{}/payment/success",
                    self.settings.frontend_url, instance.id
                ),
                cancel_url: format!(
                    "{}/event_payments/{}/payment/cancel",
                    self.settings.frontend_url, instance.id
                ),
            },
        };

        // Fresh request id per attempt: a failed create is retried as a new
        // order, never replayed.
        let request_id = Uuid::new_v4().to_string();
        let (created, raw_response) = self
            .provider
            .create_order(&order_request, &request_id)
            .await?;
        let order_id = OrderId::new(created.id.clone());
        let approve_url = created
            .approve_url()
            .ok_or_else(|| CoreError::ProviderRejected {
                status: 0,
                body: "provider did not return an approval URL".into(),
            })?
            .to_string();

        let mut meta = TransactionMeta {
            flow: FLOW_EVENT_REGISTRATION.into(),
            people_count: people,
            discount_code_id: None,
            discounted_count: None,
        };
        if let Some(check) = &validated.discount {
            meta.discount_code_id = Some(check.id.clone());
            meta.discounted_count = Some(crate::discounts::uses_consumed(people, check.uses_left));
        }

        let raw_request = serde_json::to_value(&order_request)
            .map_err(|e| CoreError::Store(e.to_string()))?;
        self.ledger
            .create_preliminary(Transaction::preliminary(
                order_id.clone(),
                caller.uid.clone(),
                instance.id.clone(),
                instance.event_id.clone(),
                currency.clone(),
                txn_items,
                raw_request,
                raw_response,
                meta,
                self.now(),
            ))
            .await?;

        tracing::info!(
            order_id = %order_id,
            instance_id = %instance.id,
            uid = %caller.uid,
            people,
            total = %total,
            "provider order created for registration"
        );
        Ok((order_id, approve_url))
    }

    /// Captures an approved order and reconciles registration state to the
    /// client-supplied final roster. Safe to call repeatedly: the provider
    /// capture is skipped once the ledger shows the order captured, and an
    /// empty delta returns success without writing.
    ///
    /// # Errors
    ///
    /// [`CoreError::Conflict`] when the caller or instance does not match
    /// the order; [`CoreError::CaptureMismatch`] when a new addition lacks
    /// a captured ledger line; provider and validation errors otherwise.
    pub async fn capture_paid_registration(
        &self,
        caller: &crate::types::Caller,
        capture: CaptureRegistration,
    ) -> CoreResult<RegistrationOutcome> {
        let instance = self
            .assembled_instance(&capture.event_instance_id, None)
            .await?;

        let tx = self
            .ledger
            .get_by_order_id(&capture.order_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("transaction for order {}", capture.order_id))
            })?;
        if tx.payer_uid != caller.uid {
            return Err(CoreError::Conflict(
                "you are not allowed to capture this transaction".into(),
            ));
        }
        if tx.event_instance_id != capture.event_instance_id {
            return Err(CoreError::Conflict(
                "this order does not belong to this event instance".into(),
            ));
        }

        let tx = if tx.status == crate::ledger::TransactionStatus::Preliminary {
            self.capture_and_mark(&capture.order_id, &tx).await?
        } else {
            tx
        };

        // Delta between the current registration and the desired final
        // state.
        let old = instance.registration_for(&caller.uid);
        let old_self = old.is_some_and(|d| d.self_registered);
        let old_family: Vec<_> = old.map(|d| d.family_registered.clone()).unwrap_or_default();

        let mut registering = Vec::new();
        let mut unregistering = Vec::new();
        for fid in &capture.final_family_registered {
            if !old_family.contains(fid) {
                registering.push(fid.clone());
            }
        }
        for fid in &old_family {
            if !capture.final_family_registered.contains(fid) {
                unregistering.push(fid.clone());
            }
        }
        let self_registered = match (capture.final_self_registered, old_self) {
            (true, false) => Some(true),
            (false, true) => Some(false),
            _ => None,
        };

        if self_registered.is_none() && registering.is_empty() && unregistering.is_empty() {
            // Nothing to change (page reload, double capture): succeed.
            return Ok(RegistrationOutcome {
                seats_filled: instance.seats_filled,
                details: old.cloned(),
                refunded: Vec::new(),
            });
        }

        let change = ChangeRegistration {
            event_instance_id: capture.event_instance_id.clone(),
            self_registered,
            family_members_registering: registering,
            family_members_unregistering: unregistering,
            payment_type: PaymentKind::PayPal,
            discount_code_id: tx.meta.discount_code_id.clone(),
        };
        let validated = self.validate_change(caller, &change, &instance).await?;

        let mut captured_by_person: HashMap<PersonId, (OrderId, LineId)> = HashMap::new();
        for item in &tx.items {
            if item.is_captured() {
                captured_by_person.insert(
                    item.person_id.clone(),
                    (tx.order_id.clone(), item.line_id.clone()),
                );
            }
        }

        let refundable_by_person = refundable_amounts(&tx);

        let mut lineage: LineageMap = HashMap::new();
        let mut refundable: RefundableMap = HashMap::new();
        for person in &validated.additions {
            let Some(entry) = captured_by_person.get(person) else {
                return Err(CoreError::CaptureMismatch(format!(
                    "missing captured line for registrant {person}"
                )));
            };
            lineage.insert(person.clone(), entry.clone());
            if let Some(amount) = refundable_by_person.get(person) {
                refundable.insert(person.clone(), *amount);
            }
        }

        self.process_change(caller, &change, Some(&lineage), Some(&refundable))
            .await
    }

    /// Performs the provider capture with the stable `capture:<order_id>`
    /// request id and mirrors the result onto the ledger.
    async fn capture_and_mark(
        &self,
        order_id: &OrderId,
        tx: &Transaction,
    ) -> CoreResult<Transaction> {
        let request_id = format!("capture:{order_id}");
        let result = self.provider.capture_order(order_id, &request_id).await;
        let (captured, raw) = match result {
            Ok(ok) => ok,
            Err(err) => {
                if matches!(err, CoreError::ProviderRejected { .. }) {
                    // Definite rejection: the order will never capture.
                    let _ = self.ledger.mark_failed(order_id, self.now()).await;
                }
                return Err(err);
            }
        };

        let capture_id = captured.capture_id().map(CaptureId::new);
        let fee = captured.paypal_fee().and_then(Money::parse);

        // All lines are captured together in this model; the order-level
        // capture id is stamped onto every line.
        let captured_lines: Vec<CapturedLine> = tx
            .items
            .iter()
            .map(|item| {
                let status = if capture_id.is_some() {
                    LineStatus::Captured
                } else {
                    LineStatus::Pending
                };
                (item.line_id.clone(), capture_id.clone(), status)
            })
            .collect();

        let updated = self
            .ledger
            .mark_captured(order_id, raw, captured_lines, fee, self.now())
            .await?
            .ok_or_else(|| {
                CoreError::LedgerInconsistent(format!(
                    "transaction vanished while capturing order {order_id}"
                ))
            })?;
        tracing::info!(
            order_id = %order_id,
            capture_id = capture_id.as_ref().map(CaptureId::as_str),
            fee = ?fee,
            "order captured and mirrored to ledger"
        );
        Ok(updated)
    }
}

/// Distributes the provider fee across lines proportionally to unit price
/// (rounding remainder on the last line) and returns the per-person
/// refundable amount, `unit_price − fee_share` clamped at zero. Without a
/// fee, every line is refundable at full price.
pub(crate) fn refundable_amounts(tx: &Transaction) -> HashMap<PersonId, Money> {
    let mut refundable = HashMap::new();
    let total = Money::total(tx.items.iter().map(|it| it.unit_price));
    let fee = tx.fee_amount.unwrap_or(Money::ZERO);

    if total.is_zero() || fee.is_zero() {
        for item in &tx.items {
            refundable.insert(item.person_id.clone(), item.unit_price);
        }
        return refundable;
    }

    let mut remaining_fee = fee;
    let last = tx.items.len().saturating_sub(1);
    for (idx, item) in tx.items.iter().enumerate() {
        let share = if idx == last {
            remaining_fee
        } else {
            let share = item.unit_price.fee_share(fee, total);
            remaining_fee = remaining_fee.saturating_sub(share);
            share
        };
        refundable.insert(item.person_id.clone(), item.unit_price.saturating_sub(share));
    }
    refundable
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ledger::TransactionStatus;
    use crate::types::Uid;
    use chrono::TimeZone;
    use serde_json::Value;

    fn tx_with_fee(unit_cents: u64, count: usize, fee_cents: Option<u64>) -> Transaction {
        let items = (0..count)
            .map(|i| {
                TransactionItem::new(
                    LineId::new(format!("{i:03}-test")),
                    if i == 0 {
                        PersonId::User
                    } else {
                        PersonId::Family(format!("fam-{i}").into())
                    },
                    format!("Person {i}"),
                    Money::from_cents(unit_cents),
                )
            })
            .collect();
        let mut tx = Transaction::preliminary(
            OrderId::new("ORD"),
            Uid::new("u1"),
            InstanceId::new("inst"),
            crate::types::EventId::new("evt"),
            "USD".into(),
            items,
            Value::Null,
            Value::Null,
            TransactionMeta::default(),
            chrono::Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        );
        let lines: Vec<CapturedLine> = tx
            .items
            .iter()
            .map(|it| {
                (
                    it.line_id.clone(),
                    Some(CaptureId::new("CAP")),
                    LineStatus::Captured,
                )
            })
            .collect();
        tx.apply_capture(
            Value::Null,
            &lines,
            fee_cents.map(Money::from_cents),
            chrono::Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        );
        assert_eq!(tx.status, TransactionStatus::Captured);
        tx
    }

    #[test]
    fn fee_is_distributed_with_remainder_on_last_line() {
        // Three lines at 16.66, fee 1.50: shares 0.50/0.50/0.50, so every
        // refundable is 16.16.
        let tx = tx_with_fee(1666, 3, Some(150));
        let refundable = refundable_amounts(&tx);
        assert_eq!(refundable.len(), 3);
        for amount in refundable.values() {
            assert_eq!(amount.cents(), 1616);
        }
    }

    #[test]
    fn uneven_fee_remainder_lands_on_last_line() {
        // Two lines at 10.00, fee 0.33: first share rounds to 0.17 (half
        // up), last line absorbs 0.16.
        let tx = tx_with_fee(1000, 2, Some(33));
        let refundable = refundable_amounts(&tx);
        assert_eq!(refundable.get(&PersonId::User).unwrap().cents(), 1000 - 17);
        assert_eq!(
            refundable
                .get(&PersonId::Family("fam-1".into()))
                .unwrap()
                .cents(),
            1000 - 16
        );
    }

    #[test]
    fn missing_fee_leaves_full_price_refundable() {
        let tx = tx_with_fee(2500, 2, None);
        let refundable = refundable_amounts(&tx);
        assert!(refundable.values().all(|m| m.cents() == 2500));
    }
}
