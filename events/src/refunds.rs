//! Refund orchestration shared by the user, admin and deletion paths.
//!
//! The ledger drives everything: refunds are appended there first-class
//! (with provider refund ids for duplicate suppression), and the
//! `amount_refunded` bump on the registration record is best-effort — once
//! money moved, a failed registration write must not undo the record of
//! it.

use crate::core::EventsCore;
use crate::error::{CoreError, CoreResult};
use crate::instance::{AssembledInstance, PaymentDetails, RegistrationDetails};
use crate::ledger::{TransactionRefund, TransactionStatus};
use crate::types::{InstanceId, LineId, Money, OrderId, PersonId, Uid};
use chapel_paypal::{Amount, RefundRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::collections::HashMap;
use uuid::Uuid;

/// How the automatic-refund deadline applies to a refund pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeadlinePolicy {
    /// Past the deadline, the whole batch fails unless every affected line
    /// carries the per-line eligibility override. User-initiated removals.
    Enforce,
    /// Past the deadline, ineligible lines are skipped silently. Account
    /// and family-member cleanup passes. The admin and deletion paths skip
    /// this policy entirely by refunding lines directly.
    Skip,
}

/// Which upper bound a refund pass respects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RefundBound {
    /// `min(refundable − amount_refunded, unit_price − refunded_total)`:
    /// the fee-adjusted bound of the user-initiated path.
    FeeAdjusted,
    /// `min(price − amount_refunded, unit_price − refunded_total)`: the
    /// admin override bound, absorbing the provider fee.
    FullPrice,
}

/// A refund that was issued and ledgered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefundReceipt {
    /// Who the refunded line belonged to.
    pub person: PersonId,
    /// Provider refund id.
    pub refund_id: String,
    /// Amount refunded.
    pub amount: Money,
}

/// Admin refund request for one order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminRefund {
    /// Provider order id.
    pub order_id: OrderId,
    /// True: apply the same rule to every captured line, ignoring
    /// `line_map`. False: `line_map` picks the lines.
    pub refund_all: bool,
    /// With `refund_all`: `None` refunds each line's full remaining,
    /// `Some(x)` refunds `min(x, remaining)` per line.
    pub refund_amount: Option<Money>,
    /// Without `refund_all`: line id → amount (`None` = full remaining).
    pub line_map: Option<HashMap<LineId, Option<Money>>>,
    /// Stored on the refund records.
    pub reason: Option<String>,
}

/// What an admin refund did.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminRefundOutcome {
    /// The order refunded against.
    pub order_id: OrderId,
    /// Order currency.
    pub currency: String,
    /// Transaction status after re-derivation.
    pub transaction_status: TransactionStatus,
    /// Per-line refunds issued.
    pub refunded_lines: Vec<RefundReceipt>,
}

impl EventsCore {
    /// Refunds the paypal lines of the removed registrants.
    ///
    /// Free/door and incomplete lines are skipped. The refund amount per
    /// line is `min(refundable − amount_refunded, unit_price −
    /// refunded_total)`, clamped at zero. Provider failures abort the batch
    /// so the enclosing registration change can compensate; ledger-append
    /// failures after a successful provider refund are logged and do not
    /// abort (the money already moved).
    pub(crate) async fn refund_removals(
        &self,
        caller: &crate::types::Caller,
        instance: &AssembledInstance,
        old_details: Option<&RegistrationDetails>,
        removals: &[PersonId],
        policy: DeadlinePolicy,
    ) -> CoreResult<Vec<RefundReceipt>> {
        let mut receipts = Vec::new();
        let Some(old_details) = old_details else {
            return Ok(receipts);
        };
        if removals.is_empty() {
            return Ok(receipts);
        }

        let now = self.now();
        let past_deadline = instance
            .definition
            .automatic_refund_deadline
            .is_some_and(|cutoff| now > cutoff);

        // Dedup while keeping a stable order.
        let to_refund: BTreeSet<&PersonId> = removals.iter().collect();

        if past_deadline && policy == DeadlinePolicy::Enforce {
            // The whole batch fails unless every affected paypal line has
            // the per-line override.
            for person in &to_refund {
                if let Some(pd) = old_details.payment_for(person) {
                    if pd.payment_type == crate::instance::PaymentKind::PayPal
                        && pd.payment_complete
                        && !pd.automatic_refund_eligibility
                    {
                        return Err(CoreError::RefundDeadlinePassed);
                    }
                }
            }
        }

        for person in to_refund {
            let Some(pd) = old_details.payment_for(person) else {
                continue;
            };
            if pd.payment_type != crate::instance::PaymentKind::PayPal || !pd.payment_complete {
                continue;
            }
            if past_deadline && policy == DeadlinePolicy::Skip && !pd.automatic_refund_eligibility {
                tracing::debug!(
                    instance_id = %instance.id,
                    person = %person,
                    "skipping refund past deadline without eligibility override"
                );
                continue;
            }

            if let Some(receipt) = self
                .refund_payment_line(
                    &caller.uid,
                    &instance.id,
                    person,
                    pd,
                    RefundBound::FeeAdjusted,
                    "user_unregistration",
                    "user",
                )
                .await?
            {
                receipts.push(receipt);
            }
        }

        Ok(receipts)
    }

    /// Refunds one registration payment line by its stored lineage.
    ///
    /// Returns `Ok(None)` when there is nothing to refund (missing
    /// lineage, line not captured, nothing remaining under `bound`).
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn refund_payment_line(
        &self,
        by_uid: &Uid,
        instance_id: &InstanceId,
        person: &PersonId,
        pd: &PaymentDetails,
        bound: RefundBound,
        reason: &str,
        source: &str,
    ) -> CoreResult<Option<RefundReceipt>> {
        let (Some(order_id), Some(line_id)) = (&pd.order_id, &pd.line_id) else {
            tracing::error!(
                instance_id = %instance_id,
                person = %person,
                "refund skipped: payment details carry no order/line lineage"
            );
            return Ok(None);
        };

        let Some(tx) = self.ledger.get_by_order_id(order_id).await? else {
            tracing::error!(
                order_id = %order_id,
                person = %person,
                "refund skipped: transaction not found"
            );
            return Ok(None);
        };
        let Some(item) = tx.item(line_id) else {
            tracing::error!(
                order_id = %order_id,
                line_id = %line_id,
                "refund skipped: ledger line not found"
            );
            return Ok(None);
        };
        let Some(capture_id) = &item.capture_id else {
            tracing::error!(
                order_id = %order_id,
                line_id = %line_id,
                "refund skipped: line was never captured"
            );
            return Ok(None);
        };

        let from_details = match bound {
            RefundBound::FeeAdjusted => pd.remaining_refundable(),
            RefundBound::FullPrice => pd.price.saturating_sub(pd.amount_refunded),
        };
        let amount = from_details.min(item.remaining());
        if amount.is_zero() {
            return Ok(None);
        }

        let request_id = format!("refund:{order_id}:{line_id}:{}", Uuid::new_v4().simple());
        let (refund, raw) = self
            .provider
            .refund_capture(
                capture_id,
                &RefundRequest {
                    amount: Amount::new(tx.currency.clone(), amount.to_wire()),
                },
                &request_id,
            )
            .await?;

        let appended = self
            .ledger
            .append_refund(
                order_id,
                line_id,
                TransactionRefund {
                    refund_id: refund.id.clone(),
                    amount,
                    currency: tx.currency.clone(),
                    reason: reason.into(),
                    created_at: self.now(),
                    by_uid: Some(by_uid.clone()),
                    source: source.into(),
                    raw,
                },
                self.now(),
            )
            .await;
        match appended {
            Ok(_) => {}
            Err(err) => {
                // The provider refund succeeded; losing the ledger append is
                // an operator problem, not a reason to undo the removal.
                tracing::error!(
                    order_id = %order_id,
                    line_id = %line_id,
                    refund_id = %refund.id,
                    error = %err,
                    "ledger append failed after successful provider refund"
                );
            }
        }

        let _ = self
            .instances
            .increment_amount_refunded(instance_id, &tx.payer_uid, person, amount)
            .await;

        tracing::info!(
            order_id = %order_id,
            line_id = %line_id,
            refund_id = %refund.id,
            amount = %amount,
            reason,
            "refund issued"
        );
        Ok(Some(RefundReceipt {
            person: person.clone(),
            refund_id: refund.id,
            amount,
        }))
    }

    /// Admin refund of an order: a uniform rule across every captured line
    /// or a per-line map.
    ///
    /// The remaining bound here is the ledger's `unit_price −
    /// refunded_total`, deliberately ignoring the fee-adjusted
    /// `refundable_amount` — an admin override may absorb the provider
    /// fee. Does not unregister anyone.
    ///
    /// # Errors
    ///
    /// [`CoreError::Validation`] for bad amounts,
    /// [`CoreError::NotFound`] for unknown orders, provider and ledger
    /// errors per line (fail-fast).
    pub async fn admin_refund_event_transaction(
        &self,
        admin_uid: &Uid,
        request: AdminRefund,
    ) -> CoreResult<AdminRefundOutcome> {
        let tx = self
            .ledger
            .get_by_order_id(&request.order_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("transaction for order {}", request.order_id))
            })?;

        // Build the refund plan: (line, amount) pairs.
        let mut plan: Vec<(LineId, PersonId, Money)> = Vec::new();
        if request.refund_all {
            if let Some(amount) = request.refund_amount {
                if amount.is_zero() {
                    return Err(CoreError::Validation(
                        "refund_amount must be greater than zero".into(),
                    ));
                }
            }
            for item in &tx.items {
                if !item.is_captured() {
                    continue;
                }
                let remaining = item.remaining();
                if remaining.is_zero() {
                    continue;
                }
                let amount = request.refund_amount.map_or(remaining, |a| a.min(remaining));
                if !amount.is_zero() {
                    plan.push((item.line_id.clone(), item.person_id.clone(), amount));
                }
            }
        } else {
            let line_map = request.line_map.as_ref().filter(|m| !m.is_empty()).ok_or_else(|| {
                CoreError::Validation("line_map is required when refund_all is false".into())
            })?;
            for item in &tx.items {
                let Some(requested) = line_map.get(&item.line_id) else {
                    continue;
                };
                if !item.is_captured() {
                    continue;
                }
                let remaining = item.remaining();
                if remaining.is_zero() {
                    continue;
                }
                let amount = match requested {
                    None => remaining,
                    Some(amount) => {
                        if amount.is_zero() {
                            return Err(CoreError::Validation(format!(
                                "refund amount must be > 0 for line {}",
                                item.line_id
                            )));
                        }
                        if *amount > remaining {
                            return Err(CoreError::Validation(format!(
                                "refund amount ({amount}) exceeds remaining refundable ({remaining}) for line {}",
                                item.line_id
                            )));
                        }
                        *amount
                    }
                };
                plan.push((item.line_id.clone(), item.person_id.clone(), amount));
            }
        }

        if plan.is_empty() {
            return Err(CoreError::Validation(
                "no refundable lines selected (all already fully refunded or no valid targets)"
                    .into(),
            ));
        }

        let mut refunded_lines = Vec::new();
        for (line_id, person_id, amount) in plan {
            let item = tx.item(&line_id).ok_or_else(|| {
                CoreError::LedgerInconsistent(format!("line {line_id} vanished from order"))
            })?;
            let capture_id = item.capture_id.clone().ok_or_else(|| {
                CoreError::LedgerInconsistent(format!("line {line_id} has no capture id"))
            })?;

            let request_id = format!(
                "admin-event-refund:{}:{line_id}:{}",
                request.order_id,
                Uuid::new_v4().simple()
            );
            let (refund, raw) = self
                .provider
                .refund_capture(
                    &capture_id,
                    &RefundRequest {
                        amount: Amount::new(tx.currency.clone(), amount.to_wire()),
                    },
                    &request_id,
                )
                .await?;

            self.ledger
                .append_refund(
                    &request.order_id,
                    &line_id,
                    TransactionRefund {
                        refund_id: refund.id.clone(),
                        amount,
                        currency: tx.currency.clone(),
                        reason: request
                            .reason
                            .clone()
                            .unwrap_or_else(|| "admin_manual_refund".into()),
                        created_at: self.now(),
                        by_uid: Some(admin_uid.clone()),
                        source: "admin".into(),
                        raw,
                    },
                    self.now(),
                )
                .await?;

            // Best-effort mirror onto the registration, when still present.
            let _ = self
                .instances
                .increment_amount_refunded(
                    &tx.event_instance_id,
                    &tx.payer_uid,
                    &person_id,
                    amount,
                )
                .await;

            refunded_lines.push(RefundReceipt {
                person: person_id,
                refund_id: refund.id,
                amount,
            });
        }

        let updated = self
            .ledger
            .get_by_order_id(&request.order_id)
            .await?
            .map_or(tx.status, |t| t.status);
        tracing::info!(
            order_id = %request.order_id,
            lines = refunded_lines.len(),
            status = ?updated,
            "admin refund completed"
        );
        Ok(AdminRefundOutcome {
            order_id: request.order_id,
            currency: tx.currency,
            transaction_status: updated,
            refunded_lines,
        })
    }
}
