//! Refund flows: user unregistration refunds, the automatic-refund
//! deadline, rollback on refund failure, and admin refunds.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use chapel_events::error::CoreError;
use chapel_events::instance::{ChangeRegistration, PaymentKind};
use chapel_events::ledger::{LineStatus, TransactionStatus};
use chapel_events::payment::CaptureRegistration;
use chapel_events::refunds::AdminRefund;
use chapel_events::registration::RegistrationEntry;
use chapel_events::store::InstanceStore;
use chapel_events::types::{FamilyId, InstanceId, Money, OrderId, PersonId, Uid};
use common::{at, caller, harness, paid_definition, Harness};
use std::collections::HashMap;

/// Registers the caller plus `family` members on a paid event and captures
/// the order with the given provider fee. Returns the instance and order.
async fn paid_registration(
    h: &Harness,
    price_cents: u64,
    family: &[&str],
    fee_cents: Option<u64>,
    refund_deadline: Option<chrono::DateTime<chrono::Utc>>,
) -> (InstanceId, OrderId) {
    let mut def = paid_definition(price_cents);
    def.automatic_refund_deadline = refund_deadline;
    let bp = h.core.create_blueprint(def).await.unwrap();
    let instance = h.store.by_blueprint(&bp.id).await.unwrap().remove(0);
    let user = caller("u1", family.len());

    let RegistrationEntry::ApprovalRequired { order_id, .. } = h
        .core
        .change_registration(
            &user,
            ChangeRegistration {
                event_instance_id: instance.id.clone(),
                self_registered: Some(true),
                family_members_registering: family.iter().map(|f| FamilyId::new(*f)).collect(),
                family_members_unregistering: vec![],
                payment_type: PaymentKind::PayPal,
                discount_code_id: None,
            },
        )
        .await
        .unwrap()
    else {
        panic!("expected approval flow");
    };

    if let Some(fee) = fee_cents {
        h.provider.set_fee(Money::from_cents(fee)).await;
    }
    h.core
        .capture_paid_registration(
            &user,
            CaptureRegistration {
                order_id: order_id.clone(),
                event_instance_id: instance.id.clone(),
                final_self_registered: true,
                final_family_registered: family.iter().map(|f| FamilyId::new(*f)).collect(),
            },
        )
        .await
        .unwrap();
    (instance.id, order_id)
}

#[tokio::test]
async fn unregistering_refunds_the_fee_adjusted_amount() {
    let h = harness();
    // Two lines at 25.00, fee 2.00: refundable 24.00 each.
    let (instance_id, order_id) = paid_registration(&h, 2500, &["fam-1"], Some(200), None).await;
    let user = caller("u1", 1);

    let entry = h
        .core
        .change_registration(
            &user,
            ChangeRegistration {
                event_instance_id: instance_id.clone(),
                self_registered: None,
                family_members_registering: vec![],
                family_members_unregistering: vec![FamilyId::new("fam-1")],
                payment_type: PaymentKind::PayPal,
                discount_code_id: None,
            },
        )
        .await
        .unwrap();
    let RegistrationEntry::Applied(outcome) = entry else {
        panic!("removal-only paypal change applies directly");
    };
    assert_eq!(outcome.seats_filled, 1);
    assert_eq!(outcome.refunded.len(), 1);
    assert_eq!(outcome.refunded[0].amount.cents(), 2400);

    // The wire amount matches the fee-adjusted remaining.
    let refunds = h.provider.refunds().await;
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, "24.00");
    assert!(refunds[0].request_id.starts_with(&format!(
        "refund:{order_id}:"
    )));

    // Ledger: that line is partially refunded (24.00 of 25.00).
    let tx = h.store.transaction(&order_id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::PartiallyRefunded);
    let item = tx
        .items
        .iter()
        .find(|it| it.person_id == PersonId::Family(FamilyId::new("fam-1")))
        .unwrap();
    assert_eq!(item.refunded_total.cents(), 2400);
    assert_eq!(item.status, LineStatus::RefundedPartial);
}

#[tokio::test]
async fn unregister_after_deadline_rolls_back() {
    let h = harness();
    let cutoff = at(2025, 6, 14, 0, 0);
    let (instance_id, order_id) =
        paid_registration(&h, 2500, &["fam-1"], None, Some(cutoff)).await;
    let user = caller("u1", 1);

    // Move past the automatic refund deadline (event is on the 15th).
    h.clock.set(at(2025, 6, 14, 12, 0));

    let err = h
        .core
        .change_registration(
            &user,
            ChangeRegistration {
                event_instance_id: instance_id.clone(),
                self_registered: None,
                family_members_registering: vec![],
                family_members_unregistering: vec![FamilyId::new("fam-1")],
                payment_type: PaymentKind::PayPal,
                discount_code_id: None,
            },
        )
        .await
        .unwrap_err();

    let CoreError::RefundFailed { rollback_failed, source } = err else {
        panic!("expected a refund failure");
    };
    assert!(!rollback_failed, "the compensating write must succeed");
    assert!(matches!(*source, CoreError::RefundDeadlinePassed));

    // Registration, seats and ledger are untouched.
    let instance = h.store.instance(&instance_id).await.unwrap();
    assert_eq!(instance.seats_filled, 2);
    let entry = instance.registration_details.get(&user.uid).unwrap();
    assert!(entry.family_registered.contains(&FamilyId::new("fam-1")));
    assert!(h.provider.refunds().await.is_empty());
    let tx = h.store.transaction(&order_id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Captured);
}

#[tokio::test]
async fn eligibility_override_lets_a_line_through_past_deadline() {
    let h = harness();
    let cutoff = at(2025, 6, 14, 0, 0);
    let (instance_id, _order_id) =
        paid_registration(&h, 2500, &["fam-1"], None, Some(cutoff)).await;
    let user = caller("u1", 1);

    // Flip the per-line admin lever on the family line.
    let mut instance = h.store.instance(&instance_id).await.unwrap();
    let entry = instance.registration_details.get_mut(&user.uid).unwrap();
    entry
        .family_payment_details
        .get_mut(&FamilyId::new("fam-1"))
        .unwrap()
        .automatic_refund_eligibility = true;
    h.store.put_instance(instance).await;

    h.clock.set(at(2025, 6, 14, 12, 0));
    let entry = h
        .core
        .change_registration(
            &user,
            ChangeRegistration {
                event_instance_id: instance_id.clone(),
                self_registered: None,
                family_members_registering: vec![],
                family_members_unregistering: vec![FamilyId::new("fam-1")],
                payment_type: PaymentKind::PayPal,
                discount_code_id: None,
            },
        )
        .await
        .unwrap();
    let RegistrationEntry::Applied(outcome) = entry else {
        panic!("expected applied removal");
    };
    assert_eq!(outcome.refunded.len(), 1);
    assert_eq!(outcome.refunded[0].amount.cents(), 2500);
}

#[tokio::test]
async fn provider_refund_failure_restores_the_registration() {
    let h = harness();
    let (instance_id, order_id) = paid_registration(&h, 2500, &["fam-1"], None, None).await;
    let user = caller("u1", 1);

    h.provider.fail_refunds(true).await;
    let err = h
        .core
        .change_registration(
            &user,
            ChangeRegistration {
                event_instance_id: instance_id.clone(),
                self_registered: None,
                family_members_registering: vec![],
                family_members_unregistering: vec![FamilyId::new("fam-1")],
                payment_type: PaymentKind::PayPal,
                discount_code_id: None,
            },
        )
        .await
        .unwrap_err();

    let CoreError::RefundFailed { rollback_failed, source } = err else {
        panic!("expected a refund failure");
    };
    assert!(!rollback_failed);
    assert!(matches!(*source, CoreError::ProviderRejected { .. }));

    // The compensating write restored the paid registration.
    let instance = h.store.instance(&instance_id).await.unwrap();
    assert_eq!(instance.seats_filled, 2);
    let entry = instance.registration_details.get(&user.uid).unwrap();
    assert!(entry.family_registered.contains(&FamilyId::new("fam-1")));
    assert!(entry
        .family_payment_details
        .get(&FamilyId::new("fam-1"))
        .unwrap()
        .payment_complete);

    // The ledger records no refund.
    let tx = h.store.transaction(&order_id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Captured);
    assert!(tx.items.iter().all(|it| it.refunds.is_empty()));
}

#[tokio::test]
async fn free_and_door_lines_are_skipped_silently() {
    let h = harness();
    let mut def = paid_definition(1500);
    def.payment_options = vec![chapel_events::blueprint::PaymentOption::Door];
    let bp = h.core.create_blueprint(def).await.unwrap();
    let instance = h.store.by_blueprint(&bp.id).await.unwrap().remove(0);
    let user = caller("u1", 0);

    h.core
        .change_registration(
            &user,
            ChangeRegistration {
                event_instance_id: instance.id.clone(),
                self_registered: Some(true),
                family_members_registering: vec![],
                family_members_unregistering: vec![],
                payment_type: PaymentKind::Door,
                discount_code_id: None,
            },
        )
        .await
        .unwrap();

    let entry = h
        .core
        .change_registration(
            &user,
            ChangeRegistration {
                event_instance_id: instance.id.clone(),
                self_registered: Some(false),
                family_members_registering: vec![],
                family_members_unregistering: vec![],
                payment_type: PaymentKind::Door,
                discount_code_id: None,
            },
        )
        .await
        .unwrap();
    let RegistrationEntry::Applied(outcome) = entry else {
        panic!("expected applied removal");
    };
    assert!(outcome.refunded.is_empty());
    assert!(h.provider.refunds().await.is_empty());
}

#[tokio::test]
async fn admin_full_refund_ignores_the_fee_bound() {
    let h = harness();
    // Three lines at 25.00, fee 2.25: user-path refundables are 24.25, but
    // the admin path refunds the full 25.00 remaining per line.
    let (instance_id, order_id) =
        paid_registration(&h, 2500, &["fam-1", "fam-2"], Some(225), None).await;
    let admin = Uid::new("admin-1");

    let outcome = h
        .core
        .admin_refund_event_transaction(
            &admin,
            AdminRefund {
                order_id: order_id.clone(),
                refund_all: true,
                refund_amount: None,
                line_map: None,
                reason: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.refunded_lines.len(), 3);
    assert!(outcome
        .refunded_lines
        .iter()
        .all(|r| r.amount.cents() == 2500));
    assert_eq!(outcome.transaction_status, TransactionStatus::FullyRefunded);

    let refunds = h.provider.refunds().await;
    assert_eq!(refunds.len(), 3);
    assert!(refunds.iter().all(|r| r.amount == "25.00"));

    // amount_refunded on the registrations ends above the fee-adjusted
    // refundable: the accepted admin override.
    let instance = h.store.instance(&instance_id).await.unwrap();
    let entry = instance
        .registration_details
        .get(&Uid::new("u1"))
        .unwrap();
    let self_pd = entry.self_payment_details.as_ref().unwrap();
    assert_eq!(self_pd.amount_refunded.cents(), 2500);
    assert!(self_pd.amount_refunded > self_pd.refundable_amount.unwrap());
}

#[tokio::test]
async fn admin_per_line_refund_validates_amounts() {
    let h = harness();
    let (_instance_id, order_id) = paid_registration(&h, 2500, &["fam-1"], None, None).await;
    let admin = Uid::new("admin-1");
    let tx = h.store.transaction(&order_id).await.unwrap();
    let line = tx.items[0].line_id.clone();

    // Over the remaining: rejected outright.
    let mut over = HashMap::new();
    over.insert(line.clone(), Some(Money::from_cents(2600)));
    let err = h
        .core
        .admin_refund_event_transaction(
            &admin,
            AdminRefund {
                order_id: order_id.clone(),
                refund_all: false,
                refund_amount: None,
                line_map: Some(over),
                reason: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert!(h.provider.refunds().await.is_empty());

    // Exactly the remaining drives the line to fully refunded.
    let mut exact = HashMap::new();
    exact.insert(line.clone(), Some(Money::from_cents(2500)));
    let outcome = h
        .core
        .admin_refund_event_transaction(
            &admin,
            AdminRefund {
                order_id: order_id.clone(),
                refund_all: false,
                refund_amount: None,
                line_map: Some(exact),
                reason: Some("duplicate charge".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.refunded_lines.len(), 1);
    assert_eq!(outcome.transaction_status, TransactionStatus::PartiallyRefunded);

    let tx = h.store.transaction(&order_id).await.unwrap();
    let item = tx.items.iter().find(|it| it.line_id == line).unwrap();
    assert_eq!(item.status, LineStatus::RefundedFull);
    assert_eq!(item.refunds[0].reason, "duplicate charge");
}

#[tokio::test]
async fn admin_uniform_amount_is_capped_per_line() {
    let h = harness();
    let (_instance_id, order_id) = paid_registration(&h, 2500, &["fam-1"], None, None).await;
    let admin = Uid::new("admin-1");

    // First pass refunds 20.00 everywhere.
    h.core
        .admin_refund_event_transaction(
            &admin,
            AdminRefund {
                order_id: order_id.clone(),
                refund_all: true,
                refund_amount: Some(Money::from_cents(2000)),
                line_map: None,
                reason: None,
            },
        )
        .await
        .unwrap();

    // Second pass asks for 20.00 again; only 5.00 remains per line.
    let outcome = h
        .core
        .admin_refund_event_transaction(
            &admin,
            AdminRefund {
                order_id: order_id.clone(),
                refund_all: true,
                refund_amount: Some(Money::from_cents(2000)),
                line_map: None,
                reason: None,
            },
        )
        .await
        .unwrap();
    assert!(outcome
        .refunded_lines
        .iter()
        .all(|r| r.amount.cents() == 500));
    assert_eq!(outcome.transaction_status, TransactionStatus::FullyRefunded);
}

#[tokio::test]
async fn fully_refunded_order_has_nothing_left_for_admins() {
    let h = harness();
    let (_instance_id, order_id) = paid_registration(&h, 2500, &[], None, None).await;
    let admin = Uid::new("admin-1");

    h.core
        .admin_refund_event_transaction(
            &admin,
            AdminRefund {
                order_id: order_id.clone(),
                refund_all: true,
                refund_amount: None,
                line_map: None,
                reason: None,
            },
        )
        .await
        .unwrap();

    let err = h
        .core
        .admin_refund_event_transaction(
            &admin,
            AdminRefund {
                order_id,
                refund_all: true,
                refund_amount: None,
                line_map: None,
                reason: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}
