//! Registration state machine flows: free registrations, conflict
//! detection, eligibility, and capacity under contention.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use chapel_events::error::CoreError;
use chapel_events::instance::{ChangeRegistration, PaymentKind};
use chapel_events::registration::RegistrationEntry;
use chapel_events::store::InstanceStore;
use chapel_events::types::FamilyId;
use common::{at, caller, free_definition, harness, paid_definition};

fn change(
    instance_id: &chapel_events::types::InstanceId,
    self_registered: Option<bool>,
    registering: &[&str],
    unregistering: &[&str],
    payment_type: PaymentKind,
) -> ChangeRegistration {
    ChangeRegistration {
        event_instance_id: instance_id.clone(),
        self_registered,
        family_members_registering: registering.iter().map(|f| FamilyId::new(*f)).collect(),
        family_members_unregistering: unregistering.iter().map(|f| FamilyId::new(*f)).collect(),
        payment_type,
        discount_code_id: None,
    }
}

#[tokio::test]
async fn free_event_single_registrant() {
    let h = harness();
    let bp = h.core.create_blueprint(free_definition()).await.unwrap();
    let instance = h.store.by_blueprint(&bp.id).await.unwrap().remove(0);
    let user = caller("u1", 0);

    let entry = h
        .core
        .change_registration(
            &user,
            change(&instance.id, Some(true), &[], &[], PaymentKind::Free),
        )
        .await
        .unwrap();

    let RegistrationEntry::Applied(outcome) = entry else {
        panic!("free registration must apply directly");
    };
    assert_eq!(outcome.seats_filled, 1);
    let details = outcome.details.expect("registration entry must exist");
    assert!(details.self_registered);
    let pd = details.self_payment_details.expect("self payment details");
    assert_eq!(pd.payment_type, PaymentKind::Free);
    assert!(pd.price.is_zero());
    assert!(pd.payment_complete);
    assert!(pd.order_id.is_none());

    // No provider involvement for free events.
    assert!(h.provider.orders().await.is_empty());
}

#[tokio::test]
async fn double_registration_is_a_conflict() {
    let h = harness();
    let bp = h.core.create_blueprint(free_definition()).await.unwrap();
    let instance = h.store.by_blueprint(&bp.id).await.unwrap().remove(0);
    let user = caller("u1", 0);

    h.core
        .change_registration(
            &user,
            change(&instance.id, Some(true), &[], &[], PaymentKind::Free),
        )
        .await
        .unwrap();

    let err = h
        .core
        .change_registration(
            &user,
            change(&instance.id, Some(true), &[], &[], PaymentKind::Free),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn unregistering_a_stranger_is_a_conflict() {
    let h = harness();
    let bp = h.core.create_blueprint(free_definition()).await.unwrap();
    let instance = h.store.by_blueprint(&bp.id).await.unwrap().remove(0);
    let user = caller("u1", 2);

    let err = h
        .core
        .change_registration(
            &user,
            change(&instance.id, None, &[], &["fam-1"], PaymentKind::Free),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn pure_no_op_is_rejected() {
    let h = harness();
    let bp = h.core.create_blueprint(free_definition()).await.unwrap();
    let instance = h.store.by_blueprint(&bp.id).await.unwrap().remove(0);
    let user = caller("u1", 0);

    let err = h
        .core
        .change_registration(&user, change(&instance.id, None, &[], &[], PaymentKind::Free))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn registration_rejected_after_event_date() {
    let h = harness();
    let bp = h.core.create_blueprint(free_definition()).await.unwrap();
    let instance = h.store.by_blueprint(&bp.id).await.unwrap().remove(0);
    let user = caller("u1", 0);

    h.clock.set(at(2025, 6, 15, 19, 0));
    let err = h
        .core
        .change_registration(
            &user,
            change(&instance.id, Some(true), &[], &[], PaymentKind::Free),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Closed(_)));
}

#[tokio::test]
async fn members_only_rejects_non_members() {
    let h = harness();
    let mut def = free_definition();
    def.members_only = true;
    let bp = h.core.create_blueprint(def).await.unwrap();
    let instance = h.store.by_blueprint(&bp.id).await.unwrap().remove(0);

    let outsider = caller("u1", 0);
    let err = h
        .core
        .change_registration(
            &outsider,
            change(&instance.id, Some(true), &[], &[], PaymentKind::Free),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let mut member = caller("u2", 0);
    member.membership = true;
    assert!(h
        .core
        .change_registration(
            &member,
            change(&instance.id, Some(true), &[], &[], PaymentKind::Free),
        )
        .await
        .is_ok());
}

#[tokio::test]
async fn gender_and_age_eligibility_enforced() {
    let h = harness();
    let mut def = free_definition();
    def.gender = chapel_events::blueprint::Gender::Male;
    def.min_age = Some(5);
    def.max_age = Some(17);
    let bp = h.core.create_blueprint(def).await.unwrap();
    let instance = h.store.by_blueprint(&bp.id).await.unwrap().remove(0);

    // fam-1 is M and 13 at the event date: eligible. The caller herself is
    // F and an adult: not eligible.
    let user = caller("u1", 1);
    assert!(h
        .core
        .change_registration(
            &user,
            change(&instance.id, None, &["fam-1"], &[], PaymentKind::Free),
        )
        .await
        .is_ok());

    let err = h
        .core
        .change_registration(
            &user,
            change(&instance.id, Some(true), &[], &[], PaymentKind::Free),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn both_lose_when_each_delta_would_overflow() {
    // max_spots 10, seats 9: two requests each adding two registrants must
    // both be rejected, since either alone would go over capacity.
    let h = harness();
    let mut def = free_definition();
    def.max_spots = Some(10);
    let bp = h.core.create_blueprint(def).await.unwrap();
    let mut instance = h.store.by_blueprint(&bp.id).await.unwrap().remove(0);
    instance.seats_filled = 9;
    h.store.put_instance(instance.clone()).await;

    let alice = caller("alice", 2);
    let bob = caller("bob", 2);
    let (a, b) = tokio::join!(
        h.core.change_registration(
            &alice,
            change(&instance.id, None, &["fam-1", "fam-2"], &[], PaymentKind::Free),
        ),
        h.core.change_registration(
            &bob,
            change(&instance.id, None, &["fam-1", "fam-2"], &[], PaymentKind::Free),
        ),
    );
    assert!(matches!(a.unwrap_err(), CoreError::CapacityExceeded));
    assert!(matches!(b.unwrap_err(), CoreError::CapacityExceeded));

    let after = h.store.instance(&instance.id).await.unwrap();
    assert_eq!(after.seats_filled, 9);
}

#[tokio::test]
async fn last_seat_goes_to_exactly_one_of_two_racers() {
    let h = harness();
    let mut def = free_definition();
    def.max_spots = Some(1);
    let bp = h.core.create_blueprint(def).await.unwrap();
    let instance = h.store.by_blueprint(&bp.id).await.unwrap().remove(0);

    let alice = caller("alice", 0);
    let bob = caller("bob", 0);
    let (a, b) = tokio::join!(
        h.core.change_registration(
            &alice,
            change(&instance.id, Some(true), &[], &[], PaymentKind::Free),
        ),
        h.core.change_registration(
            &bob,
            change(&instance.id, Some(true), &[], &[], PaymentKind::Free),
        ),
    );

    let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1, "exactly one racer may take the last seat");

    let after = h.store.instance(&instance.id).await.unwrap();
    assert_eq!(after.seats_filled, 1);
    assert_eq!(after.counted_registrants(), 1);
}

#[tokio::test]
async fn removal_frees_the_seat_and_clears_empty_entries() {
    let h = harness();
    let bp = h.core.create_blueprint(free_definition()).await.unwrap();
    let instance = h.store.by_blueprint(&bp.id).await.unwrap().remove(0);
    let user = caller("u1", 1);

    h.core
        .change_registration(
            &user,
            change(&instance.id, Some(true), &["fam-1"], &[], PaymentKind::Free),
        )
        .await
        .unwrap();
    let mid = h.store.instance(&instance.id).await.unwrap();
    assert_eq!(mid.seats_filled, 2);

    let entry = h
        .core
        .change_registration(
            &user,
            change(&instance.id, Some(false), &[], &["fam-1"], PaymentKind::Free),
        )
        .await
        .unwrap();
    let RegistrationEntry::Applied(outcome) = entry else {
        panic!("removal must apply directly");
    };
    assert_eq!(outcome.seats_filled, 0);
    assert!(outcome.details.is_none(), "empty entries are removed");

    let after = h.store.instance(&instance.id).await.unwrap();
    assert!(after.registration_details.is_empty());
}

#[tokio::test]
async fn door_payment_is_recorded_incomplete() {
    let h = harness();
    let mut def = paid_definition(1500);
    def.payment_options = vec![chapel_events::blueprint::PaymentOption::Door];
    let bp = h.core.create_blueprint(def).await.unwrap();
    let instance = h.store.by_blueprint(&bp.id).await.unwrap().remove(0);
    let user = caller("u1", 0);

    let entry = h
        .core
        .change_registration(
            &user,
            change(&instance.id, Some(true), &[], &[], PaymentKind::Door),
        )
        .await
        .unwrap();
    let RegistrationEntry::Applied(outcome) = entry else {
        panic!("door registration must apply directly");
    };
    let pd = outcome
        .details
        .unwrap()
        .self_payment_details
        .expect("payment details");
    assert_eq!(pd.payment_type, PaymentKind::Door);
    assert!(!pd.payment_complete);
    assert_eq!(pd.price.cents(), 1500);
}

#[tokio::test]
async fn free_payment_type_rejected_for_paid_event() {
    let h = harness();
    let bp = h.core.create_blueprint(paid_definition(1500)).await.unwrap();
    let instance = h.store.by_blueprint(&bp.id).await.unwrap().remove(0);
    let user = caller("u1", 0);

    let err = h
        .core
        .change_registration(
            &user,
            change(&instance.id, Some(true), &[], &[], PaymentKind::Free),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}
