//! Shared wiring for the integration tests: an `EventsCore` over the
//! in-memory store, the mock provider and a settable clock.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use chapel_events::blueprint::{EventDefinition, Gender, Localization, PaymentOption, Recurrence};
use chapel_events::core::{CoreSettings, EventsCore};
use chapel_events::provider::MockProvider;
use chapel_events::snapshot::MemorySnapshotStore;
use chapel_events::store::memory::MemoryStore;
use chapel_events::time::FixedClock;
use chapel_events::types::{Caller, FamilyId, FamilyMember, Money, Uid};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a test needs to drive the core and inspect its edges.
pub struct Harness {
    pub core: EventsCore,
    pub store: Arc<MemoryStore>,
    pub provider: Arc<MockProvider>,
    pub snapshots: Arc<MemorySnapshotStore>,
    pub clock: Arc<FixedClock>,
}

/// 2025-01-01T00:00:00Z, the default "now" tests start from.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(MockProvider::new());
    let snapshots = Arc::new(MemorySnapshotStore::new());
    let clock = Arc::new(FixedClock::new(epoch()));
    let core = EventsCore::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        snapshots.clone(),
        provider.clone(),
        clock.clone(),
        CoreSettings::default(),
    );
    Harness {
        core,
        store,
        provider,
        snapshots,
        clock,
    }
}

/// A weekly paid event on 2025-06-15 18:00 UTC with paypal payment.
pub fn paid_definition(price_cents: u64) -> EventDefinition {
    let mut localizations = HashMap::new();
    localizations.insert(
        "en".to_string(),
        Localization {
            title: "Harvest Dinner".into(),
            description: "Annual community dinner".into(),
            location_info: "Fellowship hall".into(),
        },
    );
    EventDefinition {
        localizations,
        date: at(2025, 6, 15, 18, 0),
        end_date: None,
        recurring: Recurrence::Weekly,
        max_published: 1,
        currently_publishing: true,
        hidden: false,
        registration_allowed: true,
        registration_opens: None,
        registration_deadline: None,
        automatic_refund_deadline: None,
        ministries: vec![],
        members_only: false,
        rsvp_required: true,
        max_spots: Some(50),
        price: Money::from_cents(price_cents),
        member_price: None,
        discount_codes: vec![],
        min_age: None,
        max_age: None,
        gender: Gender::All,
        location_address: Some("12 Chapel Lane".into()),
        image_id: "img-1".into(),
        payment_options: vec![PaymentOption::PayPal],
    }
}

/// A free event: price zero, no payment options.
pub fn free_definition() -> EventDefinition {
    let mut def = paid_definition(0);
    def.payment_options = vec![];
    def
}

/// A caller with `family_count` family members (`fam-1`, `fam-2`, ...).
pub fn caller(uid: &str, family_count: usize) -> Caller {
    Caller {
        uid: Uid::new(uid),
        membership: false,
        is_admin: false,
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        birthday: Some(at(1990, 3, 10, 0, 0)),
        gender: Some("F".into()),
        family: (1..=family_count)
            .map(|i| FamilyMember {
                id: FamilyId::new(format!("fam-{i}")),
                first_name: format!("Kid{i}"),
                last_name: "Lovelace".into(),
                date_of_birth: Some(at(2012, 5, 1, 0, 0)),
                gender: Some(if i % 2 == 0 { "F".into() } else { "M".into() }),
            })
            .collect(),
    }
}
