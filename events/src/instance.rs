//! Projected event instances and per-user registration state.
//!
//! An instance is one concrete occurrence of a blueprint. It exclusively
//! owns its `registration_details` map and its `seats_filled` counter; both
//! are only ever mutated through the store's conditional update (see
//! `store::InstanceStore::apply_registration_update`).

use crate::blueprint::EventDefinition;
use crate::overrides::{InstanceOverrides, OverridesTracker};
use crate::types::{DiscountCodeId, EventId, FamilyId, InstanceId, LineId, Money, OrderId, PersonId, Uid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a registrant pays (or paid).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    /// No payment due.
    Free,
    /// Paid online through the provider.
    PayPal,
    /// Pays in person at the door.
    Door,
}

/// Per-registrant payment state stored inside a registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetails {
    /// How this registrant pays.
    pub payment_type: PaymentKind,
    /// The price this registrant signed up at. With a discount code this is
    /// the *mean* unit price across the batch, not an individual price.
    pub price: Money,
    /// Upper bound for automatic refunds: unit price minus this line's
    /// share of the provider fee. Absent for free/door lines.
    pub refundable_amount: Option<Money>,
    /// Total refunded against this line so far. Monotonic.
    pub amount_refunded: Money,
    /// True once paid (free counts as paid; door flips when collected).
    pub payment_complete: bool,
    /// Discount code used at signup, if any.
    pub discount_code_id: Option<DiscountCodeId>,
    /// Per-line admin lever allowing automatic refunds past the deadline.
    pub automatic_refund_eligibility: bool,
    /// Provider order id funding this line (paypal only).
    pub order_id: Option<OrderId>,
    /// Ledger line id inside that order (paypal only).
    pub line_id: Option<LineId>,
    /// True when created through the admin force path.
    pub is_forced: bool,
}

impl PaymentDetails {
    /// Details for a newly added registrant on the normal (non-forced)
    /// path. PayPal lines reach this point only after capture, so both free
    /// and paypal are complete; door is not.
    #[must_use]
    pub fn for_new_registrant(
        payment_type: PaymentKind,
        price: Money,
        discount_code_id: Option<DiscountCodeId>,
        lineage: Option<(OrderId, LineId)>,
        refundable_amount: Option<Money>,
    ) -> Self {
        let (order_id, line_id) = match (payment_type, lineage) {
            (PaymentKind::PayPal, Some((order, line))) => (Some(order), Some(line)),
            _ => (None, None),
        };
        let refundable_amount = match payment_type {
            PaymentKind::PayPal => Some(refundable_amount.unwrap_or(price)),
            PaymentKind::Free | PaymentKind::Door => None,
        };
        Self {
            payment_type,
            price,
            refundable_amount,
            amount_refunded: Money::ZERO,
            payment_complete: matches!(payment_type, PaymentKind::Free | PaymentKind::PayPal),
            discount_code_id,
            automatic_refund_eligibility: false,
            order_id,
            line_id,
            is_forced: false,
        }
    }

    /// Details stamped by an admin force-registration: `free` when no price
    /// was set, otherwise `door` (pay later).
    #[must_use]
    pub fn forced(price: Money) -> Self {
        let free = price.is_zero();
        Self {
            payment_type: if free { PaymentKind::Free } else { PaymentKind::Door },
            price,
            refundable_amount: if free { Some(price) } else { None },
            amount_refunded: Money::ZERO,
            payment_complete: free,
            discount_code_id: None,
            automatic_refund_eligibility: false,
            order_id: None,
            line_id: None,
            is_forced: true,
        }
    }

    /// What a user-initiated automatic refund may still return on this
    /// line: `refundable_amount` (price when unset) minus what was already
    /// refunded.
    #[must_use]
    pub fn remaining_refundable(&self) -> Money {
        self.refundable_amount
            .unwrap_or(self.price)
            .saturating_sub(self.amount_refunded)
    }
}

/// A user's registration entry on one instance: themself plus any family
/// members, with per-registrant payment details.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationDetails {
    /// Whether the account holder themself attends.
    pub self_registered: bool,
    /// Family members attending, no duplicates.
    pub family_registered: Vec<FamilyId>,
    /// Payment details for the account holder; present iff registered.
    pub self_payment_details: Option<PaymentDetails>,
    /// Payment details per registered family member.
    pub family_payment_details: HashMap<FamilyId, PaymentDetails>,
}

impl RegistrationDetails {
    /// True when nobody is registered; the store removes empty entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.self_registered && self.family_registered.is_empty()
    }

    /// Number of seats this entry occupies.
    #[must_use]
    pub fn seat_count(&self) -> u32 {
        u32::from(self.self_registered)
            + u32::try_from(self.family_registered.len()).unwrap_or(u32::MAX)
    }

    /// Whether the given person is registered under this entry.
    #[must_use]
    pub fn registered(&self, person: &PersonId) -> bool {
        match person {
            PersonId::User => self.self_registered,
            PersonId::Family(id) => self.family_registered.contains(id),
        }
    }

    /// Payment details for the given person, if registered with any.
    #[must_use]
    pub fn payment_for(&self, person: &PersonId) -> Option<&PaymentDetails> {
        match person {
            PersonId::User => self.self_payment_details.as_ref(),
            PersonId::Family(id) => self.family_payment_details.get(id),
        }
    }
}

/// One projected occurrence of a blueprint, as persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventInstance {
    /// Store-assigned identifier.
    pub id: InstanceId,
    /// The blueprint this instance was projected from.
    pub event_id: EventId,
    /// 1-based position in the series; unique per blueprint.
    pub series_index: u32,
    /// Expanded per-instance overrides (complete groups only).
    pub overrides: InstanceOverrides,
    /// Which override groups are active.
    pub overrides_tracker: OverridesTracker,
    /// Seats taken across all registrations.
    pub seats_filled: u32,
    /// Registration entries keyed by user id.
    pub registration_details: HashMap<Uid, RegistrationDetails>,
    /// The date this occurrence would fall on without any override.
    pub target_date: DateTime<Utc>,
    /// The effective occurrence date (equals `target_date` unless the date
    /// group is overridden).
    pub scheduled_date: DateTime<Utc>,
    /// Wall-clock moment the date intent was captured; the frontend uses it
    /// to disambiguate DST when rendering local times.
    pub overrides_date_updated_on: DateTime<Utc>,
}

impl EventInstance {
    /// Total registrants recorded in the registration map. At rest this
    /// always equals `seats_filled`.
    #[must_use]
    pub fn counted_registrants(&self) -> u32 {
        self.registration_details
            .values()
            .map(RegistrationDetails::seat_count)
            .sum()
    }
}

/// A registration change requested by a user.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeRegistration {
    /// Target instance.
    pub event_instance_id: InstanceId,
    /// `Some(true)` to register the account holder, `Some(false)` to
    /// unregister them, `None` for no change.
    pub self_registered: Option<bool>,
    /// Family members being added (must not already be registered).
    pub family_members_registering: Vec<FamilyId>,
    /// Family members being removed (must be registered).
    pub family_members_unregistering: Vec<FamilyId>,
    /// Payment type declared for the additions.
    pub payment_type: PaymentKind,
    /// Discount code applied to the additions, if any.
    pub discount_code_id: Option<DiscountCodeId>,
}

/// The merged blueprint + overrides view of one instance: what validation
/// and user-facing reads operate on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssembledInstance {
    /// Instance id.
    pub id: InstanceId,
    /// Blueprint id.
    pub event_id: EventId,
    /// Position in the series.
    pub series_index: u32,
    /// Seats taken.
    pub seats_filled: u32,
    /// Effective event fields; `definition.date` is the concrete
    /// occurrence date and the registration windows are already resolved.
    pub definition: EventDefinition,
    /// The blueprint's origin date.
    pub event_date: DateTime<Utc>,
    /// The occurrence date without overrides.
    pub target_date: DateTime<Utc>,
    /// When the blueprint was last updated.
    pub updated_on: DateTime<Utc>,
    /// DST-intent timestamp for the effective date.
    pub overrides_date_updated_on: DateTime<Utc>,
    /// Which override groups are active on this instance.
    pub overrides_tracker: OverridesTracker,
    /// Registration entries keyed by user id.
    pub registration_details: HashMap<Uid, RegistrationDetails>,
    /// Resolved default title for display.
    pub default_title: String,
    /// Resolved default description for display.
    pub default_description: String,
    /// Resolved default location info for display.
    pub default_location_info: String,
    /// Which localization the defaults came from.
    pub default_localization: String,
}

impl AssembledInstance {
    /// The effective occurrence date.
    #[must_use]
    pub const fn date(&self) -> DateTime<Utc> {
        self.definition.date
    }

    /// The effective seat capacity, `None` meaning unlimited.
    #[must_use]
    pub const fn max_spots(&self) -> Option<u32> {
        self.definition.max_spots
    }

    /// The registration entry for a user, if any.
    #[must_use]
    pub fn registration_for(&self, uid: &Uid) -> Option<&RegistrationDetails> {
        self.registration_details.get(uid)
    }
}
