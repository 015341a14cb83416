//! Event blueprints: the templates recurring event instances are projected
//! from.
//!
//! A blueprint never holds registrations itself; it defines localized
//! content, the recurrence rule, registration windows, pricing and
//! eligibility restrictions. [`validate_definition`] is the single
//! validation path for blueprint creates/edits *and* for effective payloads
//! assembled from instance overrides, so the two can never drift apart.

use crate::error::{CoreError, CoreResult};
use crate::types::{DiscountCodeId, EventId, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Per-language display content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Localization {
    /// Event title.
    pub title: String,
    /// Event description.
    pub description: String,
    /// Free-form location info shown to attendees.
    pub location_info: String,
}

/// How often instances of the event occur.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    /// Every day.
    Daily,
    /// Every seven days.
    Weekly,
    /// Same day-of-month, clamped to the month's last day.
    Monthly,
    /// Same date every year, Feb 29 clamped in non-leap years.
    Yearly,
    /// A single occurrence at the origin date.
    Never,
}

/// Gender restriction on attendance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    /// Open to everyone.
    #[default]
    All,
    /// Restricted to male registrants.
    Male,
    /// Restricted to female registrants.
    Female,
}

/// Payment methods an event accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOption {
    /// Online payment through the provider.
    PayPal,
    /// Pay in person at the door.
    Door,
}

impl fmt::Display for PaymentOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayPal => write!(f, "paypal"),
            Self::Door => write!(f, "door"),
        }
    }
}

/// The blueprint-shaped payload: everything an admin defines when creating
/// or editing an event, and equally the shape of an *effective* event
/// assembled from a blueprint plus instance overrides.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventDefinition {
    /// Language tag → localized content. At least one entry.
    pub localizations: HashMap<String, Localization>,
    /// Origin date all recurrence arithmetic is anchored on. For an
    /// effective payload this is the concrete occurrence date.
    pub date: DateTime<Utc>,
    /// Optional end of the occurrence.
    pub end_date: Option<DateTime<Utc>>,
    /// Recurrence rule.
    pub recurring: Recurrence,
    /// Size of the rolling window of future instances (1..=798).
    pub max_published: u32,
    /// Whether the projection engine keeps publishing new instances.
    pub currently_publishing: bool,
    /// Hidden events are invisible to users and cannot allow registration.
    pub hidden: bool,
    /// Whether registration is allowed at all.
    pub registration_allowed: bool,
    /// When registration opens; absent means "always open".
    pub registration_opens: Option<DateTime<Utc>>,
    /// When registration closes; absent means "until the event".
    pub registration_deadline: Option<DateTime<Utc>>,
    /// Cutoff after which user-initiated paypal refunds stop being
    /// automatic.
    pub automatic_refund_deadline: Option<DateTime<Utc>>,
    /// Associated ministry ids.
    pub ministries: Vec<String>,
    /// Whether only members may register.
    pub members_only: bool,
    /// Whether attendance requires an RSVP.
    pub rsvp_required: bool,
    /// Seat capacity; absent means unlimited.
    pub max_spots: Option<u32>,
    /// Price per registrant.
    pub price: Money,
    /// Optional members-only price; never above `price`.
    pub member_price: Option<Money>,
    /// Discount codes applicable to this event.
    pub discount_codes: Vec<DiscountCodeId>,
    /// Minimum attendee age, inclusive.
    pub min_age: Option<i32>,
    /// Maximum attendee age, inclusive.
    pub max_age: Option<i32>,
    /// Gender restriction.
    pub gender: Gender,
    /// Maps-resolvable address. Required.
    pub location_address: Option<String>,
    /// Image asset id. Required.
    pub image_id: String,
    /// Accepted payment methods.
    pub payment_options: Vec<PaymentOption>,
}

impl EventDefinition {
    /// True when the event accepts the given payment option.
    #[must_use]
    pub fn accepts(&self, option: PaymentOption) -> bool {
        self.payment_options.contains(&option)
    }
}

/// A persisted blueprint: the admin-defined definition plus the projection
/// bookkeeping the engine maintains.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventBlueprint {
    /// Store-assigned identifier.
    pub id: EventId,
    /// The admin-defined event definition.
    #[serde(flatten)]
    pub definition: EventDefinition,
    /// When the blueprint was last updated. Copied onto instances as
    /// `overrides_date_updated_on` so the frontend can disambiguate DST.
    pub updated_on: DateTime<Utc>,
    /// The `series_index` the current origin date is anchored at. Starts at
    /// 1; bumped when the origin date or recurrence changes so past
    /// instances stay untouched.
    pub anchor_index: u32,
}

/// Validates a definition (blueprint payload or assembled effective event).
///
/// `validate_date` is false when editing an instance without a date change,
/// so past occurrences can still be corrected.
///
/// # Errors
///
/// [`CoreError::Validation`] naming the first violated rule.
#[allow(clippy::too_many_lines)]
pub fn validate_definition(
    def: &EventDefinition,
    validate_date: bool,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    if !def.price.is_zero() && def.payment_options.is_empty() {
        return Err(CoreError::Validation(
            "events with a price must offer at least one payment option".into(),
        ));
    }

    if def.localizations.is_empty() {
        return Err(CoreError::Validation(
            "at least one localization with a title and description is required".into(),
        ));
    }
    for (lang, loc) in &def.localizations {
        if loc.title.trim().is_empty() || loc.description.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "localization '{lang}' must set a non-empty title and description"
            )));
        }
    }

    if validate_date && def.date <= now {
        return Err(CoreError::Validation(
            "the event date must be in the future".into(),
        ));
    }

    for (label, age) in [("min_age", def.min_age), ("max_age", def.max_age)] {
        if let Some(age) = age {
            if !(0..=100).contains(&age) {
                return Err(CoreError::Validation(format!(
                    "{label} must be between 0 and 100 inclusive"
                )));
            }
        }
    }
    if let (Some(min), Some(max)) = (def.min_age, def.max_age) {
        if min > max {
            return Err(CoreError::Validation(
                "min_age cannot be greater than max_age".into(),
            ));
        }
    }

    if let Some(member_price) = def.member_price {
        if member_price > def.price {
            return Err(CoreError::Validation(
                "member_price cannot exceed price".into(),
            ));
        }
    }

    if let (Some(opens), Some(deadline)) = (def.registration_opens, def.registration_deadline) {
        if opens >= deadline {
            return Err(CoreError::Validation(
                "registration must open before the registration deadline".into(),
            ));
        }
    }
    if let Some(deadline) = def.registration_deadline {
        if deadline > def.date {
            return Err(CoreError::Validation(
                "the registration deadline must be on or before the event date".into(),
            ));
        }
    }
    if let Some(opens) = def.registration_opens {
        if opens > def.date {
            return Err(CoreError::Validation(
                "registration must open on or before the event date".into(),
            ));
        }
    }

    if let Some(refund_deadline) = def.automatic_refund_deadline {
        if refund_deadline >= def.date {
            return Err(CoreError::Validation(
                "the automatic refund deadline must be strictly before the event date".into(),
            ));
        }
        if let Some(deadline) = def.registration_deadline {
            if refund_deadline < deadline {
                return Err(CoreError::Validation(
                    "the automatic refund deadline must be on or after the registration deadline"
                        .into(),
                ));
            }
        }
        if let Some(opens) = def.registration_opens {
            if refund_deadline <= opens {
                return Err(CoreError::Validation(
                    "the automatic refund deadline must be after the registration opening".into(),
                ));
            }
        }
        if !def.accepts(PaymentOption::PayPal) {
            return Err(CoreError::Validation(
                "an automatic refund deadline requires paypal as a payment option".into(),
            ));
        }
        if def.accepts(PaymentOption::Door) {
            return Err(CoreError::Validation(
                "an automatic refund deadline cannot be combined with door payment; door payers \
                 could cancel when paypal payers no longer can"
                    .into(),
            ));
        }
    }

    if let Some(max_spots) = def.max_spots {
        if max_spots == 0 {
            return Err(CoreError::Validation("max_spots must be greater than zero".into()));
        }
    }

    if !(1..=798).contains(&def.max_published) {
        return Err(CoreError::Validation(
            "max_published must be between 1 and 798 inclusive".into(),
        ));
    }

    if def.hidden && def.registration_allowed {
        return Err(CoreError::Validation(
            "a hidden event cannot allow registration".into(),
        ));
    }

    if def.image_id.trim().is_empty() {
        return Err(CoreError::Validation("an event must have an image attached".into()));
    }

    match &def.location_address {
        Some(address) if !address.trim().is_empty() => {}
        _ => {
            return Err(CoreError::Validation("an event must have an address".into()));
        }
    }

    Ok(())
}

/// Picks the localization key to display: preferred language, then `en`,
/// then the first defined.
#[must_use]
pub fn preferred_locale_key<'a, T>(
    localizations: &'a HashMap<String, T>,
    preferred: Option<&str>,
) -> &'a str {
    if let Some(lang) = preferred {
        if localizations.contains_key(lang) {
            return localizations
                .keys()
                .find(|k| k.as_str() == lang)
                .map_or("en", String::as_str);
        }
    }
    if localizations.contains_key("en") {
        return "en";
    }
    localizations.keys().next().map_or("en", String::as_str)
}
