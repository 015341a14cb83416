//! Per-instance override packaging, validation, and effective-event
//! assembly.
//!
//! Overrides come in all-or-nothing groups: touching any field of a group
//! activates the whole group, and the packager completes the missing fields
//! from the blueprint. The seven groups are encoded once in
//! [`OverrideGroup`] / [`GROUP_FIELDS`]; adding an overridable field is a
//! table change, not scattered conditionals.
//!
//! Nullability is three-state. A field in an incoming override payload is
//! either *absent* (untouched), *null* (explicitly cleared — only legal for
//! fields in [`ALLOWED_NONE`]), or set to a value. [`OverrideField`] keeps
//! the three states distinct through serde.

use crate::blueprint::{EventBlueprint, EventDefinition, Gender, Localization, PaymentOption, preferred_locale_key};
use crate::error::{CoreError, CoreResult};
use crate::instance::{AssembledInstance, EventInstance};
use crate::types::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Tri-state override field
// ============================================================================

/// A field of an override payload: absent, explicitly null, or a value.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum OverrideField<T> {
    /// The field was not part of the payload.
    #[default]
    Absent,
    /// The field was explicitly set to null.
    Null,
    /// The field was set to a value.
    Value(T),
}

impl<T> OverrideField<T> {
    /// True when the field was not part of the payload.
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// True when the field was explicitly cleared.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrows the value, if set.
    #[must_use]
    pub const fn as_value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Absent | Self::Null => None,
        }
    }
}

impl<T: Clone> OverrideField<T> {
    /// `Value` → `Some`, `Null`/`Absent` → `None`.
    #[must_use]
    pub fn to_option(&self) -> Option<T> {
        self.as_value().cloned()
    }

    /// The value, or `default` when not set.
    #[must_use]
    pub fn value_or(&self, default: T) -> T {
        self.as_value().cloned().unwrap_or(default)
    }

    /// Packs a blueprint optional: `Some` → `Value`, `None` → `Null`.
    #[must_use]
    pub fn from_option(option: Option<T>) -> Self {
        option.map_or(Self::Null, Self::Value)
    }
}

impl<T: Serialize> Serialize for OverrideField<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => serializer.serialize_some(v),
            Self::Absent | Self::Null => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OverrideField<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Option::<T>::deserialize(deserializer)?.map_or(Self::Null, Self::Value))
    }
}

// ============================================================================
// Group table
// ============================================================================

/// The seven all-or-nothing override groups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverrideGroup {
    /// G1: localized content.
    Localizations,
    /// G2: maps address.
    LocationAddress,
    /// G3: image asset.
    Image,
    /// G4: occurrence date and end date.
    Dates,
    /// G5: registration windows, capacity, pricing, payment options.
    Registration,
    /// G6: eligibility restrictions.
    Eligibility,
    /// G7: visibility and registration toggle.
    Visibility,
}

impl OverrideGroup {
    /// All groups, in tracker order.
    pub const ALL: [Self; 7] = [
        Self::Localizations,
        Self::LocationAddress,
        Self::Image,
        Self::Dates,
        Self::Registration,
        Self::Eligibility,
        Self::Visibility,
    ];

    /// Position of this group in the tracker.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Localizations => 0,
            Self::LocationAddress => 1,
            Self::Image => 2,
            Self::Dates => 3,
            Self::Registration => 4,
            Self::Eligibility => 5,
            Self::Visibility => 6,
        }
    }

    /// The field names belonging to this group.
    #[must_use]
    pub const fn fields(self) -> &'static [&'static str] {
        GROUP_FIELDS[self.index()]
    }
}

/// Field names per group, indexed by [`OverrideGroup::index`].
pub const GROUP_FIELDS: [&[&str]; 7] = [
    &["localizations"],
    &["location_address"],
    &["image_id"],
    &["date", "end_date"],
    &[
        "rsvp_required",
        "registration_opens",
        "registration_deadline",
        "automatic_refund_deadline",
        "max_spots",
        "price",
        "member_price",
        "payment_options",
    ],
    &["members_only", "gender", "min_age", "max_age"],
    &["registration_allowed", "hidden"],
];

/// Fields that may be explicitly cleared to null.
pub const ALLOWED_NONE: [&str; 8] = [
    "end_date",
    "registration_opens",
    "registration_deadline",
    "automatic_refund_deadline",
    "max_spots",
    "member_price",
    "min_age",
    "max_age",
];

fn is_allowed_none(field: &str) -> bool {
    ALLOWED_NONE.contains(&field)
}

/// Which override groups are active on an instance, one bit per group in
/// [`OverrideGroup::ALL`] order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverridesTracker(pub [bool; 7]);

impl OverridesTracker {
    /// Whether a group is active.
    #[must_use]
    pub const fn is_active(&self, group: OverrideGroup) -> bool {
        self.0[group.index()]
    }

    /// Marks a group active or inactive.
    pub fn set(&mut self, group: OverrideGroup, active: bool) {
        self.0[group.index()] = active;
    }

    /// True when any group is active.
    #[must_use]
    pub fn any(&self) -> bool {
        self.0.iter().any(|b| *b)
    }
}

// ============================================================================
// Overrides payload
// ============================================================================

/// Per-instance overrides, both as submitted by admins (partial) and as
/// persisted (expanded to complete groups).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceOverrides {
    /// G1.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub localizations: OverrideField<HashMap<String, Localization>>,
    /// G2.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub location_address: OverrideField<String>,
    /// G3.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub image_id: OverrideField<String>,
    /// G4.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub date: OverrideField<DateTime<Utc>>,
    /// G4.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub end_date: OverrideField<DateTime<Utc>>,
    /// G5.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub rsvp_required: OverrideField<bool>,
    /// G5.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub registration_opens: OverrideField<DateTime<Utc>>,
    /// G5.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub registration_deadline: OverrideField<DateTime<Utc>>,
    /// G5.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub automatic_refund_deadline: OverrideField<DateTime<Utc>>,
    /// G5.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub max_spots: OverrideField<u32>,
    /// G5.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub price: OverrideField<Money>,
    /// G5.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub member_price: OverrideField<Money>,
    /// G5.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub payment_options: OverrideField<Vec<PaymentOption>>,
    /// G6.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub members_only: OverrideField<bool>,
    /// G6.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub gender: OverrideField<Gender>,
    /// G6.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub min_age: OverrideField<i32>,
    /// G6.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub max_age: OverrideField<i32>,
    /// G7.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub registration_allowed: OverrideField<bool>,
    /// G7.
    #[serde(default, skip_serializing_if = "OverrideField::is_absent")]
    pub hidden: OverrideField<bool>,
}

impl InstanceOverrides {
    /// Whether the named field is part of the payload (value or null).
    #[must_use]
    pub fn is_present(&self, field: &str) -> bool {
        !self.state(field, FieldProbe::Absent)
    }

    /// Whether the named field is explicitly null.
    #[must_use]
    pub fn is_field_null(&self, field: &str) -> bool {
        self.state(field, FieldProbe::Null)
    }

    fn state(&self, field: &str, probe: FieldProbe) -> bool {
        macro_rules! check {
            ($f:expr) => {
                match probe {
                    FieldProbe::Absent => $f.is_absent(),
                    FieldProbe::Null => $f.is_null(),
                }
            };
        }
        match field {
            "localizations" => check!(self.localizations),
            "location_address" => check!(self.location_address),
            "image_id" => check!(self.image_id),
            "date" => check!(self.date),
            "end_date" => check!(self.end_date),
            "rsvp_required" => check!(self.rsvp_required),
            "registration_opens" => check!(self.registration_opens),
            "registration_deadline" => check!(self.registration_deadline),
            "automatic_refund_deadline" => check!(self.automatic_refund_deadline),
            "max_spots" => check!(self.max_spots),
            "price" => check!(self.price),
            "member_price" => check!(self.member_price),
            "payment_options" => check!(self.payment_options),
            "members_only" => check!(self.members_only),
            "gender" => check!(self.gender),
            "min_age" => check!(self.min_age),
            "max_age" => check!(self.max_age),
            "registration_allowed" => check!(self.registration_allowed),
            "hidden" => check!(self.hidden),
            _ => false,
        }
    }

    /// Copies the named field from `source` (used when the admin supplied
    /// it) into `self`.
    fn copy_field(&mut self, field: &str, source: &Self) {
        match field {
            "localizations" => self.localizations = source.localizations.clone(),
            "location_address" => self.location_address = source.location_address.clone(),
            "image_id" => self.image_id = source.image_id.clone(),
            "date" => self.date = source.date.clone(),
            "end_date" => self.end_date = source.end_date.clone(),
            "rsvp_required" => self.rsvp_required = source.rsvp_required.clone(),
            "registration_opens" => self.registration_opens = source.registration_opens.clone(),
            "registration_deadline" => {
                self.registration_deadline = source.registration_deadline.clone();
            }
            "automatic_refund_deadline" => {
                self.automatic_refund_deadline = source.automatic_refund_deadline.clone();
            }
            "max_spots" => self.max_spots = source.max_spots.clone(),
            "price" => self.price = source.price.clone(),
            "member_price" => self.member_price = source.member_price.clone(),
            "payment_options" => self.payment_options = source.payment_options.clone(),
            "members_only" => self.members_only = source.members_only.clone(),
            "gender" => self.gender = source.gender.clone(),
            "min_age" => self.min_age = source.min_age.clone(),
            "max_age" => self.max_age = source.max_age.clone(),
            "registration_allowed" => self.registration_allowed = source.registration_allowed.clone(),
            "hidden" => self.hidden = source.hidden.clone(),
            _ => {}
        }
    }

    /// Fills the named field from the blueprint (used for untouched members
    /// of an activated group). Blueprint optionals that are unset become
    /// explicit nulls, which is only reachable for allowed-none fields.
    fn fill_from_blueprint(&mut self, field: &str, bp: &EventDefinition) {
        match field {
            "localizations" => self.localizations = OverrideField::Value(bp.localizations.clone()),
            "location_address" => {
                self.location_address = OverrideField::from_option(bp.location_address.clone());
            }
            "image_id" => self.image_id = OverrideField::Value(bp.image_id.clone()),
            "date" => self.date = OverrideField::Value(bp.date),
            "end_date" => self.end_date = OverrideField::from_option(bp.end_date),
            "rsvp_required" => self.rsvp_required = OverrideField::Value(bp.rsvp_required),
            "registration_opens" => {
                self.registration_opens = OverrideField::from_option(bp.registration_opens);
            }
            "registration_deadline" => {
                self.registration_deadline = OverrideField::from_option(bp.registration_deadline);
            }
            "automatic_refund_deadline" => {
                self.automatic_refund_deadline =
                    OverrideField::from_option(bp.automatic_refund_deadline);
            }
            "max_spots" => self.max_spots = OverrideField::from_option(bp.max_spots),
            "price" => self.price = OverrideField::Value(bp.price),
            "member_price" => self.member_price = OverrideField::from_option(bp.member_price),
            "payment_options" => {
                self.payment_options = OverrideField::Value(bp.payment_options.clone());
            }
            "members_only" => self.members_only = OverrideField::Value(bp.members_only),
            "gender" => self.gender = OverrideField::Value(bp.gender),
            "min_age" => self.min_age = OverrideField::from_option(bp.min_age),
            "max_age" => self.max_age = OverrideField::from_option(bp.max_age),
            "registration_allowed" => {
                self.registration_allowed = OverrideField::Value(bp.registration_allowed);
            }
            "hidden" => self.hidden = OverrideField::Value(bp.hidden),
            _ => {}
        }
    }
}

#[derive(Clone, Copy)]
enum FieldProbe {
    Absent,
    Null,
}

// ============================================================================
// Packager
// ============================================================================

/// Expands a partial override payload into complete groups plus a tracker.
///
/// Any group with at least one supplied field becomes active; its remaining
/// fields are filled from the blueprint. Explicit nulls are only legal for
/// fields in [`ALLOWED_NONE`].
///
/// # Errors
///
/// [`CoreError::Validation`] when a non-nullable field is explicitly null.
pub fn package_overrides(
    input: &InstanceOverrides,
    blueprint: &EventDefinition,
) -> CoreResult<(InstanceOverrides, OverridesTracker)> {
    let mut tracker = OverridesTracker::default();
    for group in OverrideGroup::ALL {
        if group.fields().iter().any(|f| input.is_present(f)) {
            tracker.set(group, true);
        }
    }

    let mut expanded = InstanceOverrides::default();
    for group in OverrideGroup::ALL {
        if !tracker.is_active(group) {
            continue;
        }
        for field in group.fields() {
            if input.is_present(field) {
                if input.is_field_null(field) && !is_allowed_none(field) {
                    return Err(CoreError::Validation(format!(
                        "override field '{field}' cannot be set to null"
                    )));
                }
                expanded.copy_field(field, input);
            } else {
                expanded.fill_from_blueprint(field, blueprint);
            }
        }
    }

    Ok((expanded, tracker))
}

// ============================================================================
// Effective-event assembly
// ============================================================================

/// Merges a blueprint with an instance's overrides into the effective event
/// definition. `definition.date` becomes the concrete occurrence date.
///
/// Registration windows and the end date preserve the blueprint's deltas
/// relative to its origin date unless their group is overridden, in which
/// case the overridden values are taken verbatim (including explicit
/// nulls).
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn effective_definition(
    blueprint: &EventBlueprint,
    overrides: &InstanceOverrides,
    tracker: &OverridesTracker,
    scheduled_date: DateTime<Utc>,
) -> EventDefinition {
    let bp = &blueprint.definition;
    let mut def = bp.clone();

    let occurrence = if tracker.is_active(OverrideGroup::Dates) {
        overrides.date.to_option().unwrap_or(scheduled_date)
    } else {
        scheduled_date
    };
    def.date = occurrence;

    if tracker.is_active(OverrideGroup::Dates) {
        def.end_date = overrides.end_date.to_option();
    } else {
        def.end_date = bp.end_date.map(|v| occurrence + (v - bp.date));
    }

    if tracker.is_active(OverrideGroup::Registration) {
        def.rsvp_required = overrides.rsvp_required.value_or(bp.rsvp_required);
        def.registration_opens = overrides.registration_opens.to_option();
        def.registration_deadline = overrides.registration_deadline.to_option();
        def.automatic_refund_deadline = overrides.automatic_refund_deadline.to_option();
        def.max_spots = overrides.max_spots.to_option();
        def.price = overrides.price.value_or(bp.price);
        def.member_price = overrides.member_price.to_option();
        def.payment_options = overrides.payment_options.value_or(bp.payment_options.clone());
    } else {
        def.registration_opens = bp.registration_opens.map(|v| occurrence + (v - bp.date));
        def.registration_deadline = bp.registration_deadline.map(|v| occurrence + (v - bp.date));
        def.automatic_refund_deadline =
            bp.automatic_refund_deadline.map(|v| occurrence + (v - bp.date));
    }

    if tracker.is_active(OverrideGroup::Localizations) {
        def.localizations = overrides.localizations.value_or(bp.localizations.clone());
    }
    if tracker.is_active(OverrideGroup::LocationAddress) {
        def.location_address = overrides
            .location_address
            .to_option()
            .or_else(|| bp.location_address.clone());
    }
    if tracker.is_active(OverrideGroup::Image) {
        def.image_id = overrides.image_id.value_or(bp.image_id.clone());
    }
    if tracker.is_active(OverrideGroup::Eligibility) {
        def.members_only = overrides.members_only.value_or(bp.members_only);
        def.gender = overrides.gender.value_or(bp.gender);
        def.min_age = overrides.min_age.to_option();
        def.max_age = overrides.max_age.to_option();
    }
    if tracker.is_active(OverrideGroup::Visibility) {
        def.registration_allowed = overrides
            .registration_allowed
            .value_or(bp.registration_allowed);
        def.hidden = overrides.hidden.value_or(bp.hidden);
    }

    def
}

/// Joins a blueprint and an instance into the [`AssembledInstance`] view
/// used by validation, registration flows and user-facing reads.
#[must_use]
pub fn assemble_instance(
    blueprint: &EventBlueprint,
    instance: &EventInstance,
    preferred_lang: Option<&str>,
) -> AssembledInstance {
    let definition = effective_definition(
        blueprint,
        &instance.overrides,
        &instance.overrides_tracker,
        instance.scheduled_date,
    );

    let locale = preferred_locale_key(&definition.localizations, preferred_lang).to_string();
    let loc = definition.localizations.get(&locale);

    AssembledInstance {
        id: instance.id.clone(),
        event_id: instance.event_id.clone(),
        series_index: instance.series_index,
        seats_filled: instance.seats_filled,
        event_date: blueprint.definition.date,
        target_date: instance.target_date,
        updated_on: blueprint.updated_on,
        overrides_date_updated_on: instance.overrides_date_updated_on,
        overrides_tracker: instance.overrides_tracker,
        registration_details: instance.registration_details.clone(),
        default_title: loc.map(|l| l.title.clone()).unwrap_or_default(),
        default_description: loc.map(|l| l.description.clone()).unwrap_or_default(),
        default_location_info: loc.map(|l| l.location_info.clone()).unwrap_or_default(),
        default_localization: locale,
        definition,
    }
}
