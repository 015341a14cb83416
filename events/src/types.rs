//! Shared value objects for the event core.
//!
//! Identifiers are string newtypes because the document store assigns object
//! ids and every external reference uses the string form. Monetary values
//! are integer cents to keep arithmetic exact; the two-decimal wire format
//! the provider expects is produced at the boundary.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps an existing identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrows the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id! {
    /// Identifier of an event blueprint.
    EventId
}
string_id! {
    /// Identifier of a projected event instance.
    InstanceId
}
string_id! {
    /// Identifier of a platform user account.
    Uid
}
string_id! {
    /// Identifier of a family member attached to a user account.
    FamilyId
}
string_id! {
    /// Provider order id; doubles as the ledger key.
    OrderId
}
string_id! {
    /// Opaque per-registrant line token inside an order.
    LineId
}
string_id! {
    /// Provider capture id, the handle refunds are issued against.
    CaptureId
}
string_id! {
    /// Identifier of a discount code.
    DiscountCodeId
}

// ============================================================================
// PersonId
// ============================================================================

/// Wire key for the account holder inside registration maps.
pub const SELF_KEY: &str = "SELF";

/// A registrant on an event: either the account holder or one of their
/// family members. Serialized as the literal `"SELF"` or the family id, the
/// same keys the registration maps and provider skus carry.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PersonId {
    /// The account holder themself.
    User,
    /// A family member on the account.
    Family(FamilyId),
}

impl PersonId {
    /// The map/wire key for this person.
    #[must_use]
    pub fn as_key(&self) -> &str {
        match self {
            Self::User => SELF_KEY,
            Self::Family(id) => id.as_str(),
        }
    }

    /// Parses a map/wire key back into a person.
    #[must_use]
    pub fn from_key(key: &str) -> Self {
        if key == SELF_KEY {
            Self::User
        } else {
            Self::Family(FamilyId::new(key))
        }
    }
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_key())
    }
}

impl Serialize for PersonId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_key())
    }
}

impl<'de> Deserialize<'de> for PersonId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        Ok(Self::from_key(&key))
    }
}

// ============================================================================
// Money (integer cents)
// ============================================================================

/// Money in integer cents, USD.
///
/// All internal arithmetic is exact; [`Money::to_wire`] renders the
/// two-decimal string the provider expects and [`Money::parse`] reads it
/// back. Values are unsigned: nothing in this domain owes a negative amount,
/// and subtraction is explicit about clamping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero dollars.
    pub const ZERO: Self = Self(0);

    /// Builds from an exact cent count.
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// The amount in cents.
    #[must_use]
    pub const fn cents(self) -> u64 {
        self.0
    }

    /// True when the amount is zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Parses a decimal string (`"16"`, `"16.6"`, `"16.66"`). Fractions
    /// beyond two places are rejected: the provider never produces them and
    /// accepting them would silently lose money.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (whole, frac) = match value.split_once('.') {
            Some((w, f)) => (w, f),
            None => (value, ""),
        };
        if whole.is_empty() || whole.chars().any(|c| !c.is_ascii_digit()) {
            return None;
        }
        if frac.len() > 2 || frac.chars().any(|c| !c.is_ascii_digit()) {
            return None;
        }
        let dollars: u64 = whole.parse().ok()?;
        let cents_part: u64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<u64>().ok()? * 10,
            _ => frac.parse().ok()?,
        };
        Some(Self(dollars.checked_mul(100)?.checked_add(cents_part)?))
    }

    /// Two-decimal wire representation (`"16.66"`).
    #[must_use]
    pub fn to_wire(self) -> String {
        format!("{}.{:02}", self.0 / 100, self.0 % 100)
    }

    /// Checked addition.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Subtraction clamped at zero.
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Smaller of two amounts.
    #[must_use]
    pub const fn min(self, other: Self) -> Self {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }

    /// Mean over `count` registrants, truncated toward zero so the payer
    /// gets the benefit of the dropped fraction.
    #[must_use]
    pub fn mean_truncated(total: Self, count: u64) -> Self {
        if count == 0 {
            return Self::ZERO;
        }
        Self(total.0 / count)
    }

    /// This amount's proportional share of `fee`, where this line is
    /// `self` out of an order totalling `total`. Rounded half-up in cent
    /// space. Returns zero for a zero total.
    #[must_use]
    pub fn fee_share(self, fee: Self, total: Self) -> Self {
        if total.0 == 0 {
            return Self::ZERO;
        }
        let numerator = u128::from(self.0) * u128::from(fee.0);
        let denominator = u128::from(total.0);
        let rounded = (numerator + denominator / 2) / denominator;
        Self(u64::try_from(rounded).unwrap_or(u64::MAX))
    }

    /// Sums an iterator of amounts, saturating on overflow.
    #[must_use]
    pub fn total<I: IntoIterator<Item = Self>>(amounts: I) -> Self {
        amounts
            .into_iter()
            .fold(Self::ZERO, |acc, m| Self(acc.0.saturating_add(m.0)))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Caller identity
// ============================================================================

/// Snapshot of the authenticated caller, supplied by the auth layer.
///
/// The core never looks identities up itself; everything eligibility needs
/// (membership, birthdays, genders, the family roster) arrives with the
/// request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Caller {
    /// Account id.
    pub uid: Uid,
    /// Whether the account holds church membership.
    pub membership: bool,
    /// Whether the caller may use administrator entry points.
    pub is_admin: bool,
    /// Account holder's first name.
    pub first_name: String,
    /// Account holder's last name.
    pub last_name: String,
    /// Account holder's birthday, when on file.
    pub birthday: Option<DateTime<Utc>>,
    /// Account holder's gender marker (`"M"` / `"F"`), when on file.
    pub gender: Option<String>,
    /// Family members attached to the account.
    pub family: Vec<FamilyMember>,
}

/// A family member attached to a user account.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FamilyMember {
    /// Family member id.
    pub id: FamilyId,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Date of birth, when on file.
    pub date_of_birth: Option<DateTime<Utc>>,
    /// Gender marker (`"M"` / `"F"`), when on file.
    pub gender: Option<String>,
}

/// Per-person display and eligibility data derived from a [`Caller`].
#[derive(Clone, Debug)]
pub struct PersonInfo {
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Birthday, when on file.
    pub birthday: Option<DateTime<Utc>>,
    /// Gender marker, when on file.
    pub gender: Option<String>,
}

impl PersonInfo {
    /// Full display name, falling back to `fallback` when both names are
    /// blank.
    #[must_use]
    pub fn display_name(&self, fallback: &str) -> String {
        let name = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let name = name.trim().to_string();
        if name.is_empty() {
            fallback.to_string()
        } else {
            name
        }
    }
}

impl Caller {
    /// Builds the person-info map eligibility validation walks: the account
    /// holder under [`PersonId::User`] plus every family member.
    #[must_use]
    pub fn person_infos(&self) -> HashMap<PersonId, PersonInfo> {
        let mut map = HashMap::new();
        map.insert(
            PersonId::User,
            PersonInfo {
                first_name: self.first_name.clone(),
                last_name: self.last_name.clone(),
                birthday: self.birthday,
                gender: self.gender.clone(),
            },
        );
        for member in &self.family {
            map.insert(
                PersonId::Family(member.id.clone()),
                PersonInfo {
                    first_name: member.first_name.clone(),
                    last_name: member.last_name.clone(),
                    birthday: member.date_of_birth,
                    gender: member.gender.clone(),
                },
            );
        }
        map
    }
}

/// Whole years between `born` and `at`, the age a person has on `at`.
#[must_use]
pub fn age_at(born: DateTime<Utc>, at: DateTime<Utc>) -> i32 {
    let mut years = at.year() - born.year();
    if (at.month(), at.day()) < (born.month(), born.day()) {
        years -= 1;
    }
    years
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn money_parses_and_formats_two_decimals() {
        assert_eq!(Money::parse("16.66").unwrap().cents(), 1666);
        assert_eq!(Money::parse("16.6").unwrap().cents(), 1660);
        assert_eq!(Money::parse("16").unwrap().cents(), 1600);
        assert_eq!(Money::parse("0.05").unwrap().cents(), 5);
        assert!(Money::parse("16.666").is_none());
        assert!(Money::parse("-1").is_none());
        assert!(Money::parse("").is_none());
        assert_eq!(Money::from_cents(1666).to_wire(), "16.66");
        assert_eq!(Money::from_cents(5).to_wire(), "0.05");
    }

    #[test]
    fn mean_truncates_toward_zero() {
        // 10.00 + 20.00 + 20.00 over three registrants = 16.666..., kept at 16.66.
        let total = Money::from_cents(5000);
        assert_eq!(Money::mean_truncated(total, 3).cents(), 1666);
        assert_eq!(Money::mean_truncated(Money::ZERO, 3), Money::ZERO);
        assert_eq!(Money::mean_truncated(total, 0), Money::ZERO);
    }

    #[test]
    fn fee_share_rounds_half_up() {
        // 16.66 of a 49.98 order with a 1.50 fee carries a 0.50 share.
        let line = Money::from_cents(1666);
        let share = line.fee_share(Money::from_cents(150), Money::from_cents(4998));
        assert_eq!(share.cents(), 50);
        assert_eq!(line.fee_share(Money::from_cents(150), Money::ZERO), Money::ZERO);
    }

    #[test]
    fn person_id_round_trips_through_keys() {
        assert_eq!(PersonId::from_key("SELF"), PersonId::User);
        let fam = PersonId::from_key("64fe0");
        assert_eq!(fam, PersonId::Family(FamilyId::new("64fe0")));
        assert_eq!(fam.as_key(), "64fe0");
        let json = serde_json::to_string(&PersonId::User).unwrap();
        assert_eq!(json, "\"SELF\"");
        let back: PersonId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PersonId::User);
    }

    #[test]
    fn age_counts_completed_years_only() {
        let born = Utc.with_ymd_and_hms(2010, 6, 15, 0, 0, 0).unwrap();
        let day_before = Utc.with_ymd_and_hms(2024, 6, 14, 12, 0, 0).unwrap();
        let birthday = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
        assert_eq!(age_at(born, day_before), 13);
        assert_eq!(age_at(born, birthday), 14);
    }
}
