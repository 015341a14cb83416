//! Discount codes and the mean unit-price rule.
//!
//! A code discounts up to `uses_left` registrants in a batch; the rest pay
//! full price. Because the provider order carries a single unit price per
//! line, the charged price is the *mean* across the batch, truncated to two
//! decimals. Operators should be aware that per-line refunds consequently
//! refund the average, not what an individual registrant "really" owed.

use crate::error::{CoreError, CoreResult};
use crate::types::{DiscountCodeId, Money, Uid};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A discount code document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscountCode {
    /// Store-assigned identifier.
    pub id: DiscountCodeId,
    /// The code string users type in.
    pub code: String,
    /// Inactive codes always fail validation.
    pub active: bool,
    /// True when `discount` is a percentage.
    pub is_percent: bool,
    /// Percentage off (0–100) when `is_percent`, otherwise dollars off.
    pub discount: f64,
    /// Per-user use limit; absent means unlimited.
    pub max_uses: Option<u32>,
    /// Historical uses per user id.
    pub usage_history: HashMap<Uid, u32>,
}

impl DiscountCode {
    /// Remaining uses for `uid`: `None` means unlimited.
    #[must_use]
    pub fn uses_left(&self, uid: &Uid) -> Option<u32> {
        self.max_uses.map(|max| {
            let used = self.usage_history.get(uid).copied().unwrap_or(0);
            max.saturating_sub(used)
        })
    }

    /// The discounted price of `base`, clamped at zero.
    #[must_use]
    pub fn discounted_price(&self, base: Money) -> Money {
        if self.is_percent {
            let factor = (1.0 - self.discount / 100.0).max(0.0);
            // Truncate toward zero so the customer gets the fraction.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Money::from_cents(((base.cents() as f64) * factor) as u64)
        } else {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let off = (self.discount.max(0.0) * 100.0) as u64;
            base.saturating_sub(Money::from_cents(off))
        }
    }
}

/// Outcome of a successful discount check.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscountCheck {
    /// The validated code id.
    pub id: DiscountCodeId,
    /// Whether the discount is a percentage.
    pub is_percent: bool,
    /// Percentage or flat cents.
    pub discount: f64,
    /// Remaining uses for the requesting user; `None` means unlimited.
    pub uses_left: Option<u32>,
}

/// Validates a code against an event's discount set for a user.
///
/// # Errors
///
/// [`CoreError::Validation`] when the code is inactive, not attached to the
/// event, or the user has no uses left.
pub fn check_code(
    code: &DiscountCode,
    event_discount_codes: &[DiscountCodeId],
    uid: &Uid,
) -> CoreResult<DiscountCheck> {
    if !code.active {
        return Err(CoreError::Validation(
            "this discount code is not currently active".into(),
        ));
    }
    if !event_discount_codes.contains(&code.id) {
        return Err(CoreError::Validation(format!(
            "discount code {} is not valid for this event",
            code.code
        )));
    }
    let uses_left = code.uses_left(uid);
    if uses_left == Some(0) {
        return Err(CoreError::Validation(
            "you have no uses left for this discount code".into(),
        ));
    }
    Ok(DiscountCheck {
        id: code.id.clone(),
        is_percent: code.is_percent,
        discount: code.discount,
        uses_left,
    })
}

/// Mean unit price for `count` registrants where up to `limit` of them pay
/// the discounted price and the rest pay `base`. Truncated to the cent.
#[must_use]
pub fn discounted_unit_price(
    code: &DiscountCode,
    base: Money,
    count: u32,
    limit: Option<u32>,
) -> Money {
    if count == 0 {
        return Money::ZERO;
    }
    let discounted_count = limit.map_or(count, |l| l.min(count));
    let full_count = count - discounted_count;
    let discounted = code.discounted_price(base);
    let total = Money::total([
        Money::from_cents(discounted.cents().saturating_mul(u64::from(discounted_count))),
        Money::from_cents(base.cents().saturating_mul(u64::from(full_count))),
    ]);
    Money::mean_truncated(total, u64::from(count))
}

/// How many uses a successful commit consumes: one per discounted
/// registrant, bounded by the remaining allowance.
#[must_use]
pub fn uses_consumed(additions: u32, uses_left: Option<u32>) -> u32 {
    uses_left.map_or(additions, |left| left.min(additions))
}
