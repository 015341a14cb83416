//! Registration state machine: validation, the atomic seat/details write,
//! and the change entrypoint.
//!
//! The write itself is a single conditional store update; everything here
//! is the ordered validation in front of it and the orchestration around
//! it (removal refunds with a compensating write, discount usage
//! accounting).

use crate::blueprint::{Gender, PaymentOption};
use crate::core::EventsCore;
use crate::discounts::{self, DiscountCheck};
use crate::error::{CoreError, CoreResult};
use crate::instance::{
    AssembledInstance, ChangeRegistration, PaymentDetails, PaymentKind, RegistrationDetails,
};
use crate::refunds::{DeadlinePolicy, RefundReceipt};
use crate::store::SeatUpdate;
use crate::types::{age_at, Caller, FamilyId, LineId, Money, OrderId, PersonId, PersonInfo};
use std::collections::{HashMap, HashSet};

/// Lineage from the captured ledger: which (order, line) funds each new
/// registrant.
pub type LineageMap = HashMap<PersonId, (OrderId, LineId)>;

/// Fee-adjusted refundable amount per new registrant.
pub type RefundableMap = HashMap<PersonId, Money>;

/// Result of a committed registration change.
#[derive(Clone, Debug)]
pub struct RegistrationOutcome {
    /// Seat counter after the write.
    pub seats_filled: u32,
    /// The caller's registration entry after the write; `None` when it was
    /// removed entirely.
    pub details: Option<RegistrationDetails>,
    /// Refunds issued for removals, in processing order.
    pub refunded: Vec<RefundReceipt>,
}

/// What the entrypoint did with a change request.
#[derive(Clone, Debug)]
pub enum RegistrationEntry {
    /// The change was applied directly (free/door, or removals only).
    Applied(RegistrationOutcome),
    /// A provider order was created; the payer must visit the approval URL
    /// and the change applies at capture.
    ApprovalRequired {
        /// Provider order id, also the ledger key.
        order_id: OrderId,
        /// Where to send the payer.
        approve_url: String,
    },
}

/// A validated change, ready to apply.
#[derive(Clone, Debug)]
pub(crate) struct ValidatedChange {
    /// People being added, deduplicated, `SELF` included.
    pub additions: Vec<PersonId>,
    /// People being removed, deduplicated.
    pub removals: Vec<PersonId>,
    /// Net seat change.
    pub seat_delta: i64,
    /// Effective unit price for the additions (member and discount rules
    /// applied).
    pub unit_price: Money,
    /// Final self-registration state.
    pub self_registered: bool,
    /// Final family roster.
    pub family_registered: Vec<FamilyId>,
    /// Display/eligibility info per person.
    pub person_infos: HashMap<PersonId, PersonInfo>,
    /// Validated discount, when one was applied to additions.
    pub discount: Option<DiscountCheck>,
}

fn dedup_preserving_order(ids: &[FamilyId]) -> Vec<FamilyId> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect()
}

const fn payment_option_for(kind: PaymentKind) -> Option<PaymentOption> {
    match kind {
        PaymentKind::PayPal => Some(PaymentOption::PayPal),
        PaymentKind::Door => Some(PaymentOption::Door),
        PaymentKind::Free => None,
    }
}

fn eligible(info: &PersonInfo, instance: &AssembledInstance) -> bool {
    let def = &instance.definition;
    match (def.gender, info.gender.as_deref()) {
        (Gender::Male, Some(g)) if !g.eq_ignore_ascii_case("m") => return false,
        (Gender::Female, Some(g)) if !g.eq_ignore_ascii_case("f") => return false,
        _ => {}
    }
    if def.min_age.is_none() && def.max_age.is_none() {
        return true;
    }
    let Some(birthday) = info.birthday else {
        return false;
    };
    let age = age_at(birthday, instance.date());
    if let Some(min) = def.min_age {
        if age < min {
            return false;
        }
    }
    if let Some(max) = def.max_age {
        if age > max {
            return false;
        }
    }
    true
}

impl EventsCore {
    /// Runs the ordered validation for a change request against the
    /// effective instance, producing the data the write needs.
    pub(crate) async fn validate_change(
        &self,
        caller: &Caller,
        change: &ChangeRegistration,
        instance: &AssembledInstance,
    ) -> CoreResult<ValidatedChange> {
        let now = self.now();
        let def = &instance.definition;

        let mut additions: Vec<PersonId> = dedup_preserving_order(&change.family_members_registering)
            .into_iter()
            .map(PersonId::Family)
            .collect();
        let mut removals: Vec<PersonId> = dedup_preserving_order(&change.family_members_unregistering)
            .into_iter()
            .map(PersonId::Family)
            .collect();

        let old = instance.registration_for(&caller.uid);

        match change.self_registered {
            Some(true) => {
                if old.is_some_and(|d| d.self_registered) {
                    return Err(CoreError::Conflict(
                        "you are already registered for this event".into(),
                    ));
                }
                additions.push(PersonId::User);
            }
            Some(false) => {
                if !old.is_some_and(|d| d.self_registered) {
                    return Err(CoreError::Conflict(
                        "you cannot unregister from an event you are not registered for".into(),
                    ));
                }
                removals.push(PersonId::User);
            }
            None => {}
        }

        if let Some(old) = old {
            for person in &additions {
                if let PersonId::Family(fid) = person {
                    if old.family_registered.contains(fid) {
                        return Err(CoreError::Conflict(format!(
                            "family member {fid} is already registered"
                        )));
                    }
                }
            }
        } else if !removals.is_empty() {
            return Err(CoreError::Conflict(
                "you have no registrations on this event to remove".into(),
            ));
        }

        if let Some(old) = old {
            for person in &removals {
                if let PersonId::Family(fid) = person {
                    if !old.family_registered.contains(fid) {
                        return Err(CoreError::Conflict(format!(
                            "family member {fid} is not registered and cannot be unregistered"
                        )));
                    }
                }
            }
        }

        if additions.is_empty() && removals.is_empty() {
            return Err(CoreError::Validation(
                "no actual change in the registration request".into(),
            ));
        }

        if now >= instance.date() {
            return Err(CoreError::Closed(
                "this event has already taken place".into(),
            ));
        }

        if !additions.is_empty() {
            if !def.registration_allowed {
                return Err(CoreError::Closed(
                    "registration is not allowed for this event".into(),
                ));
            }
            if let Some(opens) = def.registration_opens {
                if opens > now {
                    return Err(CoreError::Closed(
                        "registration has not opened yet".into(),
                    ));
                }
            }
            if let Some(deadline) = def.registration_deadline {
                if now >= deadline {
                    return Err(CoreError::Closed(
                        "the registration deadline has passed".into(),
                    ));
                }
            }
            if let Some(required) = payment_option_for(change.payment_type) {
                if !def.payment_options.is_empty() && !def.accepts(required) {
                    return Err(CoreError::Validation(format!(
                        "payment type '{required}' is not available for this event"
                    )));
                }
            }
        }

        if !additions.is_empty() && def.members_only && !caller.membership {
            return Err(CoreError::Validation(
                "this event is for members only".into(),
            ));
        }

        let mut unit_price = match (def.member_price, caller.membership) {
            (Some(member_price), true) => member_price,
            _ => def.price,
        };

        let mut discount = None;
        if let Some(code_id) = &change.discount_code_id {
            if !additions.is_empty() {
                let code = self
                    .discounts
                    .get(code_id)
                    .await?
                    .ok_or_else(|| {
                        CoreError::Validation(format!("discount code {code_id} is not valid"))
                    })?;
                let check = discounts::check_code(&code, &def.discount_codes, &caller.uid)?;
                let count = u32::try_from(additions.len()).unwrap_or(u32::MAX);
                let discounted =
                    discounts::discounted_unit_price(&code, unit_price, count, check.uses_left);
                unit_price = unit_price.min(discounted);
                discount = Some(check);
            }
        }

        if !unit_price.is_zero()
            && !additions.is_empty()
            && change.payment_type == PaymentKind::Free
        {
            return Err(CoreError::Validation(
                "this event is not free, so the free payment type cannot apply".into(),
            ));
        }

        let seat_delta = additions.len() as i64 - removals.len() as i64;
        if let Some(max_spots) = instance.max_spots() {
            if seat_delta > 0 && i64::from(instance.seats_filled) + seat_delta > i64::from(max_spots)
            {
                return Err(CoreError::CapacityExceeded);
            }
        }

        let person_infos = caller.person_infos();
        let mut ineligible = Vec::new();
        for person in &additions {
            let info = person_infos.get(person).ok_or_else(|| {
                CoreError::Validation(format!("unknown registrant {person} on this account"))
            })?;
            if !eligible(info, instance) {
                ineligible.push(info.display_name(person.as_key()));
            }
        }
        if !ineligible.is_empty() {
            return Err(CoreError::Validation(format!(
                "the following registrants are not eligible for this event: {}",
                ineligible.join(" & ")
            )));
        }

        let mut self_registered = old.is_some_and(|d| d.self_registered);
        if additions.contains(&PersonId::User) {
            self_registered = true;
        }
        if removals.contains(&PersonId::User) {
            self_registered = false;
        }

        let mut family_registered: Vec<FamilyId> =
            old.map(|d| d.family_registered.clone()).unwrap_or_default();
        for person in &additions {
            if let PersonId::Family(fid) = person {
                family_registered.push(fid.clone());
            }
        }
        for person in &removals {
            if let PersonId::Family(fid) = person {
                family_registered.retain(|f| f != fid);
            }
        }
        let family_registered = dedup_preserving_order(&family_registered);

        Ok(ValidatedChange {
            additions,
            removals,
            seat_delta,
            unit_price,
            self_registered,
            family_registered,
            person_infos,
            discount,
        })
    }

    /// Applies a validated change: build the new details, perform the
    /// atomic write, then process removal refunds with a compensating
    /// write on failure.
    pub(crate) async fn process_change(
        &self,
        caller: &Caller,
        change: &ChangeRegistration,
        lineage: Option<&LineageMap>,
        refundable: Option<&RefundableMap>,
    ) -> CoreResult<RegistrationOutcome> {
        let instance = self
            .assembled_instance(&change.event_instance_id, None)
            .await?;
        let validated = self.validate_change(caller, change, &instance).await?;
        let old = instance.registration_for(&caller.uid).cloned();

        let details = build_new_details(change, &validated, old.as_ref(), lineage, refundable);

        let update = self
            .instances
            .apply_registration_update(
                &instance.id,
                &caller.uid,
                details,
                validated.seat_delta,
                instance.max_spots(),
            )
            .await?;
        let write = match update {
            SeatUpdate::Applied(write) => write,
            SeatUpdate::Rejected(rejection) => return Err(rejection.into_error(&instance.id)),
        };
        tracing::info!(
            instance_id = %instance.id,
            uid = %caller.uid,
            seat_delta = validated.seat_delta,
            seats_filled = write.seats_filled,
            "registration updated"
        );

        let mut refunded = Vec::new();
        if !validated.removals.is_empty() {
            match self
                .refund_removals(
                    caller,
                    &instance,
                    old.as_ref(),
                    &validated.removals,
                    DeadlinePolicy::Enforce,
                )
                .await
            {
                Ok(receipts) => refunded = receipts,
                Err(refund_err) => {
                    // Compensate the registration write. The ledger is never
                    // undone; only the seat/details state is restored.
                    let mut rollback_failed = true;
                    if let Some(old) = old {
                        let rollback = self
                            .instances
                            .apply_registration_update(
                                &instance.id,
                                &caller.uid,
                                old,
                                -validated.seat_delta,
                                instance.max_spots(),
                            )
                            .await;
                        if matches!(rollback, Ok(SeatUpdate::Applied(_))) {
                            rollback_failed = false;
                        }
                    }
                    if rollback_failed {
                        tracing::error!(
                            instance_id = %instance.id,
                            uid = %caller.uid,
                            "compensating registration write failed; seats need operator attention"
                        );
                    }
                    return Err(CoreError::RefundFailed {
                        rollback_failed,
                        source: Box::new(refund_err),
                    });
                }
            }
        }

        if let Some(check) = &validated.discount {
            if !validated.additions.is_empty() {
                let additions = u32::try_from(validated.additions.len()).unwrap_or(u32::MAX);
                let consumed = discounts::uses_consumed(additions, check.uses_left);
                if consumed > 0 {
                    let _ = self
                        .discounts
                        .increment_usage(&check.id, &caller.uid, consumed)
                        .await;
                }
            }
        }

        Ok(RegistrationOutcome {
            seats_filled: write.seats_filled,
            details: write.details,
            refunded,
        })
    }

    /// Single registration entrypoint: dispatches on payment type and
    /// change shape.
    ///
    /// # Errors
    ///
    /// Validation, conflict, window, capacity, provider and refund errors
    /// per the change; a pure no-op request is rejected outright.
    pub async fn change_registration(
        &self,
        caller: &Caller,
        change: ChangeRegistration,
    ) -> CoreResult<RegistrationEntry> {
        let has_additions = change.self_registered == Some(true)
            || !change.family_members_registering.is_empty();
        let has_removals = change.self_registered == Some(false)
            || !change.family_members_unregistering.is_empty();
        if !has_additions && !has_removals {
            return Err(CoreError::Validation(
                "no actual change in the registration request".into(),
            ));
        }

        match change.payment_type {
            PaymentKind::PayPal if has_additions => {
                let (order_id, approve_url) = self.create_paid_registration(caller, &change).await?;
                Ok(RegistrationEntry::ApprovalRequired { order_id, approve_url })
            }
            _ => {
                let outcome = self.process_change(caller, &change, None, None).await?;
                Ok(RegistrationEntry::Applied(outcome))
            }
        }
    }
}

/// Builds the new [`RegistrationDetails`] from the old entry plus the
/// validated change, stamping fresh payment details (with capture lineage
/// and fee-adjusted refundable amounts when supplied) onto new additions
/// and carrying existing details over untouched.
pub(crate) fn build_new_details(
    change: &ChangeRegistration,
    validated: &ValidatedChange,
    old: Option<&RegistrationDetails>,
    lineage: Option<&LineageMap>,
    refundable: Option<&RefundableMap>,
) -> RegistrationDetails {
    let new_payment = |person: &PersonId| {
        PaymentDetails::for_new_registrant(
            change.payment_type,
            validated.unit_price,
            change.discount_code_id.clone(),
            lineage.and_then(|m| m.get(person).cloned()),
            refundable.and_then(|m| m.get(person).copied()),
        )
    };

    let self_payment_details = if validated.self_registered {
        if old.is_some_and(|d| d.self_registered) {
            old.and_then(|d| d.self_payment_details.clone())
        } else {
            Some(new_payment(&PersonId::User))
        }
    } else {
        None
    };

    let mut family_payment_details = HashMap::new();
    for fid in &validated.family_registered {
        let person = PersonId::Family(fid.clone());
        let payment = if validated.additions.contains(&person) {
            new_payment(&person)
        } else if let Some(existing) = old.and_then(|d| d.family_payment_details.get(fid)) {
            existing.clone()
        } else {
            new_payment(&person)
        };
        family_payment_details.insert(fid.clone(), payment);
    }

    RegistrationDetails {
        self_registered: validated.self_registered,
        family_registered: validated.family_registered.clone(),
        self_payment_details,
        family_payment_details,
    }
}
