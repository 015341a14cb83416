//! Administrator operations: blueprint lifecycle, per-instance overrides,
//! forced registration changes, bulk cleanup sweeps and blueprint deletion
//! with its refund-and-snapshot pipeline.
//!
//! Role enforcement lives in the HTTP/auth layer; these entry points take
//! the acting admin's uid for audit stamping only.

use crate::blueprint::{validate_definition, EventBlueprint, EventDefinition};
use crate::core::EventsCore;
use crate::discounts::{self, DiscountCheck};
use crate::error::{CoreError, CoreResult};
use crate::instance::{PaymentDetails, PaymentKind, RegistrationDetails};
use crate::overrides::{effective_definition, package_overrides, InstanceOverrides, OverridesTracker};
use crate::projection;
use crate::refunds::{DeadlinePolicy, RefundBound, RefundReceipt};
use crate::snapshot::DeletedEventSnapshot;
use crate::store::SeatUpdate;
use crate::types::{Caller, DiscountCodeId, EventId, FamilyId, InstanceId, Money, PersonId, Uid};
use serde::{Deserialize, Serialize};

/// Admin force register/unregister request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminForceChange {
    /// Target instance; must be upcoming.
    pub event_instance_id: InstanceId,
    /// The account that owns (or will own) the registration entry.
    pub user_id: Uid,
    /// `SELF` or a family member id.
    pub registrant: PersonId,
    /// Force-register only: `None`/zero stamps a free line, anything else
    /// a door line to collect later.
    pub price: Option<Money>,
}

/// Outcome of a force register/unregister.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForceChangeOutcome {
    /// Seat counter after the operation.
    pub seats_filled: u32,
    /// False when the operation was a no-op (already in the requested
    /// state).
    pub changed: bool,
    /// Refund issued by a forced unregister, when any.
    pub refund: Option<RefundReceipt>,
}

/// Result of deleting a blueprint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeletionOutcome {
    /// Where the pre-delete snapshot was written.
    pub snapshot_location: String,
    /// Refunds issued across upcoming instances.
    pub refunded: Vec<RefundReceipt>,
    /// How many instances were deleted.
    pub instances_deleted: u64,
}

/// Stats from an across-upcoming cleanup sweep.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct CleanupStats {
    /// Instances that carried a matching registration.
    pub instances_processed: u32,
    /// Registrants removed.
    pub removed: u32,
    /// Refunds issued.
    pub refunds_issued: u32,
    /// Instances where a step failed (logged, sweep continued).
    pub failures: u32,
}

impl EventsCore {
    // ------------------------------------------------------------------
    // Blueprint lifecycle
    // ------------------------------------------------------------------

    /// Validates and creates a blueprint, then publishes its instance
    /// window.
    ///
    /// # Errors
    ///
    /// [`CoreError::Validation`] on invariant violations; store errors.
    pub async fn create_blueprint(&self, definition: EventDefinition) -> CoreResult<EventBlueprint> {
        let now = self.now();
        validate_definition(&definition, true, now)?;
        let blueprint = self.blueprints.insert(definition, now).await?;
        {
            let _guard = self.publish_lock.lock().await;
            projection::publish_window(self.instances.as_ref(), &blueprint, now).await?;
        }
        tracing::info!(event_id = %blueprint.id, "blueprint created and published");
        Ok(blueprint)
    }

    /// Validates and applies a blueprint edit, recalculates projected
    /// dates (re-anchoring so past instances stay untouched) and tops the
    /// publish window up.
    ///
    /// The future-date check only applies when the origin date actually
    /// changes, so long-running recurring events remain editable.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] for unknown blueprints,
    /// [`CoreError::Validation`] on invariant violations.
    pub async fn edit_blueprint(
        &self,
        event_id: &EventId,
        definition: EventDefinition,
    ) -> CoreResult<EventBlueprint> {
        let now = self.now();
        let old = self
            .blueprints
            .get(event_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("event {event_id}")))?;

        let date_changed = definition.date != old.definition.date;
        validate_definition(&definition, date_changed, now)?;

        let mut blueprint = EventBlueprint {
            id: old.id,
            definition,
            updated_on: now,
            anchor_index: old.anchor_index,
        };
        if !self.blueprints.replace(&blueprint).await? {
            return Err(CoreError::NotFound(format!("event {event_id}")));
        }

        {
            let _guard = self.publish_lock.lock().await;
            projection::recalculate_dates(
                self.blueprints.as_ref(),
                self.instances.as_ref(),
                &mut blueprint,
                now,
            )
            .await?;
            projection::publish_window(self.instances.as_ref(), &blueprint, now).await?;
        }
        Ok(blueprint)
    }

    /// Publishes the instance window for one blueprint (no-op when it is
    /// not currently publishing).
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] for unknown blueprints; store errors.
    pub async fn publish_blueprint(&self, event_id: &EventId) -> CoreResult<u32> {
        let blueprint = self
            .blueprints
            .get(event_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("event {event_id}")))?;
        if !blueprint.definition.currently_publishing {
            return Ok(0);
        }
        let _guard = self.publish_lock.lock().await;
        let outcome =
            projection::publish_window(self.instances.as_ref(), &blueprint, self.now()).await?;
        Ok(outcome.inserted)
    }

    /// Publishes the instance window for every currently-publishing
    /// blueprint. Returns the number of inserted instances.
    ///
    /// # Errors
    ///
    /// Store errors; individual publish failures abort the pass.
    pub async fn publish_all(&self) -> CoreResult<u32> {
        let now = self.now();
        let blueprints = self.blueprints.publishing().await?;
        let _guard = self.publish_lock.lock().await;
        let mut inserted = 0;
        for blueprint in blueprints {
            inserted += projection::publish_window(self.instances.as_ref(), &blueprint, now)
                .await?
                .inserted;
        }
        Ok(inserted)
    }

    // ------------------------------------------------------------------
    // Instance overrides
    // ------------------------------------------------------------------

    /// Packages, validates and persists per-instance overrides.
    ///
    /// When the payload carries a date, the instance's `scheduled_date`
    /// follows it and the DST-intent timestamp is stamped with the current
    /// moment; otherwise the schedule resets to `target_date` and the
    /// timestamp mirrors the blueprint's `updated_on`.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] for unknown blueprint/instance,
    /// [`CoreError::Validation`] when the effective event would break an
    /// invariant.
    pub async fn apply_instance_overrides(
        &self,
        event_id: &EventId,
        series_index: u32,
        input: &InstanceOverrides,
    ) -> CoreResult<(InstanceOverrides, OverridesTracker)> {
        let now = self.now();
        let blueprint = self
            .blueprints
            .get(event_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("event {event_id}")))?;
        let instance = self
            .instances
            .by_series(event_id, series_index)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("instance {series_index} of event {event_id}"))
            })?;

        let (expanded, tracker) = package_overrides(input, &blueprint.definition)?;

        let date_in_input = !input.date.is_absent();
        let scheduled_date = if date_in_input {
            expanded
                .date
                .to_option()
                .ok_or_else(|| CoreError::Validation("date override cannot be null".into()))?
        } else {
            instance.target_date
        };
        let overrides_date_updated_on = if date_in_input { now } else { blueprint.updated_on };

        let effective = effective_definition(&blueprint, &expanded, &tracker, scheduled_date);
        validate_definition(&effective, date_in_input, now)?;

        if !self
            .instances
            .set_overrides(
                &instance.id,
                expanded.clone(),
                tracker,
                scheduled_date,
                overrides_date_updated_on,
            )
            .await?
        {
            return Err(CoreError::NotFound(format!("event instance {}", instance.id)));
        }
        tracing::info!(
            event_id = %event_id,
            series_index,
            instance_id = %instance.id,
            "instance overrides updated"
        );
        Ok((expanded, tracker))
    }

    // ------------------------------------------------------------------
    // Forced registration changes
    // ------------------------------------------------------------------

    /// Force-registers one registrant, bypassing capacity, windows and
    /// eligibility. Idempotent on already-registered.
    ///
    /// # Errors
    ///
    /// [`CoreError::Closed`] when the instance is not upcoming; store
    /// errors.
    pub async fn admin_force_register(
        &self,
        body: AdminForceChange,
    ) -> CoreResult<ForceChangeOutcome> {
        let instance = self
            .assembled_instance(&body.event_instance_id, None)
            .await?;
        if self.now() >= instance.date() {
            return Err(CoreError::Closed(
                "only upcoming instances can be force-modified".into(),
            ));
        }

        let existing = instance.registration_for(&body.user_id);
        if existing.is_some_and(|d| d.registered(&body.registrant)) {
            return Ok(ForceChangeOutcome {
                seats_filled: instance.seats_filled,
                changed: false,
                refund: None,
            });
        }

        let mut details = existing.cloned().unwrap_or_default();
        let payment = PaymentDetails::forced(body.price.unwrap_or(Money::ZERO));
        match &body.registrant {
            PersonId::User => {
                details.self_registered = true;
                details.self_payment_details = Some(payment);
            }
            PersonId::Family(fid) => {
                if !details.family_registered.contains(fid) {
                    details.family_registered.push(fid.clone());
                }
                details.family_payment_details.insert(fid.clone(), payment);
            }
        }

        // Capacity bypass: no limit on the conditional write.
        let update = self
            .instances
            .apply_registration_update(&instance.id, &body.user_id, details, 1, None)
            .await?;
        match update {
            SeatUpdate::Applied(write) => {
                tracing::info!(
                    instance_id = %instance.id,
                    user_id = %body.user_id,
                    registrant = %body.registrant,
                    "admin force-registered"
                );
                Ok(ForceChangeOutcome {
                    seats_filled: write.seats_filled,
                    changed: true,
                    refund: None,
                })
            }
            SeatUpdate::Rejected(rejection) => Err(rejection.into_error(&instance.id)),
        }
    }

    /// Force-unregisters one registrant, refunding a completed paypal line
    /// by its full remaining price (the deadline is ignored; the fee is
    /// absorbed). Refund failures are logged and do not block the removal.
    ///
    /// # Errors
    ///
    /// [`CoreError::Closed`] when the instance is not upcoming; store
    /// errors.
    pub async fn admin_force_unregister(
        &self,
        admin_uid: &Uid,
        body: AdminForceChange,
    ) -> CoreResult<ForceChangeOutcome> {
        let instance = self
            .assembled_instance(&body.event_instance_id, None)
            .await?;
        if self.now() >= instance.date() {
            return Err(CoreError::Closed(
                "only upcoming instances can be force-modified".into(),
            ));
        }

        let Some(existing) = instance.registration_for(&body.user_id) else {
            return Ok(ForceChangeOutcome {
                seats_filled: instance.seats_filled,
                changed: false,
                refund: None,
            });
        };
        if !existing.registered(&body.registrant) {
            return Ok(ForceChangeOutcome {
                seats_filled: instance.seats_filled,
                changed: false,
                refund: None,
            });
        }

        let mut refund = None;
        if let Some(pd) = existing.payment_for(&body.registrant) {
            if pd.payment_type == PaymentKind::PayPal && pd.payment_complete {
                match self
                    .refund_payment_line(
                        admin_uid,
                        &instance.id,
                        &body.registrant,
                        pd,
                        RefundBound::FullPrice,
                        "admin_forced_unregistration",
                        "admin",
                    )
                    .await
                {
                    Ok(receipt) => refund = receipt,
                    Err(err) => {
                        tracing::error!(
                            instance_id = %instance.id,
                            registrant = %body.registrant,
                            error = %err,
                            "refund failed during forced unregister; removal proceeds"
                        );
                    }
                }
            }
        }

        let mut details = existing.clone();
        match &body.registrant {
            PersonId::User => {
                details.self_registered = false;
                details.self_payment_details = None;
            }
            PersonId::Family(fid) => {
                details.family_registered.retain(|f| f != fid);
                details.family_payment_details.remove(fid);
            }
        }

        let update = self
            .instances
            .apply_registration_update(&instance.id, &body.user_id, details, -1, None)
            .await?;
        match update {
            SeatUpdate::Applied(write) => Ok(ForceChangeOutcome {
                seats_filled: write.seats_filled,
                changed: true,
                refund,
            }),
            SeatUpdate::Rejected(rejection) => Err(rejection.into_error(&instance.id)),
        }
    }

    // ------------------------------------------------------------------
    // Across-upcoming cleanup sweeps
    // ------------------------------------------------------------------

    /// Removes a family member from every upcoming instance the caller
    /// registered them on, refunding eligible paypal lines. Past-deadline
    /// lines without the eligibility override are skipped, not refunded.
    ///
    /// # Errors
    ///
    /// Store errors while listing; per-instance failures are counted and
    /// the sweep continues.
    pub async fn unregister_family_member_across_upcoming(
        &self,
        caller: &Caller,
        family_id: &FamilyId,
    ) -> CoreResult<CleanupStats> {
        let mut stats = CleanupStats::default();
        let upcoming = self
            .instances
            .upcoming_with_registration(&caller.uid, self.now())
            .await?;

        for instance in upcoming {
            let Some(entry) = instance.registration_details.get(&caller.uid) else {
                continue;
            };
            if !entry.family_registered.contains(family_id) {
                continue;
            }
            stats.instances_processed += 1;

            let person = PersonId::Family(family_id.clone());
            match self
                .cleanup_remove(caller, &instance.id, entry.clone(), &[person])
                .await
            {
                Ok(refunds) => {
                    stats.removed += 1;
                    stats.refunds_issued += refunds;
                }
                Err(err) => {
                    stats.failures += 1;
                    tracing::error!(
                        instance_id = %instance.id,
                        family_id = %family_id,
                        error = %err,
                        "cleanup removal failed; continuing sweep"
                    );
                }
            }
        }
        Ok(stats)
    }

    /// Removes the caller (and, when `include_family`, their whole
    /// household) from every upcoming instance they are registered on,
    /// refunding eligible paypal lines.
    ///
    /// # Errors
    ///
    /// Store errors while listing; per-instance failures are counted and
    /// the sweep continues.
    pub async fn unregister_user_across_upcoming(
        &self,
        caller: &Caller,
        include_family: bool,
    ) -> CoreResult<CleanupStats> {
        let mut stats = CleanupStats::default();
        let upcoming = self
            .instances
            .upcoming_with_registration(&caller.uid, self.now())
            .await?;

        for instance in upcoming {
            let Some(entry) = instance.registration_details.get(&caller.uid) else {
                continue;
            };

            let mut persons = Vec::new();
            if entry.self_registered {
                persons.push(PersonId::User);
            }
            if include_family {
                persons.extend(entry.family_registered.iter().cloned().map(PersonId::Family));
            }
            if persons.is_empty() {
                continue;
            }
            stats.instances_processed += 1;

            match self
                .cleanup_remove(caller, &instance.id, entry.clone(), &persons)
                .await
            {
                Ok(refunds) => {
                    stats.removed += u32::try_from(persons.len()).unwrap_or(u32::MAX);
                    stats.refunds_issued += refunds;
                }
                Err(err) => {
                    stats.failures += 1;
                    tracing::error!(
                        instance_id = %instance.id,
                        uid = %caller.uid,
                        error = %err,
                        "cleanup removal failed; continuing sweep"
                    );
                }
            }
        }
        Ok(stats)
    }

    /// Refunds (deadline-skipping) and removes `persons` from one
    /// instance, bypassing capacity. Returns the number of refunds issued.
    async fn cleanup_remove(
        &self,
        caller: &Caller,
        instance_id: &InstanceId,
        entry: RegistrationDetails,
        persons: &[PersonId],
    ) -> CoreResult<u32> {
        let assembled = self.assembled_instance(instance_id, None).await?;
        let refunds = self
            .refund_removals(caller, &assembled, Some(&entry), persons, DeadlinePolicy::Skip)
            .await?;

        let mut details = entry;
        for person in persons {
            match person {
                PersonId::User => {
                    details.self_registered = false;
                    details.self_payment_details = None;
                }
                PersonId::Family(fid) => {
                    details.family_registered.retain(|f| f != fid);
                    details.family_payment_details.remove(fid);
                }
            }
        }
        let delta = -(persons.len() as i64);
        let update = self
            .instances
            .apply_registration_update(instance_id, &caller.uid, details, delta, None)
            .await?;
        match update {
            SeatUpdate::Applied(_) => Ok(u32::try_from(refunds.len()).unwrap_or(u32::MAX)),
            SeatUpdate::Rejected(rejection) => Err(rejection.into_error(instance_id)),
        }
    }

    // ------------------------------------------------------------------
    // Blueprint deletion
    // ------------------------------------------------------------------

    /// Deletes a blueprint: refunds every paypal-complete line on upcoming
    /// instances (no deadline enforcement), writes the pre-delete snapshot
    /// (aborting the deletion if it fails), then deletes all instances and
    /// the blueprint itself.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] for unknown blueprints,
    /// [`CoreError::Snapshot`] when the snapshot write fails (nothing was
    /// deleted); store errors.
    pub async fn delete_blueprint(
        &self,
        admin_uid: &Uid,
        event_id: &EventId,
    ) -> CoreResult<DeletionOutcome> {
        let now = self.now();
        let blueprint = self
            .blueprints
            .get(event_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("event {event_id}")))?;

        let mut refunded = Vec::new();
        let upcoming = self.instances.upcoming_by_blueprint(event_id, now).await?;
        for instance in &upcoming {
            for (uid, entry) in &instance.registration_details {
                let mut candidates: Vec<(PersonId, &PaymentDetails)> = Vec::new();
                if entry.self_registered {
                    if let Some(pd) = &entry.self_payment_details {
                        candidates.push((PersonId::User, pd));
                    }
                }
                for fid in &entry.family_registered {
                    if let Some(pd) = entry.family_payment_details.get(fid) {
                        candidates.push((PersonId::Family(fid.clone()), pd));
                    }
                }

                for (person, pd) in candidates {
                    if pd.payment_type != PaymentKind::PayPal || !pd.payment_complete {
                        continue;
                    }
                    match self
                        .refund_payment_line(
                            admin_uid,
                            &instance.id,
                            &person,
                            pd,
                            RefundBound::FullPrice,
                            "event_deleted",
                            "system",
                        )
                        .await
                    {
                        Ok(Some(receipt)) => refunded.push(receipt),
                        Ok(None) => {}
                        Err(err) => {
                            tracing::error!(
                                instance_id = %instance.id,
                                uid = %uid,
                                person = %person,
                                error = %err,
                                "refund failed during event deletion; continuing"
                            );
                        }
                    }
                }
            }
        }

        let all_instances = self.instances.by_blueprint(event_id).await?;
        let snapshot = DeletedEventSnapshot {
            snapshot_time: now,
            event_id: event_id.clone(),
            event: serde_json::to_value(&blueprint).map_err(|e| CoreError::Snapshot(e.to_string()))?,
            instances: all_instances
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()
                .map_err(|e| CoreError::Snapshot(e.to_string()))?,
        };
        let snapshot_location = self.snapshots.write(&snapshot).await?;

        let instances_deleted = self.instances.delete_by_blueprint(event_id).await?;
        self.blueprints.delete(event_id).await?;
        tracing::info!(
            event_id = %event_id,
            instances_deleted,
            refunds = refunded.len(),
            "blueprint deleted with snapshot"
        );
        Ok(DeletionOutcome {
            snapshot_location,
            refunded,
            instances_deleted,
        })
    }

    // ------------------------------------------------------------------
    // Discount code administration
    // ------------------------------------------------------------------

    /// Replaces a blueprint's discount code set. Every id must exist.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] for unknown blueprints,
    /// [`CoreError::Validation`] for unknown code ids.
    pub async fn set_event_discount_codes(
        &self,
        event_id: &EventId,
        codes: Vec<DiscountCodeId>,
    ) -> CoreResult<()> {
        let mut blueprint = self
            .blueprints
            .get(event_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("event {event_id}")))?;
        for code_id in &codes {
            if self.discounts.get(code_id).await?.is_none() {
                return Err(CoreError::Validation(format!(
                    "discount code {code_id} does not exist"
                )));
            }
        }
        blueprint.definition.discount_codes = codes;
        self.blueprints.replace(&blueprint).await?;
        Ok(())
    }

    /// Deletes a discount code, detaching it from every blueprint first.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn delete_discount_code(&self, code_id: &DiscountCodeId) -> CoreResult<bool> {
        for mut blueprint in self.blueprints.with_discount_code(code_id).await? {
            blueprint.definition.discount_codes.retain(|c| c != code_id);
            self.blueprints.replace(&blueprint).await?;
        }
        self.discounts.delete(code_id).await
    }

    /// Validates a user-typed discount code against an event, for the UI's
    /// pre-checkout check.
    ///
    /// # Errors
    ///
    /// [`CoreError::Validation`] when the code is unknown, inactive,
    /// detached or exhausted; [`CoreError::NotFound`] for unknown events.
    pub async fn check_discount_code(
        &self,
        uid: &Uid,
        event_id: &EventId,
        code: &str,
    ) -> CoreResult<DiscountCheck> {
        let code_doc = self
            .discounts
            .get_by_code(code)
            .await?
            .ok_or_else(|| {
                CoreError::Validation(format!("discount code {code} is not valid"))
            })?;
        let blueprint = self
            .blueprints
            .get(event_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("event {event_id}")))?;
        discounts::check_code(&code_doc, &blueprint.definition.discount_codes, uid)
    }
}
