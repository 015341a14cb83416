//! Instance projection: recurrence date arithmetic, the rolling publish
//! window, and recalculation after blueprint edits.
//!
//! All date math is anchored: `delta = series_index − anchor_index`, so the
//! anchor can move when an admin changes the origin date without
//! perturbing instances that already happened. Month and year steps clamp
//! to the last valid day (Jan 31 → Feb 28/29; Feb 29 → Feb 28 off leap
//! years) while preserving the origin's time of day.
//!
//! The publish loop and recalculation both run with the process-wide
//! publish mutex held (see `EventsCore`); the mutex exists so concurrent
//! publishes cannot double-insert a `series_index`.

use crate::blueprint::{EventBlueprint, Recurrence};
use crate::error::{CoreError, CoreResult};
use crate::overrides::OverrideGroup;
use crate::store::{BlueprintStore, InstanceStore, NewInstance};
use chrono::{DateTime, Duration, Months, Utc};

/// Computes the occurrence date for `series_index` given an origin date
/// anchored at `anchor_index`.
///
/// # Errors
///
/// [`CoreError::Validation`] when the arithmetic leaves chrono's
/// representable range (a blueprint would need an absurd date to get
/// there).
pub fn occurrence_date(
    origin: DateTime<Utc>,
    recurrence: Recurrence,
    series_index: u32,
    anchor_index: u32,
) -> CoreResult<DateTime<Utc>> {
    let delta = i64::from(series_index) - i64::from(anchor_index);
    if delta == 0 || recurrence == Recurrence::Never {
        return Ok(origin);
    }

    let out_of_range =
        || CoreError::Validation("recurrence arithmetic left the representable date range".into());

    match recurrence {
        Recurrence::Never => Ok(origin),
        Recurrence::Daily => origin
            .checked_add_signed(Duration::days(delta))
            .ok_or_else(out_of_range),
        Recurrence::Weekly => origin
            .checked_add_signed(Duration::days(7 * delta))
            .ok_or_else(out_of_range),
        Recurrence::Monthly => add_months(origin, delta).ok_or_else(out_of_range),
        Recurrence::Yearly => add_months(origin, delta.checked_mul(12).unwrap_or(i64::MAX))
            .ok_or_else(out_of_range),
    }
}

/// Month stepping with end-of-month clamping, both directions.
fn add_months(date: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let magnitude = u32::try_from(months.unsigned_abs()).ok()?;
    if months >= 0 {
        date.checked_add_months(Months::new(magnitude))
    } else {
        date.checked_sub_months(Months::new(magnitude))
    }
}

/// Outcome of a publish pass for one blueprint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// How many instances were inserted.
    pub inserted: u32,
}

/// Tops the blueprint's rolling window of future instances up to
/// `max_published`. Caller must hold the publish mutex.
pub(crate) async fn publish_window(
    instances: &dyn InstanceStore,
    blueprint: &EventBlueprint,
    now: DateTime<Utc>,
) -> CoreResult<PublishOutcome> {
    let def = &blueprint.definition;

    // Non-recurring blueprints project exactly one instance, ever.
    if def.recurring == Recurrence::Never {
        if instances.count_for_blueprint(&blueprint.id).await? > 0 {
            return Ok(PublishOutcome::default());
        }
        instances
            .insert_many(vec![NewInstance {
                event_id: blueprint.id.clone(),
                series_index: blueprint.anchor_index,
                target_date: def.date,
                scheduled_date: def.date,
                overrides_date_updated_on: blueprint.updated_on,
            }])
            .await?;
        return Ok(PublishOutcome { inserted: 1 });
    }

    let future = instances.future_by_blueprint(&blueprint.id, now).await?;
    let need = i64::from(def.max_published) - future.len() as i64;
    // A shrunk max_published leaves excess instances in place; pruning
    // already-published occurrences is not policy.
    if need <= 0 {
        return Ok(PublishOutcome::default());
    }

    let next_index = instances
        .max_series_index(&blueprint.id)
        .await?
        .unwrap_or(0)
        + 1;

    let mut docs = Vec::new();
    for j in 0..u32::try_from(need).unwrap_or(0) {
        let series_index = next_index + j;
        let target_date = occurrence_date(
            def.date,
            def.recurring,
            series_index,
            blueprint.anchor_index,
        )?;
        docs.push(NewInstance {
            event_id: blueprint.id.clone(),
            series_index,
            target_date,
            scheduled_date: target_date,
            overrides_date_updated_on: blueprint.updated_on,
        });
    }

    let inserted = u32::try_from(docs.len()).unwrap_or(0);
    instances.insert_many(docs).await?;
    tracing::info!(event_id = %blueprint.id, inserted, "published event instances");
    Ok(PublishOutcome { inserted })
}

/// Outcome of a date recalculation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecalculateOutcome {
    /// Instances whose dates were rewritten.
    pub updated_instances: u32,
    /// The anchor the blueprint ended up with.
    pub anchor_index: u32,
}

/// Recomputes future instance dates after the blueprint's origin date or
/// recurrence changed. Past instances are untouched; the anchor moves to
/// the earliest remaining future instance. Instances with an active date
/// override keep their `scheduled_date` and DST-intent timestamp — the
/// administrator's explicit choice wins.
///
/// Persists the blueprint's new `anchor_index` and `updated_on`. Caller
/// must hold the publish mutex.
pub(crate) async fn recalculate_dates(
    blueprints: &dyn BlueprintStore,
    instances: &dyn InstanceStore,
    blueprint: &mut EventBlueprint,
    now: DateTime<Utc>,
) -> CoreResult<RecalculateOutcome> {
    let future = instances.future_by_blueprint(&blueprint.id, now).await?;

    let Some(first) = future.first() else {
        blueprint.updated_on = now;
        blueprints.replace(blueprint).await?;
        return Ok(RecalculateOutcome {
            updated_instances: 0,
            anchor_index: blueprint.anchor_index,
        });
    };

    let new_anchor = first.series_index;
    blueprint.anchor_index = new_anchor;
    blueprint.updated_on = now;
    blueprints.replace(blueprint).await?;

    let mut updated = 0u32;
    for instance in &future {
        let new_target = occurrence_date(
            blueprint.definition.date,
            blueprint.definition.recurring,
            instance.series_index,
            new_anchor,
        )?;
        let date_overridden = instance
            .overrides_tracker
            .is_active(OverrideGroup::Dates);
        let sync = if date_overridden {
            None
        } else {
            Some((new_target, blueprint.updated_on))
        };
        if instances
            .set_projection_dates(&instance.id, new_target, sync)
            .await?
        {
            updated += 1;
        }
    }

    tracing::info!(
        event_id = %blueprint.id,
        updated_instances = updated,
        anchor_index = new_anchor,
        "recalculated projected dates"
    );
    Ok(RecalculateOutcome {
        updated_instances: updated,
        anchor_index: new_anchor,
    })
}
