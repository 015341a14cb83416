//! Projection engine flows: the rolling publish window, idempotent
//! republish, re-anchored recalculation after blueprint edits, and
//! override interaction with recalculation.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod common;

use chapel_events::blueprint::Recurrence;
use chapel_events::overrides::{InstanceOverrides, OverrideField, OverrideGroup};
use chapel_events::store::InstanceStore;
use chrono::Duration;
use common::{at, free_definition, harness};

#[tokio::test]
async fn publish_maintains_the_rolling_window() {
    let h = harness();
    let mut def = free_definition();
    def.date = at(2025, 1, 15, 18, 0);
    def.max_published = 4;
    let bp = h.core.create_blueprint(def).await.unwrap();

    let instances = h.store.by_blueprint(&bp.id).await.unwrap();
    assert_eq!(instances.len(), 4);
    for (i, instance) in instances.iter().enumerate() {
        let idx = u32::try_from(i).unwrap() + 1;
        assert_eq!(instance.series_index, idx);
        let expected = at(2025, 1, 15, 18, 0) + Duration::weeks(i64::from(idx) - 1);
        assert_eq!(instance.target_date, expected);
        assert_eq!(instance.scheduled_date, expected);
        assert_eq!(instance.seats_filled, 0);
        assert!(!instance.overrides_tracker.any());
        assert_eq!(instance.overrides_date_updated_on, bp.updated_on);
    }
}

#[tokio::test]
async fn republish_inserts_nothing_when_the_window_is_full() {
    let h = harness();
    let mut def = free_definition();
    def.date = at(2025, 1, 15, 18, 0);
    def.max_published = 4;
    let bp = h.core.create_blueprint(def).await.unwrap();

    assert_eq!(h.core.publish_blueprint(&bp.id).await.unwrap(), 0);
    assert_eq!(h.store.by_blueprint(&bp.id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn window_tops_up_as_instances_pass() {
    let h = harness();
    let mut def = free_definition();
    def.date = at(2025, 1, 15, 18, 0);
    def.max_published = 3;
    let bp = h.core.create_blueprint(def).await.unwrap();

    // Two occurrences pass; only one future instance remains.
    h.clock.set(at(2025, 1, 23, 0, 0));
    let inserted = h.core.publish_blueprint(&bp.id).await.unwrap();
    assert_eq!(inserted, 2);

    let instances = h.store.by_blueprint(&bp.id).await.unwrap();
    assert_eq!(instances.len(), 5);
    // Fresh instances continue the series, never reusing indexes.
    assert_eq!(
        instances.iter().map(|i| i.series_index).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );
}

#[tokio::test]
async fn never_recurrence_projects_exactly_one_instance() {
    let h = harness();
    let mut def = free_definition();
    def.recurring = Recurrence::Never;
    def.max_published = 1;
    let bp = h.core.create_blueprint(def).await.unwrap();

    assert_eq!(h.store.by_blueprint(&bp.id).await.unwrap().len(), 1);
    assert_eq!(h.core.publish_blueprint(&bp.id).await.unwrap(), 0);
    assert_eq!(h.store.by_blueprint(&bp.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn date_shift_recomputes_future_instances() {
    // Weekly from Jan 15, four published, all future. Shifting the origin
    // to Jan 22 re-anchors at the earliest future instance and moves every
    // non-overridden instance a week out.
    let h = harness();
    let mut def = free_definition();
    def.date = at(2025, 1, 15, 18, 0);
    def.max_published = 4;
    let bp = h.core.create_blueprint(def.clone()).await.unwrap();

    def.date = at(2025, 1, 22, 18, 0);
    let edited = h.core.edit_blueprint(&bp.id, def).await.unwrap();
    assert_eq!(edited.anchor_index, 1);

    let instances = h.store.by_blueprint(&bp.id).await.unwrap();
    assert_eq!(instances.len(), 4);
    for instance in &instances {
        let expected = at(2025, 1, 22, 18, 0)
            + Duration::weeks(i64::from(instance.series_index) - 1);
        assert_eq!(instance.target_date, expected);
        assert_eq!(instance.scheduled_date, expected);
        assert_eq!(instance.overrides_date_updated_on, edited.updated_on);
    }
}

#[tokio::test]
async fn recalculation_anchors_at_the_earliest_future_instance() {
    let h = harness();
    let mut def = free_definition();
    def.date = at(2025, 1, 15, 18, 0);
    def.max_published = 4;
    let bp = h.core.create_blueprint(def.clone()).await.unwrap();

    // The first two occurrences are in the past now.
    h.clock.set(at(2025, 1, 30, 0, 0));
    def.date = at(2025, 2, 12, 18, 0);
    let edited = h.core.edit_blueprint(&bp.id, def).await.unwrap();
    assert_eq!(edited.anchor_index, 3, "anchor moves to the first future instance");

    let instances = h.store.by_blueprint(&bp.id).await.unwrap();
    // Past instances are untouched.
    assert_eq!(instances[0].target_date, at(2025, 1, 15, 18, 0));
    assert_eq!(instances[1].target_date, at(2025, 1, 22, 18, 0));
    // Future instances follow the new origin from the new anchor.
    assert_eq!(instances[2].target_date, at(2025, 2, 12, 18, 0));
    assert_eq!(instances[3].target_date, at(2025, 2, 19, 18, 0));
}

#[tokio::test]
async fn overridden_dates_survive_recalculation() {
    let h = harness();
    let mut def = free_definition();
    def.date = at(2025, 1, 15, 18, 0);
    def.max_published = 4;
    let bp = h.core.create_blueprint(def.clone()).await.unwrap();

    // Admin pins occurrence 2 to a special date.
    let pinned = at(2025, 1, 24, 10, 0);
    let override_moment = at(2025, 1, 2, 9, 0);
    h.clock.set(override_moment);
    h.core
        .apply_instance_overrides(
            &bp.id,
            2,
            &InstanceOverrides {
                date: OverrideField::Value(pinned),
                ..InstanceOverrides::default()
            },
        )
        .await
        .unwrap();

    h.clock.set(at(2025, 1, 3, 0, 0));
    def.date = at(2025, 1, 16, 18, 0);
    let edited = h.core.edit_blueprint(&bp.id, def).await.unwrap();

    let instances = h.store.by_blueprint(&bp.id).await.unwrap();
    let second = instances.iter().find(|i| i.series_index == 2).unwrap();
    // target_date always follows the blueprint...
    assert_eq!(second.target_date, at(2025, 1, 23, 18, 0));
    // ...but the admin's explicit schedule and DST-intent stamp win.
    assert_eq!(second.scheduled_date, pinned);
    assert_eq!(second.overrides_date_updated_on, override_moment);
    assert!(second.overrides_tracker.is_active(OverrideGroup::Dates));

    let first = instances.iter().find(|i| i.series_index == 1).unwrap();
    assert_eq!(first.scheduled_date, at(2025, 1, 16, 18, 0));
    assert_eq!(first.overrides_date_updated_on, edited.updated_on);
}

#[tokio::test]
async fn override_without_date_keeps_schedule_on_target() {
    let h = harness();
    let mut def = free_definition();
    def.date = at(2025, 1, 15, 18, 0);
    def.max_published = 2;
    let bp = h.core.create_blueprint(def).await.unwrap();

    h.core
        .apply_instance_overrides(
            &bp.id,
            2,
            &InstanceOverrides {
                max_spots: OverrideField::Value(5),
                ..InstanceOverrides::default()
            },
        )
        .await
        .unwrap();

    let instance = h.store.by_series(&bp.id, 2).await.unwrap().unwrap();
    assert!(instance.overrides_tracker.is_active(OverrideGroup::Registration));
    assert!(!instance.overrides_tracker.is_active(OverrideGroup::Dates));
    assert_eq!(instance.scheduled_date, instance.target_date);
    assert_eq!(instance.overrides_date_updated_on, bp.updated_on);

    // The override is live on the effective view.
    let assembled = h
        .core
        .assembled_instance(&instance.id, None)
        .await
        .unwrap();
    assert_eq!(assembled.max_spots(), Some(5));
}

#[tokio::test]
async fn effective_windows_follow_the_occurrence() {
    let h = harness();
    let mut def = free_definition();
    def.date = at(2025, 1, 15, 18, 0);
    def.registration_opens = Some(at(2025, 1, 5, 18, 0));
    def.registration_deadline = Some(at(2025, 1, 14, 18, 0));
    def.max_published = 2;
    let bp = h.core.create_blueprint(def).await.unwrap();

    let second = h.store.by_series(&bp.id, 2).await.unwrap().unwrap();
    let assembled = h
        .core
        .assembled_instance(&second.id, None)
        .await
        .unwrap();
    // Deltas off the origin: opens 10 days before, deadline 1 day before.
    assert_eq!(
        assembled.definition.registration_opens,
        Some(at(2025, 1, 12, 18, 0))
    );
    assert_eq!(
        assembled.definition.registration_deadline,
        Some(at(2025, 1, 21, 18, 0))
    );
    assert_eq!(assembled.date(), at(2025, 1, 22, 18, 0));
    assert_eq!(assembled.default_title, "Harvest Dinner");
}
