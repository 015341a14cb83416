//! In-memory store implementing every persistence seam.
//!
//! All collections live behind a single async mutex, which makes every
//! operation atomic exactly the way the production document store's
//! conditional updates are: the seat predicate in
//! [`InstanceStore::apply_registration_update`] is checked and applied
//! under the same lock, so racing registrations serialize and exactly one
//! can take the last seat.
//!
//! Used by the crate's tests and demos; not a production backend.

use crate::blueprint::{EventBlueprint, EventDefinition};
use crate::discounts::DiscountCode;
use crate::instance::{EventInstance, RegistrationDetails};
use crate::ledger::{CapturedLine, Transaction, TransactionRefund};
use crate::overrides::{InstanceOverrides, OverridesTracker};
use crate::store::{
    BlueprintStore, DiscountStore, InstanceStore, LedgerStore, NewInstance, RegistrationWrite,
    SeatRejection, SeatUpdate, StoreResult,
};
use crate::types::{DiscountCodeId, EventId, InstanceId, LineId, Money, OrderId, PersonId, Uid};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Collections {
    blueprints: HashMap<EventId, EventBlueprint>,
    instances: HashMap<InstanceId, EventInstance>,
    transactions: HashMap<OrderId, Transaction>,
    discounts: HashMap<DiscountCodeId, DiscountCode>,
}

/// In-process document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn object_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Test support: fetches an instance without going through the trait.
    pub async fn instance(&self, id: &InstanceId) -> Option<EventInstance> {
        self.inner.lock().await.instances.get(id).cloned()
    }

    /// Test support: fetches a blueprint without going through the trait.
    pub async fn blueprint(&self, id: &EventId) -> Option<EventBlueprint> {
        self.inner.lock().await.blueprints.get(id).cloned()
    }

    /// Test support: fetches a transaction without going through the trait.
    pub async fn transaction(&self, order_id: &OrderId) -> Option<Transaction> {
        self.inner.lock().await.transactions.get(order_id).cloned()
    }

    /// Test support: fetches a discount code without going through the
    /// trait.
    pub async fn discount(&self, id: &DiscountCodeId) -> Option<DiscountCode> {
        self.inner.lock().await.discounts.get(id).cloned()
    }

    /// Test support: overwrites an instance document wholesale.
    pub async fn put_instance(&self, instance: EventInstance) {
        self.inner
            .lock()
            .await
            .instances
            .insert(instance.id.clone(), instance);
    }
}

#[async_trait]
impl BlueprintStore for MemoryStore {
    async fn insert(&self, definition: EventDefinition, now: DateTime<Utc>) -> StoreResult<EventBlueprint> {
        let blueprint = EventBlueprint {
            id: EventId::new(Self::object_id()),
            definition,
            updated_on: now,
            anchor_index: 1,
        };
        self.inner
            .lock()
            .await
            .blueprints
            .insert(blueprint.id.clone(), blueprint.clone());
        Ok(blueprint)
    }

    async fn get(&self, id: &EventId) -> StoreResult<Option<EventBlueprint>> {
        Ok(self.inner.lock().await.blueprints.get(id).cloned())
    }

    async fn replace(&self, blueprint: &EventBlueprint) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.blueprints.contains_key(&blueprint.id) {
            return Ok(false);
        }
        inner
            .blueprints
            .insert(blueprint.id.clone(), blueprint.clone());
        Ok(true)
    }

    async fn delete(&self, id: &EventId) -> StoreResult<bool> {
        Ok(self.inner.lock().await.blueprints.remove(id).is_some())
    }

    async fn publishing(&self) -> StoreResult<Vec<EventBlueprint>> {
        Ok(self
            .inner
            .lock()
            .await
            .blueprints
            .values()
            .filter(|bp| bp.definition.currently_publishing)
            .cloned()
            .collect())
    }

    async fn with_discount_code(&self, code_id: &DiscountCodeId) -> StoreResult<Vec<EventBlueprint>> {
        Ok(self
            .inner
            .lock()
            .await
            .blueprints
            .values()
            .filter(|bp| bp.definition.discount_codes.contains(code_id))
            .cloned()
            .collect())
    }
}

fn sorted_by_series(mut instances: Vec<EventInstance>) -> Vec<EventInstance> {
    instances.sort_by_key(|i| i.series_index);
    instances
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn insert_many(&self, docs: Vec<NewInstance>) -> StoreResult<Vec<InstanceId>> {
        let mut inner = self.inner.lock().await;
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            let instance = EventInstance {
                id: InstanceId::new(Self::object_id()),
                event_id: doc.event_id,
                series_index: doc.series_index,
                overrides: InstanceOverrides::default(),
                overrides_tracker: OverridesTracker::default(),
                seats_filled: 0,
                registration_details: HashMap::new(),
                target_date: doc.target_date,
                scheduled_date: doc.scheduled_date,
                overrides_date_updated_on: doc.overrides_date_updated_on,
            };
            ids.push(instance.id.clone());
            inner.instances.insert(instance.id.clone(), instance);
        }
        Ok(ids)
    }

    async fn get(&self, id: &InstanceId) -> StoreResult<Option<EventInstance>> {
        Ok(self.inner.lock().await.instances.get(id).cloned())
    }

    async fn by_series(
        &self,
        event_id: &EventId,
        series_index: u32,
    ) -> StoreResult<Option<EventInstance>> {
        Ok(self
            .inner
            .lock()
            .await
            .instances
            .values()
            .find(|i| &i.event_id == event_id && i.series_index == series_index)
            .cloned())
    }

    async fn by_blueprint(&self, event_id: &EventId) -> StoreResult<Vec<EventInstance>> {
        Ok(sorted_by_series(
            self.inner
                .lock()
                .await
                .instances
                .values()
                .filter(|i| &i.event_id == event_id)
                .cloned()
                .collect(),
        ))
    }

    async fn count_for_blueprint(&self, event_id: &EventId) -> StoreResult<u64> {
        Ok(self
            .inner
            .lock()
            .await
            .instances
            .values()
            .filter(|i| &i.event_id == event_id)
            .count() as u64)
    }

    async fn max_series_index(&self, event_id: &EventId) -> StoreResult<Option<u32>> {
        Ok(self
            .inner
            .lock()
            .await
            .instances
            .values()
            .filter(|i| &i.event_id == event_id)
            .map(|i| i.series_index)
            .max())
    }

    async fn future_by_blueprint(
        &self,
        event_id: &EventId,
        after: DateTime<Utc>,
    ) -> StoreResult<Vec<EventInstance>> {
        Ok(sorted_by_series(
            self.inner
                .lock()
                .await
                .instances
                .values()
                .filter(|i| &i.event_id == event_id && i.target_date > after)
                .cloned()
                .collect(),
        ))
    }

    async fn upcoming_by_blueprint(
        &self,
        event_id: &EventId,
        after: DateTime<Utc>,
    ) -> StoreResult<Vec<EventInstance>> {
        Ok(sorted_by_series(
            self.inner
                .lock()
                .await
                .instances
                .values()
                .filter(|i| &i.event_id == event_id && i.scheduled_date > after)
                .cloned()
                .collect(),
        ))
    }

    async fn upcoming_with_registration(
        &self,
        uid: &Uid,
        after: DateTime<Utc>,
    ) -> StoreResult<Vec<EventInstance>> {
        Ok(sorted_by_series(
            self.inner
                .lock()
                .await
                .instances
                .values()
                .filter(|i| i.scheduled_date > after && i.registration_details.contains_key(uid))
                .cloned()
                .collect(),
        ))
    }

    async fn apply_registration_update(
        &self,
        id: &InstanceId,
        uid: &Uid,
        details: RegistrationDetails,
        seat_delta: i64,
        capacity_limit: Option<u32>,
    ) -> StoreResult<SeatUpdate> {
        let mut inner = self.inner.lock().await;
        let Some(instance) = inner.instances.get_mut(id) else {
            return Ok(SeatUpdate::Rejected(SeatRejection::NotFound));
        };

        let new_seats = i64::from(instance.seats_filled) + seat_delta;
        if seat_delta > 0 {
            if let Some(limit) = capacity_limit {
                if new_seats > i64::from(limit) {
                    return Ok(SeatUpdate::Rejected(SeatRejection::CapacityExceeded));
                }
            }
        }
        if seat_delta < 0 && new_seats < 0 {
            return Ok(SeatUpdate::Rejected(SeatRejection::Underflow));
        }

        if details.is_empty() {
            instance.registration_details.remove(uid);
        } else {
            instance
                .registration_details
                .insert(uid.clone(), details);
        }
        if seat_delta != 0 {
            instance.seats_filled = u32::try_from(new_seats).unwrap_or(0);
        }

        Ok(SeatUpdate::Applied(RegistrationWrite {
            seats_filled: instance.seats_filled,
            details: instance.registration_details.get(uid).cloned(),
        }))
    }

    async fn set_overrides(
        &self,
        id: &InstanceId,
        overrides: InstanceOverrides,
        tracker: OverridesTracker,
        scheduled_date: DateTime<Utc>,
        overrides_date_updated_on: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(instance) = inner.instances.get_mut(id) else {
            return Ok(false);
        };
        instance.overrides = overrides;
        instance.overrides_tracker = tracker;
        instance.scheduled_date = scheduled_date;
        instance.overrides_date_updated_on = overrides_date_updated_on;
        Ok(true)
    }

    async fn set_projection_dates(
        &self,
        id: &InstanceId,
        target_date: DateTime<Utc>,
        sync: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(instance) = inner.instances.get_mut(id) else {
            return Ok(false);
        };
        instance.target_date = target_date;
        if let Some((scheduled, updated_on)) = sync {
            instance.scheduled_date = scheduled;
            instance.overrides_date_updated_on = updated_on;
        }
        Ok(true)
    }

    async fn increment_amount_refunded(
        &self,
        id: &InstanceId,
        uid: &Uid,
        person: &PersonId,
        amount: Money,
    ) -> StoreResult<bool> {
        if amount.is_zero() {
            return Ok(false);
        }
        let mut inner = self.inner.lock().await;
        let Some(instance) = inner.instances.get_mut(id) else {
            return Ok(false);
        };
        let Some(details) = instance.registration_details.get_mut(uid) else {
            return Ok(false);
        };
        let payment = match person {
            PersonId::User => details.self_payment_details.as_mut(),
            PersonId::Family(fid) => details.family_payment_details.get_mut(fid),
        };
        match payment {
            Some(pd) => {
                pd.amount_refunded = pd
                    .amount_refunded
                    .checked_add(amount)
                    .unwrap_or(pd.amount_refunded);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_by_blueprint(&self, event_id: &EventId) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.instances.len();
        inner.instances.retain(|_, i| &i.event_id != event_id);
        Ok((before - inner.instances.len()) as u64)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn create_preliminary(&self, transaction: Transaction) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .transactions
            .insert(transaction.order_id.clone(), transaction);
        Ok(())
    }

    async fn get_by_order_id(&self, order_id: &OrderId) -> StoreResult<Option<Transaction>> {
        Ok(self.inner.lock().await.transactions.get(order_id).cloned())
    }

    async fn mark_captured(
        &self,
        order_id: &OrderId,
        capture_response: Value,
        captured_lines: Vec<CapturedLine>,
        fee_amount: Option<Money>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Transaction>> {
        let mut inner = self.inner.lock().await;
        let Some(transaction) = inner.transactions.get_mut(order_id) else {
            return Ok(None);
        };
        transaction.apply_capture(capture_response, &captured_lines, fee_amount, now);
        Ok(Some(transaction.clone()))
    }

    async fn mark_failed(&self, order_id: &OrderId, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(transaction) = inner.transactions.get_mut(order_id) else {
            return Ok(false);
        };
        transaction.mark_failed(now);
        Ok(true)
    }

    async fn append_refund(
        &self,
        order_id: &OrderId,
        line_id: &LineId,
        refund: TransactionRefund,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(transaction) = inner.transactions.get_mut(order_id) else {
            return Err(crate::error::CoreError::LedgerInconsistent(format!(
                "no transaction for order {order_id}"
            )));
        };
        transaction.append_refund(line_id, refund, now)
    }
}

#[async_trait]
impl DiscountStore for MemoryStore {
    async fn upsert(&self, code: DiscountCode) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .discounts
            .insert(code.id.clone(), code);
        Ok(())
    }

    async fn get(&self, id: &DiscountCodeId) -> StoreResult<Option<DiscountCode>> {
        Ok(self.inner.lock().await.discounts.get(id).cloned())
    }

    async fn get_by_code(&self, code: &str) -> StoreResult<Option<DiscountCode>> {
        Ok(self
            .inner
            .lock()
            .await
            .discounts
            .values()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn increment_usage(&self, id: &DiscountCodeId, uid: &Uid, by: u32) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(code) = inner.discounts.get_mut(id) else {
            return Ok(false);
        };
        *code.usage_history.entry(uid.clone()).or_insert(0) += by;
        Ok(true)
    }

    async fn delete(&self, id: &DiscountCodeId) -> StoreResult<bool> {
        Ok(self.inner.lock().await.discounts.remove(id).is_some())
    }
}
