//! Persistence seams for the event core.
//!
//! The document store is an external collaborator; the core talks to it
//! through these async traits and never assumes a concrete backend. The
//! crate ships [`memory::MemoryStore`], a serialized in-process
//! implementation used by tests and demos; production deployments implement
//! the same traits over the real document store.
//!
//! The one operation with non-trivial semantics is
//! [`InstanceStore::apply_registration_update`]: the capacity/underflow
//! predicate must be evaluated *inside* the store's conditional update so
//! that two requests racing for the last seat cannot both succeed.

pub mod memory;

use crate::blueprint::{EventBlueprint, EventDefinition};
use crate::discounts::DiscountCode;
use crate::error::CoreError;
use crate::instance::{EventInstance, RegistrationDetails};
use crate::ledger::{CapturedLine, Transaction, TransactionRefund};
use crate::overrides::{InstanceOverrides, OverridesTracker};
use crate::types::{DiscountCodeId, EventId, InstanceId, LineId, Money, OrderId, PersonId, Uid};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, CoreError>;

/// Insert payload for a projected instance; the store assigns the id and
/// the empty registration state.
#[derive(Clone, Debug)]
pub struct NewInstance {
    /// Parent blueprint.
    pub event_id: EventId,
    /// Position in the series.
    pub series_index: u32,
    /// Computed occurrence date.
    pub target_date: DateTime<Utc>,
    /// Effective date; equals `target_date` at creation.
    pub scheduled_date: DateTime<Utc>,
    /// The blueprint's `updated_on` at projection time.
    pub overrides_date_updated_on: DateTime<Utc>,
}

/// Why a conditional registration write did not apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeatRejection {
    /// The instance does not exist.
    NotFound,
    /// Adding the requested seats would exceed the capacity limit.
    CapacityExceeded,
    /// Removing the requested seats would drop the counter below zero.
    Underflow,
    /// The store's predicate failed for another reason (backend-specific).
    PredicateUnmet,
}

impl SeatRejection {
    /// Maps the rejection onto the core error taxonomy.
    #[must_use]
    pub fn into_error(self, instance_id: &InstanceId) -> CoreError {
        match self {
            Self::NotFound => CoreError::NotFound(format!("event instance {instance_id}")),
            Self::CapacityExceeded => CoreError::CapacityExceeded,
            Self::Underflow => CoreError::Conflict(
                "registration removal would drop the seat counter below zero".into(),
            ),
            Self::PredicateUnmet => {
                CoreError::Conflict("registration update preconditions not met".into())
            }
        }
    }
}

/// State returned after a successful registration write.
#[derive(Clone, Debug)]
pub struct RegistrationWrite {
    /// The fresh seat counter.
    pub seats_filled: u32,
    /// The user's registration entry after the write; `None` when it was
    /// removed.
    pub details: Option<RegistrationDetails>,
}

/// Outcome of the single atomic registration write.
#[derive(Clone, Debug)]
pub enum SeatUpdate {
    /// The predicate held and the write applied.
    Applied(RegistrationWrite),
    /// The predicate failed; nothing changed.
    Rejected(SeatRejection),
}

/// Blueprint collection.
#[async_trait]
pub trait BlueprintStore: Send + Sync {
    /// Inserts a new blueprint with `anchor_index = 1` and
    /// `updated_on = now`, returning it with its assigned id.
    async fn insert(&self, definition: EventDefinition, now: DateTime<Utc>) -> StoreResult<EventBlueprint>;

    /// Fetches a blueprint by id.
    async fn get(&self, id: &EventId) -> StoreResult<Option<EventBlueprint>>;

    /// Replaces a blueprint document. Returns false when it does not exist.
    async fn replace(&self, blueprint: &EventBlueprint) -> StoreResult<bool>;

    /// Deletes a blueprint. Returns false when it does not exist.
    async fn delete(&self, id: &EventId) -> StoreResult<bool>;

    /// All blueprints with `currently_publishing` set.
    async fn publishing(&self) -> StoreResult<Vec<EventBlueprint>>;

    /// All blueprints referencing a discount code.
    async fn with_discount_code(&self, code_id: &DiscountCodeId) -> StoreResult<Vec<EventBlueprint>>;
}


/// Instance collection.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Inserts projected instances, returning their assigned ids.
    async fn insert_many(&self, docs: Vec<NewInstance>) -> StoreResult<Vec<InstanceId>>;

    /// Fetches an instance by id.
    async fn get(&self, id: &InstanceId) -> StoreResult<Option<EventInstance>>;

    /// Fetches an instance by its blueprint and series index.
    async fn by_series(
        &self,
        event_id: &EventId,
        series_index: u32,
    ) -> StoreResult<Option<EventInstance>>;

    /// Every instance of a blueprint, past included, ordered by series
    /// index.
    async fn by_blueprint(&self, event_id: &EventId) -> StoreResult<Vec<EventInstance>>;

    /// Number of instances projected from a blueprint (past included).
    async fn count_for_blueprint(&self, event_id: &EventId) -> StoreResult<u64>;

    /// Highest `series_index` projected for a blueprint.
    async fn max_series_index(&self, event_id: &EventId) -> StoreResult<Option<u32>>;

    /// Instances with `target_date` after `after`, ordered by series index.
    /// The projection engine's view of "future".
    async fn future_by_blueprint(
        &self,
        event_id: &EventId,
        after: DateTime<Utc>,
    ) -> StoreResult<Vec<EventInstance>>;

    /// Instances with `scheduled_date` after `after`, ordered by series
    /// index. The user-facing view of "upcoming".
    async fn upcoming_by_blueprint(
        &self,
        event_id: &EventId,
        after: DateTime<Utc>,
    ) -> StoreResult<Vec<EventInstance>>;

    /// Upcoming instances (any blueprint) where the user has a
    /// registration entry.
    async fn upcoming_with_registration(
        &self,
        uid: &Uid,
        after: DateTime<Utc>,
    ) -> StoreResult<Vec<EventInstance>>;

    /// The single atomic registration write (see module docs): upserts or
    /// removes the user's entry, adjusts `seats_filled` by `seat_delta`,
    /// with the capacity/underflow predicate inside the update.
    async fn apply_registration_update(
        &self,
        id: &InstanceId,
        uid: &Uid,
        details: RegistrationDetails,
        seat_delta: i64,
        capacity_limit: Option<u32>,
    ) -> StoreResult<SeatUpdate>;

    /// Replaces an instance's overrides wholesale.
    async fn set_overrides(
        &self,
        id: &InstanceId,
        overrides: InstanceOverrides,
        tracker: OverridesTracker,
        scheduled_date: DateTime<Utc>,
        overrides_date_updated_on: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Rewrites projection dates after a blueprint edit. `sync` carries the
    /// new `(scheduled_date, overrides_date_updated_on)` pair when the date
    /// override group is inactive; `None` preserves the admin's explicit
    /// choice.
    async fn set_projection_dates(
        &self,
        id: &InstanceId,
        target_date: DateTime<Utc>,
        sync: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> StoreResult<bool>;

    /// Best-effort bump of `amount_refunded` on one registrant's payment
    /// details. Touches nothing else; returns false when the details are
    /// gone (the ledger remains the source of truth).
    async fn increment_amount_refunded(
        &self,
        id: &InstanceId,
        uid: &Uid,
        person: &PersonId,
        amount: Money,
    ) -> StoreResult<bool>;

    /// Deletes every instance of a blueprint, returning the count.
    async fn delete_by_blueprint(&self, event_id: &EventId) -> StoreResult<u64>;
}

/// Transaction ledger collection.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persists a preliminary transaction.
    async fn create_preliminary(&self, transaction: Transaction) -> StoreResult<()>;

    /// Fetches a transaction by provider order id.
    async fn get_by_order_id(&self, order_id: &OrderId) -> StoreResult<Option<Transaction>>;

    /// Applies [`Transaction::apply_capture`] under the store's write lock
    /// and returns the updated transaction.
    async fn mark_captured(
        &self,
        order_id: &OrderId,
        capture_response: Value,
        captured_lines: Vec<CapturedLine>,
        fee_amount: Option<Money>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Transaction>>;

    /// Marks a capture failure. Returns false when the order is unknown.
    async fn mark_failed(&self, order_id: &OrderId, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Applies [`Transaction::append_refund`] under the store's write lock.
    /// Returns false on duplicate refund ids.
    async fn append_refund(
        &self,
        order_id: &OrderId,
        line_id: &LineId,
        refund: TransactionRefund,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
}

/// Discount code collection.
#[async_trait]
pub trait DiscountStore: Send + Sync {
    /// Inserts or replaces a code document.
    async fn upsert(&self, code: DiscountCode) -> StoreResult<()>;

    /// Fetches a code by id.
    async fn get(&self, id: &DiscountCodeId) -> StoreResult<Option<DiscountCode>>;

    /// Fetches a code by its user-facing string.
    async fn get_by_code(&self, code: &str) -> StoreResult<Option<DiscountCode>>;

    /// Adds `by` to the user's usage history on the code.
    async fn increment_usage(&self, id: &DiscountCodeId, uid: &Uid, by: u32) -> StoreResult<bool>;

    /// Deletes a code. Returns false when it does not exist.
    async fn delete(&self, id: &DiscountCodeId) -> StoreResult<bool>;
}
