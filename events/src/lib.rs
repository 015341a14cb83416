//! Event registration and payment core for the chapel platform.
//!
//! This crate owns the transactional heart of the events product:
//!
//! - **Blueprints** ([`blueprint`]) describe recurring events; the
//!   projection engine ([`projection`]) materialises them into a rolling
//!   window of concrete instances.
//! - **Instances** ([`instance`], [`overrides`]) carry per-occurrence
//!   overrides in all-or-nothing groups, a seat counter and per-user
//!   registration state.
//! - **Registrations** ([`registration`]) mutate seats and details through
//!   a single conditional store write, so capacity races resolve to
//!   exactly one winner.
//! - **Payments** ([`payment`], [`ledger`]) orchestrate provider orders and
//!   idempotent captures against a per-line transaction ledger.
//! - **Refunds** ([`refunds`], [`admin`]) serve user unregistrations,
//!   admin overrides and blueprint deletion, with the ledger as the
//!   monetary source of truth.
//!
//! External collaborators — the HTTP layer, authentication, the document
//! store and the payment provider — are consumed through traits
//! ([`store`], [`provider`]); the crate ships in-memory and mock
//! implementations for tests and demos.
//!
//! # Example
//!
//! ```no_run
//! use chapel_events::core::{CoreSettings, EventsCore};
//! use chapel_events::provider::MockProvider;
//! use chapel_events::snapshot::MemorySnapshotStore;
//! use chapel_events::store::memory::MemoryStore;
//! use chapel_events::time::SystemClock;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let core = EventsCore::new(
//!     store.clone(),
//!     store.clone(),
//!     store.clone(),
//!     store,
//!     Arc::new(MemorySnapshotStore::new()),
//!     Arc::new(MockProvider::new()),
//!     Arc::new(SystemClock),
//!     CoreSettings::default(),
//! );
//! # let _ = core;
//! ```

pub mod admin;
pub mod blueprint;
pub mod config;
pub mod core;
pub mod discounts;
pub mod error;
pub mod instance;
pub mod ledger;
pub mod overrides;
pub mod payment;
pub mod projection;
pub mod provider;
pub mod refunds;
pub mod registration;
pub mod snapshot;
pub mod store;
pub mod time;
pub mod types;

pub use crate::core::{CoreSettings, EventsCore};
pub use blueprint::{EventBlueprint, EventDefinition, Gender, PaymentOption, Recurrence};
pub use error::{CoreError, CoreResult};
pub use instance::{
    AssembledInstance, ChangeRegistration, EventInstance, PaymentDetails, PaymentKind,
    RegistrationDetails,
};
pub use ledger::{Transaction, TransactionItem, TransactionRefund, TransactionStatus};
pub use payment::CaptureRegistration;
pub use refunds::{AdminRefund, AdminRefundOutcome, RefundReceipt};
pub use registration::{RegistrationEntry, RegistrationOutcome};
pub use types::{Caller, FamilyMember, Money, PersonId};
