//! The assembled event core: stores, provider, clock and settings wired
//! together.
//!
//! Flow logic lives in the sibling modules (`registration`, `payment`,
//! `refunds`, `admin`, `projection`), each contributing an `impl
//! EventsCore` block; this module only owns construction and the small
//! shared lookups.

use crate::error::{CoreError, CoreResult};
use crate::instance::{AssembledInstance, RegistrationDetails};
use crate::overrides::assemble_instance;
use crate::provider::PaymentProvider;
use crate::snapshot::SnapshotStore;
use crate::store::{BlueprintStore, DiscountStore, InstanceStore, LedgerStore};
use crate::time::Clock;
use crate::types::{InstanceId, Uid};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Presentation and provider settings the flows need.
#[derive(Clone, Debug)]
pub struct CoreSettings {
    /// Frontend base URL for provider return/cancel redirects.
    pub frontend_url: String,
    /// Brand name shown on the provider's review page.
    pub brand_name: String,
    /// Order currency. Single-currency platform.
    pub currency: String,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            frontend_url: "http://localhost:3000".into(),
            brand_name: "Church Event Registration".into(),
            currency: "USD".into(),
        }
    }
}

/// The event registration & payment core.
pub struct EventsCore {
    pub(crate) blueprints: Arc<dyn BlueprintStore>,
    pub(crate) instances: Arc<dyn InstanceStore>,
    pub(crate) ledger: Arc<dyn LedgerStore>,
    pub(crate) discounts: Arc<dyn DiscountStore>,
    pub(crate) snapshots: Arc<dyn SnapshotStore>,
    pub(crate) provider: Arc<dyn PaymentProvider>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: CoreSettings,
    /// Serializes publish/recalculate passes so concurrent publishes cannot
    /// double-insert a series index.
    pub(crate) publish_lock: Mutex<()>,
}

impl EventsCore {
    /// Wires the core together.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        blueprints: Arc<dyn BlueprintStore>,
        instances: Arc<dyn InstanceStore>,
        ledger: Arc<dyn LedgerStore>,
        discounts: Arc<dyn DiscountStore>,
        snapshots: Arc<dyn SnapshotStore>,
        provider: Arc<dyn PaymentProvider>,
        clock: Arc<dyn Clock>,
        settings: CoreSettings,
    ) -> Self {
        Self {
            blueprints,
            instances,
            ledger,
            discounts,
            snapshots,
            provider,
            clock,
            settings,
            publish_lock: Mutex::new(()),
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Loads an instance joined with its blueprint into the effective view.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] when the instance or its blueprint is gone.
    pub async fn assembled_instance(
        &self,
        id: &InstanceId,
        preferred_lang: Option<&str>,
    ) -> CoreResult<AssembledInstance> {
        let instance = self
            .instances
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("event instance {id}")))?;
        let blueprint = self
            .blueprints
            .get(&instance.event_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("event {}", instance.event_id)))?;
        Ok(assemble_instance(&blueprint, &instance, preferred_lang))
    }

    /// A user's registration entry on an instance, for admin support views.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] when the instance does not exist.
    pub async fn user_registration_info(
        &self,
        instance_id: &InstanceId,
        uid: &Uid,
    ) -> CoreResult<Option<RegistrationDetails>> {
        let instance = self
            .instances
            .get(instance_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("event instance {instance_id}")))?;
        Ok(instance.registration_details.get(uid).cloned())
    }
}
