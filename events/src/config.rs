//! Configuration for the event core, loaded from environment variables.

use chapel_paypal::{Mode, PayPalConfig};
use std::env;
use std::time::Duration;

/// Process-level configuration.
///
/// Provider credentials are required; everything else has a development
/// default.
#[derive(Clone, Debug)]
pub struct Config {
    /// Provider environment (`PAYPAL_MODE`: `sandbox` | `live`).
    pub paypal_mode: Mode,
    /// Provider client id (`PAYPAL_CLIENT_ID`).
    pub paypal_client_id: String,
    /// Provider client secret (`PAYPAL_CLIENT_SECRET`).
    pub paypal_client_secret: String,
    /// Frontend base URL used to build return/cancel URLs (`FRONTEND_URL`).
    pub frontend_url: String,
    /// Directory deleted-event snapshots are written to (`SNAPSHOT_DIR`).
    pub snapshot_dir: String,
    /// Provider HTTP timeout in seconds (`PAYPAL_TIMEOUT_SECS`).
    pub provider_timeout: Duration,
}

impl Config {
    /// Loads configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns a message naming the missing variable when provider
    /// credentials are not configured.
    pub fn from_env() -> Result<Self, String> {
        let paypal_client_id = env::var("PAYPAL_CLIENT_ID")
            .map_err(|_| "PAYPAL_CLIENT_ID is not set".to_string())?;
        let paypal_client_secret = env::var("PAYPAL_CLIENT_SECRET")
            .map_err(|_| "PAYPAL_CLIENT_SECRET is not set".to_string())?;

        Ok(Self {
            paypal_mode: Mode::from_str_lossy(
                &env::var("PAYPAL_MODE").unwrap_or_else(|_| "sandbox".to_string()),
            ),
            paypal_client_id,
            paypal_client_secret,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            snapshot_dir: env::var("SNAPSHOT_DIR")
                .unwrap_or_else(|_| "deleted_event_records".to_string()),
            provider_timeout: Duration::from_secs(
                env::var("PAYPAL_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        })
    }

    /// Provider client configuration derived from this config.
    #[must_use]
    pub fn paypal(&self) -> PayPalConfig {
        PayPalConfig {
            mode: self.paypal_mode,
            client_id: self.paypal_client_id.clone(),
            client_secret: self.paypal_client_secret.clone(),
            timeout: self.provider_timeout,
        }
    }
}
