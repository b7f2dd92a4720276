//! Preference store adapter.
//!
//! Reads and writes [`LayerSettings`] to exactly one of two backends, chosen
//! per call from the caller's authentication flag:
//!
//! - guests: the local key-value store under [`LAYER_SETTINGS_KEY`]
//! - authenticated users: the remote preferences endpoint
//!
//! It also carries the one-shot guest-to-authenticated migration.
//!
//! # Migration is not atomic
//!
//! The migration writes the remote record first and deletes the local copy
//! second. A failure between the two leaves the local copy behind. That copy
//! is harmless: an authenticated caller never reads local storage, and
//! running the migration again simply repeats the same remote write.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::StoreResult;
use crate::model::{LAYER_SETTINGS_KEY, LayerSettings, SyncTarget};
use crate::remote::PreferencesApi;
use crate::storage::KeyValueStore;

/// Result of [`PreferenceStore::migrate_guest_to_authenticated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No usable guest record existed.
    NothingToMigrate,
    /// Guest record written remotely and removed locally.
    Migrated,
    /// Guest record written remotely, but the local copy could not be removed.
    MigratedWithResidue,
}

/// Reads and writes layer settings to the local or remote backend.
#[derive(Clone)]
pub struct PreferenceStore {
    local: Arc<dyn KeyValueStore>,
    remote: Arc<dyn PreferencesApi>,
}

impl PreferenceStore {
    pub fn new(local: Arc<dyn KeyValueStore>, remote: Arc<dyn PreferencesApi>) -> Self {
        Self { local, remote }
    }

    /// Load settings from the backend selected by `is_authenticated`.
    ///
    /// Remote failures are returned unchanged; falling back to defaults is the
    /// caller's decision. A missing or corrupt local record is not an error
    /// and yields the default record.
    #[instrument(skip(self))]
    pub async fn load(&self, is_authenticated: bool) -> StoreResult<LayerSettings> {
        match SyncTarget::for_auth(is_authenticated) {
            SyncTarget::Remote => {
                let settings = self.remote.fetch_preferences().await?;
                Ok(settings.normalized())
            }
            SyncTarget::Local => Ok(self.read_local().await?.unwrap_or_default()),
        }
    }

    /// Write settings to the backend selected by `is_authenticated`.
    #[instrument(skip(self, settings))]
    pub async fn save(&self, settings: &LayerSettings, is_authenticated: bool) -> StoreResult<()> {
        match SyncTarget::for_auth(is_authenticated) {
            SyncTarget::Remote => self.remote.put_preferences(settings).await,
            SyncTarget::Local => {
                let encoded = serde_json::to_string(settings)?;
                self.local.set(LAYER_SETTINGS_KEY, &encoded).await
            }
        }
    }

    /// Move the guest record to the remote store and delete the local copy.
    ///
    /// A remote write failure aborts with the local copy intact, so the
    /// migration can be retried. A local delete failure after a successful
    /// remote write is logged and reported as
    /// [`MigrationOutcome::MigratedWithResidue`].
    #[instrument(skip(self))]
    pub async fn migrate_guest_to_authenticated(&self) -> StoreResult<MigrationOutcome> {
        let Some(settings) = self.read_local().await? else {
            debug!("No guest layer settings to migrate");
            return Ok(MigrationOutcome::NothingToMigrate);
        };

        self.remote.put_preferences(&settings).await?;

        match self.local.remove(LAYER_SETTINGS_KEY).await {
            Ok(()) => {
                info!("Guest layer settings migrated to profile");
                Ok(MigrationOutcome::Migrated)
            }
            Err(e) => {
                warn!(error = %e, "Guest layer settings migrated but local copy was not removed");
                Ok(MigrationOutcome::MigratedWithResidue)
            }
        }
    }

    /// Read and decode the local record. Corrupt data counts as absent.
    async fn read_local(&self) -> StoreResult<Option<LayerSettings>> {
        let Some(raw) = self.local.get(LAYER_SETTINGS_KEY).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<LayerSettings>(&raw) {
            Ok(settings) => Ok(Some(settings.normalized())),
            Err(e) => {
                debug!(error = %e, "Ignoring unparsable local layer settings");
                Ok(None)
            }
        }
    }
}
