//! The settings state machine.
//!
//! [`SettingsController`] owns the canonical in-memory [`LayerSettings`]. It
//! is the only writer: callers read snapshots through
//! [`SettingsController::settings`] and change them only through the
//! mutation methods.
//!
//! # States
//!
//! - **uninitialized**: before the first [`SettingsController::initialize`]
//! - **loaded**: after `initialize` resolved, whether the load succeeded or
//!   fell back to defaults
//!
//! Mutations are synchronous and always succeed against the in-memory value,
//! loaded or not. Each one swaps in a new `Arc<LayerSettings>`, so a reader
//! holding an earlier snapshot never sees a half-applied change.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, instrument, warn};

use crate::error::StoreResult;
use crate::model::{BaseMap, LayerSettings, Overlay};
use crate::preferences::PreferenceStore;
use crate::sync::{SyncController, SyncStatus};

#[derive(Debug)]
struct SettingsState {
    current: Arc<LayerSettings>,
    loaded: bool,
    /// Bumped on every in-memory write.
    revision: u64,
    last_error: Option<String>,
}

/// Holds the canonical layer settings and persists changes through the
/// debounced [`SyncController`].
pub struct SettingsController {
    store: PreferenceStore,
    sync: SyncController,
    state: RwLock<SettingsState>,
    init_lock: tokio::sync::Mutex<()>,
}

impl SettingsController {
    pub fn new(store: PreferenceStore, sync: SyncController) -> Self {
        Self {
            store,
            sync,
            state: RwLock::new(SettingsState {
                current: Arc::new(LayerSettings::default()),
                loaded: false,
                revision: 0,
                last_error: None,
            }),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SettingsState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SettingsState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load settings from the backend selected by `is_authenticated`.
    ///
    /// No-op once loaded. A failed load falls back to defaults and records
    /// the error; the controller is marked loaded either way so the UI is
    /// never blocked. If a mutation lands while the load is in flight, the
    /// mutated value is kept and the loaded record is discarded.
    #[instrument(skip(self))]
    pub async fn initialize(&self, is_authenticated: bool) {
        // Concurrent callers wait here and then see `loaded`
        let _init = self.init_lock.lock().await;

        let revision_at_start = {
            let state = self.read();
            if state.loaded {
                return;
            }
            state.revision
        };

        // Load, falling back to defaults
        let (settings, error) = match self.store.load(is_authenticated).await {
            Ok(settings) => (settings, None),
            Err(e) => {
                warn!(error = %e, "Failed to load layer settings, using defaults");
                (LayerSettings::default(), Some(e.to_string()))
            }
        };

        // Apply unless a mutation got in first
        let mut state = self.write();
        if state.revision == revision_at_start {
            state.current = Arc::new(settings);
        } else {
            debug!("Settings changed during load, keeping in-memory value");
        }
        state.last_error = error;
        state.loaded = true;

        info!(base_map = ?state.current.base_map, "Layer settings initialized");
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> Arc<LayerSettings> {
        Arc::clone(&self.read().current)
    }

    pub fn is_loaded(&self) -> bool {
        self.read().loaded
    }

    /// Error recorded by the last failed load, if any.
    pub fn last_error(&self) -> Option<String> {
        self.read().last_error.clone()
    }

    /// Status of persisted writes.
    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    /// Replace the record with `f(current)`, copy-on-write.
    fn apply(&self, f: impl FnOnce(LayerSettings) -> LayerSettings) -> Arc<LayerSettings> {
        let mut state = self.write();
        let next = Arc::new(f(LayerSettings::clone(&state.current)));
        state.current = Arc::clone(&next);
        state.revision += 1;
        next
    }

    fn apply_and_schedule(
        &self,
        is_authenticated: bool,
        f: impl FnOnce(LayerSettings) -> LayerSettings,
    ) {
        let next = self.apply(f);
        self.sync.schedule(LayerSettings::clone(&next), is_authenticated);
    }

    /// Flip an overlay on or off and schedule a persist.
    pub fn toggle_overlay(&self, overlay: Overlay, is_authenticated: bool) {
        debug!(%overlay, "Toggling overlay");
        self.apply_and_schedule(is_authenticated, |s| s.with_overlay_toggled(overlay));
    }

    /// Switch the base map and schedule a persist.
    pub fn set_base_map(&self, base_map: BaseMap, is_authenticated: bool) {
        debug!(?base_map, "Setting base map");
        self.apply_and_schedule(is_authenticated, |s| s.with_base_map(base_map));
    }

    /// Set an overlay's opacity, clamped to `[0, 100]`, and schedule a persist.
    ///
    /// Returns `false` without changing anything for overlays that have no
    /// transparency.
    pub fn set_opacity(&self, overlay: Overlay, value: i64, is_authenticated: bool) -> bool {
        if !overlay.supports_opacity() {
            warn!(%overlay, "Overlay does not support opacity");
            return false;
        }
        debug!(%overlay, value, "Setting overlay opacity");
        self.apply_and_schedule(is_authenticated, |s| s.with_opacity(overlay, value));
        true
    }

    /// Restore the default record. Does not schedule a persist.
    pub fn reset(&self) {
        debug!("Resetting layer settings");
        self.apply(|_| LayerSettings::default());
    }

    /// Persist any pending change immediately.
    ///
    /// Call before running the guest-to-authenticated migration so a pending
    /// guest write cannot land after it.
    pub async fn flush(&self) -> StoreResult<()> {
        self.sync.flush().await
    }

    /// Discard any pending, unwritten change.
    pub fn cancel_pending(&self) -> bool {
        self.sync.cancel().is_some()
    }
}
