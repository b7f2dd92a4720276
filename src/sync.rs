//! Debounced write-through of layer settings.
//!
//! Rapid consecutive changes (dragging an opacity slider, toggling several
//! overlays) are coalesced: every [`SyncController::schedule`] replaces the
//! single pending snapshot and restarts the quiet-period timer. Only the
//! snapshot pending when the timer expires is written.
//!
//! Writes are serialized, and each write takes the newest pending snapshot at
//! the moment it runs, so a slow earlier write can never land after a newer
//! one.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::model::LayerSettings;
use crate::preferences::PreferenceStore;

/// Default quiet period before a scheduled write is persisted.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(500);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A cancellable one-shot timer.
///
/// At most one task is pending at a time: arming again aborts the previous
/// task if it is still waiting. Once the delay has elapsed the task is
/// detached and runs to completion even if the timer is re-armed.
#[derive(Default)]
pub struct Debouncer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, cancelling any pending task.
    ///
    /// Must be called from within a Tokio runtime. A task that has started
    /// may still be waiting on work it depends on (such as an earlier slow
    /// write) when the timer is re-armed; it then picks up whatever state is
    /// current once it proceeds, possibly before the new delay has elapsed.
    pub fn arm<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slot = lock(&self.handle);
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(task);
        }));
    }

    /// Abort the pending task. Returns whether one was still waiting.
    pub fn cancel(&self) -> bool {
        match lock(&self.handle).take() {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                was_pending
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.handle)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.handle).take() {
            handle.abort();
        }
    }
}

/// Observable outcome of persisted writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Message of the most recent failed write, cleared by the next success.
    pub last_error: Option<String>,
    pub last_persisted_at: Option<DateTime<Utc>>,
    /// Number of successful writes.
    pub writes: u64,
}

#[derive(Debug, Clone)]
struct PendingWrite {
    settings: LayerSettings,
    is_authenticated: bool,
}

struct SyncInner {
    store: PreferenceStore,
    quiet_period: Duration,
    debouncer: Debouncer,
    pending: Mutex<Option<PendingWrite>>,
    write_lock: tokio::sync::Mutex<()>,
    status: Mutex<SyncStatus>,
}

impl SyncInner {
    /// Write the pending snapshot, if any. Failures are recorded, not retried.
    async fn persist_pending(&self) -> Option<StoreResult<()>> {
        let _write = self.write_lock.lock().await;
        let write = lock(&self.pending).take()?;

        let result = self
            .store
            .save(&write.settings, write.is_authenticated)
            .await;

        let mut status = lock(&self.status);
        match &result {
            Ok(()) => {
                debug!(
                    is_authenticated = write.is_authenticated,
                    "Layer settings persisted"
                );
                status.last_error = None;
                status.last_persisted_at = Some(Utc::now());
                status.writes += 1;
            }
            Err(e) => {
                warn!(
                    is_authenticated = write.is_authenticated,
                    error = %e,
                    "Failed to persist layer settings"
                );
                status.last_error = Some(e.to_string());
            }
        }

        Some(result)
    }
}

/// Coalesces settings snapshots into debounced writes.
#[derive(Clone)]
pub struct SyncController {
    inner: Arc<SyncInner>,
}

impl SyncController {
    pub fn new(store: PreferenceStore) -> Self {
        Self::with_quiet_period(store, DEFAULT_QUIET_PERIOD)
    }

    pub fn with_quiet_period(store: PreferenceStore, quiet_period: Duration) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                store,
                quiet_period,
                debouncer: Debouncer::new(),
                pending: Mutex::new(None),
                write_lock: tokio::sync::Mutex::new(()),
                status: Mutex::new(SyncStatus::default()),
            }),
        }
    }

    /// Record `settings` as the snapshot to persist and restart the timer.
    ///
    /// Any snapshot scheduled earlier and not yet written is discarded.
    pub fn schedule(&self, settings: LayerSettings, is_authenticated: bool) {
        *lock(&self.inner.pending) = Some(PendingWrite {
            settings,
            is_authenticated,
        });

        let inner = Arc::clone(&self.inner);
        self.inner.debouncer.arm(self.inner.quiet_period, async move {
            inner.persist_pending().await;
        });
    }

    /// Persist the pending snapshot now instead of waiting for the timer.
    ///
    /// Succeeds trivially when nothing is pending.
    pub async fn flush(&self) -> StoreResult<()> {
        self.inner.debouncer.cancel();
        self.inner.persist_pending().await.unwrap_or(Ok(()))
    }

    /// Drop the pending snapshot without writing it.
    pub fn cancel(&self) -> Option<LayerSettings> {
        self.inner.debouncer.cancel();
        lock(&self.inner.pending).take().map(|write| write.settings)
    }

    pub fn has_pending(&self) -> bool {
        lock(&self.inner.pending).is_some()
    }

    pub fn status(&self) -> SyncStatus {
        lock(&self.inner.status).clone()
    }
}
