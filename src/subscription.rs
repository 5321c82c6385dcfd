// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Consumer-facing subscription handle.
//!
//! # Architecture
//!
//! ```text
//!            Subscription (handle)                   driver task
//!   ┌──────────────────────────────────┐     ┌──────────────────────────┐
//!   │ data() / error() / metrics() ... │     │ channel rx ─▶ Pipeline   │
//!   │ add_optimistic_update(..)        │     │ timers (backoff, batch,  │
//!   │ refresh() / reconnect() ─────────┼──▶  │   throttle, handshake)   │
//!   │ disconnect() ── abort ───────────┼──▶  │                          │
//!   └────────────────┬─────────────────┘     └────────────┬─────────────┘
//!                    │      watch::Sender<TableState>     │
//!                    └────────────────┬───────────────────┘
//!                                     ▼
//!                   mirror · optimistic · loading · error
//!                   connection state · metrics
//! ```
//!
//! All state lives in one `watch` value. Every mutation is a short
//! synchronous `send_modify`, so readers never observe a half-applied batch
//! and no lock is ever held across an `.await`. Lifecycle callbacks run after
//! the mutation returns.

use crate::config::SubscriptionConfig;
use crate::connection::{ConnectionManager, ConnectionState, LifecycleCallbacks, LifecycleEvent};
use crate::driver::{Command, Driver};
use crate::error::{Result, SyncError};
use crate::identity::SubscriptionId;
use crate::metrics::{MetricsTracker, SubscriptionMetrics};
use crate::mirror::MirrorStore;
use crate::optimistic::{OptimisticKind, OptimisticLayer, OptimisticUpdate};
use crate::record::Record;
use crate::source::{Channel, ChangeSource};
use crate::validation;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

// ═══════════════════════════════════════════════════════════════════════════════
// TableState: everything a consumer can observe
// ═══════════════════════════════════════════════════════════════════════════════

/// Reactive state of one subscription.
#[derive(Debug)]
pub struct TableState<R: Record> {
    pub(crate) mirror: MirrorStore<R>,
    pub(crate) optimistic: OptimisticLayer<R>,
    pub(crate) is_loading: bool,
    pub(crate) error: Option<SyncError>,
    pub(crate) connection: ConnectionManager,
    pub(crate) metrics: MetricsTracker,
}

impl<R: Record> TableState<R> {
    pub(crate) fn new(config: &SubscriptionConfig, id: &SubscriptionId) -> Self {
        Self {
            mirror: MirrorStore::new(),
            optimistic: OptimisticLayer::new(),
            is_loading: true,
            error: None,
            connection: ConnectionManager::new(id.as_str(), config.reconnect.to_policy()),
            metrics: MetricsTracker::new(config.metrics_window_duration()),
        }
    }

    /// Mirror merged with pending optimistic writes.
    pub fn data(&self) -> Vec<R> {
        self.optimistic.merge(&self.mirror)
    }

    /// Server-confirmed records only.
    pub fn mirror(&self) -> &MirrorStore<R> {
        &self.mirror
    }

    pub fn optimistic(&self) -> &OptimisticLayer<R> {
        &self.optimistic
    }

    /// True until the first snapshot resolves, and during `refresh()`.
    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&SyncError> {
        self.error.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.connection.is_reconnecting()
    }

    pub fn connection_attempts(&self) -> u32 {
        self.connection.attempts()
    }

    /// Counters as of now.
    pub fn metrics(&self) -> SubscriptionMetrics {
        self.metrics.snapshot(Instant::now())
    }

    pub(crate) fn sync_connection_counters(&mut self) {
        self.metrics
            .set_connection_counters(self.connection.error_count(), self.connection.reconnection_count());
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Shared: state + channel slot, owned jointly by handle and driver
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) struct Shared<R: Record> {
    pub(crate) id: SubscriptionId,
    pub(crate) config: SubscriptionConfig,
    pub(crate) state: watch::Sender<TableState<R>>,
    callbacks: LifecycleCallbacks,
    /// The one open channel, if any.
    channel: Mutex<Option<Box<dyn Channel>>>,
}

impl<R: Record> Shared<R> {
    /// Mutate state and notify watchers.
    pub(crate) fn update<T: Default>(&self, f: impl FnOnce(&mut TableState<R>) -> T) -> T {
        let mut out = T::default();
        self.state.send_modify(|state| out = f(state));
        out
    }

    pub(crate) fn dispatch(&self, events: &[LifecycleEvent]) {
        self.callbacks.dispatch(events);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.borrow().connection.state() == ConnectionState::Closed
    }

    /// Store a freshly opened channel, closing whatever it replaces.
    ///
    /// A channel that arrives after `disconnect()` is closed immediately.
    pub(crate) fn install_channel(&self, channel: Box<dyn Channel>) {
        let mut slot = self.channel.lock();
        if self.is_closed() {
            channel.close();
            return;
        }
        if let Some(old) = slot.replace(channel) {
            old.close();
        }
    }

    pub(crate) fn close_channel(&self) {
        if let Some(channel) = self.channel.lock().take() {
            channel.close();
        }
    }
}

impl<R: Record> Drop for Shared<R> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.get_mut().take() {
            channel.close();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Subscription handle
// ═══════════════════════════════════════════════════════════════════════════════

/// A live mirror of one (resource, filter) pair.
///
/// Dropping the handle disconnects the subscription.
pub struct Subscription<R: Record> {
    shared: Arc<Shared<R>>,
    commands: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Record> Subscription<R> {
    /// Validate `config` and start mirroring.
    ///
    /// Must be called from within a tokio runtime; outside one this returns
    /// [`SyncError::Configuration`]. Only configuration errors are returned;
    /// everything after activation lands in [`error()`](Self::error).
    pub fn open<S>(config: SubscriptionConfig, source: Arc<S>, callbacks: LifecycleCallbacks) -> Result<Self>
    where
        S: ChangeSource<R>,
    {
        validation::validate(&config)?;
        let runtime = Handle::try_current()
            .map_err(|_| SyncError::Configuration("subscriptions must be opened within a tokio runtime".into()))?;

        let id = config.subscription_id();
        let (state, _) = watch::channel(TableState::new(&config, &id));
        let shared = Arc::new(Shared {
            id: id.clone(),
            config,
            state,
            callbacks,
            channel: Mutex::new(None),
        });

        let (commands, command_rx) = mpsc::unbounded_channel();
        let driver = Driver::new(Arc::clone(&shared), source, command_rx);
        let task = runtime.spawn(driver.run());

        info!(subscription_id = %id, resource = %shared.config.resource, "Subscription opened");

        Ok(Self {
            shared,
            commands,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.shared.id
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.shared.config
    }

    // =========================================================================
    // Reactive state
    // =========================================================================

    /// Mirror merged with pending optimistic writes.
    pub fn data(&self) -> Vec<R> {
        self.shared.state.borrow().data()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.state.borrow().is_loading()
    }

    pub fn error(&self) -> Option<SyncError> {
        self.shared.state.borrow().error().cloned()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().is_connected()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.shared.state.borrow().is_reconnecting()
    }

    /// Consecutive failed connection attempts.
    pub fn connection_attempts(&self) -> u32 {
        self.shared.state.borrow().connection_attempts()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state.borrow().connection_state()
    }

    pub fn metrics(&self) -> SubscriptionMetrics {
        self.shared.state.borrow().metrics()
    }

    /// Receiver that is notified on every state change.
    pub fn watch(&self) -> watch::Receiver<TableState<R>> {
        self.shared.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Re-fetch the snapshot. The channel stays open.
    pub fn refresh(&self) -> Result<()> {
        self.send(Command::Refresh)
    }

    /// Reset the retry counter and reconnect now, skipping any backoff wait.
    ///
    /// Also the way out of `Failed`.
    pub fn reconnect(&self) -> Result<()> {
        if let Some(err) = self.shared.update(|s| s.connection.manual_reconnect().err()) {
            return Err(err);
        }
        self.send(Command::Reconnect)
    }

    /// Close the channel, cancel every timer and enter `Closed`. Idempotent.
    pub fn disconnect(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }

        let events = self.shared.update(|s| {
            s.is_loading = false;
            s.connection.close()
        });
        self.shared.close_channel();

        if !events.is_empty() {
            debug!(subscription_id = %self.shared.id, "Driver stopped");
        }
        self.shared.dispatch(&events);
    }

    /// Clear the current error.
    pub fn clear_error(&self) {
        self.shared.update(|s| s.error = None);
    }

    fn send(&self, command: Command) -> Result<()> {
        if self.shared.is_closed() {
            return Err(SyncError::Closed(self.shared.id.to_string()));
        }
        self.commands
            .send(command)
            .map_err(|_| SyncError::Closed(self.shared.id.to_string()))
    }

    // =========================================================================
    // Optimistic writes
    // =========================================================================

    /// Show a local write immediately. Reusing `local_id` replaces the entry.
    pub fn add_optimistic_update(&self, local_id: impl Into<String>, kind: OptimisticKind, data: R) {
        let update = OptimisticUpdate::new(local_id, kind, data);
        self.shared.update(|s| s.optimistic.add(update));
    }

    /// Roll back a local write.
    pub fn remove_optimistic_update(&self, local_id: &str) -> bool {
        self.shared.update(|s| s.optimistic.remove(local_id))
    }

    /// Replace the data of a pending write.
    pub fn update_optimistic_update(&self, local_id: &str, data: R) -> bool {
        self.shared.update(|s| s.optimistic.update(local_id, data))
    }

    /// Mark a write as accepted by the write API. It stays visible until the
    /// stream confirms it.
    pub fn confirm_optimistic_update(&self, local_id: &str) -> bool {
        self.shared.update(|s| s.optimistic.confirm(local_id))
    }

    /// Pending optimistic writes, in submission order.
    pub fn optimistic_updates(&self) -> Vec<OptimisticUpdate<R>> {
        self.shared.state.borrow().optimistic().entries().to_vec()
    }
}

impl<R: Record> Drop for Subscription<R> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl<R: Record> std::fmt::Debug for Subscription<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.shared.id)
            .field("resource", &self.shared.config.resource)
            .field("state", &self.connection_state())
            .finish()
    }
}
