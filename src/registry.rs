// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Subscription registry.
//!
//! Guarantees at most one open channel per subscription identity. Opening the
//! same (resource, filter) pair twice attaches a second consumer to the
//! existing subscription, so every consumer of that pair shares one mirror.
//!
//! Each call to [`SubscriptionRegistry::open`] returns its own
//! [`SubscriptionHandle`]. Dropping a handle (or calling its `disconnect()`)
//! detaches only that consumer; the channel closes and the entry is removed
//! when the last consumer leaves.
//!
//! The registry is an ordinary value owned by the caller; there is no global
//! state. Dropping it (or calling [`SubscriptionRegistry::dispose`]) closes
//! every subscription it holds, whatever handles are still alive.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use table_sync_engine::{LifecycleCallbacks, NoOpSource, SubscriptionConfig, SubscriptionRegistry};
//! use table_sync_engine::Record;
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone)]
//! struct Listing { id: i64 }
//! impl Record for Listing {
//!     type Id = i64;
//!     fn id(&self) -> i64 { self.id }
//! }
//!
//! let registry: SubscriptionRegistry<Listing, NoOpSource> = SubscriptionRegistry::new(Arc::new(NoOpSource));
//! let a = registry.open(SubscriptionConfig::new("listings"), LifecycleCallbacks::new())?;
//! let b = registry.open(SubscriptionConfig::new("listings"), LifecycleCallbacks::new())?;
//! assert!(Arc::ptr_eq(a.subscription(), b.subscription()));
//!
//! // `b` keeps the channel open
//! a.disconnect();
//! assert!(!b.is_closed());
//! # Ok(())
//! # }
//! ```

use crate::config::SubscriptionConfig;
use crate::connection::LifecycleCallbacks;
use crate::error::Result;
use crate::identity::SubscriptionId;
use crate::metrics;
use crate::record::Record;
use crate::source::ChangeSource;
use crate::subscription::Subscription;
use crate::validation;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// A registered subscription and how many handles are attached to it.
struct Registered<R: Record> {
    subscription: Arc<Subscription<R>>,
    consumers: usize,
}

type Entries<R> = DashMap<SubscriptionId, Registered<R>>;

/// Owns every subscription opened against one change source.
pub struct SubscriptionRegistry<R: Record, S: ChangeSource<R>> {
    source: Arc<S>,
    /// Open subscriptions (keyed by identity)
    entries: Arc<Entries<R>>,
}

impl<R: Record, S: ChangeSource<R>> SubscriptionRegistry<R, S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Open a subscription, or attach to the open one with the same identity.
    ///
    /// Configuration is validated first; an invalid config never reaches the
    /// source. When an existing subscription is reused, `callbacks` are
    /// ignored (the first opener's hooks stay in effect).
    pub fn open(&self, config: SubscriptionConfig, callbacks: LifecycleCallbacks) -> Result<SubscriptionHandle<R>> {
        validation::validate(&config)?;
        let id = config.subscription_id();

        let subscription = match self.entries.entry(id.clone()) {
            Entry::Occupied(mut entry) if !entry.get().subscription.is_closed() => {
                let registered = entry.get_mut();
                registered.consumers += 1;
                debug!(subscription_id = %id, consumers = registered.consumers, "Reusing open subscription");
                return Ok(self.handle(Arc::clone(&registered.subscription)));
            }
            // Replace a subscription that was force-closed
            Entry::Occupied(mut entry) => {
                let fresh = Arc::new(Subscription::open(config, Arc::clone(&self.source), callbacks)?);
                entry.insert(Registered {
                    subscription: Arc::clone(&fresh),
                    consumers: 1,
                });
                fresh
            }
            Entry::Vacant(entry) => {
                let fresh = Arc::new(Subscription::open(config, Arc::clone(&self.source), callbacks)?);
                entry.insert(Registered {
                    subscription: Arc::clone(&fresh),
                    consumers: 1,
                });
                fresh
            }
        };

        info!(subscription_id = %id, "Registered subscription");
        metrics::set_active_subscriptions(self.entries.len());
        Ok(self.handle(subscription))
    }

    fn handle(&self, subscription: Arc<Subscription<R>>) -> SubscriptionHandle<R> {
        SubscriptionHandle {
            subscription,
            entries: Arc::downgrade(&self.entries),
            detached: AtomicBool::new(false),
        }
    }

    /// Look up an open subscription. Does not attach a consumer.
    pub fn get(&self, id: &SubscriptionId) -> Option<Arc<Subscription<R>>> {
        self.entries
            .get(id)
            .map(|r| Arc::clone(&r.value().subscription))
            .filter(|sub| !sub.is_closed())
    }

    /// Number of handles attached to a subscription.
    pub fn consumers(&self, id: &SubscriptionId) -> usize {
        self.entries.get(id).map_or(0, |r| r.value().consumers)
    }

    /// Disconnect and forget one subscription for every consumer.
    /// Returns `false` if unknown.
    pub fn close(&self, id: &SubscriptionId) -> bool {
        let removed = self.entries.remove(id);
        metrics::set_active_subscriptions(self.entries.len());
        match removed {
            Some((_, registered)) => {
                registered.subscription.disconnect();
                true
            }
            None => false,
        }
    }

    /// Ids of all registered subscriptions.
    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    /// Number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Disconnect everything.
    pub fn dispose(&self) {
        let ids = self.ids();
        for id in &ids {
            if let Some((_, registered)) = self.entries.remove(id) {
                registered.subscription.disconnect();
            }
        }
        metrics::set_active_subscriptions(0);
        if !ids.is_empty() {
            info!(count = ids.len(), "Disposed subscription registry");
        }
    }
}

impl<R: Record, S: ChangeSource<R>> Drop for SubscriptionRegistry<R, S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Consumer handle
// ═══════════════════════════════════════════════════════════════════════════════

/// One consumer's attachment to a shared subscription.
///
/// Derefs to [`Subscription`] for reads and control. [`disconnect`](Self::disconnect)
/// and `Drop` detach this consumer only; the last one out closes the channel.
pub struct SubscriptionHandle<R: Record> {
    subscription: Arc<Subscription<R>>,
    entries: Weak<Entries<R>>,
    detached: AtomicBool,
}

impl<R: Record> SubscriptionHandle<R> {
    /// The shared subscription behind this handle.
    pub fn subscription(&self) -> &Arc<Subscription<R>> {
        &self.subscription
    }

    /// Detach this consumer. Idempotent.
    ///
    /// The subscription is disconnected and leaves the registry once no other
    /// handle is attached. Use [`SubscriptionRegistry::close`] to close it for
    /// everyone.
    pub fn disconnect(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        // Registry already gone: dispose closed everything
        let Some(entries) = self.entries.upgrade() else {
            return;
        };

        let id = self.subscription.id();
        let last = match entries.entry(id.clone()) {
            Entry::Occupied(mut entry) if Arc::ptr_eq(&entry.get().subscription, &self.subscription) => {
                let remaining = {
                    let registered = entry.get_mut();
                    registered.consumers = registered.consumers.saturating_sub(1);
                    registered.consumers
                };
                if remaining == 0 {
                    entry.remove();
                } else {
                    debug!(subscription_id = %id, consumers = remaining, "Consumer detached");
                }
                remaining == 0
            }
            // Closed and replaced, or already removed
            _ => false,
        };

        if last {
            metrics::set_active_subscriptions(entries.len());
            info!(subscription_id = %id, "Last consumer detached");
            self.subscription.disconnect();
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }
}

impl<R: Record> Deref for SubscriptionHandle<R> {
    type Target = Subscription<R>;

    fn deref(&self) -> &Subscription<R> {
        &self.subscription
    }
}

impl<R: Record> std::fmt::Debug for SubscriptionHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", self.subscription.id())
            .field("detached", &self.is_detached())
            .finish()
    }
}

impl<R: Record> Drop for SubscriptionHandle<R> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
