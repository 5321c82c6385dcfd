// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Table Sync Engine
//!
//! Keeps an in-memory mirror of a remote table consistent with a push-based
//! change stream, layers optimistic local writes on top, smooths bursts with
//! batching or throttling, and reconnects with bounded exponential backoff.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                            table-sync-engine                              │
//! │                                                                           │
//! │  ┌──────────────────────┐   open()   ┌──────────────────────────────────┐ │
//! │  │ SubscriptionRegistry │──────────► │ Subscription (handle + driver)   │ │
//! │  │ (one per identity)   │            │                                  │ │
//! │  └──────────────────────┘            │  ChangeSource ──► Pipeline ──┐   │ │
//! │                                      │  (snapshot +     (batch /    │   │ │
//! │                                      │   channel)        throttle)  ▼   │ │
//! │                                      │            MirrorStore ◄── apply │ │
//! │                                      │                 │                │ │
//! │                                      │  OptimisticLayer ─► data()       │ │
//! │                                      │  ConnectionManager (backoff)     │ │
//! │                                      └──────────────────────────────────┘ │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine is agnostic to the record type ([`Record`]) and to the
//! transport ([`ChangeSource`]). It never performs writes itself; optimistic
//! updates only describe writes the caller sends elsewhere.
//!
//! Each registry `open()` returns a [`SubscriptionHandle`] for one consumer.
//! The shared channel stays up while any handle is attached.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use table_sync_engine::{LifecycleCallbacks, NoOpSource, Record, SubscriptionConfig, SubscriptionRegistry};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[derive(Debug, Clone)]
//! struct Listing { id: i64, title: String }
//!
//! impl Record for Listing {
//!     type Id = i64;
//!     fn id(&self) -> i64 { self.id }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = SubscriptionRegistry::<Listing, _>::new(Arc::new(NoOpSource));
//!     let config = SubscriptionConfig::new("listings")
//!         .with_filter("status=eq.active")
//!         .with_batch_delay(Duration::from_millis(100));
//!
//!     let listings = registry
//!         .open(config, LifecycleCallbacks::new().on_connect(|| println!("live")))
//!         .expect("valid config");
//!
//!     let mut changes = listings.watch();
//!     while changes.changed().await.is_ok() {
//!         println!("{} listings", changes.borrow().data().len());
//!     }
//! }
//! ```

pub mod config;
pub mod connection;
mod driver;
pub mod error;
pub mod event;
pub mod identity;
pub mod metrics;
pub mod mirror;
pub mod optimistic;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod resilience;
pub mod source;
pub mod subscription;
pub mod validation;

// Re-exports for convenience
pub use config::{PipelineConfig, ReconnectConfig, SubscriptionConfig};
pub use connection::{ConnectionState, LifecycleCallbacks};
pub use error::{Result, SyncError};
pub use event::{ChangeEvent, ChangeKind};
pub use identity::SubscriptionId;
pub use metrics::SubscriptionMetrics;
pub use mirror::{ApplyOutcome, MirrorStore};
pub use optimistic::{OptimisticKind, OptimisticUpdate};
pub use pipeline::PipelineMode;
pub use record::Record;
pub use registry::{SubscriptionHandle, SubscriptionRegistry};
pub use resilience::ReconnectPolicy;
pub use source::{Channel, ChangeSource, ChannelRequest, ChannelSignal, ChannelSink, NoOpSource, SourceError};
pub use subscription::{Subscription, TableState};
