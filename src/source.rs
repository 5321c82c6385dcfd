// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backing-store integration traits.
//!
//! The engine consumes two primitives from whatever store it mirrors:
//!
//! 1. A one-shot snapshot query ([`ChangeSource::fetch_snapshot`])
//! 2. A push subscription ([`ChangeSource::subscribe_changes`]) that delivers
//!    change events and lifecycle signals through a [`ChannelSink`]
//!
//! Any push transport (WebSocket, SSE, long-poll, an in-process broadcast)
//! can back a source. The returned [`Channel`] is only a close capability;
//! the data flows through the sink.
//!
//! # Example
//!
//! ```rust,no_run
//! use table_sync_engine::source::{
//!     BoxFuture, Channel, ChannelRequest, ChannelSignal, ChannelSink, ChangeSource,
//! };
//! use table_sync_engine::Record;
//!
//! #[derive(Debug, Clone)]
//! struct Row { id: u64 }
//! impl Record for Row {
//!     type Id = u64;
//!     fn id(&self) -> u64 { self.id }
//! }
//!
//! struct Quiet;
//! impl Channel for Quiet {
//!     fn close(&self) {}
//! }
//!
//! struct MyBackend;
//!
//! impl ChangeSource<Row> for MyBackend {
//!     fn fetch_snapshot(&self, _resource: &str, _filter: Option<&str>) -> BoxFuture<'_, Vec<Row>> {
//!         Box::pin(async move { Ok(vec![Row { id: 1 }]) })
//!     }
//!
//!     fn subscribe_changes(
//!         &self,
//!         _request: &ChannelRequest,
//!         sink: ChannelSink<Row>,
//!     ) -> BoxFuture<'_, Box<dyn Channel>> {
//!         Box::pin(async move {
//!             sink.signal(ChannelSignal::Subscribed);
//!             Ok(Box::new(Quiet) as Box<dyn Channel>)
//!         })
//!     }
//! }
//! ```

use crate::event::{ChangeEvent, ChangeKind};
use crate::identity::SubscriptionId;
use crate::record::Record;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

/// Result type for backing-store operations.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = SourceResult<T>> + Send + 'a>>;

/// Simplified error for backing-store operations.
#[derive(Debug, Clone)]
pub struct SourceError(pub String);

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SourceError {}

/// What a channel should subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Identity of the owning subscription (doubles as the channel name)
    pub subscription_id: SubscriptionId,
    /// Resource (table) name
    pub resource: String,
    /// Filter expression, passed through verbatim
    pub filter: Option<String>,
    /// Change kinds the subscriber cares about
    pub event_kinds: Vec<ChangeKind>,
}

impl ChannelRequest {
    /// Whether events of `kind` were requested.
    pub fn wants(&self, kind: ChangeKind) -> bool {
        self.event_kinds.contains(&kind)
    }
}

/// Lifecycle signal emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    /// The subscription is confirmed; events will follow.
    Subscribed,
    /// Transport error (socket drop, server rejection, ...).
    Error(String),
    /// The transport gave up waiting (join or heartbeat timeout).
    TimedOut,
    /// The transport closed the channel.
    Closed,
}

/// Message flowing from a transport to the subscription driver.
#[derive(Debug, Clone)]
pub enum ChannelMessage<R: Record> {
    /// A confirmed change.
    Event(ChangeEvent<R>),
    /// A lifecycle transition.
    Lifecycle(ChannelSignal),
}

/// Delivery end handed to [`ChangeSource::subscribe_changes`].
///
/// Cloning is cheap. Once the subscription stops listening (disconnect or a
/// newer channel replaced this one) every send returns `false`, which lets
/// transports stop work for dead channels.
#[derive(Debug)]
pub struct ChannelSink<R: Record> {
    tx: mpsc::UnboundedSender<ChannelMessage<R>>,
}

impl<R: Record> Clone for ChannelSink<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<R: Record> ChannelSink<R> {
    /// Create a sink and the receiving end the driver listens on.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<ChannelMessage<R>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver a change event. Returns `false` if nobody is listening.
    pub fn send_event(&self, event: ChangeEvent<R>) -> bool {
        self.tx.send(ChannelMessage::Event(event)).is_ok()
    }

    /// Deliver a lifecycle signal. Returns `false` if nobody is listening.
    pub fn signal(&self, signal: ChannelSignal) -> bool {
        self.tx.send(ChannelMessage::Lifecycle(signal)).is_ok()
    }

    /// Check if the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Close capability for an open push channel.
pub trait Channel: Send + Sync {
    /// Release the channel. Must not block; called synchronously from
    /// `disconnect()` and when a reconnect replaces the channel.
    fn close(&self);
}

/// Trait defining what the engine needs from the backing store.
///
/// The caller provides an implementation; tests use in-memory mocks.
pub trait ChangeSource<R: Record>: Send + Sync + 'static {
    /// One-shot query for the current contents of `resource`.
    fn fetch_snapshot(&self, resource: &str, filter: Option<&str>) -> BoxFuture<'_, Vec<R>>;

    /// Open a push subscription.
    ///
    /// The returned future resolves once the channel exists (not necessarily
    /// confirmed). Confirmation is signalled with [`ChannelSignal::Subscribed`]
    /// on `sink`.
    fn subscribe_changes(
        &self,
        request: &ChannelRequest,
        sink: ChannelSink<R>,
    ) -> BoxFuture<'_, Box<dyn Channel>>;
}

/// No-op source: empty snapshot, a channel that confirms and stays silent.
///
/// Handy for wiring tests and for running the engine with only optimistic
/// data.
pub struct NoOpSource;

struct NoOpChannel;

impl Channel for NoOpChannel {
    fn close(&self) {}
}

impl<R: Record> ChangeSource<R> for NoOpSource {
    fn fetch_snapshot(&self, _resource: &str, _filter: Option<&str>) -> BoxFuture<'_, Vec<R>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn subscribe_changes(
        &self,
        _request: &ChannelRequest,
        sink: ChannelSink<R>,
    ) -> BoxFuture<'_, Box<dyn Channel>> {
        Box::pin(async move {
            sink.signal(ChannelSignal::Subscribed);
            Ok(Box::new(NoOpChannel) as Box<dyn Channel>)
        })
    }
}
