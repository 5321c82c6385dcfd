// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-subscription driver task.
//!
//! One task per subscription owns the channel receiver, the update pipeline
//! and every timer. It processes one input at a time:
//!
//! ```text
//! loop select! (biased) {
//!     command        ─▶ refresh snapshot / reconnect now
//!     channel msg    ─▶ lifecycle signal or change event ─▶ Pipeline
//!     flush deadline ─▶ Pipeline::poll ─▶ mirror
//!     backoff timer  ─▶ connect
//!     handshake      ─▶ ChannelTimeout
//! }
//! ```
//!
//! # Cancellation
//!
//! `disconnect()` aborts the task. Timers are plain `sleep_until` futures
//! inside the loop, so aborting drops all of them at once.
//!
//! # Stale Events
//!
//! Each connection attempt creates a fresh sink/receiver pair and drops the
//! previous receiver, so anything a replaced channel still sends is lost
//! instead of being applied out of order.

use crate::connection::FailureOutcome;
use crate::error::SyncError;
use crate::event::ChangeEvent;
use crate::metrics;
use crate::pipeline::Pipeline;
use crate::record::Record;
use crate::source::{ChangeSource, ChannelMessage, ChannelRequest, ChannelSignal, ChannelSink};
use crate::subscription::Shared;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn, Instrument};

/// Control requests from the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Refresh,
    Reconnect,
}

pub(crate) struct Driver<R: Record, S: ChangeSource<R>> {
    shared: Arc<Shared<R>>,
    source: Arc<S>,
    commands: mpsc::UnboundedReceiver<Command>,
    pipeline: Pipeline<ChangeEvent<R>>,
    request: ChannelRequest,
    /// Receiver of the current channel (None while disconnected).
    messages: Option<mpsc::UnboundedReceiver<ChannelMessage<R>>>,
    /// When the next automatic reconnection is due.
    reconnect_at: Option<Instant>,
    /// Deadline for the current channel to confirm.
    connect_deadline: Option<Instant>,
}

impl<R: Record, S: ChangeSource<R>> Driver<R, S> {
    pub(crate) fn new(
        shared: Arc<Shared<R>>,
        source: Arc<S>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let config = &shared.config;
        let request = ChannelRequest {
            subscription_id: shared.id.clone(),
            resource: config.resource.clone(),
            filter: config.filter.clone().filter(|f| !f.trim().is_empty()),
            event_kinds: config.event_kinds.clone(),
        };
        let pipeline = Pipeline::new(config.pipeline.mode());

        Self {
            shared,
            source,
            commands,
            pipeline,
            request,
            messages: None,
            reconnect_at: None,
            connect_deadline: None,
        }
    }

    /// Run until disconnected or the handle is dropped.
    pub(crate) async fn run(mut self) {
        let span = tracing::info_span!(
            "subscription",
            subscription_id = %self.shared.id,
            resource = %self.request.resource
        );

        async move {
            info!("Starting subscription driver");

            // Channel first so no change between snapshot and subscribe is missed
            self.connect().await;
            if !self.shared.is_closed() {
                self.load_snapshot().await;
            }

            loop {
                if self.shared.is_closed() {
                    break;
                }

                let flush_at = self.pipeline.next_deadline();
                let reconnect_at = self.reconnect_at;
                let connect_deadline = self.connect_deadline;

                tokio::select! {
                    biased;

                    command = self.commands.recv() => match command {
                        Some(Command::Refresh) => self.load_snapshot().await,
                        Some(Command::Reconnect) => {
                            self.reconnect_at = None;
                            self.connect().await;
                        }
                        None => {
                            debug!("Handle dropped, stopping driver");
                            break;
                        }
                    },

                    message = next_message(&mut self.messages) => self.handle_message(message),

                    _ = sleep_until(flush_at) => self.flush_due(),

                    _ = sleep_until(reconnect_at) => {
                        self.reconnect_at = None;
                        self.connect().await;
                    }

                    _ = sleep_until(connect_deadline) => {
                        self.connect_deadline = None;
                        let timeout = self.policy_timeout();
                        self.fail(SyncError::ChannelTimeout {
                            subscription_id: self.shared.id.to_string(),
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                }
            }

            // Pending events die with the subscription
            self.pipeline.clear();
            info!("Subscription driver stopped");
        }
        .instrument(span)
        .await
    }

    fn policy_timeout(&self) -> std::time::Duration {
        self.shared.state.borrow().connection.policy().connect_timeout
    }

    // =========================================================================
    // Channel lifecycle
    // =========================================================================

    /// Open a new channel, replacing the current one.
    async fn connect(&mut self) {
        if let Some(err) = self.shared.update(|s| s.connection.begin_connect().err()) {
            debug!(error = %err, "Skipping connect");
            return;
        }

        // Drop the old receiver before opening so stale events cannot leak in
        self.messages = None;
        self.connect_deadline = None;
        self.shared.close_channel();

        let timeout = self.policy_timeout();
        let deadline = Instant::now() + timeout;
        let (sink, rx) = ChannelSink::pair();

        debug!(timeout_ms = timeout.as_millis() as u64, "Opening channel");
        match tokio::time::timeout(timeout, self.source.subscribe_changes(&self.request, sink)).await {
            Ok(Ok(channel)) => {
                self.shared.install_channel(channel);
                self.messages = Some(rx);
                self.connect_deadline = Some(deadline);
            }
            Ok(Err(e)) => {
                self.fail(SyncError::channel(self.shared.id.as_str(), e.to_string()));
            }
            Err(_) => {
                self.fail(SyncError::ChannelTimeout {
                    subscription_id: self.shared.id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }
    }

    /// Record a channel failure and schedule the next attempt (or give up).
    fn fail(&mut self, error: SyncError) {
        self.messages = None;
        self.connect_deadline = None;
        self.shared.close_channel();

        let (outcome, events) = self.shared.update(|s| {
            let (outcome, events) = s.connection.on_failure(error.clone());
            match &outcome {
                FailureOutcome::Retry { .. } => s.error = Some(error),
                FailureOutcome::GaveUp(terminal) => s.error = Some(terminal.clone()),
                FailureOutcome::Ignored => {}
            }
            s.sync_connection_counters();
            (outcome, events)
        });

        self.shared.dispatch(&events);

        match outcome {
            FailureOutcome::Retry { delay, .. } => {
                self.reconnect_at = Some(Instant::now() + delay);
            }
            FailureOutcome::GaveUp(_) => {
                self.reconnect_at = None;
            }
            FailureOutcome::Ignored => {}
        }
    }

    fn on_subscribed(&mut self) {
        self.connect_deadline = None;
        let events = self.shared.update(|s| {
            let events = s.connection.on_connected();
            if !events.is_empty() && s.error.as_ref().is_some_and(SyncError::is_channel_error) {
                s.error = None;
            }
            events
        });
        self.shared.dispatch(&events);
    }

    fn handle_message(&mut self, message: Option<ChannelMessage<R>>) {
        match message {
            Some(ChannelMessage::Event(event)) => self.ingest(event),
            Some(ChannelMessage::Lifecycle(ChannelSignal::Subscribed)) => self.on_subscribed(),
            Some(ChannelMessage::Lifecycle(ChannelSignal::Error(message))) => {
                self.fail(SyncError::channel(self.shared.id.as_str(), message));
            }
            Some(ChannelMessage::Lifecycle(ChannelSignal::TimedOut)) => {
                let timeout = self.policy_timeout();
                self.fail(SyncError::ChannelTimeout {
                    subscription_id: self.shared.id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Some(ChannelMessage::Lifecycle(ChannelSignal::Closed)) => {
                self.fail(SyncError::channel(self.shared.id.as_str(), "channel closed by transport"));
            }
            None => {
                self.fail(SyncError::channel(self.shared.id.as_str(), "channel dropped unexpectedly"));
            }
        }
    }

    // =========================================================================
    // Data path
    // =========================================================================

    #[instrument(skip_all, name = "snapshot")]
    async fn load_snapshot(&mut self) {
        self.shared.update(|s| s.is_loading = true);

        let start = Instant::now();
        let result = self
            .source
            .fetch_snapshot(&self.request.resource, self.request.filter.as_deref())
            .await;

        match result {
            Ok(rows) => {
                metrics::record_snapshot_fetch(&self.request.resource, true, rows.len(), start.elapsed());
                info!(rows = rows.len(), "Snapshot loaded");

                self.shared.update(|s| {
                    s.mirror.replace_all(rows);
                    s.is_loading = false;
                    if matches!(s.error, Some(SyncError::SnapshotFetch { .. })) {
                        s.error = None;
                    }
                });

                // Events buffered during the fetch land on top of the new snapshot
                let oldest = self.pipeline.pending_since();
                let pending = self.pipeline.drain();
                if !pending.is_empty() {
                    self.apply(pending, oldest);
                }
            }
            Err(e) => {
                metrics::record_snapshot_fetch(&self.request.resource, false, 0, start.elapsed());
                metrics::record_error(self.shared.id.as_str(), "snapshot_fetch");
                warn!(error = %e, "Snapshot fetch failed");

                let error = SyncError::snapshot(self.request.resource.as_str(), e.0);
                self.shared.update(|s| {
                    s.is_loading = false;
                    s.error = Some(error);
                });
            }
        }
    }

    fn ingest(&mut self, event: ChangeEvent<R>) {
        if !self.request.wants(event.kind) {
            trace!(kind = %event.kind, "Dropping unsubscribed change kind");
            return;
        }
        metrics::record_event_received(&self.request.resource, event.kind.as_str());

        let now = Instant::now();
        let oldest = self.pipeline.pending_since().or(Some(now));
        let ready = self.pipeline.push(event, now);
        if !ready.is_empty() {
            self.apply(ready, oldest);
        }
    }

    fn flush_due(&mut self) {
        let oldest = self.pipeline.pending_since();
        let ready = self.pipeline.poll(Instant::now());
        if !ready.is_empty() {
            self.apply(ready, oldest);
        }
    }

    /// Apply a batch to the mirror in one state update.
    fn apply(&mut self, events: Vec<ChangeEvent<R>>, oldest: Option<Instant>) {
        let now = Instant::now();
        let count = events.len();

        let (applied, reconciled) = self.shared.update(|s| {
            let mut applied = 0usize;
            let mut reconciled = 0usize;
            for event in &events {
                if s.mirror.apply(event).is_change() {
                    applied += 1;
                }
                // Server data wins over any pending local write for this id
                if let Some(id) = event.target_id() {
                    reconciled += s.optimistic.reconcile(&id);
                }
            }
            s.metrics.record_updates(count, now);
            (applied, reconciled)
        });

        let resource = &self.request.resource;
        metrics::record_events_applied(resource, applied);
        metrics::record_events_ignored(resource, count - applied);
        metrics::record_optimistic_reconciled(resource, reconciled);
        let waited = oldest.map(|t| now.saturating_duration_since(t)).unwrap_or_default();
        metrics::record_batch_flush(resource, count, waited);

        trace!(count, applied, reconciled, "Applied changes");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_message<R: Record>(
    messages: &mut Option<mpsc::UnboundedReceiver<ChannelMessage<R>>>,
) -> Option<ChannelMessage<R>> {
    match messages {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
