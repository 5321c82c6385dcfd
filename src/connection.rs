// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection lifecycle state machine.
//!
//! # State Diagram
//!
//! ```text
//!                 ┌──────────── reconnect() ─────────────┐
//!                 ▼                                      │
//! Disconnected → Connecting → Connected                  │
//!                 ▲    │          │                      │
//!                 │    └─ failure ┴→ Error ─┬→ Reconnecting ─(backoff)─┐
//!                 │                         │                          │
//!                 └─────────────────────────┼──────────────────────────┘
//!                                           └→ Failed (attempts ≥ max_retries)
//!
//! any state ── disconnect() ──→ Closed (terminal)
//! ```
//!
//! [`ConnectionManager`] is pure: it never sleeps, spawns or calls user code.
//! Each transition returns the [`LifecycleEvent`]s it produced so the caller
//! can dispatch them to [`LifecycleCallbacks`] after releasing its state lock.

use crate::error::{Result, SyncError};
use crate::metrics;
use crate::resilience::ReconnectPolicy;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// State of a subscription's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not yet connected (initial state).
    Disconnected,
    /// Channel open in progress, waiting for confirmation.
    Connecting,
    /// Subscribed and receiving changes.
    Connected,
    /// A failure was just observed.
    Error,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting,
    /// Disconnected by the consumer (terminal).
    Closed,
    /// Automatic reconnection gave up; only `reconnect()` leaves this state.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable lifecycle transition.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Entered `Connected`.
    Connected,
    /// Entered `Closed`.
    Disconnected,
    /// Entered `Error`.
    Error(SyncError),
    /// A reconnection was scheduled.
    Reconnecting { attempt: u32, delay: Duration },
}

type Callback = Arc<dyn Fn() + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&SyncError) + Send + Sync>;
type ReconnectCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// Consumer hooks for lifecycle transitions.
///
/// Each hook fires exactly once per matching transition and is always
/// invoked outside the subscription's internal state lock, so it may read
/// the subscription freely.
#[derive(Clone, Default)]
pub struct LifecycleCallbacks {
    on_connect: Option<Callback>,
    on_disconnect: Option<Callback>,
    on_error: Option<ErrorCallback>,
    on_reconnect: Option<ReconnectCallback>,
}

impl LifecycleCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called on every transition into `Connected`.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Called once when the subscription is disconnected.
    pub fn on_disconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Called on every channel failure.
    pub fn on_error(mut self, f: impl Fn(&SyncError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Called when a reconnection is scheduled, with the attempt number.
    pub fn on_reconnect(mut self, f: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_reconnect = Some(Arc::new(f));
        self
    }

    /// Invoke the hooks for `events`, in order.
    pub fn dispatch(&self, events: &[LifecycleEvent]) {
        for event in events {
            match event {
                LifecycleEvent::Connected => {
                    if let Some(f) = &self.on_connect {
                        f();
                    }
                }
                LifecycleEvent::Disconnected => {
                    if let Some(f) = &self.on_disconnect {
                        f();
                    }
                }
                LifecycleEvent::Error(err) => {
                    if let Some(f) = &self.on_error {
                        f(err);
                    }
                }
                LifecycleEvent::Reconnecting { attempt, .. } => {
                    if let Some(f) = &self.on_reconnect {
                        f(*attempt);
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for LifecycleCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCallbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_reconnect", &self.on_reconnect.is_some())
            .finish()
    }
}

/// What the driver should do after a failure.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FailureOutcome {
    /// Try again after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Retries exhausted; the subscription is `Failed` with this error.
    GaveUp(SyncError),
    /// The subscription is already closed or failed; nothing to do.
    #[default]
    Ignored,
}

/// Per-subscription lifecycle bookkeeping.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    subscription_id: String,
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempts: u32,
    error_count: u64,
    reconnection_count: u64,
}

impl ConnectionManager {
    pub fn new(subscription_id: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
            error_count: 0,
            reconnection_count: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Consecutive failures since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn reconnection_count(&self) -> u64 {
        self.reconnection_count
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Waiting for backoff, or connecting again after a failure.
    pub fn is_reconnecting(&self) -> bool {
        match self.state {
            ConnectionState::Reconnecting => true,
            ConnectionState::Connecting => self.attempts > 0,
            _ => false,
        }
    }

    /// Start a connection attempt.
    ///
    /// Valid from `Disconnected` and `Reconnecting`; a no-op if already
    /// connecting. Closed and failed subscriptions are rejected.
    pub fn begin_connect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {
                self.transition(ConnectionState::Connecting);
                Ok(())
            }
            ConnectionState::Connecting => Ok(()),
            ConnectionState::Closed => Err(SyncError::Closed(self.subscription_id.clone())),
            state => Err(SyncError::Internal(format!(
                "cannot connect from state {}",
                state
            ))),
        }
    }

    /// The channel confirmed the subscription.
    pub fn on_connected(&mut self) -> Vec<LifecycleEvent> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Disconnected => {
                self.attempts = 0;
                self.transition(ConnectionState::Connected);
                info!(subscription_id = %self.subscription_id, "Subscription connected");
                vec![LifecycleEvent::Connected]
            }
            _ => Vec::new(),
        }
    }

    /// A channel failure was observed.
    pub fn on_failure(&mut self, error: SyncError) -> (FailureOutcome, Vec<LifecycleEvent>) {
        match self.state {
            ConnectionState::Closed | ConnectionState::Failed => {
                return (FailureOutcome::Ignored, Vec::new());
            }
            _ => {}
        }

        self.transition(ConnectionState::Error);
        self.error_count += 1;
        self.attempts = self.attempts.saturating_add(1);
        metrics::record_error(&self.subscription_id, error.kind());
        warn!(
            subscription_id = %self.subscription_id,
            attempts = self.attempts,
            error = %error,
            "Subscription channel failed"
        );

        let mut events = vec![LifecycleEvent::Error(error)];

        if self.attempts >= self.policy.max_retries {
            self.transition(ConnectionState::Failed);
            let terminal = SyncError::MaxRetriesExceeded {
                subscription_id: self.subscription_id.clone(),
                attempts: self.attempts,
            };
            warn!(
                subscription_id = %self.subscription_id,
                attempts = self.attempts,
                "Reconnection attempts exhausted, call reconnect() to resume"
            );
            return (FailureOutcome::GaveUp(terminal), events);
        }

        let attempt = self.attempts;
        let delay = self.policy.delay_for_attempt(attempt);
        self.reconnection_count += 1;
        self.transition(ConnectionState::Reconnecting);
        metrics::record_reconnect_attempt(&self.subscription_id, attempt, delay);
        info!(
            subscription_id = %self.subscription_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnection"
        );
        events.push(LifecycleEvent::Reconnecting { attempt, delay });

        (FailureOutcome::Retry { attempt, delay }, events)
    }

    /// Manual reconnect: reset attempts and connect immediately.
    pub fn manual_reconnect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(SyncError::Closed(self.subscription_id.clone()));
        }
        self.attempts = 0;
        self.transition(ConnectionState::Connecting);
        info!(subscription_id = %self.subscription_id, "Manual reconnect requested");
        Ok(())
    }

    /// Enter the terminal `Closed` state. Idempotent.
    pub fn close(&mut self) -> Vec<LifecycleEvent> {
        if self.state == ConnectionState::Closed {
            return Vec::new();
        }
        self.transition(ConnectionState::Closed);
        info!(subscription_id = %self.subscription_id, "Subscription disconnected");
        vec![LifecycleEvent::Disconnected]
    }

    fn transition(&mut self, to: ConnectionState) {
        if self.state != to {
            debug!(
                subscription_id = %self.subscription_id,
                from = %self.state,
                to = %to,
                "Connection state transition"
            );
            metrics::record_connection_state(&self.subscription_id, to.as_str());
        }
        self.state = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn manager(max_retries: u32) -> ConnectionManager {
        ConnectionManager::new(
            "sub-1",
            ReconnectPolicy {
                max_retries,
                ..ReconnectPolicy::testing()
            },
        )
    }

    fn failure() -> SyncError {
        SyncError::channel("sub-1", "socket reset")
    }

    #[test]
    fn test_initial_state() {
        let mgr = manager(3);
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert_eq!(mgr.attempts(), 0);
        assert!(!mgr.is_connected());
        assert!(!mgr.is_reconnecting());
    }

    #[test]
    fn test_connect_happy_path() {
        let mut mgr = manager(3);
        mgr.begin_connect().unwrap();
        assert_eq!(mgr.state(), ConnectionState::Connecting);
        assert!(!mgr.is_reconnecting());

        let events = mgr.on_connected();
        assert_eq!(events, vec![LifecycleEvent::Connected]);
        assert!(mgr.is_connected());

        // A duplicate confirmation does not fire twice
        assert!(mgr.on_connected().is_empty());
    }

    #[test]
    fn test_failure_schedules_backoff() {
        let mut mgr = manager(3);
        mgr.begin_connect().unwrap();
        mgr.on_connected();

        let (outcome, events) = mgr.on_failure(failure());
        assert_eq!(
            outcome,
            FailureOutcome::Retry {
                attempt: 1,
                delay: Duration::from_millis(10)
            }
        );
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], LifecycleEvent::Error(_)));
        assert_eq!(mgr.state(), ConnectionState::Reconnecting);
        assert!(mgr.is_reconnecting());
        assert_eq!(mgr.error_count(), 1);
        assert_eq!(mgr.reconnection_count(), 1);

        // The next connect attempt still counts as reconnecting
        mgr.begin_connect().unwrap();
        assert!(mgr.is_reconnecting());

        let (outcome, _) = mgr.on_failure(failure());
        assert_eq!(
            outcome,
            FailureOutcome::Retry {
                attempt: 2,
                delay: Duration::from_millis(20)
            }
        );
    }

    #[test]
    fn test_exactly_max_retries_failures_fail() {
        let mut mgr = manager(3);
        mgr.begin_connect().unwrap();

        for _ in 0..2 {
            let (outcome, _) = mgr.on_failure(failure());
            assert!(matches!(outcome, FailureOutcome::Retry { .. }));
            mgr.begin_connect().unwrap();
        }

        let (outcome, events) = mgr.on_failure(failure());
        assert!(matches!(
            outcome,
            FailureOutcome::GaveUp(SyncError::MaxRetriesExceeded { attempts: 3, .. })
        ));
        // on_error fires, on_reconnect does not
        assert_eq!(events.len(), 1);
        assert_eq!(mgr.state(), ConnectionState::Failed);
        assert_eq!(mgr.error_count(), 3);
        assert_eq!(mgr.reconnection_count(), 2);

        // Further failures are ignored, no automatic attempts
        let (outcome, events) = mgr.on_failure(failure());
        assert_eq!(outcome, FailureOutcome::Ignored);
        assert!(events.is_empty());
        assert!(mgr.begin_connect().is_err());
    }

    #[test]
    fn test_zero_max_retries_fails_immediately() {
        let mut mgr = manager(0);
        mgr.begin_connect().unwrap();
        let (outcome, _) = mgr.on_failure(failure());
        assert!(matches!(outcome, FailureOutcome::GaveUp(_)));
        assert_eq!(mgr.reconnection_count(), 0);
    }

    #[test]
    fn test_connected_resets_attempts() {
        let mut mgr = manager(3);
        mgr.begin_connect().unwrap();
        mgr.on_failure(failure());
        mgr.begin_connect().unwrap();
        assert_eq!(mgr.attempts(), 1);

        mgr.on_connected();
        assert_eq!(mgr.attempts(), 0);
        assert!(!mgr.is_reconnecting());
        // Counters are monotonic
        assert_eq!(mgr.error_count(), 1);
    }

    #[test]
    fn test_manual_reconnect_from_failed() {
        let mut mgr = manager(1);
        mgr.begin_connect().unwrap();
        mgr.on_failure(failure());
        assert_eq!(mgr.state(), ConnectionState::Failed);

        mgr.manual_reconnect().unwrap();
        assert_eq!(mgr.state(), ConnectionState::Connecting);
        assert_eq!(mgr.attempts(), 0);
        assert!(!mgr.is_reconnecting());
    }

    #[test]
    fn test_close_is_terminal_and_idempotent() {
        let mut mgr = manager(3);
        mgr.begin_connect().unwrap();
        mgr.on_connected();

        assert_eq!(mgr.close(), vec![LifecycleEvent::Disconnected]);
        assert!(mgr.close().is_empty());
        assert_eq!(mgr.state(), ConnectionState::Closed);

        assert!(matches!(mgr.manual_reconnect(), Err(SyncError::Closed(_))));
        assert!(matches!(mgr.begin_connect(), Err(SyncError::Closed(_))));
        assert!(mgr.on_connected().is_empty());
        assert_eq!(mgr.on_failure(failure()).0, FailureOutcome::Ignored);
    }

    #[test]
    fn test_callbacks_dispatch() {
        let connects = Arc::new(AtomicU32::new(0));
        let errors = Arc::new(AtomicU32::new(0));
        let last_attempt = Arc::new(AtomicU32::new(0));
        let disconnects = Arc::new(AtomicU32::new(0));

        let callbacks = {
            let (c, e, a, d) = (
                connects.clone(),
                errors.clone(),
                last_attempt.clone(),
                disconnects.clone(),
            );
            LifecycleCallbacks::new()
                .on_connect(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .on_error(move |_| {
                    e.fetch_add(1, Ordering::SeqCst);
                })
                .on_reconnect(move |attempt| a.store(attempt, Ordering::SeqCst))
                .on_disconnect(move || {
                    d.fetch_add(1, Ordering::SeqCst);
                })
        };

        let mut mgr = manager(3);
        mgr.begin_connect().unwrap();
        callbacks.dispatch(&mgr.on_connected());
        callbacks.dispatch(&mgr.on_failure(failure()).1);
        callbacks.dispatch(&mgr.close());

        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(last_attempt.load(Ordering::SeqCst), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callbacks_debug_and_empty_dispatch() {
        let callbacks = LifecycleCallbacks::new().on_connect(|| {});
        let debug = format!("{:?}", callbacks);
        assert!(debug.contains("on_connect: true"));
        assert!(debug.contains("on_error: false"));
        // No hooks registered: dispatch is a no-op
        LifecycleCallbacks::new().dispatch(&[LifecycleEvent::Connected, LifecycleEvent::Disconnected]);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Failed.as_str(), "failed");
    }
}
