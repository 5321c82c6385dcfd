// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Two layers:
//!
//! - [`MetricsTracker`]: per-subscription counters and a sliding-window
//!   throughput estimate, exposed to consumers as [`SubscriptionMetrics`].
//! - Free functions exporting Prometheus-compatible metrics through the
//!   `metrics` facade. Install any recorder to collect them; without one the
//!   calls are no-ops.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `table_sync_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use table_sync_engine::metrics;
//! use std::time::Duration;
//!
//! // In the driver after receiving a change
//! metrics::record_event_received("listings", "UPDATE");
//!
//! // In the driver after a batch is applied
//! metrics::record_batch_flush("listings", 42, Duration::from_millis(100));
//! ```

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

// ═══════════════════════════════════════════════════════════════════════════════
// Per-subscription tracker
// ═══════════════════════════════════════════════════════════════════════════════

/// Snapshot of a subscription's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubscriptionMetrics {
    /// Change events applied since the subscription opened
    pub total_updates: u64,
    /// Events applied within the last metrics window, per second
    pub updates_per_second: f64,
    /// Channel failures observed
    pub error_count: u64,
    /// Reconnections scheduled
    pub reconnection_count: u64,
    /// Wall-clock time of the last applied event
    pub last_update_at: Option<DateTime<Utc>>,
}

/// Sliding-window throughput tracker.
///
/// Timestamps older than the window are pruned on every record and read, so
/// memory stays bounded by the event rate times the window.
#[derive(Debug, Clone)]
pub struct MetricsTracker {
    window: Duration,
    timestamps: VecDeque<Instant>,
    total_updates: u64,
    error_count: u64,
    reconnection_count: u64,
    last_update_at: Option<DateTime<Utc>>,
}

impl MetricsTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            timestamps: VecDeque::new(),
            total_updates: 0,
            error_count: 0,
            reconnection_count: 0,
            last_update_at: None,
        }
    }

    /// Record `count` applied events at `now`.
    pub fn record_updates(&mut self, count: usize, now: Instant) {
        if count == 0 {
            return;
        }
        self.total_updates += count as u64;
        self.timestamps.extend(std::iter::repeat(now).take(count));
        self.last_update_at = Some(Utc::now());
        self.prune(now);
    }

    /// Mirror the connection manager's monotonic counters.
    pub fn set_connection_counters(&mut self, error_count: u64, reconnection_count: u64) {
        self.error_count = error_count;
        self.reconnection_count = reconnection_count;
    }

    /// Events within the window ending at `now`, per second.
    pub fn updates_per_second(&self, now: Instant) -> f64 {
        let in_window = self
            .timestamps
            .iter()
            .filter(|ts| now.saturating_duration_since(**ts) < self.window)
            .count();
        in_window as f64 / self.window.as_secs_f64()
    }

    /// Snapshot of all counters as of `now`.
    pub fn snapshot(&self, now: Instant) -> SubscriptionMetrics {
        SubscriptionMetrics {
            total_updates: self.total_updates,
            updates_per_second: self.updates_per_second(now),
            error_count: self.error_count,
            reconnection_count: self.reconnection_count,
            last_update_at: self.last_update_at,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.timestamps.front() {
            if now.saturating_duration_since(*front) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Prometheus export
// ═══════════════════════════════════════════════════════════════════════════════

/// Record a change event received from a channel.
pub fn record_event_received(resource: &str, kind: &str) {
    counter!("table_sync_events_received_total", "resource" => resource.to_string(), "kind" => kind.to_string()).increment(1);
}

/// Record change events applied to the mirror.
pub fn record_events_applied(resource: &str, count: usize) {
    counter!("table_sync_events_applied_total", "resource" => resource.to_string()).increment(count as u64);
}

/// Record change events the mirror ignored (duplicate insert, unknown delete).
pub fn record_events_ignored(resource: &str, count: usize) {
    if count > 0 {
        counter!("table_sync_events_ignored_total", "resource" => resource.to_string()).increment(count as u64);
    }
}

/// Record a pipeline flush: batch size and how long the oldest event waited.
pub fn record_batch_flush(resource: &str, size: usize, latency: Duration) {
    histogram!("table_sync_batch_size", "resource" => resource.to_string()).record(size as f64);
    histogram!("table_sync_batch_latency_seconds", "resource" => resource.to_string())
        .record(latency.as_secs_f64());
}

/// Record a snapshot fetch.
pub fn record_snapshot_fetch(resource: &str, success: bool, rows: usize, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("table_sync_snapshot_fetches_total", "resource" => resource.to_string(), "status" => status).increment(1);
    histogram!("table_sync_snapshot_fetch_duration_seconds", "resource" => resource.to_string())
        .record(duration.as_secs_f64());
    if success {
        gauge!("table_sync_snapshot_rows", "resource" => resource.to_string()).set(rows as f64);
    }
}

/// Record a connection state transition.
pub fn record_connection_state(subscription_id: &str, state: &str) {
    counter!(
        "table_sync_connection_transitions_total",
        "subscription_id" => subscription_id.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record a scheduled reconnection attempt and its backoff delay.
pub fn record_reconnect_attempt(subscription_id: &str, attempt: u32, delay: Duration) {
    counter!("table_sync_reconnect_attempts_total", "subscription_id" => subscription_id.to_string()).increment(1);
    histogram!("table_sync_reconnect_delay_seconds").record(delay.as_secs_f64());
    gauge!("table_sync_reconnect_attempt", "subscription_id" => subscription_id.to_string()).set(attempt as f64);
}

/// Record an error by type.
pub fn record_error(subscription_id: &str, error_type: &str) {
    counter!("table_sync_errors_total", "subscription_id" => subscription_id.to_string(), "error_type" => error_type.to_string()).increment(1);
}

/// Record optimistic entries dropped because the server confirmed them.
pub fn record_optimistic_reconciled(resource: &str, count: usize) {
    if count > 0 {
        counter!("table_sync_optimistic_reconciled_total", "resource" => resource.to_string()).increment(count as u64);
    }
}

/// Set the number of open subscriptions in a registry.
pub fn set_active_subscriptions(count: usize) {
    gauge!("table_sync_active_subscriptions").set(count as f64);
}
