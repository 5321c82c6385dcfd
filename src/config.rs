// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Subscription configuration.
//!
//! A [`SubscriptionConfig`] describes what to mirror (resource + filter +
//! event kinds) and how (update pipeline, reconnection, metrics window). It
//! can be built programmatically or deserialized from YAML/JSON, and is
//! validated once by [`crate::validation::validate`] when the subscription is
//! opened.
//!
//! # Quick Start
//!
//! ```rust
//! use table_sync_engine::config::SubscriptionConfig;
//! use std::time::Duration;
//!
//! let config = SubscriptionConfig::new("listings")
//!     .with_filter("status=eq.active")
//!     .with_batch_delay(Duration::from_millis(100));
//! assert_eq!(config.pipeline.batch_delay.as_deref(), Some("100ms"));
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! SubscriptionConfig
//! ├── resource: String             # Remote table name
//! ├── filter: Option<String>       # e.g. "seller_id=eq.42"
//! ├── event_kinds: [ChangeKind]    # INSERT / UPDATE / DELETE
//! ├── pipeline: PipelineConfig     # Batcher or Throttler
//! ├── reconnect: ReconnectConfig   # Backoff policy
//! └── metrics_window: String       # Throughput window ("1s")
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! resource: "listings"
//! filter: "status=eq.active"
//! event_kinds: ["INSERT", "UPDATE", "DELETE"]
//! pipeline:
//!   batch_delay: "100ms"
//!   max_batch_size: 500
//! reconnect:
//!   max_retries: 5
//!   base_delay: "1s"
//!   max_delay: "30s"
//! ```

use crate::event::ChangeKind;
use crate::identity::SubscriptionId;
use crate::pipeline::PipelineMode;
use crate::resilience::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// SubscriptionConfig: one per mirrored (resource, filter) pair
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for a single subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Remote resource (table) to mirror.
    pub resource: String,

    /// Optional row filter, `column=op.value`.
    #[serde(default)]
    pub filter: Option<String>,

    /// Change kinds to subscribe to.
    #[serde(default = "default_event_kinds")]
    pub event_kinds: Vec<ChangeKind>,

    /// Batching / throttling between the stream and the mirror.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Reconnection behavior.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Sliding window for `updates_per_second` as a duration string.
    #[serde(default = "default_metrics_window")]
    pub metrics_window: String,
}

fn default_event_kinds() -> Vec<ChangeKind> {
    ChangeKind::ALL.to_vec()
}

fn default_metrics_window() -> String {
    "1s".to_string()
}

impl SubscriptionConfig {
    /// Default configuration for `resource`: all event kinds, no pipeline.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            filter: None,
            event_kinds: default_event_kinds(),
            pipeline: PipelineConfig::default(),
            reconnect: ReconnectConfig::default(),
            metrics_window: default_metrics_window(),
        }
    }

    /// Create a config with fast-fail reconnection for tests.
    pub fn for_testing(resource: &str) -> Self {
        Self::new(resource).with_reconnect_policy(&ReconnectPolicy::testing())
    }

    /// Set the row filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Restrict the subscribed change kinds.
    pub fn with_event_kinds(mut self, kinds: impl IntoIterator<Item = ChangeKind>) -> Self {
        self.event_kinds = kinds.into_iter().collect();
        self
    }

    /// Enable batching with the given window.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.pipeline.batch_delay = Some(format_duration(delay));
        self
    }

    /// Enable throttling with the given interval.
    pub fn with_throttle_interval(mut self, interval: Duration) -> Self {
        self.pipeline.throttle_interval = Some(format_duration(interval));
        self
    }

    /// Copy a reconnection policy into this config.
    pub fn with_reconnect_policy(mut self, policy: &ReconnectPolicy) -> Self {
        self.reconnect = ReconnectConfig::from_policy(policy);
        self
    }

    /// Deterministic identity of this subscription.
    pub fn subscription_id(&self) -> SubscriptionId {
        SubscriptionId::derive(&self.resource, self.filter.as_deref())
    }

    /// Parse the metrics window, falling back to one second.
    pub fn metrics_window_duration(&self) -> Duration {
        humantime::parse_duration(&self.metrics_window).unwrap_or(Duration::from_secs(1))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PipelineConfig: batching / throttling
// ═══════════════════════════════════════════════════════════════════════════════

/// Update pipeline configuration.
///
/// Leave both fields unset for pass-through delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Batch window as a duration string (e.g., "100ms").
    #[serde(default)]
    pub batch_delay: Option<String>,

    /// Flush early once this many events are buffered.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Minimum time between deliveries as a duration string (e.g., "250ms").
    #[serde(default)]
    pub throttle_interval: Option<String>,
}

fn default_max_batch_size() -> usize {
    500
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_delay: None,
            max_batch_size: 500,
            throttle_interval: None,
        }
    }
}

impl PipelineConfig {
    /// Parse the batch delay. `None` if unset or unparsable.
    pub fn batch_delay_duration(&self) -> Option<Duration> {
        self.batch_delay
            .as_deref()
            .and_then(|s| humantime::parse_duration(s).ok())
    }

    /// Parse the throttle interval. `None` if unset or unparsable.
    pub fn throttle_interval_duration(&self) -> Option<Duration> {
        self.throttle_interval
            .as_deref()
            .and_then(|s| humantime::parse_duration(s).ok())
    }

    /// Select the engaged stage. Batching wins when both are configured.
    pub fn mode(&self) -> PipelineMode {
        if let Some(delay) = self.batch_delay_duration() {
            PipelineMode::Batch {
                delay,
                max_size: self.max_batch_size,
            }
        } else if let Some(interval) = self.throttle_interval_duration() {
            PipelineMode::Throttle { interval }
        } else {
            PipelineMode::Passthrough
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReconnectConfig: serializable form of ReconnectPolicy
// ═══════════════════════════════════════════════════════════════════════════════

/// Reconnection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Consecutive failures before the subscription enters `Failed`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay (e.g., "1s").
    #[serde(default = "default_base_delay")]
    pub base_delay: String,

    /// Backoff ceiling (e.g., "30s").
    #[serde(default = "default_max_delay")]
    pub max_delay: String,

    /// Backoff multiplier.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Deadline for a channel to open and confirm (e.g., "10s").
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay() -> String {
    "1s".to_string()
}

fn default_max_delay() -> String {
    "30s".to_string()
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_connect_timeout() -> String {
    "10s".to_string()
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_policy(&ReconnectPolicy::default())
    }
}

impl ReconnectConfig {
    /// Serializable form of a policy.
    pub fn from_policy(policy: &ReconnectPolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            base_delay: format_duration(policy.base_delay),
            max_delay: format_duration(policy.max_delay),
            backoff_factor: policy.backoff_factor,
            connect_timeout: format_duration(policy.connect_timeout),
        }
    }

    /// Build the runtime policy. Unparsable durations fall back to defaults
    /// (validation rejects them before a subscription ever runs).
    pub fn to_policy(&self) -> ReconnectPolicy {
        let defaults = ReconnectPolicy::default();
        ReconnectPolicy {
            max_retries: self.max_retries,
            base_delay: humantime::parse_duration(&self.base_delay).unwrap_or(defaults.base_delay),
            max_delay: humantime::parse_duration(&self.max_delay).unwrap_or(defaults.max_delay),
            backoff_factor: self.backoff_factor,
            connect_timeout: humantime::parse_duration(&self.connect_timeout)
                .unwrap_or(defaults.connect_timeout),
        }
    }
}

fn format_duration(d: Duration) -> String {
    humantime::format_duration(d).to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
