// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the table sync engine.
//!
//! Errors are categorized by where they surface. Only configuration problems
//! are returned to the caller directly; everything that happens after a
//! subscription is running is captured into its reactive `error` state.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Configuration` | No | Invalid subscription options, rejected in `open()` |
//! | `SnapshotFetch` | Yes | Initial or refresh query failed, call `refresh()` |
//! | `Channel` | Yes | Transient stream failure, reconnected automatically |
//! | `ChannelTimeout` | Yes | Channel did not confirm the subscription in time |
//! | `MaxRetriesExceeded` | No | Reconnection gave up, call `reconnect()` |
//! | `EventDecode` | No | Malformed change payload from the transport |
//! | `Closed` | No | Control call on a disconnected subscription |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Use [`SyncError::is_retryable()`] to tell transient transport failures
//! apart from terminal ones. `MaxRetriesExceeded` is not retryable on its own:
//! the automatic policy is exhausted and only a manual `reconnect()` resets it.

use thiserror::Error;

/// Result type alias for sync engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while mirroring a remote table.
///
/// Every variant is `Clone` so the latest error can be stored in the
/// subscription's reactive state and handed out to any number of readers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Invalid subscription options.
    ///
    /// Surfaced synchronously from `open()`; the subscription never activates.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The snapshot query failed.
    ///
    /// `is_loading` becomes false and the caller may retry with `refresh()`.
    #[error("Snapshot fetch failed ({resource}): {message}")]
    SnapshotFetch { resource: String, message: String },

    /// Transient change-stream failure.
    ///
    /// Handled by automatic bounded reconnection.
    #[error("Channel error ({subscription_id}): {message}")]
    Channel {
        subscription_id: String,
        message: String,
    },

    /// The channel did not confirm the subscription before the deadline.
    #[error("Channel timed out ({subscription_id}) after {timeout_ms}ms")]
    ChannelTimeout {
        subscription_id: String,
        timeout_ms: u64,
    },

    /// Automatic reconnection gave up.
    ///
    /// Terminal until the caller invokes `reconnect()`.
    #[error("Max retries exceeded ({subscription_id}) after {attempts} attempts")]
    MaxRetriesExceeded {
        subscription_id: String,
        attempts: u32,
    },

    /// A change payload could not be decoded.
    #[error("Event decode error: {0}")]
    EventDecode(String),

    /// The subscription was disconnected; open a new one to continue.
    #[error("Subscription closed ({0})")]
    Closed(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Create a channel error.
    pub fn channel(subscription_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel {
            subscription_id: subscription_id.into(),
            message: message.into(),
        }
    }

    /// Create a snapshot fetch error.
    pub fn snapshot(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SnapshotFetch {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SnapshotFetch { .. } => true,
            Self::Channel { .. } => true,
            Self::ChannelTimeout { .. } => true,
            Self::Configuration(_) => false,
            Self::MaxRetriesExceeded { .. } => false,
            Self::EventDecode(_) => false, // Malformed at the source
            Self::Closed(_) => false,
            Self::Internal(_) => false,
        }
    }

    /// Check if this error belongs to the transport (cleared on reconnect).
    pub fn is_channel_error(&self) -> bool {
        matches!(
            self,
            Self::Channel { .. } | Self::ChannelTimeout { .. } | Self::MaxRetriesExceeded { .. }
        )
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::SnapshotFetch { .. } => "snapshot_fetch",
            Self::Channel { .. } => "channel",
            Self::ChannelTimeout { .. } => "channel_timeout",
            Self::MaxRetriesExceeded { .. } => "max_retries_exceeded",
            Self::EventDecode(_) => "event_decode",
            Self::Closed(_) => "closed",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::EventDecode(e.to_string())
    }
}
