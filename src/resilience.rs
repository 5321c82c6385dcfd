// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconnection policy: bounded exponential backoff.
//!
//! ```text
//! delay(n) = min(base_delay * factor^(n - 1), max_delay)     n = 1, 2, ...
//! ```
//!
//! The policy is pure data; the connection state machine decides when an
//! attempt happens and the subscription driver owns the actual timer.

use std::time::Duration;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Consecutive failures tolerated before giving up (`Failed`).
    pub max_retries: u32,

    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,

    /// Maximum delay between attempts (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,

    /// Deadline for a channel to open and confirm the subscription.
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Patient policy for long-lived dashboards.
    ///
    /// # Backoff Schedule
    ///
    /// ```text
    /// Attempt  Delay
    /// -------  -----
    /// 1        1s
    /// 2        2s
    /// 3        4s
    /// ...
    /// 9        256s
    /// 10+      300s (cap)
    /// ```
    pub fn persistent() -> Self {
        Self {
            max_retries: 20,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_factor: 2.0,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Fast-fail policy for tests.
    pub fn testing() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            connect_timeout: Duration::from_millis(500),
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.base_delay;
        }

        let multiplier = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let delay_micros = self.base_delay.as_micros() as f64 * multiplier;
        if !delay_micros.is_finite() || delay_micros >= self.max_delay.as_micros() as f64 {
            return self.max_delay;
        }

        Duration::from_micros(delay_micros.round() as u64)
    }
}
