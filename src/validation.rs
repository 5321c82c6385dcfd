// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Subscription option validation.
//!
//! Runs once when a subscription is opened. Every check is a pure function of
//! the [`SubscriptionConfig`], so a rejected config never touches the network.
//!
//! # Filter Syntax
//!
//! ```text
//! column=op.value
//!
//! column  [A-Za-z_][A-Za-z0-9_]*
//! op      eq | neq | lt | lte | gt | gte | like | ilike | is | in
//! value   anything non-empty; `in` takes a parenthesized list "(a,b,c)"
//! ```
//!
//! The engine only checks the shape. Whether the column exists or the caller
//! may read it is decided by the backing store.

use crate::config::SubscriptionConfig;
use crate::error::{Result, SyncError};
use std::time::Duration;

/// Upper bound for `batch_delay`.
pub const MAX_BATCH_DELAY: Duration = Duration::from_secs(10);

/// Upper bound for `throttle_interval`.
pub const MAX_THROTTLE_INTERVAL: Duration = Duration::from_secs(60);

/// Comparison operator of a filter expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    Ilike,
    Is,
    In,
}

impl FilterOp {
    fn parse(s: &str) -> Option<Self> {
        let op = match s {
            "eq" => FilterOp::Eq,
            "neq" => FilterOp::Neq,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "like" => FilterOp::Like,
            "ilike" => FilterOp::Ilike,
            "is" => FilterOp::Is,
            "in" => FilterOp::In,
            _ => return None,
        };
        Some(op)
    }

    /// Wire name of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Like => "like",
            FilterOp::Ilike => "ilike",
            FilterOp::Is => "is",
            FilterOp::In => "in",
        }
    }
}

/// A parsed `column=op.value` filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    /// Parse and check a filter expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let (column, rest) = expr
            .split_once('=')
            .ok_or_else(|| invalid_filter(expr, "expected `column=op.value`"))?;

        if !is_identifier(column) {
            return Err(invalid_filter(expr, "column must match [A-Za-z_][A-Za-z0-9_]*"));
        }

        let (op, value) = rest
            .split_once('.')
            .ok_or_else(|| invalid_filter(expr, "expected `op.value` after `=`"))?;
        let op = FilterOp::parse(op)
            .ok_or_else(|| invalid_filter(expr, &format!("unknown operator `{}`", op)))?;

        if value.is_empty() {
            return Err(invalid_filter(expr, "value must not be empty"));
        }

        if op == FilterOp::In {
            let inner = value
                .strip_prefix('(')
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| invalid_filter(expr, "`in` expects a list like (a,b,c)"))?;
            if inner.split(',').any(|item| item.trim().is_empty()) {
                return Err(invalid_filter(expr, "`in` list has an empty item"));
            }
        }

        Ok(Self {
            column: column.to_string(),
            op,
            value: value.to_string(),
        })
    }

    /// Items of an `in` list; the single value for other operators.
    pub fn values(&self) -> Vec<&str> {
        match self.op {
            FilterOp::In => self
                .value
                .trim_start_matches('(')
                .trim_end_matches(')')
                .split(',')
                .map(str::trim)
                .collect(),
            _ => vec![self.value.as_str()],
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}.{}", self.column, self.op.as_str(), self.value)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn invalid_filter(expr: &str, reason: &str) -> SyncError {
    SyncError::Configuration(format!("invalid filter `{}`: {}", expr, reason))
}

/// Validate every option of a subscription config.
pub fn validate(config: &SubscriptionConfig) -> Result<()> {
    if config.resource.trim().is_empty() {
        return Err(config_error("resource name must not be empty"));
    }

    if config.event_kinds.is_empty() {
        return Err(config_error("at least one event kind is required"));
    }

    if let Some(filter) = config.filter.as_deref() {
        if !filter.trim().is_empty() {
            Filter::parse(filter)?;
        }
    }

    validate_pipeline(config)?;
    validate_reconnect(config)?;

    let window = parse_duration("metrics_window", &config.metrics_window)?;
    if window.is_zero() {
        return Err(config_error("metrics_window must be positive"));
    }

    Ok(())
}

fn validate_pipeline(config: &SubscriptionConfig) -> Result<()> {
    let pipeline = &config.pipeline;

    if let Some(raw) = pipeline.batch_delay.as_deref() {
        let delay = parse_duration("batch_delay", raw)?;
        if delay.is_zero() || delay > MAX_BATCH_DELAY {
            return Err(config_error(&format!(
                "batch_delay must be in (0, {}], got {}",
                humantime::format_duration(MAX_BATCH_DELAY),
                raw
            )));
        }
    }

    if pipeline.max_batch_size == 0 {
        return Err(config_error("max_batch_size must be positive"));
    }

    if let Some(raw) = pipeline.throttle_interval.as_deref() {
        let interval = parse_duration("throttle_interval", raw)?;
        if interval.is_zero() || interval > MAX_THROTTLE_INTERVAL {
            return Err(config_error(&format!(
                "throttle_interval must be in (0, {}], got {}",
                humantime::format_duration(MAX_THROTTLE_INTERVAL),
                raw
            )));
        }
    }

    Ok(())
}

fn validate_reconnect(config: &SubscriptionConfig) -> Result<()> {
    let reconnect = &config.reconnect;

    let base = parse_duration("reconnect.base_delay", &reconnect.base_delay)?;
    let max = parse_duration("reconnect.max_delay", &reconnect.max_delay)?;
    let connect_timeout = parse_duration("reconnect.connect_timeout", &reconnect.connect_timeout)?;

    if base.is_zero() {
        return Err(config_error("reconnect.base_delay must be positive"));
    }
    if max < base {
        return Err(config_error("reconnect.max_delay must be >= base_delay"));
    }
    if !reconnect.backoff_factor.is_finite() || reconnect.backoff_factor < 1.0 {
        return Err(config_error("reconnect.backoff_factor must be >= 1.0"));
    }
    if connect_timeout.is_zero() {
        return Err(config_error("reconnect.connect_timeout must be positive"));
    }

    Ok(())
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw)
        .map_err(|e| config_error(&format!("{} `{}` is not a duration: {}", field, raw, e)))
}

fn config_error(message: &str) -> SyncError {
    SyncError::Configuration(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeKind;

    fn assert_rejected(config: &SubscriptionConfig, needle: &str) {
        match validate(config) {
            Err(SyncError::Configuration(msg)) => {
                assert!(msg.contains(needle), "message `{}` lacks `{}`", msg, needle)
            }
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_parse_valid() {
        let filter = Filter::parse("seller_id=eq.42").unwrap();
        assert_eq!(filter.column, "seller_id");
        assert_eq!(filter.op, FilterOp::Eq);
        assert_eq!(filter.value, "42");
        assert_eq!(filter.to_string(), "seller_id=eq.42");

        // Value may itself contain dots and equals signs
        let filter = Filter::parse("price=gte.10.5").unwrap();
        assert_eq!(filter.value, "10.5");
        let filter = Filter::parse("title=ilike.*a=b*").unwrap();
        assert_eq!(filter.op, FilterOp::Ilike);
        assert_eq!(filter.value, "*a=b*");

        let filter = Filter::parse("deleted_at=is.null").unwrap();
        assert_eq!(filter.values(), vec!["null"]);
    }

    #[test]
    fn test_filter_parse_in_list() {
        let filter = Filter::parse("status=in.(active, pending,sold)").unwrap();
        assert_eq!(filter.op, FilterOp::In);
        assert_eq!(filter.values(), vec!["active", "pending", "sold"]);

        assert!(Filter::parse("status=in.active").is_err());
        assert!(Filter::parse("status=in.(a,,b)").is_err());
        assert!(Filter::parse("status=in.()").is_err());
    }

    #[test]
    fn test_filter_parse_invalid() {
        let cases = [
            "seller_id",         // no '='
            "=eq.1",             // empty column
            "1col=eq.1",         // column starts with digit
            "seller-id=eq.1",    // bad column char
            "seller_id=42",      // no operator
            "seller_id=equals.1", // unknown operator
            "seller_id=eq.",     // empty value
        ];
        for case in cases {
            assert!(Filter::parse(case).is_err(), "accepted `{}`", case);
        }
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate(&SubscriptionConfig::new("listings")).is_ok());
        assert!(validate(&SubscriptionConfig::for_testing("listings")).is_ok());
    }

    #[test]
    fn test_validate_resource_and_kinds() {
        assert_rejected(&SubscriptionConfig::new("  "), "resource");
        assert_rejected(
            &SubscriptionConfig::new("listings").with_event_kinds(Vec::<ChangeKind>::new()),
            "event kind",
        );
    }

    #[test]
    fn test_validate_filter() {
        assert!(validate(&SubscriptionConfig::new("listings").with_filter("id=eq.1")).is_ok());
        assert!(validate(&SubscriptionConfig::new("listings").with_filter("")).is_ok());
        assert_rejected(
            &SubscriptionConfig::new("listings").with_filter("id==1"),
            "invalid filter",
        );
    }

    #[test]
    fn test_validate_batch_delay_bounds() {
        let ok = SubscriptionConfig::new("t").with_batch_delay(Duration::from_secs(10));
        assert!(validate(&ok).is_ok());

        assert_rejected(
            &SubscriptionConfig::new("t").with_batch_delay(Duration::ZERO),
            "batch_delay",
        );
        assert_rejected(
            &SubscriptionConfig::new("t").with_batch_delay(Duration::from_millis(10_001)),
            "batch_delay",
        );

        let mut garbled = SubscriptionConfig::new("t");
        garbled.pipeline.batch_delay = Some("soonish".to_string());
        assert_rejected(&garbled, "not a duration");

        let mut no_size = SubscriptionConfig::new("t");
        no_size.pipeline.max_batch_size = 0;
        assert_rejected(&no_size, "max_batch_size");
    }

    #[test]
    fn test_validate_throttle_bounds() {
        let ok = SubscriptionConfig::new("t").with_throttle_interval(Duration::from_secs(60));
        assert!(validate(&ok).is_ok());

        assert_rejected(
            &SubscriptionConfig::new("t").with_throttle_interval(Duration::ZERO),
            "throttle_interval",
        );
        assert_rejected(
            &SubscriptionConfig::new("t").with_throttle_interval(Duration::from_secs(61)),
            "throttle_interval",
        );
    }

    #[test]
    fn test_validate_reconnect() {
        let mut config = SubscriptionConfig::new("t");
        config.reconnect.base_delay = "0s".to_string();
        assert_rejected(&config, "base_delay");

        let mut config = SubscriptionConfig::new("t");
        config.reconnect.max_delay = "500ms".to_string();
        assert_rejected(&config, "max_delay");

        let mut config = SubscriptionConfig::new("t");
        config.reconnect.backoff_factor = 0.5;
        assert_rejected(&config, "backoff_factor");

        let mut config = SubscriptionConfig::new("t");
        config.reconnect.backoff_factor = f64::NAN;
        assert_rejected(&config, "backoff_factor");

        let mut config = SubscriptionConfig::new("t");
        config.reconnect.connect_timeout = "0ms".to_string();
        assert_rejected(&config, "connect_timeout");

        // Zero retries is allowed: the first failure is terminal
        let mut config = SubscriptionConfig::new("t");
        config.reconnect.max_retries = 0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_validate_metrics_window() {
        let mut config = SubscriptionConfig::new("t");
        config.metrics_window = "0s".to_string();
        assert_rejected(&config, "metrics_window");

        config.metrics_window = "forever".to_string();
        assert_rejected(&config, "metrics_window");
    }
}
