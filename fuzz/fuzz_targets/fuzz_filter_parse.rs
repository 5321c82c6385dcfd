//! Fuzz target for filter expression parsing.
//!
//! This tests that filter validation never panics on arbitrary input
//! and that accepted filters print back to the trimmed input.

#![no_main]

use libfuzzer_sys::fuzz_target;
use table_sync_engine::validation::Filter;

fuzz_target!(|expr: &str| {
    // Should never panic
    if let Ok(filter) = Filter::parse(expr) {
        assert_eq!(filter.to_string(), expr.trim());
        assert!(!filter.values().is_empty());
    }
});
