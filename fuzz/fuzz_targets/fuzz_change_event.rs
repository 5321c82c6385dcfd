//! Fuzz target for change event decoding.
//!
//! Transports hand raw payloads straight to the decoder, so malformed
//! input must come back as an error rather than a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use serde::{Deserialize, Serialize};
use table_sync_engine::{ChangeEvent, Record};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Row {
    id: i64,
    #[serde(default)]
    title: String,
}

impl Record for Row {
    type Id = i64;

    fn id(&self) -> i64 {
        self.id
    }
}

fuzz_target!(|data: &[u8]| {
    // Should never panic
    if let Ok(event) = ChangeEvent::<Row>::from_slice(data) {
        // Decoded events always name a resource
        assert!(!event.resource.is_empty());
        let _ = event.target_id();
    }
});
