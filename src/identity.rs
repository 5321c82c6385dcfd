// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Subscription identity.
//!
//! A subscription is identified by a SHA-256 digest of its resource name and
//! filter expression. Two requests for the same (resource, filter) pair map
//! to the same id, which is how the registry avoids opening duplicate
//! channels.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex characters kept from the digest (128 bits).
const ID_HEX_LEN: usize = 32;

/// Deterministic identity of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Derive the id for a resource and optional filter.
    ///
    /// A missing filter and an empty filter are the same subscription.
    pub fn derive(resource: &str, filter: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(resource.as_bytes());
        // Separator keeps ("ab", "c") and ("a", "bc") apart
        hasher.update([0u8]);
        hasher.update(filter.unwrap_or("").trim().as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(digest[..ID_HEX_LEN].to_string())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SubscriptionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
