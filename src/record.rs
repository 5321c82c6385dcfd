// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The record shape mirrored by the engine.
//!
//! The engine never inspects record contents. All it needs is a stable,
//! hashable identifier so that change events, the mirror and optimistic
//! entries can be matched against each other.

use std::fmt::Debug;
use std::hash::Hash;

/// A record with a stable unique identifier.
///
/// # Example
///
/// ```rust
/// use table_sync_engine::Record;
///
/// #[derive(Debug, Clone)]
/// struct Listing {
///     id: i64,
///     title: String,
/// }
///
/// impl Record for Listing {
///     type Id = i64;
///
///     fn id(&self) -> i64 {
///         self.id
///     }
/// }
/// ```
pub trait Record: Clone + Send + Sync + 'static {
    /// Identifier type (primary key of the remote table).
    type Id: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// The record's identifier.
    fn id(&self) -> Self::Id;
}
