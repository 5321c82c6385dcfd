// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Optimistic local writes.
//!
//! Pending writes are layered over the mirror until the server confirms them
//! through the change stream. Server-confirmed data always wins: applying a
//! change for an id drops every pending entry targeting that id.
//!
//! ```text
//! mirror:     [1:a] [2:b] [3:c]
//! pending:    Update 2:B, Remove 3, Add 42:x
//! merged:     [1:a] [2:B] [42:x]
//! ```

use crate::mirror::MirrorStore;
use crate::record::Record;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Kind of local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptimisticKind {
    Add,
    Update,
    Remove,
}

/// A pending local write.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticUpdate<R: Record> {
    /// Caller-chosen handle used to adjust or roll back the write
    pub local_id: String,
    pub kind: OptimisticKind,
    /// The record as the caller expects it to look (for `Remove`, the record to hide)
    pub data: R,
    pub created_at: DateTime<Utc>,
    /// The write API accepted it; still waiting for the stream
    pub confirmed: bool,
}

impl<R: Record> OptimisticUpdate<R> {
    pub fn new(local_id: impl Into<String>, kind: OptimisticKind, data: R) -> Self {
        Self {
            local_id: local_id.into(),
            kind,
            data,
            created_at: Utc::now(),
            confirmed: false,
        }
    }

    /// Id of the record this write targets.
    pub fn target_id(&self) -> R::Id {
        self.data.id()
    }
}

/// Pending writes in submission order.
#[derive(Debug, Clone)]
pub struct OptimisticLayer<R: Record> {
    entries: Vec<OptimisticUpdate<R>>,
}

impl<R: Record> Default for OptimisticLayer<R> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<R: Record> OptimisticLayer<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pending write. Reusing a `local_id` replaces the previous entry.
    pub fn add(&mut self, update: OptimisticUpdate<R>) {
        match self.position(&update.local_id) {
            Some(pos) => self.entries[pos] = update,
            None => self.entries.push(update),
        }
    }

    /// Roll back a write. Returns `false` for an unknown `local_id`.
    pub fn remove(&mut self, local_id: &str) -> bool {
        match self.position(local_id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Replace the data of a pending write. Returns `false` for an unknown `local_id`.
    pub fn update(&mut self, local_id: &str, data: R) -> bool {
        match self.position(local_id) {
            Some(pos) => {
                self.entries[pos].data = data;
                true
            }
            None => false,
        }
    }

    /// Mark a write as accepted by the write API.
    pub fn confirm(&mut self, local_id: &str) -> bool {
        match self.position(local_id) {
            Some(pos) => {
                self.entries[pos].confirmed = true;
                true
            }
            None => false,
        }
    }

    /// Drop every entry targeting `id`. Returns how many were dropped.
    pub fn reconcile(&mut self, id: &R::Id) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| &entry.target_id() != id);
        before - self.entries.len()
    }

    /// Overlay pending writes on the mirror.
    ///
    /// Entries apply in submission order; the result holds at most one
    /// record per id.
    pub fn merge(&self, mirror: &MirrorStore<R>) -> Vec<R> {
        if self.entries.is_empty() {
            return mirror.records().to_vec();
        }

        let mut slots: Vec<Option<R>> = mirror.records().iter().cloned().map(Some).collect();
        let mut index: HashMap<R::Id, usize> = slots
            .iter()
            .enumerate()
            .filter_map(|(pos, slot)| slot.as_ref().map(|r| (r.id(), pos)))
            .collect();

        for entry in &self.entries {
            let id = entry.target_id();
            match entry.kind {
                OptimisticKind::Add | OptimisticKind::Update => match index.get(&id) {
                    Some(&pos) => slots[pos] = Some(entry.data.clone()),
                    None => {
                        index.insert(id, slots.len());
                        slots.push(Some(entry.data.clone()));
                    }
                },
                OptimisticKind::Remove => {
                    if let Some(pos) = index.remove(&id) {
                        slots[pos] = None;
                    }
                }
            }
        }

        slots.into_iter().flatten().collect()
    }

    pub fn get(&self, local_id: &str) -> Option<&OptimisticUpdate<R>> {
        self.entries.iter().find(|entry| entry.local_id == local_id)
    }

    pub fn entries(&self) -> &[OptimisticUpdate<R>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn position(&self, local_id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.local_id == local_id)
    }
}
