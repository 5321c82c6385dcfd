// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory mirror of the remote table.
//!
//! Records are kept in snapshot order with new rows appended at the end. An
//! id → position index makes every operation O(1) except deletion, which
//! shifts the tail and reindexes it.

use crate::event::{ChangeEvent, ChangeKind};
use crate::record::Record;
use std::collections::HashMap;
use tracing::trace;

/// What [`MirrorStore::apply`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// New record appended (INSERT).
    Inserted,
    /// Existing record replaced in place (UPDATE).
    Updated,
    /// UPDATE for an unknown id; appended as a new record.
    Appended,
    /// Existing record removed (DELETE).
    Deleted,
    /// No-op: duplicate INSERT, DELETE of an unknown id, or no usable id.
    Ignored,
}

impl ApplyOutcome {
    /// Whether the mirror changed.
    pub fn is_change(&self) -> bool {
        !matches!(self, ApplyOutcome::Ignored)
    }
}

/// Ordered, id-unique record collection.
#[derive(Debug, Clone)]
pub struct MirrorStore<R: Record> {
    records: Vec<R>,
    index: HashMap<R::Id, usize>,
}

impl<R: Record> Default for MirrorStore<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<R: Record> MirrorStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a snapshot, replacing all contents.
    ///
    /// Duplicate ids keep their first occurrence.
    pub fn replace_all(&mut self, snapshot: Vec<R>) {
        self.records.clear();
        self.index.clear();
        for record in snapshot {
            let id = record.id();
            if self.index.contains_key(&id) {
                trace!(id = ?id, "Dropping duplicate id from snapshot");
                continue;
            }
            self.index.insert(id, self.records.len());
            self.records.push(record);
        }
    }

    /// Apply one confirmed change.
    pub fn apply(&mut self, event: &ChangeEvent<R>) -> ApplyOutcome {
        let Some(id) = event.target_id() else {
            return ApplyOutcome::Ignored;
        };

        match event.kind {
            ChangeKind::Insert => {
                if self.index.contains_key(&id) {
                    return ApplyOutcome::Ignored;
                }
                match &event.current {
                    Some(record) => {
                        self.push(record.clone());
                        ApplyOutcome::Inserted
                    }
                    None => ApplyOutcome::Ignored,
                }
            }
            ChangeKind::Update => {
                let Some(record) = &event.current else {
                    return ApplyOutcome::Ignored;
                };
                match self.index.get(&id) {
                    Some(&pos) => {
                        self.records[pos] = record.clone();
                        ApplyOutcome::Updated
                    }
                    None => {
                        self.push(record.clone());
                        ApplyOutcome::Appended
                    }
                }
            }
            ChangeKind::Delete => match self.index.remove(&id) {
                Some(pos) => {
                    self.records.remove(pos);
                    for record in &self.records[pos..] {
                        if let Some(slot) = self.index.get_mut(&record.id()) {
                            *slot -= 1;
                        }
                    }
                    ApplyOutcome::Deleted
                }
                None => ApplyOutcome::Ignored,
            },
        }
    }

    fn push(&mut self, record: R) {
        self.index.insert(record.id(), self.records.len());
        self.records.push(record);
    }

    pub fn get(&self, id: &R::Id) -> Option<&R> {
        self.index.get(id).map(|&pos| &self.records[pos])
    }

    pub fn contains(&self, id: &R::Id) -> bool {
        self.index.contains_key(id)
    }

    /// Records in mirror order.
    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }
}
