// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Update pipeline between the change stream and the mirror.
//!
//! # Design
//!
//! ```text
//! channel ──▶ Pipeline ──┬── Passthrough ──────────────────────────▶ mirror
//!                        ├── Batcher   (window from first event)  ─▶ mirror
//!                        └── Throttler (latest per boundary)      ─▶ mirror
//! ```
//!
//! The batcher preserves arrival order and never drops events. The throttler
//! folds superseded events for the same record through [`Coalesce`], which
//! keeps the net effect of the folded events. Either way the mirror converges
//! to the state direct application would produce.
//!
//! The stages are clock-driven state machines: callers pass `now` in and ask
//! for the [`Pipeline::next_deadline`] to sleep until. They never spawn
//! timers of their own, which keeps cancellation trivial (drop the pipeline).

use std::time::Duration;
use tokio::time::Instant;

/// Which stage is engaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Deliver every event as it arrives.
    Passthrough,
    /// Collect events for `delay` after the first one, flush early at `max_size`.
    Batch { delay: Duration, max_size: usize },
    /// Deliver the latest pending event at each `interval` boundary.
    Throttle { interval: Duration },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Batcher
// ═══════════════════════════════════════════════════════════════════════════════

/// Accumulates events and releases them as one ordered batch.
#[derive(Debug)]
pub struct Batcher<T> {
    delay: Duration,
    max_size: usize,
    buffer: Vec<T>,
    /// When the current batch started accumulating.
    batch_start: Option<Instant>,
}

impl<T> Batcher<T> {
    pub fn new(delay: Duration, max_size: usize) -> Self {
        Self {
            delay,
            max_size: max_size.max(1),
            buffer: Vec::new(),
            batch_start: None,
        }
    }

    /// Buffer an event. Returns the batch if the size cap was reached.
    pub fn push(&mut self, item: T, now: Instant) -> Option<Vec<T>> {
        // Start batch timer on first event
        if self.batch_start.is_none() {
            self.batch_start = Some(now);
        }
        self.buffer.push(item);

        if self.buffer.len() >= self.max_size {
            Some(self.drain())
        } else {
            None
        }
    }

    /// When the current batch is due.
    pub fn deadline(&self) -> Option<Instant> {
        self.batch_start.map(|start| start + self.delay)
    }

    /// Release the batch if its window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Vec<T>> {
        match self.deadline() {
            Some(deadline) if now >= deadline && !self.buffer.is_empty() => Some(self.drain()),
            _ => None,
        }
    }

    /// Take everything buffered and reset the timer.
    pub fn drain(&mut self) -> Vec<T> {
        self.batch_start = None;
        std::mem::take(&mut self.buffer)
    }

    pub fn pending_since(&self) -> Option<Instant> {
        self.batch_start
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Throttler
// ═══════════════════════════════════════════════════════════════════════════════

/// Events that can be folded into a newer event for the same record.
pub trait Coalesce {
    type Key: Eq + std::fmt::Debug;

    /// Record this event targets. `None` is never coalesced.
    fn coalesce_key(&self) -> Option<Self::Key>;

    /// Fold `next` into `self`. Applying the result must leave the mirror in
    /// the same state as applying `self` then `next`.
    fn supersede(self, next: Self) -> Self;
}

#[derive(Debug)]
struct Slot<T: Coalesce> {
    key: Option<T::Key>,
    item: T,
    /// Arrival of the oldest event folded into this slot.
    since: Instant,
    /// Arrival order of the newest event folded into this slot.
    seq: u64,
}

/// Trailing-edge throttle: at most one delivery per interval.
///
/// Nothing leaves on arrival. The first event into an idle throttler arms a
/// boundary one interval later; at each boundary the slot holding the most
/// recently received event is delivered. Events for a record already pending
/// are folded into its slot, so a burst on one record surfaces its latest
/// state at the next boundary. Slots for other records stay queued for the
/// following boundaries.
#[derive(Debug)]
pub struct Throttler<T: Coalesce> {
    interval: Duration,
    /// Pending slots in order of first arrival.
    slots: Vec<Slot<T>>,
    next_boundary: Option<Instant>,
    seq: u64,
}

impl<T: Coalesce> Throttler<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slots: Vec::new(),
            next_boundary: None,
            seq: 0,
        }
    }

    /// Queue an event for the next boundary.
    pub fn push(&mut self, item: T, now: Instant) {
        self.seq += 1;
        let seq = self.seq;
        let key = item.coalesce_key();

        let existing = key
            .as_ref()
            .and_then(|key| self.slots.iter().position(|slot| slot.key.as_ref() == Some(key)));
        match existing {
            Some(pos) => {
                let slot = self.slots.remove(pos);
                self.slots.insert(
                    pos,
                    Slot {
                        key: slot.key,
                        item: slot.item.supersede(item),
                        since: slot.since,
                        seq,
                    },
                );
            }
            None => self.slots.push(Slot {
                key,
                item,
                since: now,
                seq,
            }),
        }

        if self.next_boundary.is_none() {
            self.next_boundary = Some(now + self.interval);
        }
    }

    /// Next boundary, if anything is pending.
    pub fn deadline(&self) -> Option<Instant> {
        if self.slots.is_empty() {
            return None;
        }
        self.next_boundary
    }

    /// Release the most recently touched slot if a boundary has passed.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match self.deadline() {
            Some(boundary) if now >= boundary => {}
            _ => return None,
        }
        let newest = self
            .slots
            .iter()
            .enumerate()
            .max_by_key(|(_, slot)| slot.seq)
            .map(|(pos, _)| pos)?;
        let slot = self.slots.remove(newest);

        self.next_boundary = if self.slots.is_empty() {
            None
        } else {
            Some(now + self.interval)
        };
        Some(slot.item)
    }

    /// Take every pending slot in arrival order and disarm the timer.
    pub fn drain(&mut self) -> Vec<T> {
        self.next_boundary = None;
        self.slots.drain(..).map(|slot| slot.item).collect()
    }

    pub fn pending_since(&self) -> Option<Instant> {
        self.slots.iter().map(|slot| slot.since).min()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════════════════════════

/// The engaged stage for one subscription.
#[derive(Debug)]
pub enum Pipeline<T: Coalesce> {
    Passthrough,
    Batched(Batcher<T>),
    Throttled(Throttler<T>),
}

impl<T: Coalesce> Pipeline<T> {
    pub fn new(mode: PipelineMode) -> Self {
        match mode {
            PipelineMode::Passthrough => Pipeline::Passthrough,
            PipelineMode::Batch { delay, max_size } => Pipeline::Batched(Batcher::new(delay, max_size)),
            PipelineMode::Throttle { interval } => Pipeline::Throttled(Throttler::new(interval)),
        }
    }

    /// Feed one event. Returns whatever is ready for the mirror now.
    pub fn push(&mut self, item: T, now: Instant) -> Vec<T> {
        match self {
            Pipeline::Passthrough => vec![item],
            Pipeline::Batched(batcher) => batcher.push(item, now).unwrap_or_default(),
            Pipeline::Throttled(throttler) => {
                throttler.push(item, now);
                Vec::new()
            }
        }
    }

    /// Earliest instant at which [`poll`](Self::poll) may release something.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self {
            Pipeline::Passthrough => None,
            Pipeline::Batched(batcher) => batcher.deadline(),
            Pipeline::Throttled(throttler) => throttler.deadline(),
        }
    }

    /// Release whatever is due at `now`.
    pub fn poll(&mut self, now: Instant) -> Vec<T> {
        match self {
            Pipeline::Passthrough => Vec::new(),
            Pipeline::Batched(batcher) => batcher.poll(now).unwrap_or_default(),
            Pipeline::Throttled(throttler) => throttler.poll(now).into_iter().collect(),
        }
    }

    /// Take everything pending regardless of timers.
    pub fn drain(&mut self) -> Vec<T> {
        match self {
            Pipeline::Passthrough => Vec::new(),
            Pipeline::Batched(batcher) => batcher.drain(),
            Pipeline::Throttled(throttler) => throttler.drain(),
        }
    }

    /// Discard everything pending.
    pub fn clear(&mut self) {
        let dropped = self.drain().len();
        if dropped > 0 {
            tracing::debug!(dropped, "Discarded pending pipeline events");
        }
    }

    /// Arrival time of the oldest pending event.
    pub fn pending_since(&self) -> Option<Instant> {
        match self {
            Pipeline::Passthrough => None,
            Pipeline::Batched(batcher) => batcher.pending_since(),
            Pipeline::Throttled(throttler) => throttler.pending_since(),
        }
    }

    pub fn pending(&self) -> usize {
        match self {
            Pipeline::Passthrough => 0,
            Pipeline::Batched(batcher) => batcher.len(),
            Pipeline::Throttled(throttler) => throttler.len(),
        }
    }
}
