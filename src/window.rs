//! Window allocation for single-blob context files.
//!
//! Maps unit ids to byte ranges inside a bounded backing blob. Units are
//! placed in a cyclic fashion: newer windows land after older ones until the
//! configured maximum size is reached, after which allocation wraps to the
//! beginning of the blob and starts reusing the oldest windows.
//!
//! The table stores only window sizes; offsets are always derived as the sum
//! of all preceding sizes, which guarantees the sequence stays contiguous and
//! pairwise non-overlapping. The id lookup map and the offset prefix sums are
//! caches over the slot sequence, rebuilt eagerly whenever a structural edit
//! (split, merge, interior removal) invalidates slot positions.
//!
//! Known limitation, inherited by design: the single cursor makes no fairness
//! guarantee between units of one context. Interleaved writes for different
//! unit ids (e.g. a user alternating between two tabs) can prematurely evict
//! a still-wanted unit once the blob has wrapped. Callers that cannot accept
//! this should use the one-file-per-unit backend instead.

use crate::types::{UnitId, Window};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One record in the allocation sequence. `unit_id` is `None` for a window
/// that was invalidated but whose bytes are still reserved for reuse.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Slot {
    unit_id: Option<UnitId>,
    size: u64,
}

/// Serialized form of the table: the derived caches are rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedTable {
    slots: Vec<Slot>,
    cursor: Option<usize>,
    total_size: u64,
    max_size: u64,
}

/// Allocator/index for one context's backing blob.
///
/// Not internally synchronized: the owning store guards each table with a
/// per-context lock, since concurrent allocation for one context would
/// corrupt the derived offsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "PersistedTable", into = "PersistedTable")]
pub struct WindowTable {
    slots: Vec<Slot>,
    /// Index of the most recently allocated slot; `None` before the first
    /// allocation.
    cursor: Option<usize>,
    total_size: u64,
    /// Once `total_size` reaches this bound the cursor wraps to slot 0.
    /// Zero disables wrapping (the blob grows without bound).
    max_size: u64,
    /// unit id -> slot index, maintained eagerly.
    index: HashMap<UnitId, usize>,
    /// Slot start offsets (prefix sums of sizes), maintained eagerly.
    offsets: Vec<u64>,
}

impl From<PersistedTable> for WindowTable {
    fn from(p: PersistedTable) -> Self {
        let mut table = WindowTable {
            slots: p.slots,
            cursor: p.cursor,
            total_size: p.total_size,
            max_size: p.max_size,
            index: HashMap::new(),
            offsets: Vec::new(),
        };
        table.rebuild_caches();
        table
    }
}

impl From<WindowTable> for PersistedTable {
    fn from(t: WindowTable) -> Self {
        PersistedTable {
            slots: t.slots,
            cursor: t.cursor,
            total_size: t.total_size,
            max_size: t.max_size,
        }
    }
}

impl WindowTable {
    /// Creates an empty table. `max_size` bounds the blob; zero disables the
    /// bound.
    pub fn new(max_size: u64) -> Self {
        Self {
            slots: Vec::new(),
            cursor: None,
            total_size: 0,
            max_size,
            index: HashMap::new(),
            offsets: Vec::new(),
        }
    }

    /// Summed size of all windows, live and free.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Allocates a window for `unit_id`. Any previous window for the same id
    /// is invalidated first; its range becomes reusable and any bytes there
    /// are only valid until a newer allocation claims them.
    pub fn allocate(&mut self, unit_id: UnitId, size: u64) -> Window {
        let existing = self.index.get(&unit_id).copied();

        if let Some(i) = existing {
            self.index.remove(&unit_id);
            self.slots[i].unit_id = None;
        }

        // Reuse in place only when the invalidated window already sits at
        // the cursor; otherwise move the cursor forward (wrapping once the
        // blob is full and the cursor is at the tail).
        let at = match existing {
            Some(i) if self.cursor == Some(i) => i,
            _ => self.advance_cursor(),
        };

        self.claim(at, size);

        // The claimed slot may have belonged to another live unit (cursor
        // wrapped onto the oldest window); that unit is evicted here.
        if let Some(evicted) = self.slots[at].unit_id.take() {
            self.index.remove(&evicted);
        }
        self.slots[at].unit_id = Some(unit_id);
        self.index.insert(unit_id, at);

        Window {
            unit_id,
            offset: self.offsets[at],
            size: self.slots[at].size,
        }
    }

    /// Looks up the live window for `unit_id`.
    pub fn lookup(&self, unit_id: UnitId) -> Option<Window> {
        let i = *self.index.get(&unit_id)?;
        Some(Window {
            unit_id,
            offset: self.offsets[i],
            size: self.slots[i].size,
        })
    }

    /// Frees the window for `unit_id`. A tail window is physically removed;
    /// an interior window is only marked free, retaining its size for reuse.
    pub fn free(&mut self, unit_id: UnitId) {
        let Some(i) = self.index.remove(&unit_id) else {
            return;
        };
        if i == self.slots.len() - 1 {
            if let Some(slot) = self.slots.pop() {
                self.offsets.pop();
                self.total_size -= slot.size;
            }
            if self.cursor == Some(i) {
                self.cursor = i.checked_sub(1);
            }
        } else {
            self.slots[i].unit_id = None;
        }
    }

    /// Returns up to `count` most recently allocated live windows, newest
    /// first, walking backward from the cursor circularly until a full lap
    /// completes.
    pub fn recent_windows(&self, count: usize) -> Vec<Window> {
        let mut result = Vec::new();
        let Some(start) = self.cursor else {
            return result;
        };
        if count == 0 {
            return result;
        }

        let mut current = start;
        loop {
            if current < self.slots.len() {
                let slot = &self.slots[current];
                if let Some(unit_id) = slot.unit_id {
                    result.push(Window {
                        unit_id,
                        offset: self.offsets[current],
                        size: slot.size,
                    });
                }
            }

            current = match current.checked_sub(1) {
                Some(prev) => prev,
                None => match self.slots.len().checked_sub(1) {
                    Some(last) => last,
                    None => break,
                },
            };

            if result.len() >= count || current == start {
                break;
            }
        }

        result
    }

    /// Moves the cursor to the next allocation target, wrapping to the first
    /// slot once the configured maximum size has been reached and the cursor
    /// is at the last slot. This wrap is what forces circular reuse.
    fn advance_cursor(&mut self) -> usize {
        let next = match self.cursor {
            Some(p)
                if self.max_size > 0
                    && self.total_size >= self.max_size
                    && p == self.slots.len().saturating_sub(1) =>
            {
                0
            }
            Some(p) => p + 1,
            None => 0,
        };
        self.cursor = Some(next);
        next
    }

    /// Makes the slot at `at` exactly `size` bytes, appending, splitting or
    /// merging as needed. The slot is left free; the caller marks it live.
    fn claim(&mut self, at: usize, size: u64) {
        if at == self.slots.len() {
            // Past the end: append a fresh window.
            let offset = self.end_offset();
            self.slots.push(Slot {
                unit_id: None,
                size,
            });
            self.offsets.push(offset);
            self.total_size += size;
        } else if self.slots[at].size != size {
            self.adjust(at, size);
        }
    }

    /// Resizes the slot at `at` to `size`: a smaller target splits the slot,
    /// a larger one merges forward through as many slots as needed. The tail
    /// slot is simply grown or shrunk, since nothing follows it.
    fn adjust(&mut self, at: usize, size: u64) {
        if at == self.slots.len() - 1 {
            self.resize_tail(at, size);
            return;
        }

        // Merge forward until the slot can hold `size` or becomes the tail.
        let mut merged = false;
        while self.slots[at].size < size && at < self.slots.len() - 1 {
            let next_size = self.slots[at + 1].size;
            self.slots[at].size += next_size;
            self.slots.remove(at + 1);
            merged = true;
        }
        if merged {
            self.rebuild_caches();
        }

        if self.slots[at].size < size {
            // Still short after consuming everything behind it: it is the
            // tail now, so grow it.
            self.resize_tail(at, size);
        } else {
            self.split(at, size);
        }
    }

    /// Shrinks the slot at `at` to `size`, turning the leftover bytes into an
    /// adjacent free slot so no space is lost. No-op when sizes match.
    fn split(&mut self, at: usize, size: u64) {
        let delta = self.slots[at].size - size;
        if at == self.slots.len() - 1 {
            self.resize_tail(at, size);
        } else if delta > 0 {
            self.slots[at].size = size;
            self.slots.insert(
                at + 1,
                Slot {
                    unit_id: None,
                    size: delta,
                },
            );
            self.rebuild_caches();
        }
    }

    fn resize_tail(&mut self, at: usize, size: u64) {
        let old = self.slots[at].size;
        self.total_size = self.total_size - old + size;
        self.slots[at].size = size;
        // Start offsets are unchanged when only the tail length moves.
    }

    fn end_offset(&self) -> u64 {
        match (self.offsets.last(), self.slots.last()) {
            (Some(offset), Some(slot)) => offset + slot.size,
            _ => 0,
        }
    }

    /// Rebuilds the id map and offset prefix sums from the slot sequence.
    /// Called eagerly after every structural edit so lookups never race a
    /// stale cache.
    fn rebuild_caches(&mut self) {
        self.index.clear();
        self.offsets.clear();
        self.offsets.reserve(self.slots.len());
        let mut offset = 0u64;
        for (i, slot) in self.slots.iter().enumerate() {
            self.offsets.push(offset);
            offset += slot.size;
            if let Some(unit_id) = slot.unit_id {
                self.index.insert(unit_id, i);
            }
        }
    }

    #[cfg(test)]
    fn live_windows(&self) -> Vec<Window> {
        self.index
            .iter()
            .map(|(&unit_id, &i)| Window {
                unit_id,
                offset: self.offsets[i],
                size: self.slots[i].size,
            })
            .collect()
    }
}
