//! Chained hash table over a split slot array.
//!
//! The slot array holds `2 * primary_size` slots. The first half (primary
//! region) is addressed by `hash % primary_size`; the second half (overflow
//! region) only holds chain links. Every occupied primary slot is the head of
//! its bucket's chain, and the newest entry of a bucket always sits at the head.
//!
//! Free overflow slots are found by scanning downward from a high-water mark.
//! The mark is a starting point only: removals raise it when they free a slot
//! above it, inserts lower it past the slot they take.
//!
//! When the overflow region is exhausted the table doubles its capacity and
//! reinserts every entry. The new slot array is allocated before the old one
//! is touched, so an allocation failure leaves the table unchanged.

use std::marker::PhantomData;

use anyhow::{Result, anyhow};
use tracing::debug;

use crate::gc::Trace;

mod error;
mod flat;
mod semantics;

pub use error::TableError;
pub use flat::{FlatSlot, FlatTable, Relocate, RelocatedRef, Restore};
pub use semantics::{Equality, Identity, Semantics, StringContent};


/// Smallest number of primary buckets a table is built with.
pub const MIN_PRIMARY_SIZE: usize = 3;
/// Primary size used by [`HashTable::new`].
pub const DEFAULT_PRIMARY_SIZE: usize = 17;
/// Largest primary size [`HashTable::with_primary_size`] builds up front.
/// Tables still grow past it.
pub const MAX_INITIAL_PRIMARY_SIZE: usize = 1 << 20;

struct Slot<K, V> {
    entry: Option<(K, V)>,
    /// Next link of the chain; always an overflow-region index.
    next: Option<usize>,
}

impl<K, V> Slot<K, V> {
    const fn empty() -> Self {
        Self { entry: None, next: None }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.entry.is_none()
    }
}

/// Snapshot of a table's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    pub primary_size: usize,
    pub capacity: usize,
    pub entries: usize,
    pub overflow_in_use: usize,
    pub longest_chain: usize,
}

pub struct HashTable<S: Semantics, V> {
    primary_size: usize,
    slots: Vec<Slot<S::Key, V>>,
    free_mark: usize,
    len: usize,
    _mode: PhantomData<fn() -> S>,
}

impl<S: Semantics, V> Default for HashTable<S, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Round a requested bucket count to the odd size actually built.
fn normalize_primary_size(requested: usize) -> usize {
    requested.max(MIN_PRIMARY_SIZE) | 1
}

fn allocate_slots<K, V>(primary_size: usize) -> Result<Vec<Slot<K, V>>, TableError> {
    let capacity = primary_size.checked_mul(2).ok_or(TableError::CapacityOverflow)?;
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(capacity)
        .map_err(|_| TableError::OutOfMemory { requested: capacity })?;
    slots.resize_with(capacity, Slot::empty);
    Ok(slots)
}

impl<S: Semantics, V> HashTable<S, V> {
    pub fn new() -> Self {
        Self::with_primary_size(DEFAULT_PRIMARY_SIZE)
    }

    /// Build an empty table with at least `primary_size` buckets (rounded up
    /// to odd, capped at [`MAX_INITIAL_PRIMARY_SIZE`]).
    pub fn with_primary_size(primary_size: usize) -> Self {
        let primary_size = normalize_primary_size(primary_size.min(MAX_INITIAL_PRIMARY_SIZE));
        let mut slots = Vec::with_capacity(primary_size * 2);
        slots.resize_with(primary_size * 2, Slot::empty);
        Self::from_slots(primary_size, slots)
    }

    /// Like [`HashTable::with_primary_size`] without the cap, reporting a
    /// slot array that cannot be allocated.
    pub fn try_with_primary_size(primary_size: usize) -> Result<Self, TableError> {
        let primary_size = normalize_primary_size(primary_size);
        Ok(Self::from_slots(primary_size, allocate_slots(primary_size)?))
    }

    fn from_slots(primary_size: usize, slots: Vec<Slot<S::Key, V>>) -> Self {
        debug_assert_eq!(slots.len(), primary_size * 2);
        Self {
            primary_size,
            free_mark: slots.len() - 1,
            slots,
            len: 0,
            _mode: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of addressable buckets.
    #[inline]
    pub fn primary_size(&self) -> usize {
        self.primary_size
    }

    /// Total slot count (primary plus overflow).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn bucket(&self, key: &S::Key) -> usize {
        (S::hash(key) % self.primary_size as u64) as usize
    }

    /// Walk the chain of `bucket`, returning `(predecessor, index)` of the
    /// first entry accepted by `pred`.
    fn locate(&self, bucket: usize, mut pred: impl FnMut(&S::Key, &V) -> bool) -> Option<(Option<usize>, usize)> {
        let mut prev = None;
        let mut cursor = Some(bucket);
        let mut steps = 0usize;
        while let Some(idx) = cursor {
            let slot = &self.slots[idx];
            let (key, value) = slot.entry.as_ref()?;
            if pred(key, value) {
                return Some((prev, idx));
            }
            steps += 1;
            debug_assert!(steps <= self.slots.len(), "unterminated chain at bucket {}", bucket);
            prev = Some(idx);
            cursor = slot.next;
        }
        None
    }

    pub fn get(&self, key: &S::Key) -> Option<&V> {
        let (_, idx) = self.locate(self.bucket(key), |stored, _| S::matches(key, stored))?;
        self.slots[idx].entry.as_ref().map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, key: &S::Key) -> Option<&mut V> {
        let (_, idx) = self.locate(self.bucket(key), |stored, _| S::matches(key, stored))?;
        self.slots[idx].entry.as_mut().map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &S::Key) -> bool {
        self.get(key).is_some()
    }

    /// Every value stored under `key`, newest first.
    pub fn all<'a>(&'a self, key: &'a S::Key) -> impl Iterator<Item = &'a V> + 'a {
        let mut cursor = Some(self.bucket(key));
        std::iter::from_fn(move || {
            while let Some(idx) = cursor {
                let slot = &self.slots[idx];
                let (stored, value) = slot.entry.as_ref()?;
                cursor = slot.next;
                if S::matches(key, stored) {
                    return Some(value);
                }
            }
            None
        })
    }

    /// Add an entry without looking for an existing one. Duplicate keys coexist.
    pub fn insert(&mut self, key: S::Key, value: V) -> Result<(), TableError> {
        let bucket = self.bucket(&key);
        self.insert_at(bucket, key, value)
    }

    /// Store `value` under `key`, replacing the value of a matching entry in place.
    /// Returns the replaced value.
    pub fn put(&mut self, key: S::Key, value: V) -> Result<Option<V>, TableError> {
        let bucket = self.bucket(&key);
        if let Some((_, idx)) = self.locate(bucket, |stored, _| S::matches(&key, stored))
            && let Some((_, stored)) = self.slots[idx].entry.as_mut()
        {
            return Ok(Some(std::mem::replace(stored, value)));
        }
        self.insert_at(bucket, key, value)?;
        Ok(None)
    }

    fn insert_at(&mut self, mut bucket: usize, key: S::Key, value: V) -> Result<(), TableError> {
        loop {
            if self.slots[bucket].is_empty() {
                debug_assert!(self.slots[bucket].next.is_none());
                self.slots[bucket].entry = Some((key, value));
                self.len += 1;
                return Ok(());
            }
            if let Some(free) = self.take_free_slot() {
                // The previous head moves down one link with its own chain intact.
                let newest = Slot {
                    entry: Some((key, value)),
                    next: Some(free),
                };
                self.slots[free] = std::mem::replace(&mut self.slots[bucket], newest);
                self.len += 1;
                return Ok(());
            }
            self.grow()?;
            bucket = self.bucket(&key);
        }
    }

    /// Scan the overflow region downward from the high-water mark.
    fn take_free_slot(&mut self) -> Option<usize> {
        if self.free_mark < self.primary_size {
            return None;
        }
        let found = (self.primary_size..=self.free_mark)
            .rev()
            .find(|&idx| self.slots[idx].is_empty())?;
        self.free_mark = found - 1;
        Some(found)
    }

    fn note_free(&mut self, idx: usize) {
        debug_assert!(idx >= self.primary_size && self.slots[idx].is_empty());
        if idx > self.free_mark {
            self.free_mark = idx;
        }
    }

    fn grow(&mut self) -> Result<(), TableError> {
        let primary_size = self.primary_size.checked_mul(2).ok_or(TableError::CapacityOverflow)?;
        let mut grown = Self::from_slots(primary_size, allocate_slots(primary_size)?);
        let old_capacity = self.slots.len();
        for slot in std::mem::take(&mut self.slots) {
            if let Some((key, value)) = slot.entry {
                // Never grows again: the doubled overflow region holds every old entry.
                grown.insert(key, value)?;
            }
        }
        debug!(
            target: "varpool::table",
            mode = S::NAME,
            from = old_capacity,
            to = grown.slots.len(),
            entries = grown.len,
            "table.grow"
        );
        *self = grown;
        Ok(())
    }

    pub fn remove(&mut self, key: &S::Key) -> Option<V> {
        let (prev, idx) = self.locate(self.bucket(key), |stored, _| S::matches(key, stored))?;
        self.unlink(prev, idx)
    }

    fn unlink(&mut self, prev: Option<usize>, idx: usize) -> Option<V> {
        let removed = match self.slots[idx].next {
            None => {
                let removed = std::mem::replace(&mut self.slots[idx], Slot::empty());
                if let Some(prev) = prev {
                    self.slots[prev].next = None;
                    self.note_free(idx);
                }
                removed
            }
            Some(successor) => match prev {
                // Inside the overflow region the link is spliced out and no
                // entry moves, so cursors below `idx` never see an entry twice.
                Some(prev) => {
                    self.slots[prev].next = Some(successor);
                    let removed = std::mem::replace(&mut self.slots[idx], Slot::empty());
                    self.note_free(idx);
                    removed
                }
                // Promote the successor so the chain head never moves.
                None => {
                    let promoted = std::mem::replace(&mut self.slots[successor], Slot::empty());
                    let removed = std::mem::replace(&mut self.slots[idx], promoted);
                    self.note_free(successor);
                    removed
                }
            },
        };
        let (_, value) = removed.entry?;
        self.len -= 1;
        Some(value)
    }

    /// Drop every entry, keeping the current capacity.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot::empty();
        }
        self.free_mark = self.slots.len() - 1;
        self.len = 0;
    }

    /// Ascending scan over all occupied slots.
    pub fn iter(&self) -> impl Iterator<Item = (&S::Key, &V)> + '_ {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref().map(|(key, value)| (key, value)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &S::Key> + '_ {
        self.iter().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, value)| value)
    }

    /// Position of the first occupied slot.
    pub fn first_position(&self) -> Option<usize> {
        self.position_from(0)
    }

    /// Position of the next occupied slot after `position`.
    ///
    /// Positions survive value replacement and removal of entries at later
    /// positions: every remaining entry is still visited exactly once. Removing
    /// the entry at `position` itself may skip its promoted successor; growth
    /// invalidates positions.
    pub fn next_position(&self, position: usize) -> Option<usize> {
        self.position_from(position + 1)
    }

    fn position_from(&self, start: usize) -> Option<usize> {
        (start..self.slots.len()).find(|&idx| !self.slots[idx].is_empty())
    }

    pub fn entry_at(&self, position: usize) -> Option<(&S::Key, &V)> {
        self.slots
            .get(position)?
            .entry
            .as_ref()
            .map(|(key, value)| (key, value))
    }

    pub fn stats(&self) -> TableStats {
        let overflow_in_use = self.slots[self.primary_size..]
            .iter()
            .filter(|slot| !slot.is_empty())
            .count();
        let longest_chain = (0..self.primary_size)
            .map(|bucket| self.chain_len(bucket))
            .max()
            .unwrap_or(0);
        TableStats {
            primary_size: self.primary_size,
            capacity: self.slots.len(),
            entries: self.len,
            overflow_in_use,
            longest_chain,
        }
    }

    fn chain_len(&self, bucket: usize) -> usize {
        let mut len = 0;
        let mut cursor = Some(bucket);
        while let Some(idx) = cursor {
            if self.slots[idx].is_empty() || len > self.slots.len() {
                break;
            }
            len += 1;
            cursor = self.slots[idx].next;
        }
        len
    }

    /// Check every structural invariant of the slot array.
    pub fn validate(&self) -> Result<()> {
        let capacity = self.slots.len();
        if capacity != self.primary_size * 2 {
            return Err(anyhow!(
                "capacity {} is not twice the primary size {}",
                capacity,
                self.primary_size
            ));
        }
        if self.free_mark >= capacity {
            return Err(anyhow!("free mark {} beyond capacity {}", self.free_mark, capacity));
        }

        let mut referenced = vec![false; capacity];
        for (idx, slot) in self.slots.iter().enumerate() {
            let Some(next) = slot.next else { continue };
            if slot.is_empty() {
                return Err(anyhow!("empty slot {} links to {}", idx, next));
            }
            if next < self.primary_size || next >= capacity {
                return Err(anyhow!("slot {} links outside the overflow region ({})", idx, next));
            }
            if referenced[next] {
                return Err(anyhow!("slot {} is linked twice", next));
            }
            referenced[next] = true;
        }

        let mut reached = 0usize;
        for bucket in 0..self.primary_size {
            let mut cursor = Some(bucket);
            let mut steps = 0usize;
            while let Some(idx) = cursor {
                let slot = &self.slots[idx];
                let Some((key, _)) = slot.entry.as_ref() else {
                    if idx != bucket {
                        return Err(anyhow!("chain of bucket {} reaches empty slot {}", bucket, idx));
                    }
                    break;
                };
                if self.bucket(key) != bucket {
                    return Err(anyhow!("slot {} holds a key of bucket {} in bucket {}", idx, self.bucket(key), bucket));
                }
                reached += 1;
                steps += 1;
                if steps > capacity {
                    return Err(anyhow!("chain of bucket {} does not terminate", bucket));
                }
                cursor = slot.next;
            }
        }

        let occupied = self.slots.iter().filter(|slot| !slot.is_empty()).count();
        if occupied != reached {
            return Err(anyhow!("{} occupied slots but only {} reachable from a bucket", occupied, reached));
        }
        if occupied != self.len {
            return Err(anyhow!("entry count {} disagrees with {} occupied slots", self.len, occupied));
        }
        Ok(())
    }
}

impl<S: Semantics, V: PartialEq> HashTable<S, V> {
    /// Like [`HashTable::put`], but an entry only counts as present when both
    /// key and value match. Returns whether a new entry was added.
    pub fn put_no_duplicate(&mut self, key: S::Key, value: V) -> Result<bool, TableError> {
        let bucket = self.bucket(&key);
        if let Some((_, idx)) = self.locate(bucket, |stored, existing| S::matches(&key, stored) && *existing == value)
            && let Some((_, stored)) = self.slots[idx].entry.as_mut()
        {
            *stored = value;
            return Ok(false);
        }
        self.insert_at(bucket, key, value)?;
        Ok(true)
    }

    /// Remove one specific key/value pair.
    pub fn remove_item(&mut self, key: &S::Key, value: &V) -> Option<V> {
        let (prev, idx) = self.locate(self.bucket(key), |stored, existing| {
            S::matches(key, stored) && existing == value
        })?;
        self.unlink(prev, idx)
    }

    pub fn has_item(&self, key: &S::Key, value: &V) -> bool {
        self.all(key).any(|existing| existing == value)
    }
}

impl<S: Semantics, V> HashTable<S, V>
where
    S::Key: Trace,
    V: Trace,
{
    /// Report every key and value to the collector.
    pub fn mark_live(&self, visit: &mut dyn FnMut(&dyn Trace)) {
        for (key, value) in self.iter() {
            visit(key);
            visit(value);
        }
    }
}

impl<S: Semantics, V> std::fmt::Debug for HashTable<S, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashTable")
            .field("mode", &S::NAME)
            .field("primary_size", &self.primary_size)
            .field("len", &self.len)
            .finish()
    }
}
