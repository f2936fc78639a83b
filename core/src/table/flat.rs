//! Relocatable copy of a table's slot layout.
//!
//! `flatten` hands every key and value to a relocator and records the returned
//! references together with the exact slot positions and chain links. Because
//! every mode hashes from data that survives a reload (content or the stored
//! hash), `restore` can rebuild the slot array verbatim instead of rehashing.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{HashTable, MIN_PRIMARY_SIZE, Semantics, Slot, allocate_slots};

/// Reference to an object in a relocated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelocatedRef(pub u32);

/// Maps a live reference to its relocated form.
pub trait Relocate<T> {
    fn relocate(&mut self, item: &T) -> RelocatedRef;
}

/// Maps a relocated reference back to a live one.
pub trait Restore<T> {
    fn restore(&mut self, reference: RelocatedRef) -> Result<T>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatSlot {
    pub index: usize,
    pub key: RelocatedRef,
    pub value: RelocatedRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<usize>,
}

/// Occupied slots of a table with their positions and links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatTable {
    pub mode: String,
    pub primary_size: usize,
    pub free_mark: usize,
    pub slots: Vec<FlatSlot>,
}

impl<S: Semantics, V> HashTable<S, V> {
    pub fn flatten<R>(&self, relocator: &mut R) -> FlatTable
    where
        R: Relocate<S::Key> + Relocate<V>,
    {
        let slots = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let (key, value) = slot.entry.as_ref()?;
                Some(FlatSlot {
                    index,
                    key: <R as Relocate<S::Key>>::relocate(relocator, key),
                    value: <R as Relocate<V>>::relocate(relocator, value),
                    next: slot.next,
                })
            })
            .collect();
        FlatTable {
            mode: S::NAME.to_string(),
            primary_size: self.primary_size,
            free_mark: self.free_mark,
            slots,
        }
    }

    /// Rebuild a table from its flattened layout.
    ///
    /// If the layout does not validate against this build's hash functions,
    /// the entries are reinserted into a fresh table of the same size.
    pub fn restore<R>(flat: &FlatTable, restorer: &mut R) -> Result<Self>
    where
        R: Restore<S::Key> + Restore<V>,
    {
        if flat.mode != S::NAME {
            return Err(anyhow!("cannot restore a {} table as {}", flat.mode, S::NAME));
        }
        if flat.primary_size < MIN_PRIMARY_SIZE {
            return Err(anyhow!("flattened table has primary size {}", flat.primary_size));
        }
        let capacity = flat
            .primary_size
            .checked_mul(2)
            .ok_or_else(|| anyhow!("flattened table size overflows"))?;

        let mut entries = Vec::with_capacity(flat.slots.len());
        for slot in &flat.slots {
            let key = <R as Restore<S::Key>>::restore(restorer, slot.key)?;
            let value = <R as Restore<V>>::restore(restorer, slot.value)?;
            entries.push((slot.index, slot.next, key, value));
        }

        let in_bounds = entries
            .iter()
            .all(|(index, next, _, _)| *index < capacity && next.is_none_or(|next| next < capacity));
        if in_bounds && flat.free_mark < capacity {
            let mut table = Self::from_slots(flat.primary_size, allocate_slots(flat.primary_size)?);
            for (index, next, key, value) in entries {
                if !table.slots[index].is_empty() {
                    return Err(anyhow!("flattened table lists slot {} twice", index));
                }
                table.slots[index] = Slot {
                    entry: Some((key, value)),
                    next,
                };
                table.len += 1;
            }
            table.free_mark = flat.free_mark;
            match table.validate() {
                Ok(()) => return Ok(table),
                Err(err) => {
                    trace!(target: "varpool::table", mode = S::NAME, error = %err, "table.restore.rehash");
                    entries = table
                        .slots
                        .into_iter()
                        .enumerate()
                        .filter_map(|(index, slot)| slot.entry.map(|(key, value)| (index, None, key, value)))
                        .collect();
                }
            }
        }

        let mut table = Self::try_with_primary_size(flat.primary_size)?;
        for (_, _, key, value) in entries {
            table.insert(key, value)?;
        }
        Ok(table)
    }
}
