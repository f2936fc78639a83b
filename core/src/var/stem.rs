//! Stem variables: one nested table per stem, keyed by compound tail.

use std::sync::Mutex;

use anyhow::Result;
use tracing::{debug, trace};

use crate::gc::Trace;
use crate::table::{Equality, HashTable};
use crate::util::lock;
use crate::val::{StoredHash, Val};

use super::cell::{VarRef, VariableCell};

/// Join already resolved tail parts into one compound tail.
pub fn compound_tail<T: AsRef<str>>(parts: &[T]) -> String {
    parts.iter().map(AsRef::as_ref).collect()
}

/// Dictionary key of a stem: its name with a trailing period.
pub fn stem_key(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

pub(crate) struct StemState {
    pub(crate) tails: HashTable<Equality, VarRef>,
    pub(crate) default: Option<Val>,
}

pub struct Stem {
    hash: StoredHash,
    name: Box<str>,
    state: Mutex<StemState>,
}

impl Stem {
    pub fn new(name: &str, tail_size: usize) -> Self {
        Self::with_stored_hash(name, StoredHash::fresh(), tail_size)
    }

    pub fn with_stored_hash(name: &str, hash: StoredHash, tail_size: usize) -> Self {
        Self {
            hash,
            name: stem_key(name).into(),
            state: Mutex::new(StemState {
                tails: HashTable::with_primary_size(tail_size),
                default: None,
            }),
        }
    }

    /// Stem name including the trailing period.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stored_hash(&self) -> StoredHash {
        self.hash
    }

    pub fn len(&self) -> usize {
        lock(&self.state).tails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cell for `tail`, created unset on first reference.
    pub fn resolve_tail(&self, tail: &str) -> Result<VarRef> {
        let mut state = lock(&self.state);
        let key = Val::str(tail);
        if let Some(cell) = state.tails.get(&key) {
            return Ok(cell.clone());
        }
        let cell = VariableCell::new(&format!("{}{}", self.name, tail));
        state.tails.put(key, cell.clone())?;
        trace!(target: "varpool::var", stem = %self.name, tail, "stem.vivify_tail");
        Ok(cell)
    }

    pub fn lookup_tail(&self, tail: &str) -> Option<VarRef> {
        lock(&self.state).tails.get(&Val::str(tail)).cloned()
    }

    /// Value of `tail`, falling back to the stem default.
    pub fn tail_value(&self, tail: &str) -> Option<Val> {
        let state = lock(&self.state);
        state
            .tails
            .get(&Val::str(tail))
            .and_then(|cell| cell.get())
            .or_else(|| state.default.clone())
    }

    /// Remove `tail`, clearing its cell. Unknown tails are ignored.
    pub fn drop_tail(&self, tail: &str) -> bool {
        let removed = lock(&self.state).tails.remove(&Val::str(tail));
        match removed {
            Some(cell) => {
                cell.clear();
                true
            }
            None => false,
        }
    }

    pub fn default_value(&self) -> Option<Val> {
        lock(&self.state).default.clone()
    }

    /// Stem assignment: every tail is discarded and `value` becomes the default.
    pub fn assign_default(&self, value: Option<Val>) {
        let mut state = lock(&self.state);
        let discarded = state.tails.len();
        for (_, cell) in state.tails.iter() {
            cell.clear();
        }
        state.tails.clear();
        state.default = value;
        debug!(target: "varpool::var", stem = %self.name, discarded, "stem.assign");
    }

    /// Tails that currently hold a value, in slot order.
    pub fn tails(&self) -> Vec<(String, Val)> {
        let state = lock(&self.state);
        state
            .tails
            .iter()
            .filter_map(|(key, cell)| Some((key.to_string(), cell.get()?)))
            .collect()
    }

    pub fn mark_live(&self, visit: &mut dyn FnMut(&dyn Trace)) {
        let state = lock(&self.state);
        state.tails.mark_live(visit);
        if let Some(default) = &state.default {
            visit(default);
        }
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&StemState) -> R) -> R {
        f(&lock(&self.state))
    }

    pub(crate) fn install(&self, tails: HashTable<Equality, VarRef>, default: Option<Val>) {
        let mut state = lock(&self.state);
        state.tails = tails;
        state.default = default;
    }
}
