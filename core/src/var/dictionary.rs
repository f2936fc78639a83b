use std::sync::Arc;

use anyhow::Result;
use tracing::trace;

use crate::config::PoolConfig;
use crate::gc::Trace;
use crate::table::{Equality, HashTable};
use crate::val::Val;

use super::cell::{VarRef, VariableCell};
use super::stem::{Stem, compound_tail, stem_key};

/// Variables of one scope, keyed by name.
///
/// Names always resolve: referencing an unknown name creates an unset cell.
/// Whether the cell holds a value is for the caller to check.
pub struct VariableDictionary {
    table: HashTable<Equality, VarRef>,
    scope: Option<Val>,
    stem_size: usize,
}

impl Default for VariableDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableDictionary {
    /// A free-standing dictionary sized from the process configuration.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::global())
    }

    pub fn with_config(config: &PoolConfig) -> Self {
        Self::with_sizes(None, config.dictionary_size, config.stem_size)
    }

    /// A dictionary owned by `scope` (the class or behavior it belongs to).
    pub fn for_scope(scope: Val, config: &PoolConfig) -> Self {
        Self::with_sizes(Some(scope), config.scope_size, config.stem_size)
    }

    pub fn with_sizes(scope: Option<Val>, primary_size: usize, stem_size: usize) -> Self {
        Self::from_parts(HashTable::with_primary_size(primary_size), scope, stem_size)
    }

    pub(crate) fn from_parts(table: HashTable<Equality, VarRef>, scope: Option<Val>, stem_size: usize) -> Self {
        Self {
            table,
            scope,
            stem_size,
        }
    }

    pub fn scope(&self) -> Option<&Val> {
        self.scope.as_ref()
    }

    pub(crate) fn stem_size(&self) -> usize {
        self.stem_size
    }

    pub fn table(&self) -> &HashTable<Equality, VarRef> {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Existing cell for `name`, without creating one.
    pub fn lookup(&self, name: &str) -> Option<VarRef> {
        self.table.get(&Val::str(name)).cloned()
    }

    /// Cell for `name`, created unset on first reference.
    pub fn resolve(&mut self, name: &str) -> Result<VarRef> {
        let key = Val::str(name);
        if let Some(cell) = self.table.get(&key) {
            return Ok(cell.clone());
        }
        let cell = VariableCell::new(name);
        self.table.put(key, cell.clone())?;
        trace!(target: "varpool::var", name, "var.vivify");
        Ok(cell)
    }

    pub fn value(&self, name: &str) -> Option<Val> {
        self.lookup(name).and_then(|cell| cell.get())
    }

    pub fn assign(&mut self, name: &str, value: Val) -> Result<VarRef> {
        let cell = self.resolve(name)?;
        cell.set(value);
        Ok(cell)
    }

    /// Remove `name`. The removed cell is cleared so captured references see
    /// the drop. Dropping an unknown name does nothing.
    pub fn drop_var(&mut self, name: &str) -> bool {
        match self.table.remove(&Val::str(name)) {
            Some(cell) => {
                cell.clear();
                true
            }
            None => false,
        }
    }

    /// Existing stem `name`, if its cell currently holds one.
    pub fn lookup_stem(&self, name: &str) -> Option<Arc<Stem>> {
        self.value(&stem_key(name)).and_then(|value| value.as_stem().cloned())
    }

    /// Stem `name`, installing a fresh stem when the cell is unset or holds
    /// anything else.
    pub fn resolve_stem(&mut self, name: &str) -> Result<Arc<Stem>> {
        let key = stem_key(name);
        let cell = self.resolve(&key)?;
        if let Some(Val::Stem(stem)) = cell.get() {
            return Ok(stem);
        }
        let stem = Arc::new(Stem::new(&key, self.stem_size));
        cell.set(Val::Stem(stem.clone()));
        trace!(target: "varpool::var", stem = %key, "stem.vivify");
        Ok(stem)
    }

    /// Cell of the compound variable `stem` + tail parts. Tail parts must
    /// already be resolved to their string values.
    pub fn resolve_compound<T: AsRef<str>>(&mut self, stem: &str, tails: &[T]) -> Result<VarRef> {
        let stem = self.resolve_stem(stem)?;
        stem.resolve_tail(&compound_tail(tails))
    }

    pub fn assign_compound<T: AsRef<str>>(&mut self, stem: &str, tails: &[T], value: Val) -> Result<VarRef> {
        let cell = self.resolve_compound(stem, tails)?;
        cell.set(value);
        Ok(cell)
    }

    /// Value of a compound variable, or the stem default when the tail is unset.
    pub fn compound_value<T: AsRef<str>>(&self, stem: &str, tails: &[T]) -> Option<Val> {
        self.lookup_stem(stem)?.tail_value(&compound_tail(tails))
    }

    pub fn drop_compound<T: AsRef<str>>(&mut self, stem: &str, tails: &[T]) -> bool {
        match self.lookup_stem(stem) {
            Some(stem) => stem.drop_tail(&compound_tail(tails)),
            None => false,
        }
    }

    /// Stem assignment: discard every tail and make `value` the default.
    pub fn assign_stem(&mut self, stem: &str, value: Val) -> Result<Arc<Stem>> {
        let stem = self.resolve_stem(stem)?;
        stem.assign_default(Some(value));
        Ok(stem)
    }

    /// Every cell in slot order, set or not.
    pub fn variables(&self) -> impl Iterator<Item = &VarRef> + '_ {
        self.table.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.table.values().map(|cell| cell.name())
    }

    pub fn mark_live(&self, visit: &mut dyn FnMut(&dyn Trace)) {
        if let Some(scope) = &self.scope {
            visit(scope);
        }
        self.table.mark_live(visit);
    }
}

impl std::fmt::Debug for VariableDictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableDictionary")
            .field("scope", &self.scope)
            .field("variables", &self.table.len())
            .finish()
    }
}
