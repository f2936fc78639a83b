//! Variable layer: cells, per-scope dictionaries, stems and shared scopes.

mod cell;
mod dictionary;
mod shared;
mod stem;

pub use cell::{VarRef, VariableCell};
pub use dictionary::VariableDictionary;
pub use shared::{DictRef, ObjectVariables, ScopeAccess, SharedDictionary};
pub use stem::{Stem, compound_tail, stem_key};

#[cfg(test)]
mod shared_test;
