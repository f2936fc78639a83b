use std::fmt;
use std::sync::{Arc, Mutex};

use crate::util::lock;
use crate::val::Val;

/// Shared handle to a variable cell. Closures and activations that capture a
/// variable hold one of these; the cell lives as long as its longest holder.
pub type VarRef = Arc<VariableCell>;

/// Named storage location for one variable.
pub struct VariableCell {
    name: Box<str>,
    value: Mutex<Option<Val>>,
}

impl VariableCell {
    /// A cell with no value yet.
    pub fn new(name: &str) -> VarRef {
        Arc::new(Self {
            name: name.into(),
            value: Mutex::new(None),
        })
    }

    pub fn with_value(name: &str, value: Val) -> VarRef {
        Arc::new(Self {
            name: name.into(),
            value: Mutex::new(Some(value)),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> Option<Val> {
        lock(&self.value).clone()
    }

    /// Assign, returning the previous value.
    pub fn set(&self, value: Val) -> Option<Val> {
        lock(&self.value).replace(value)
    }

    /// Remove the value, leaving the cell unset.
    pub fn clear(&self) -> Option<Val> {
        lock(&self.value).take()
    }

    pub fn has_value(&self) -> bool {
        lock(&self.value).is_some()
    }
}

impl fmt::Debug for VariableCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableCell")
            .field("name", &self.name)
            .field("value", &self.get())
            .finish()
    }
}
