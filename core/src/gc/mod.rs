//! Collector contract.
//!
//! Containers in the pool expose their outgoing references through [`Trace`];
//! they never decide how marking recurses. [`Marker`] is a reference mark
//! phase over that contract, used to compute reachable sets.

use std::sync::Arc;

use crate::util::fast_map::{FastHashSet, fast_hash_set_new};
use crate::val::{StrRef, Val};
use crate::var::VariableCell;


pub trait Trace {
    /// Address of the underlying allocation, `None` for immediates.
    fn heap_addr(&self) -> Option<usize>;

    /// Report every directly referenced object to `visit`.
    fn trace(&self, visit: &mut dyn FnMut(&dyn Trace));
}

impl Trace for Val {
    fn heap_addr(&self) -> Option<usize> {
        Val::heap_addr(self)
    }

    fn trace(&self, visit: &mut dyn FnMut(&dyn Trace)) {
        match self {
            Val::Bool(_) | Val::Int(_) | Val::Float(_) | Val::Str(_) => {}
            Val::List(list) => {
                for item in list.items() {
                    visit(item);
                }
            }
            Val::Stem(stem) => stem.mark_live(visit),
            Val::Object(obj) => obj.variables().mark_live(visit),
        }
    }
}

impl Trace for StrRef {
    fn heap_addr(&self) -> Option<usize> {
        Some(self.addr())
    }

    fn trace(&self, _visit: &mut dyn FnMut(&dyn Trace)) {}
}

impl Trace for Arc<VariableCell> {
    fn heap_addr(&self) -> Option<usize> {
        Some(Arc::as_ptr(self) as *const () as usize)
    }

    fn trace(&self, visit: &mut dyn FnMut(&dyn Trace)) {
        if let Some(value) = self.get() {
            visit(&value);
        }
    }
}

/// Mark phase: records every heap address reachable from the given roots.
#[derive(Debug, Default)]
pub struct Marker {
    marked: FastHashSet<usize>,
    visits: usize,
}

impl Marker {
    pub fn new() -> Self {
        Self {
            marked: fast_hash_set_new(),
            visits: 0,
        }
    }

    pub fn mark(&mut self, root: &dyn Trace) {
        self.visits += 1;
        if let Some(addr) = root.heap_addr()
            && !self.marked.insert(addr)
        {
            return;
        }
        root.trace(&mut |child| self.mark(child));
    }

    pub fn is_marked(&self, obj: &dyn Trace) -> bool {
        obj.heap_addr().is_some_and(|addr| self.marked.contains(&addr))
    }

    /// Number of distinct heap objects marked.
    pub fn marked_count(&self) -> usize {
        self.marked.len()
    }

    /// Number of references followed, including revisits and immediates.
    pub fn visits(&self) -> usize {
        self.visits
    }
}
