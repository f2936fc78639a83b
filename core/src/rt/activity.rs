use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ACTIVITY_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one thread of execution in the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivityId(u64);

impl ActivityId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_ACTIVITY_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "activity#{}", self.0)
    }
}
