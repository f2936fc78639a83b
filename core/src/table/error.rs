use std::fmt;

/// Failure to grow a table. The table keeps its previous contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// The slot array for the grown table could not be allocated.
    OutOfMemory { requested: usize },
    /// Doubling the capacity would overflow `usize`.
    CapacityOverflow,
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::OutOfMemory { requested } => {
                write!(f, "out of memory allocating {} hash table slots", requested)
            }
            TableError::CapacityOverflow => write!(f, "hash table capacity overflow"),
        }
    }
}

impl std::error::Error for TableError {}
