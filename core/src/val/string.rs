use std::fmt;
use std::sync::Arc;

use crate::util::fast_map::hash_bytes;

use super::StoredHash;

struct StrObj {
    hash: StoredHash,
    text: Box<str>,
}

/// Shared immutable string object.
#[derive(Clone)]
pub struct StrRef(Arc<StrObj>);

impl StrRef {
    pub fn new(text: &str) -> Self {
        Self::with_stored_hash(text, StoredHash::fresh())
    }

    pub fn with_stored_hash(text: &str, hash: StoredHash) -> Self {
        Self(Arc::new(StrObj { hash, text: text.into() }))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.text.as_bytes()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.text.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.text.is_empty()
    }

    pub fn stored_hash(&self) -> StoredHash {
        self.0.hash
    }

    /// Hash of the byte content.
    #[inline]
    pub fn content_hash(&self) -> u64 {
        hash_bytes(self.as_bytes())
    }

    #[inline]
    pub fn ptr_eq(&self, other: &StrRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Byte-for-byte comparison, short-circuiting on identity.
    #[inline]
    pub fn same_content(&self, other: &StrRef) -> bool {
        self.ptr_eq(other) || (self.len() == other.len() && self.as_bytes() == other.as_bytes())
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl AsRef<str> for StrRef {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<&str> for StrRef {
    fn from(value: &str) -> Self {
        StrRef::new(value)
    }
}

impl fmt::Display for StrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for StrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StrRef({:?})", self.as_str())
    }
}
