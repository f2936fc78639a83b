//! Key semantics of a table, fixed by its type.
//!
//! A table's mode is a type parameter, so a table built for one mode can
//! never be probed with another.

use crate::val::{StrRef, Val};

/// Hash function and match predicate for one table mode.
///
/// Implementations must keep `hash` consistent with `matches`: two keys that
/// match always hash alike.
pub trait Semantics {
    type Key;

    /// Mode name recorded in flattened tables.
    const NAME: &'static str;

    fn hash(key: &Self::Key) -> u64;

    /// Whether `probe` finds the stored key `stored`.
    fn matches(probe: &Self::Key, stored: &Self::Key) -> bool;
}

/// Value equality: deep hash, identity shortcut then `is_equal`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Equality;

impl Semantics for Equality {
    type Key = Val;
    const NAME: &'static str = "equality";

    #[inline]
    fn hash(key: &Val) -> u64 {
        key.deep_hash()
    }

    #[inline]
    fn matches(probe: &Val, stored: &Val) -> bool {
        probe.is_same(stored) || probe.is_equal(stored)
    }
}

/// Object identity, hashed by the persisted hash stored on the key.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Semantics for Identity {
    type Key = Val;
    const NAME: &'static str = "identity";

    #[inline]
    fn hash(key: &Val) -> u64 {
        key.identity_hash()
    }

    #[inline]
    fn matches(probe: &Val, stored: &Val) -> bool {
        probe.is_same(stored)
    }
}

/// Raw string content: byte hash, pointer shortcut then byte comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringContent;

impl Semantics for StringContent {
    type Key = StrRef;
    const NAME: &'static str = "string";

    #[inline]
    fn hash(key: &StrRef) -> u64 {
        key.content_hash()
    }

    #[inline]
    fn matches(probe: &StrRef, stored: &StrRef) -> bool {
        probe.same_content(stored)
    }
}
