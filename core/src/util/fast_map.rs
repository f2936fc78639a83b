use std::hash::Hasher;

use rustc_hash::FxHasher;

pub type FastHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

pub type FastHashSet<K> = rustc_hash::FxHashSet<K>;

#[inline]
pub fn fast_hash_map_new<K, V>() -> FastHashMap<K, V> {
    rustc_hash::FxHashMap::default()
}

#[inline]
pub fn fast_hash_set_new<K>() -> FastHashSet<K> {
    rustc_hash::FxHashSet::default()
}

/// Content hash of a byte string. Length is mixed in so that prefixes differ.
#[inline]
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_usize(bytes.len());
    hasher.write(bytes);
    hasher.finish()
}

/// Fold a second hash into an accumulator (order sensitive).
#[inline]
pub fn combine_hash(acc: u64, next: u64) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u64(acc);
    hasher.write_u64(next);
    hasher.finish()
}
