//! Object model stored in the variable pool.
//!
//! Every heap value carries a [`StoredHash`] in its header. That hash is the
//! identity hash used by identity-keyed tables; it is written into saved images
//! and restored verbatim, so identity tables stay valid across a reload.

use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::util::fast_map::combine_hash;
use crate::var::{ObjectVariables, Stem};

mod string;

pub use string::StrRef;


static NEXT_STORED_HASH: AtomicU64 = AtomicU64::new(1);

/// Persisted identity hash of a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredHash(u64);

impl StoredHash {
    /// Allocate the hash for a newly created object.
    pub fn fresh() -> Self {
        let seq = NEXT_STORED_HASH.fetch_add(1, Ordering::Relaxed);
        Self(splitmix64(seq))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

fn splitmix64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Immutable list of values.
pub struct ListObj {
    hash: StoredHash,
    items: Box<[Val]>,
}

impl ListObj {
    pub fn new(items: Vec<Val>) -> Self {
        Self::with_stored_hash(items, StoredHash::fresh())
    }

    pub fn with_stored_hash(items: Vec<Val>, hash: StoredHash) -> Self {
        Self {
            hash,
            items: items.into_boxed_slice(),
        }
    }

    pub fn items(&self) -> &[Val] {
        &self.items
    }

    pub fn stored_hash(&self) -> StoredHash {
        self.hash
    }
}

/// A plain object instance: a class name plus its per-scope variable dictionaries.
pub struct Object {
    hash: StoredHash,
    class: Box<str>,
    variables: ObjectVariables,
}

impl Object {
    pub fn new(class: &str) -> Self {
        Self::with_stored_hash(class, StoredHash::fresh())
    }

    pub fn with_stored_hash(class: &str, hash: StoredHash) -> Self {
        Self {
            hash,
            class: class.into(),
            variables: ObjectVariables::new(),
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn stored_hash(&self) -> StoredHash {
        self.hash
    }

    /// Instance variable dictionaries, one per scope.
    pub fn variables(&self) -> &ObjectVariables {
        &self.variables
    }
}

/// A value held by a variable cell or a table slot.
#[derive(Clone)]
pub enum Val {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(StrRef),
    List(Arc<ListObj>),
    Stem(Arc<Stem>),
    Object(Arc<Object>),
}

impl Val {
    pub fn str(text: &str) -> Self {
        Val::Str(StrRef::new(text))
    }

    pub fn list(items: Vec<Val>) -> Self {
        Val::List(Arc::new(ListObj::new(items)))
    }

    pub fn object(class: &str) -> Self {
        Val::Object(Arc::new(Object::new(class)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Bool(_) => "Bool",
            Val::Int(_) => "Int",
            Val::Float(_) => "Float",
            Val::Str(_) => "String",
            Val::List(_) => "List",
            Val::Stem(_) => "Stem",
            Val::Object(_) => "Object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Val::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Val::Int(i) => Some(*i),
            Val::Float(f) => float_as_int(*f),
            _ => None,
        }
    }

    pub fn as_stem(&self) -> Option<&Arc<Stem>> {
        match self {
            Val::Stem(stem) => Some(stem),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<Object>> {
        match self {
            Val::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Whether this value lives on the heap (and so has a stored hash).
    pub fn is_heap(&self) -> bool {
        !matches!(self, Val::Bool(_) | Val::Int(_) | Val::Float(_))
    }

    /// Hash consistent with [`Val::is_equal`].
    pub fn deep_hash(&self) -> u64 {
        match self {
            Val::Bool(b) => tagged_hash(1, *b as u64),
            Val::Int(i) => tagged_hash(2, *i as u64),
            Val::Float(f) => match float_as_int(*f) {
                Some(i) => tagged_hash(2, i as u64),
                None => tagged_hash(3, f.to_bits()),
            },
            Val::Str(s) => s.content_hash(),
            Val::List(list) => list
                .items()
                .iter()
                .fold(tagged_hash(4, list.items().len() as u64), |acc, item| {
                    combine_hash(acc, item.deep_hash())
                }),
            Val::Stem(stem) => stem.stored_hash().get(),
            Val::Object(obj) => obj.stored_hash().get(),
        }
    }

    /// Value equality: numbers compare numerically, strings by content,
    /// lists element-wise, stems and objects by identity.
    pub fn is_equal(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Int(a), Val::Int(b)) => a == b,
            (Val::Float(a), Val::Float(b)) => a == b,
            (Val::Int(i), Val::Float(f)) | (Val::Float(f), Val::Int(i)) => float_as_int(*f) == Some(*i),
            (Val::Str(a), Val::Str(b)) => a.same_content(b),
            (Val::List(a), Val::List(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.items().len() == b.items().len()
                        && a.items().iter().zip(b.items()).all(|(x, y)| x.is_equal(y)))
            }
            (Val::Stem(a), Val::Stem(b)) => Arc::ptr_eq(a, b),
            (Val::Object(a), Val::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// The persisted identity hash. Immediates hash by value.
    pub fn identity_hash(&self) -> u64 {
        match self {
            Val::Bool(_) | Val::Int(_) | Val::Float(_) => self.deep_hash(),
            Val::Str(s) => s.stored_hash().get(),
            Val::List(list) => list.stored_hash().get(),
            Val::Stem(stem) => stem.stored_hash().get(),
            Val::Object(obj) => obj.stored_hash().get(),
        }
    }

    /// Identity: the same heap allocation, or bit-identical immediates.
    pub fn is_same(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Int(a), Val::Int(b)) => a == b,
            (Val::Float(a), Val::Float(b)) => a.to_bits() == b.to_bits(),
            (Val::Str(a), Val::Str(b)) => a.ptr_eq(b),
            (Val::List(a), Val::List(b)) => Arc::ptr_eq(a, b),
            (Val::Stem(a), Val::Stem(b)) => Arc::ptr_eq(a, b),
            (Val::Object(a), Val::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Address of the heap allocation, used by the collector and the image writer.
    pub fn heap_addr(&self) -> Option<usize> {
        match self {
            Val::Bool(_) | Val::Int(_) | Val::Float(_) => None,
            Val::Str(s) => Some(s.addr()),
            Val::List(list) => Some(Arc::as_ptr(list) as *const () as usize),
            Val::Stem(stem) => Some(Arc::as_ptr(stem) as *const () as usize),
            Val::Object(obj) => Some(Arc::as_ptr(obj) as *const () as usize),
        }
    }
}

fn tagged_hash(tag: u8, bits: u64) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u8(tag);
    hasher.write_u64(bits);
    hasher.finish()
}

fn float_as_int(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal(other)
    }
}

impl From<bool> for Val {
    fn from(value: bool) -> Self {
        Val::Bool(value)
    }
}

impl From<i64> for Val {
    fn from(value: i64) -> Self {
        Val::Int(value)
    }
}

impl From<f64> for Val {
    fn from(value: f64) -> Self {
        Val::Float(value)
    }
}

impl From<&str> for Val {
    fn from(value: &str) -> Self {
        Val::str(value)
    }
}

impl From<String> for Val {
    fn from(value: String) -> Self {
        Val::Str(StrRef::new(&value))
    }
}

impl From<StrRef> for Val {
    fn from(value: StrRef) -> Self {
        Val::Str(value)
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Bool(b) => write!(f, "{}", b),
            Val::Int(i) => write!(f, "{}", i),
            Val::Float(x) => write!(f, "{}", x),
            Val::Str(s) => f.write_str(s.as_str()),
            Val::List(list) => {
                f.write_str("[")?;
                for (i, item) in list.items().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Val::Stem(stem) => f.write_str(stem.name()),
            Val::Object(obj) => write!(f, "a {}", obj.class()),
        }
    }
}

// Stems and objects can reach themselves through their variables; print
// only their heads.
impl fmt::Debug for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Bool(b) => write!(f, "Bool({})", b),
            Val::Int(i) => write!(f, "Int({})", i),
            Val::Float(x) => write!(f, "Float({})", x),
            Val::Str(s) => write!(f, "Str({:?})", s.as_str()),
            Val::List(list) => f.debug_tuple("List").field(&list.items()).finish(),
            Val::Stem(stem) => write!(f, "Stem({})", stem.name()),
            Val::Object(obj) => write!(f, "Object({})", obj.class()),
        }
    }
}
