//! Saved images of the variable pool.
//!
//! An image is a flat list of objects addressed by [`RelocatedRef`]. Tables
//! are stored through [`HashTable::flatten`], so slot layouts come back
//! verbatim. Stored hashes are written out and restored, which keeps
//! identity-hashed tables valid across a reload.
//!
//! Reading happens in three passes: shells for every object that can be part
//! of a cycle (objects, stems, cells) first, then immutable lists, then the
//! contents of the shells.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::table::{Equality, FlatTable, HashTable, MIN_PRIMARY_SIZE, Relocate, RelocatedRef, Restore};
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::{ListObj, StoredHash, StrRef, Val};
use crate::var::{DictRef, SharedDictionary, Stem, VarRef, VariableCell, VariableDictionary};

#[cfg(test)]
mod image_test;

pub const IMAGE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub version: u32,
    pub objects: Vec<ImageObject>,
    pub roots: Vec<RelocatedRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageObject {
    Bool {
        value: bool,
    },
    Int {
        value: i64,
    },
    /// IEEE-754 bits, so infinities and NaN payloads survive JSON.
    Float {
        bits: u64,
    },
    Str {
        hash: StoredHash,
        text: String,
    },
    List {
        hash: StoredHash,
        items: Vec<RelocatedRef>,
    },
    Object {
        hash: StoredHash,
        class: String,
        /// Scope dictionaries, head of the chain first.
        scopes: Vec<RelocatedRef>,
    },
    Stem {
        hash: StoredHash,
        name: String,
        default: Option<RelocatedRef>,
        tails: FlatTable,
    },
    Cell {
        name: String,
        value: Option<RelocatedRef>,
    },
    Dictionary {
        scope: Option<RelocatedRef>,
        stem_size: usize,
        table: FlatTable,
    },
    /// Slot reserved while the object's children are written.
    #[serde(skip)]
    Pending,
}

impl Image {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to encode image")
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let image: Image = serde_json::from_str(text).context("failed to decode image")?;
        if image.version != IMAGE_VERSION {
            bail!("unsupported image version {} (expected {})", image.version, IMAGE_VERSION);
        }
        Ok(image)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?).with_context(|| format!("failed to write {}", path.display()))?;
        info!(
            target: "varpool::image",
            path = %path.display(),
            objects = self.objects.len(),
            "image.write"
        );
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let image = Self::from_json(&text).with_context(|| format!("in {}", path.display()))?;
        info!(
            target: "varpool::image",
            path = %path.display(),
            objects = image.objects.len(),
            "image.read"
        );
        Ok(image)
    }
}

fn arc_addr<T>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc) as *const () as usize
}

/// Builds an image by relocating everything reachable from the added roots.
pub struct ImageWriter {
    objects: Vec<ImageObject>,
    seen: FastHashMap<usize, RelocatedRef>,
    roots: Vec<RelocatedRef>,
}

impl Default for ImageWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageWriter {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            seen: fast_hash_map_new(),
            roots: Vec::new(),
        }
    }

    fn push(&mut self, object: ImageObject) -> RelocatedRef {
        let reference = RelocatedRef(self.objects.len() as u32);
        self.objects.push(object);
        reference
    }

    /// Write a heap object once. The slot is reserved before `build` runs so
    /// that cycles back to this object resolve to it.
    fn add_heap(&mut self, addr: usize, build: impl FnOnce(&mut Self) -> ImageObject) -> RelocatedRef {
        if let Some(&reference) = self.seen.get(&addr) {
            return reference;
        }
        let reference = self.push(ImageObject::Pending);
        self.seen.insert(addr, reference);
        let object = build(self);
        self.objects[reference.0 as usize] = object;
        reference
    }

    pub fn add_value(&mut self, value: &Val) -> RelocatedRef {
        match value {
            Val::Bool(value) => self.push(ImageObject::Bool { value: *value }),
            Val::Int(value) => self.push(ImageObject::Int { value: *value }),
            Val::Float(value) => self.push(ImageObject::Float { bits: value.to_bits() }),
            Val::Str(text) => self.add_heap(text.addr(), |_| ImageObject::Str {
                hash: text.stored_hash(),
                text: text.as_str().to_string(),
            }),
            Val::List(list) => self.add_heap(arc_addr(list), |writer| ImageObject::List {
                hash: list.stored_hash(),
                items: list.items().iter().map(|item| writer.add_value(item)).collect(),
            }),
            Val::Stem(stem) => self.add_heap(arc_addr(stem), |writer| {
                let (tails, default) = stem.with_state(|state| {
                    let tails = state.tails.flatten(writer);
                    let default = state.default.as_ref().map(|value| writer.add_value(value));
                    (tails, default)
                });
                ImageObject::Stem {
                    hash: stem.stored_hash(),
                    name: stem.name().to_string(),
                    default,
                    tails,
                }
            }),
            Val::Object(obj) => self.add_heap(arc_addr(obj), |writer| ImageObject::Object {
                hash: obj.stored_hash(),
                class: obj.class().to_string(),
                scopes: obj
                    .variables()
                    .dictionaries()
                    .iter()
                    .map(|dict| writer.add_shared(dict))
                    .collect(),
            }),
        }
    }

    pub fn add_cell(&mut self, cell: &VarRef) -> RelocatedRef {
        self.add_heap(arc_addr(cell), |writer| ImageObject::Cell {
            name: cell.name().to_string(),
            value: cell.get().map(|value| writer.add_value(&value)),
        })
    }

    fn add_shared(&mut self, shared: &DictRef) -> RelocatedRef {
        self.add_heap(arc_addr(shared), |writer| shared.with(|dict| writer.dictionary_object(dict)))
    }

    /// Write a free-standing dictionary and everything it reaches.
    pub fn add_dictionary(&mut self, dict: &VariableDictionary) -> RelocatedRef {
        let object = self.dictionary_object(dict);
        self.push(object)
    }

    fn dictionary_object(&mut self, dict: &VariableDictionary) -> ImageObject {
        ImageObject::Dictionary {
            scope: dict.scope().map(|scope| self.add_value(scope)),
            stem_size: dict.stem_size(),
            table: dict.table().flatten(self),
        }
    }

    pub fn add_root(&mut self, reference: RelocatedRef) {
        self.roots.push(reference);
    }

    pub fn finish(self) -> Image {
        debug_assert!(!self.objects.iter().any(|obj| matches!(obj, ImageObject::Pending)));
        debug!(
            target: "varpool::image",
            objects = self.objects.len(),
            roots = self.roots.len(),
            "image.finish"
        );
        Image {
            version: IMAGE_VERSION,
            objects: self.objects,
            roots: self.roots,
        }
    }
}

impl Relocate<Val> for ImageWriter {
    fn relocate(&mut self, item: &Val) -> RelocatedRef {
        self.add_value(item)
    }
}

impl Relocate<VarRef> for ImageWriter {
    fn relocate(&mut self, item: &VarRef) -> RelocatedRef {
        self.add_cell(item)
    }
}

enum Built {
    Val(Val),
    Cell(VarRef),
    Scope(DictRef),
}

/// Rebuilds live objects from an image.
pub struct ImageReader<'a> {
    image: &'a Image,
    built: Vec<Option<Built>>,
    building: Vec<bool>,
}

impl<'a> ImageReader<'a> {
    pub fn new(image: &'a Image) -> Result<Self> {
        if image.version != IMAGE_VERSION {
            bail!("unsupported image version {} (expected {})", image.version, IMAGE_VERSION);
        }
        let count = image.objects.len();
        let mut reader = Self {
            image,
            built: (0..count).map(|_| None).collect(),
            building: vec![false; count],
        };
        reader.create_shells();
        for (index, object) in image.objects.iter().enumerate() {
            if matches!(object, ImageObject::List { .. }) {
                reader.list(index)?;
            }
        }
        reader.fill_shells()?;
        debug!(target: "varpool::image", objects = count, "image.restore");
        Ok(reader)
    }

    pub fn roots(&self) -> &'a [RelocatedRef] {
        &self.image.roots
    }

    pub fn value(&mut self, reference: RelocatedRef) -> Result<Val> {
        let index = self.index(reference)?;
        match &self.built[index] {
            Some(Built::Val(value)) => Ok(value.clone()),
            Some(_) => bail!("object {} is not a value", index),
            None => self.list(index),
        }
    }

    pub fn cell(&mut self, reference: RelocatedRef) -> Result<VarRef> {
        let index = self.index(reference)?;
        match &self.built[index] {
            Some(Built::Cell(cell)) => Ok(cell.clone()),
            _ => bail!("object {} is not a variable", index),
        }
    }

    /// A fresh free-standing dictionary from a dictionary object.
    pub fn dictionary(&mut self, reference: RelocatedRef) -> Result<VariableDictionary> {
        let index = self.index(reference)?;
        self.dictionary_at(index)
    }

    fn index(&self, reference: RelocatedRef) -> Result<usize> {
        let index = reference.0 as usize;
        if index >= self.built.len() {
            bail!("reference {} is outside the image ({} objects)", index, self.built.len());
        }
        Ok(index)
    }

    fn create_shells(&mut self) {
        let image = self.image;
        for (index, object) in image.objects.iter().enumerate() {
            let built = match object {
                ImageObject::Bool { value } => Built::Val(Val::Bool(*value)),
                ImageObject::Int { value } => Built::Val(Val::Int(*value)),
                ImageObject::Float { bits } => Built::Val(Val::Float(f64::from_bits(*bits))),
                ImageObject::Str { hash, text } => Built::Val(Val::Str(StrRef::with_stored_hash(text, *hash))),
                ImageObject::Object { hash, class, .. } => {
                    Built::Val(Val::Object(Arc::new(crate::val::Object::with_stored_hash(class, *hash))))
                }
                ImageObject::Stem { hash, name, .. } => {
                    // Tails are installed once every cell exists.
                    Built::Val(Val::Stem(Arc::new(Stem::with_stored_hash(name, *hash, MIN_PRIMARY_SIZE))))
                }
                ImageObject::Cell { name, .. } => Built::Cell(VariableCell::new(name)),
                ImageObject::List { .. } | ImageObject::Dictionary { .. } | ImageObject::Pending => continue,
            };
            self.built[index] = Some(built);
        }
    }

    fn list(&mut self, index: usize) -> Result<Val> {
        if let Some(Built::Val(value)) = &self.built[index] {
            return Ok(value.clone());
        }
        let image = self.image;
        let ImageObject::List { hash, items } = &image.objects[index] else {
            bail!("object {} is not a value", index);
        };
        if std::mem::replace(&mut self.building[index], true) {
            bail!("list {} contains itself", index);
        }
        let items = items
            .iter()
            .map(|item| self.value(*item))
            .collect::<Result<Vec<_>>>()?;
        let value = Val::List(Arc::new(ListObj::with_stored_hash(items, *hash)));
        self.built[index] = Some(Built::Val(value.clone()));
        Ok(value)
    }

    fn fill_shells(&mut self) -> Result<()> {
        let image = self.image;
        for (index, object) in image.objects.iter().enumerate() {
            match object {
                ImageObject::Cell { value: Some(value), .. } => {
                    let value = self.value(*value)?;
                    self.cell(RelocatedRef(index as u32))?.set(value);
                }
                ImageObject::Stem { default, tails, .. } => {
                    let table = HashTable::<Equality, VarRef>::restore(tails, self)
                        .with_context(|| format!("in stem {}", index))?;
                    let default = default.map(|value| self.value(value)).transpose()?;
                    let stem = self.value(RelocatedRef(index as u32))?;
                    let stem = stem
                        .as_stem()
                        .ok_or_else(|| anyhow!("object {} is not a stem", index))?;
                    stem.install(table, default);
                }
                ImageObject::Object { scopes, .. } => {
                    let mut head = None;
                    for scope in scopes.iter().rev() {
                        head = Some(self.shared(*scope, head)?);
                    }
                    let obj = self.value(RelocatedRef(index as u32))?;
                    let obj = obj
                        .as_object()
                        .ok_or_else(|| anyhow!("object {} is not an object", index))?;
                    obj.variables().set_head(head);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn shared(&mut self, reference: RelocatedRef, next: Option<DictRef>) -> Result<DictRef> {
        let index = self.index(reference)?;
        if let Some(Built::Scope(shared)) = &self.built[index] {
            return Ok(shared.clone());
        }
        let dict = self.dictionary_at(index)?;
        let shared = Arc::new(SharedDictionary::new(dict, next));
        self.built[index] = Some(Built::Scope(shared.clone()));
        Ok(shared)
    }

    fn dictionary_at(&mut self, index: usize) -> Result<VariableDictionary> {
        let image = self.image;
        let ImageObject::Dictionary { scope, stem_size, table } = &image.objects[index] else {
            bail!("object {} is not a dictionary", index);
        };
        let scope = scope.map(|scope| self.value(scope)).transpose()?;
        let table = HashTable::<Equality, VarRef>::restore(table, self).with_context(|| format!("in dictionary {}", index))?;
        Ok(VariableDictionary::from_parts(table, scope, *stem_size))
    }
}

impl Restore<Val> for ImageReader<'_> {
    fn restore(&mut self, reference: RelocatedRef) -> Result<Val> {
        self.value(reference)
    }
}

impl Restore<VarRef> for ImageReader<'_> {
    fn restore(&mut self, reference: RelocatedRef) -> Result<VarRef> {
        self.cell(reference)
    }
}

/// Image whose single root is `dict`.
pub fn save_dictionary(dict: &VariableDictionary) -> Image {
    let mut writer = ImageWriter::new();
    let root = writer.add_dictionary(dict);
    writer.add_root(root);
    writer.finish()
}

pub fn load_dictionary(image: &Image) -> Result<VariableDictionary> {
    let root = *image.roots.first().ok_or_else(|| anyhow!("image has no root"))?;
    ImageReader::new(image)?.dictionary(root)
}

/// Image with one root per value.
pub fn save_values(values: &[Val]) -> Image {
    let mut writer = ImageWriter::new();
    for value in values {
        let root = writer.add_value(value);
        writer.add_root(root);
    }
    writer.finish()
}

pub fn load_values(image: &Image) -> Result<Vec<Val>> {
    let mut reader = ImageReader::new(image)?;
    reader.roots().iter().map(|root| reader.value(*root)).collect()
}
