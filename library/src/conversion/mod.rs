//! Conversions between data-object kinds that are not related by specialization.

use std::num::NonZeroUsize;
use std::sync::Arc;

use log::debug;
use lru::LruCache;

use crate::animation::{TimeInterval, TimePoint};
use crate::object::cell::SIMULATION_CELL_KIND;
use crate::object::mesh::TRI_MESH_KIND;
use crate::object::{DataObject, ObjectKind, SimulationCellObject};
use crate::reference::ObjectId;

/// Converts objects of one kind into another.
pub trait Converter {
    fn source_kind(&self) -> &'static ObjectKind;

    fn target_kind(&self) -> &'static ObjectKind;

    /// Returns `None` only if `source` is not actually of the source kind.
    fn convert(&self, source: &dyn DataObject, time: TimePoint) -> Option<Box<dyn DataObject>>;
}

/// Append-only list of converters. A converter registered once stays available, so a kind pair
/// that is convertible remains convertible.
#[derive(Clone, Default)]
pub struct ConversionRegistry {
    converters: Vec<Arc<dyn Converter>>,
}

impl ConversionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_converters() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CellToMeshConverter));
        registry
    }

    pub fn register(&mut self, converter: Arc<dyn Converter>) {
        debug!(
            "Registered converter {} -> {}",
            converter.source_kind(),
            converter.target_kind()
        );
        self.converters.push(converter);
    }

    /// First converter accepting `source` and producing `target` or a specialization of it.
    pub fn find(&self, source: &ObjectKind, target: &ObjectKind) -> Option<Arc<dyn Converter>> {
        self.converters
            .iter()
            .find(|c| source.is_derived_from(c.source_kind()) && c.target_kind().is_derived_from(target))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

/// Triangulates the faces of a simulation cell.
pub struct CellToMeshConverter;

impl Converter for CellToMeshConverter {
    fn source_kind(&self) -> &'static ObjectKind {
        &SIMULATION_CELL_KIND
    }

    fn target_kind(&self) -> &'static ObjectKind {
        &TRI_MESH_KIND
    }

    fn convert(&self, source: &dyn DataObject, _time: TimePoint) -> Option<Box<dyn DataObject>> {
        let cell = source.downcast_ref::<SimulationCellObject>()?;
        Some(Box::new(cell.to_tri_mesh()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ConversionKey {
    source: ObjectId,
    revision: u64,
    target: &'static str,
}

/// Recently converted objects, keyed by source object, its revision and the target kind.
///
/// The cache holds one strong reference to every converted object. Entries that leave the cache
/// are handed back so the caller can release them.
pub struct ConversionCache {
    entries: LruCache<ConversionKey, (ObjectId, TimeInterval)>,
}

impl ConversionCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn get(
        &mut self,
        source: ObjectId,
        revision: u64,
        target: &'static ObjectKind,
        time: TimePoint,
    ) -> Option<ObjectId> {
        let key = ConversionKey {
            source,
            revision,
            target: target.name(),
        };
        match self.entries.get(&key) {
            Some((converted, validity)) if validity.contains(time) => Some(*converted),
            _ => None,
        }
    }

    /// Stores a conversion and returns the objects that dropped out of the cache.
    pub fn put(
        &mut self,
        source: ObjectId,
        revision: u64,
        target: &'static ObjectKind,
        converted: ObjectId,
        validity: TimeInterval,
    ) -> Vec<ObjectId> {
        let key = ConversionKey {
            source,
            revision,
            target: target.name(),
        };
        match self.entries.push(key, (converted, validity)) {
            Some((_, (old, _))) if old != converted => vec![old],
            _ => Vec::new(),
        }
    }

    /// Forgets every conversion of `source`.
    pub fn remove_source(&mut self, source: ObjectId) -> Vec<ObjectId> {
        let keys: Vec<ConversionKey> = self
            .entries
            .iter()
            .filter(|(k, _)| k.source == source)
            .map(|(k, _)| *k)
            .collect();
        keys.into_iter()
            .filter_map(|k| self.entries.pop(&k).map(|(converted, _)| converted))
            .collect()
    }

    /// Forgets the entries that hand out `converted`. Returns how many there were.
    pub fn remove_converted(&mut self, converted: ObjectId) -> usize {
        let keys: Vec<ConversionKey> = self
            .entries
            .iter()
            .filter(|(_, (id, _))| *id == converted)
            .map(|(k, _)| *k)
            .collect();
        for key in &keys {
            self.entries.pop(key);
        }
        keys.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
