//! Lookup tables that turn class names found in a stream back into objects.

use std::collections::HashMap;

use crate::error::LibraryError;
use crate::object::{DataObject, ObjectKind};
use crate::pipeline::Modifier;

use super::ObjectLoadStream;

pub type ObjectLoader =
    fn(&mut ObjectLoadStream, &ClassRegistry) -> Result<Box<dyn DataObject>, LibraryError>;
pub type ModifierLoader = fn(&mut ObjectLoadStream) -> Result<Box<dyn Modifier>, LibraryError>;

#[derive(Clone)]
pub struct ObjectClass {
    pub kind: &'static ObjectKind,
    /// Builds an empty instance when the content was not saved with the scene.
    pub create: fn() -> Box<dyn DataObject>,
    pub load: ObjectLoader,
}

#[derive(Clone)]
pub struct ModifierClass {
    pub type_name: &'static str,
    pub load: ModifierLoader,
}

/// Persistable object and modifier classes, keyed by kind name and modifier type name.
#[derive(Clone, Default)]
pub struct ClassRegistry {
    objects: HashMap<&'static str, ObjectClass>,
    modifiers: HashMap<&'static str, ModifierClass>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every persistable class that ships with the crate.
    pub fn with_builtin_classes() -> Self {
        let mut registry = Self::new();
        registry.register_object(crate::object::particles::object_class());
        registry.register_object(crate::object::cell::object_class());
        registry.register_object(crate::object::mesh::object_class());
        registry.register_object(crate::object::compound::object_class());
        registry.register_object(crate::pipeline::pipeline_object::object_class());
        registry.register_modifier(crate::pipeline::modifiers::affine::modifier_class());
        registry.register_modifier(crate::pipeline::modifiers::scale::modifier_class());
        registry
    }

    pub fn register_object(&mut self, class: ObjectClass) {
        self.objects.insert(class.kind.name(), class);
    }

    pub fn register_modifier(&mut self, class: ModifierClass) {
        self.modifiers.insert(class.type_name, class);
    }

    pub fn object_class(&self, kind_name: &str) -> Option<&ObjectClass> {
        self.objects.get(kind_name)
    }

    pub fn modifier_class(&self, type_name: &str) -> Option<&ModifierClass> {
        self.modifiers.get(type_name)
    }

    pub fn load_modifier(
        &self,
        type_name: &str,
        stream: &mut ObjectLoadStream,
    ) -> Result<Box<dyn Modifier>, LibraryError> {
        let class = self
            .modifier_class(type_name)
            .ok_or_else(|| LibraryError::unsupported(format!("modifier '{}'", type_name)))?;
        (class.load)(stream)
    }
}
