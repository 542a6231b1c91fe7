use std::collections::BTreeMap;

use crate::animation::{TimeInterval, TimePoint};
use crate::error::LibraryError;
use crate::io::{ClassRegistry, ObjectClass, ObjectLoadStream, ObjectSaveStream};
use crate::pipeline::PipelineFlowState;
use crate::reference::ObjectId;
use crate::scene::DataSet;

use super::{DATA_OBJECT_KIND, DataObject, ObjectKind};

pub static COMPOUND_KIND: ObjectKind = ObjectKind::derived("Compound", &DATA_OBJECT_KIND);

/// A container whose children are its child references in the data set.
///
/// Evaluating a compound yields its children, not the compound itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompoundObject {
    attributes: BTreeMap<String, serde_json::Value>,
}

impl CompoundObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attributes(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.attributes
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn clear_attributes(&mut self) {
        self.attributes.clear();
    }

    pub fn data_objects(dataset: &DataSet, this: ObjectId) -> Vec<ObjectId> {
        dataset.references(this).to_vec()
    }

    /// Appends `child` unless it is already part of the compound. The child inherits the
    /// compound's persistence flag.
    pub fn add_data_object(
        dataset: &mut DataSet,
        this: ObjectId,
        child: ObjectId,
    ) -> Result<bool, LibraryError> {
        if dataset.references(this).contains(&child) {
            return Ok(false);
        }
        if !dataset.contains(this) {
            return Err(LibraryError::UnknownObject(this));
        }
        dataset.check_reference(this, child)?;
        let save = dataset.save_with_scene(this).unwrap_or(true);
        dataset.set_save_with_scene(child, save)?;
        dataset.add_reference(this, child)
    }

    pub fn remove_data_object(
        dataset: &mut DataSet,
        this: ObjectId,
        child: ObjectId,
    ) -> Result<bool, LibraryError> {
        dataset.remove_reference(this, child)
    }

    /// Drops every child that is not listed in `active`.
    pub fn remove_inactive_objects(
        dataset: &mut DataSet,
        this: ObjectId,
        active: &[ObjectId],
    ) -> Result<(), LibraryError> {
        let keep: Vec<ObjectId> = dataset
            .references(this)
            .iter()
            .copied()
            .filter(|id| active.contains(id))
            .collect();
        if keep.len() == dataset.references(this).len() {
            return Ok(());
        }
        dataset.set_references(this, keep)
    }

    pub fn find_data_object(
        dataset: &DataSet,
        this: ObjectId,
        kind: &'static ObjectKind,
    ) -> Option<ObjectId> {
        dataset
            .references(this)
            .iter()
            .copied()
            .find(|id| dataset.kind_of(*id).is_some_and(|k| k.is_derived_from(kind)))
    }
}

/// Validity shared by all children of `this` at `time`.
pub(crate) fn children_validity(dataset: &DataSet, this: ObjectId, time: TimePoint) -> TimeInterval {
    let mut validity = TimeInterval::infinite();
    for child in dataset.references(this) {
        validity.intersect(&dataset.object_validity(*child, time));
    }
    validity
}

/// Flow state listing the children of `this`.
pub(crate) fn children_state(
    dataset: &DataSet,
    this: ObjectId,
    validity: TimeInterval,
    attributes: &BTreeMap<String, serde_json::Value>,
) -> PipelineFlowState {
    let mut state = PipelineFlowState::with_validity(validity);
    for child in dataset.references(this) {
        state.add_object(*child, dataset.revision_number(*child).unwrap_or_default());
    }
    state.attributes_mut().extend(attributes.clone());
    state
}

impl DataObject for CompoundObject {
    fn kind(&self) -> &'static ObjectKind {
        &COMPOUND_KIND
    }

    fn clone_object(&self) -> Box<dyn DataObject> {
        Box::new(self.clone())
    }

    fn object_validity(&self, this: ObjectId, dataset: &DataSet, time: TimePoint) -> TimeInterval {
        children_validity(dataset, this, time)
    }

    fn evaluate(&mut self, this: ObjectId, dataset: &mut DataSet, time: TimePoint) -> PipelineFlowState {
        let validity = children_validity(dataset, this, time);
        children_state(dataset, this, validity, &self.attributes)
    }

    fn save_with_scene_changed(&mut self, this: ObjectId, dataset: &mut DataSet, save: bool) {
        for child in dataset.references(this).to_vec() {
            if let Err(e) = dataset.propagate_save_with_scene(child, save) {
                log::warn!("Could not update persistence flag of {}: {}", child, e);
            }
        }
    }

    fn save_payload(
        &self,
        _this: ObjectId,
        stream: &mut ObjectSaveStream,
        _dataset: &DataSet,
    ) -> Result<(), LibraryError> {
        // bincode cannot encode free-form JSON values directly.
        stream.write_value(&serde_json::to_string(&self.attributes)?)
    }
}

pub(crate) fn object_class() -> ObjectClass {
    ObjectClass {
        kind: &COMPOUND_KIND,
        create: || Box::new(CompoundObject::new()),
        load: |stream: &mut ObjectLoadStream, _: &ClassRegistry| {
            let json: String = stream.read_value()?;
            let attributes = serde_json::from_str(&json)?;
            Ok(Box::new(CompoundObject { attributes }) as Box<dyn DataObject>)
        },
    }
}
