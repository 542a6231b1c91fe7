//! The data-object capability interface and the built-in object kinds.

pub mod cell;
pub mod compound;
pub mod frame_source;
pub mod mesh;
pub mod particles;

pub use cell::SimulationCellObject;
pub use compound::CompoundObject;
pub use frame_source::{FrameLoader, FrameSourceObject, LoadedFrame};
pub use mesh::TriMeshObject;
pub use particles::{ParticlePropertyObject, ParticlePropertyType};

use std::any::Any;
use std::fmt;

use crate::animation::{TimeInterval, TimePoint};
use crate::error::LibraryError;
use crate::io::ObjectSaveStream;
use crate::pipeline::{PipelineFlowState, PipelineStatus};
use crate::reference::{EventResponse, ObjectId, ReferenceEvent};
use crate::scene::DataSet;
use crate::task::{TaskId, TaskOutcome};

/// Static description of a data-object kind and its place in the kind hierarchy.
pub struct ObjectKind {
    name: &'static str,
    parent: Option<&'static ObjectKind>,
}

impl ObjectKind {
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    pub const fn derived(name: &'static str, parent: &'static ObjectKind) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static ObjectKind> {
        self.parent
    }

    /// True if this kind is `other` or a specialization of it.
    pub fn is_derived_from(&self, other: &ObjectKind) -> bool {
        let mut kind = Some(self);
        while let Some(k) = kind {
            if k.name == other.name {
                return true;
            }
            kind = k.parent;
        }
        false
    }
}

impl PartialEq for ObjectKind {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ObjectKind {}

impl fmt::Debug for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub static DATA_OBJECT_KIND: ObjectKind = ObjectKind::root("DataObject");

pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Capabilities shared by everything that lives in the scene graph.
///
/// Objects are stored in a [`DataSet`] and addressed by [`ObjectId`]. The framework owns the
/// bookkeeping (revision counter, persistence flag, display objects, child references and
/// dependents); implementations only hold their content. While one of these methods runs, the
/// object is checked out of the data set, so `dataset` may be used freely to reach other objects.
pub trait DataObject: AsAny {
    fn kind(&self) -> &'static ObjectKind;

    fn title(&self) -> String {
        self.kind().name().to_string()
    }

    fn clone_object(&self) -> Box<dyn DataObject>;

    /// The largest interval around `time` over which the content of this object does not change.
    fn object_validity(&self, _this: ObjectId, _dataset: &DataSet, _time: TimePoint) -> TimeInterval {
        TimeInterval::infinite()
    }

    /// Computes the output of this object at `time`. Plain objects produce themselves.
    fn evaluate(&mut self, this: ObjectId, dataset: &mut DataSet, time: TimePoint) -> PipelineFlowState {
        let validity = self.object_validity(this, dataset, time);
        let revision = dataset.revision_number(this).unwrap_or_default();
        let mut state = PipelineFlowState::new(this, revision, validity);
        state.set_status(self.status());
        state
    }

    fn status(&self) -> PipelineStatus {
        PipelineStatus::success()
    }

    /// Must only depend on the kinds involved, never on the content of the object.
    fn can_convert_to(&self, target: &ObjectKind) -> bool {
        self.kind().is_derived_from(target)
    }

    /// Returns an object of kind `target` representing this one, or `None`.
    ///
    /// Overrides go together with [`DataObject::can_convert_to`]. Converters registered with the
    /// data set cover conversions between unrelated kinds without overriding either method.
    fn convert_to(
        &mut self,
        this: ObjectId,
        target: &'static ObjectKind,
        _time: TimePoint,
        _dataset: &mut DataSet,
    ) -> Option<ObjectId> {
        self.kind().is_derived_from(target).then_some(this)
    }

    /// Called when one of the objects referenced by this one raises `event`.
    fn reference_event(
        &mut self,
        _this: ObjectId,
        _dataset: &mut DataSet,
        _source: ObjectId,
        event: &ReferenceEvent,
    ) -> EventResponse {
        EventResponse::default_for(event)
    }

    /// Called right before this object announces a content change to its dependents.
    fn content_changed(&mut self, _dataset: &mut DataSet) {}

    fn save_with_scene_changed(&mut self, _this: ObjectId, _dataset: &mut DataSet, _save: bool) {}

    /// Receives the outcome of a task spawned on behalf of this object.
    fn task_finished(
        &mut self,
        _this: ObjectId,
        _dataset: &mut DataSet,
        _task: TaskId,
        _outcome: TaskOutcome,
    ) {
    }

    /// Releases resources held in the data set right before the object is destroyed.
    fn dispose(&mut self, _dataset: &mut DataSet) {}

    /// Writes the content of this object. Child references are written with
    /// [`DataSet::save_object`].
    fn save_payload(
        &self,
        _this: ObjectId,
        _stream: &mut ObjectSaveStream,
        _dataset: &DataSet,
    ) -> Result<(), LibraryError> {
        Ok(())
    }
}

impl fmt::Debug for dyn DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.title())
    }
}

impl dyn DataObject {
    pub fn downcast_ref<T: DataObject>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: DataObject>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static MESH: ObjectKind = ObjectKind::derived("TestMesh", &DATA_OBJECT_KIND);
    static TRI_MESH: ObjectKind = ObjectKind::derived("TestTriMesh", &MESH);

    #[test]
    fn kinds_derive_from_their_ancestors() {
        assert!(TRI_MESH.is_derived_from(&TRI_MESH));
        assert!(TRI_MESH.is_derived_from(&MESH));
        assert!(TRI_MESH.is_derived_from(&DATA_OBJECT_KIND));
        assert!(!MESH.is_derived_from(&TRI_MESH));
    }
}
