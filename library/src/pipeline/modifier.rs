use crate::animation::{TimeInterval, TimePoint};
use crate::error::LibraryError;
use crate::io::ObjectSaveStream;
use crate::object::{AsAny, DataObject, ParticlePropertyObject, ParticlePropertyType};
use crate::reference::ObjectId;
use crate::scene::DataSet;

use super::flow_state::PipelineFlowState;
use super::status::PipelineStatus;

/// One processing step of a [`super::PipelineObject`].
pub trait Modifier: AsAny {
    /// Class name under which the modifier is saved.
    fn type_name(&self) -> &'static str;

    fn title(&self) -> String {
        self.type_name().to_string()
    }

    /// Interval around `time` over which the modifier's parameters do not change.
    fn modifier_validity(&self, _time: TimePoint) -> TimeInterval {
        TimeInterval::infinite()
    }

    /// Transforms `state` in place. Objects must be made writable through `ctx` first, never
    /// mutated where they are.
    fn modify(&self, state: &mut PipelineFlowState, ctx: &mut ModifierContext<'_>) -> PipelineStatus;

    fn clone_modifier(&self) -> Box<dyn Modifier>;

    fn save(&self, stream: &mut ObjectSaveStream) -> Result<(), LibraryError>;
}

/// A modifier inserted into a pipeline together with its per-pipeline state.
pub struct ModifierApplication {
    modifier: Box<dyn Modifier>,
    enabled: bool,
    status: PipelineStatus,
}

impl ModifierApplication {
    pub fn new(modifier: Box<dyn Modifier>) -> Self {
        Self {
            modifier,
            enabled: true,
            status: PipelineStatus::success(),
        }
    }

    pub fn modifier(&self) -> &dyn Modifier {
        self.modifier.as_ref()
    }

    pub fn modifier_mut(&mut self) -> &mut dyn Modifier {
        self.modifier.as_mut()
    }

    /// Typed access to the modifier.
    pub fn downcast_mut<M: Modifier>(&mut self) -> Option<&mut M> {
        self.modifier.as_mut().as_any_mut().downcast_mut::<M>()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn status(&self) -> &PipelineStatus {
        &self.status
    }

    pub(crate) fn set_status(&mut self, status: PipelineStatus) {
        self.status = status;
    }
}

impl Clone for ModifierApplication {
    fn clone(&self) -> Self {
        Self {
            modifier: self.modifier.clone_modifier(),
            enabled: self.enabled,
            status: self.status.clone(),
        }
    }
}

/// Access to the data set while a modifier runs.
///
/// Copies made through [`ModifierContext::make_mutable`] belong to the pipeline that runs the
/// modifier.
pub struct ModifierContext<'a> {
    dataset: &'a mut DataSet,
    time: TimePoint,
    transients: &'a mut Vec<ObjectId>,
}

impl<'a> ModifierContext<'a> {
    pub(crate) fn new(dataset: &'a mut DataSet, time: TimePoint, transients: &'a mut Vec<ObjectId>) -> Self {
        Self {
            dataset,
            time,
            transients,
        }
    }

    pub fn time(&self) -> TimePoint {
        self.time
    }

    pub fn dataset(&self) -> &DataSet {
        &*self.dataset
    }

    /// Returns a copy of `object` that may be written to and swaps it into `state`.
    /// Objects copied earlier in the same evaluation are returned as they are.
    pub fn make_mutable(
        &mut self,
        state: &mut PipelineFlowState,
        object: ObjectId,
    ) -> Result<ObjectId, LibraryError> {
        if self.transients.contains(&object) {
            return Ok(object);
        }
        let copy = self.dataset.clone_object(object)?;
        self.transients.push(copy);
        let revision = self.dataset.revision_number(copy).unwrap_or_default();
        state.replace_object(object, Some((copy, revision)));
        Ok(copy)
    }

    /// Copies `object` if needed and applies `f` to the copy.
    pub fn modify<T: DataObject, R>(
        &mut self,
        state: &mut PipelineFlowState,
        object: ObjectId,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<(ObjectId, R), LibraryError> {
        let copy = self.make_mutable(state, object)?;
        let result = self.dataset.modify::<T, R>(copy, f)?;
        let revision = self.dataset.revision_number(copy).unwrap_or_default();
        state.replace_object(copy, Some((copy, revision)));
        Ok((copy, result))
    }

    pub fn find_property(
        &self,
        state: &PipelineFlowState,
        property_type: &ParticlePropertyType,
    ) -> Option<ObjectId> {
        state.objects().find(|id| {
            self.dataset
                .get::<ParticlePropertyObject>(*id)
                .is_some_and(|p| p.property_type() == property_type)
        })
    }
}
