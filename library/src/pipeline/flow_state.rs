use std::collections::BTreeMap;

use crate::animation::{TimeInterval, TimePoint};
use crate::object::ObjectKind;
use crate::reference::ObjectId;
use crate::scene::DataSet;

use super::status::PipelineStatus;

/// An object in a flow state, stamped with the revision it had when it was added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowEntry {
    pub object: ObjectId,
    pub revision: u64,
}

/// Result of evaluating a data object at one point in time.
///
/// The validity interval always contains the time the state was computed for. An empty default
/// state has an empty interval, so it never satisfies a cache lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineFlowState {
    entries: Vec<FlowEntry>,
    validity: TimeInterval,
    status: PipelineStatus,
    attributes: BTreeMap<String, serde_json::Value>,
}

impl PipelineFlowState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A state with no objects that is valid over `validity`.
    pub fn with_validity(validity: TimeInterval) -> Self {
        Self {
            validity,
            ..Self::default()
        }
    }

    pub fn new(object: ObjectId, revision: u64, validity: TimeInterval) -> Self {
        let mut state = Self::with_validity(validity);
        state.entries.push(FlowEntry { object, revision });
        state
    }

    pub fn entries(&self) -> &[FlowEntry] {
        &self.entries
    }

    pub fn objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.entries.iter().map(|e| e.object)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.entries.iter().any(|e| e.object == object)
    }

    /// Appends an object unless it is already part of the state.
    pub fn add_object(&mut self, object: ObjectId, revision: u64) -> bool {
        if self.contains(object) {
            return false;
        }
        self.entries.push(FlowEntry { object, revision });
        true
    }

    /// Swaps `old` for `new` at the same position, or removes `old` when `new` is `None`.
    pub fn replace_object(&mut self, old: ObjectId, new: Option<(ObjectId, u64)>) -> bool {
        let Some(index) = self.entries.iter().position(|e| e.object == old) else {
            return false;
        };
        match new {
            Some((object, revision)) => self.entries[index] = FlowEntry { object, revision },
            None => {
                self.entries.remove(index);
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.attributes.clear();
    }

    /// First object of the state that can be represented as `kind` at `time`.
    pub fn convert_object(
        &self,
        kind: &'static ObjectKind,
        time: TimePoint,
        dataset: &mut DataSet,
    ) -> Option<ObjectId> {
        self.entries
            .iter()
            .find_map(|e| dataset.convert_to(e.object, kind, time))
    }

    /// First object whose kind is `kind` or a specialization of it.
    pub fn find_object(&self, kind: &'static ObjectKind, dataset: &DataSet) -> Option<ObjectId> {
        self.objects()
            .find(|id| dataset.kind_of(*id).is_some_and(|k| k.is_derived_from(kind)))
    }

    /// Restamps every entry with its object's current revision.
    pub fn update_revision_numbers(&mut self, dataset: &DataSet) {
        for entry in &mut self.entries {
            if let Some(revision) = dataset.revision_number(entry.object) {
                entry.revision = revision;
            }
        }
    }

    /// True when no object of the state has been modified since it was added.
    pub fn is_up_to_date(&self, dataset: &DataSet) -> bool {
        self.entries
            .iter()
            .all(|e| dataset.revision_number(e.object) == Some(e.revision))
    }

    pub fn validity(&self) -> TimeInterval {
        self.validity
    }

    pub fn set_validity(&mut self, validity: TimeInterval) {
        self.validity = validity;
    }

    pub fn intersect_validity(&mut self, other: &TimeInterval) {
        self.validity.intersect(other);
    }

    pub fn status(&self) -> &PipelineStatus {
        &self.status
    }

    pub fn set_status(&mut self, status: PipelineStatus) {
        self.status = status;
    }

    pub fn attributes(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut BTreeMap<String, serde_json::Value> {
        &mut self.attributes
    }
}
