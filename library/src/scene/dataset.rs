use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, error, warn};
use uuid::Uuid;

use crate::animation::{AnimationSettings, TimeInterval, TimePoint};
use crate::config::PipelineConfig;
use crate::conversion::{ConversionCache, ConversionRegistry};
use crate::error::LibraryError;
use crate::io::{
    ClassRegistry, ModifierClass, OBJECT_CHUNK, ObjectClass, ObjectLoadStream, ObjectSaveStream,
    PAYLOAD_CHUNK,
};
use crate::object::{DataObject, ObjectKind};
use crate::pipeline::{PipelineFlowState, PipelineStatus};
use crate::reference::{
    Dependent, EventPayload, EventResponse, NodeId, ObjectId, ReferenceEvent, ReferenceEventType,
};
use crate::rendering::{DisplayHandle, DisplayObject, DisplayRegistry};
use crate::task::{CancellationToken, TaskManager};
use crate::util::timing::{ScopedTimer, measure_debug, measure_debug_lazy};

use super::node::{NodeEvent, ObjectNode};

/// Bookkeeping the data set keeps for every object.
struct ObjectCore {
    revision: u64,
    save_with_scene: bool,
    display_objects: Vec<DisplayHandle>,
    references: Vec<ObjectId>,
    dependents: Vec<Dependent>,
    strong_count: usize,
}

struct ObjectEntry {
    kind: &'static ObjectKind,
    core: ObjectCore,
    // `None` while one of the object's own methods is running.
    payload: Option<Box<dyn DataObject>>,
}

struct DeferredEvent {
    receiver: ObjectId,
    source: ObjectId,
    event: ReferenceEvent,
}

pub(crate) type NodeObserver = Box<dyn FnMut(&NodeEvent)>;

/// The session that owns every data object and scene node.
///
/// Objects are reference counted: [`DataSet::insert`] hands one strong reference to the caller,
/// owners hold one per child reference, nodes hold one on their data provider and cached flow
/// states hold one per listed object. All mutation and event dispatch happens on the thread
/// that owns the data set; background tasks report back through [`DataSet::process_events`].
pub struct DataSet {
    objects: HashMap<ObjectId, ObjectEntry>,
    pub(crate) nodes: HashMap<NodeId, ObjectNode>,
    pub(crate) node_order: Vec<NodeId>,
    deferred: Vec<DeferredEvent>,
    pub(crate) observers: Vec<NodeObserver>,
    converters: ConversionRegistry,
    conversion_cache: ConversionCache,
    classes: Arc<ClassRegistry>,
    pub(crate) tasks: TaskManager,
    animation: AnimationSettings,
    pub(crate) config: PipelineConfig,
    pub(crate) interrupt: CancellationToken,
}

impl DataSet {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            objects: HashMap::new(),
            nodes: HashMap::new(),
            node_order: Vec::new(),
            deferred: Vec::new(),
            observers: Vec::new(),
            converters: ConversionRegistry::with_builtin_converters(),
            conversion_cache: ConversionCache::new(config.conversion_cache_capacity),
            classes: Arc::new(ClassRegistry::with_builtin_classes()),
            tasks: TaskManager::new(config.worker_threads),
            animation: AnimationSettings::new(config.ticks_per_frame),
            config,
            interrupt: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn animation(&self) -> &AnimationSettings {
        &self.animation
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut TaskManager {
        &mut self.tasks
    }

    /// Token that cancels waits using the built-in progress reporting; safe to trigger from
    /// other threads.
    pub fn interrupt_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    pub fn converters_mut(&mut self) -> &mut ConversionRegistry {
        &mut self.converters
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    pub fn register_object_class(&mut self, class: ObjectClass) {
        Arc::make_mut(&mut self.classes).register_object(class);
    }

    pub fn register_modifier_class(&mut self, class: ModifierClass) {
        Arc::make_mut(&mut self.classes).register_modifier(class);
    }

    // ---- arena -------------------------------------------------------------------------------

    pub fn insert<T: DataObject>(&mut self, object: T) -> ObjectId {
        self.insert_boxed(Box::new(object))
    }

    pub fn insert_boxed(&mut self, object: Box<dyn DataObject>) -> ObjectId {
        let id = ObjectId::new();
        let entry = ObjectEntry {
            kind: object.kind(),
            core: ObjectCore {
                revision: 0,
                save_with_scene: true,
                display_objects: Vec::new(),
                references: Vec::new(),
                dependents: Vec::new(),
                strong_count: 1,
            },
            payload: Some(object),
        };
        debug!("Inserted {} {}", entry.kind, id);
        self.objects.insert(id, entry);
        id
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn kind_of(&self, id: ObjectId) -> Option<&'static ObjectKind> {
        self.objects.get(&id).map(|e| e.kind)
    }

    pub fn title(&self, id: ObjectId) -> Option<String> {
        self.object(id).map(|o| o.title())
    }

    pub fn object(&self, id: ObjectId) -> Option<&dyn DataObject> {
        self.objects.get(&id)?.payload.as_deref()
    }

    pub fn get<T: DataObject>(&self, id: ObjectId) -> Option<&T> {
        self.objects.get(&id)?.payload.as_ref()?.downcast_ref::<T>()
    }

    /// Applies `f` to the object, bumps its revision and tells its dependents. A changed title is
    /// announced with a separate `TitleChanged` event carrying the new title.
    pub fn modify<T: DataObject, R>(
        &mut self,
        id: ObjectId,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, LibraryError> {
        let mut payload = self.checkout_for_write(id)?;
        let old_title = payload.title();
        let Some(typed) = payload.downcast_mut::<T>() else {
            let found = payload.kind().name();
            self.checkin(id, payload);
            return Err(LibraryError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                found,
            });
        };
        let result = f(typed);
        let new_title = payload.title();
        self.checkin(id, payload);
        self.notify_dependents(id, ReferenceEventType::TargetChanged);
        if new_title != old_title {
            self.notify_event(
                ReferenceEvent::new(ReferenceEventType::TitleChanged, id)
                    .with_payload(EventPayload::Message(new_title)),
            );
        }
        Ok(result)
    }

    pub fn revision_number(&self, id: ObjectId) -> Option<u64> {
        self.objects.get(&id).map(|e| e.core.revision)
    }

    pub fn strong_count(&self, id: ObjectId) -> Option<usize> {
        self.objects.get(&id).map(|e| e.core.strong_count)
    }

    pub fn retain(&mut self, id: ObjectId) -> Result<(), LibraryError> {
        let entry = self
            .objects
            .get_mut(&id)
            .ok_or(LibraryError::UnknownObject(id))?;
        entry.core.strong_count += 1;
        Ok(())
    }

    /// Drops one strong reference. Objects that reach zero are destroyed together with every
    /// child nothing else holds on to.
    pub fn release(&mut self, id: ObjectId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(entry) = self.objects.get_mut(&id) else {
                continue;
            };
            entry.core.strong_count = entry.core.strong_count.saturating_sub(1);
            if entry.core.strong_count == 0 {
                pending.extend(self.destroy(id));
            }
        }
    }

    pub fn retain_state(&mut self, state: &PipelineFlowState) {
        for id in state.objects() {
            if let Some(entry) = self.objects.get_mut(&id) {
                entry.core.strong_count += 1;
            }
        }
    }

    pub fn release_state(&mut self, state: &PipelineFlowState) {
        for id in state.objects() {
            self.release(id);
        }
    }

    /// Removes the object regardless of who still holds it. Owners drop their reference to it
    /// and nodes that use it as data provider are deleted.
    pub fn delete_object(&mut self, id: ObjectId) -> Result<(), LibraryError> {
        if !self.contains(id) {
            return Err(LibraryError::UnknownObject(id));
        }
        self.notify_dependents(id, ReferenceEventType::TargetDeleted);

        let remaining = self
            .objects
            .get(&id)
            .map(|e| e.core.dependents.clone())
            .unwrap_or_default();
        for dependent in remaining {
            match dependent {
                Dependent::Object(owner) => {
                    if let Err(e) = self.remove_reference(owner, id) {
                        warn!("Could not detach {} from {}: {}", id, owner, e);
                    }
                }
                Dependent::Node(node) => {
                    if let Err(e) = self.delete_node(node) {
                        warn!("Could not delete {}: {}", node, e);
                    }
                }
            }
        }

        let children = self.destroy(id);
        for child in children {
            self.release(child);
        }
        Ok(())
    }

    /// Removes the entry and returns the objects whose strong reference it held.
    fn destroy(&mut self, id: ObjectId) -> Vec<ObjectId> {
        let Some(entry) = self.objects.remove(&id) else {
            return Vec::new();
        };
        debug!("Destroying {} {}", entry.kind, id);
        self.tasks.cancel_owned_by(id);
        self.deferred.retain(|d| d.receiver != id);
        for child in &entry.core.references {
            self.unlink_dependent(*child, Dependent::Object(id));
        }
        if let Some(mut payload) = entry.payload {
            payload.dispose(self);
        }
        if self.conversion_cache.remove_converted(id) > 0 {
            debug!("Dropped cached conversions that produced {}", id);
        }
        let mut released = entry.core.references;
        released.extend(self.conversion_cache.remove_source(id));
        released
    }

    /// Removes an object inserted by a failed load without any notification.
    fn purge(&mut self, id: ObjectId) {
        if let Some(entry) = self.objects.remove(&id) {
            for child in &entry.core.references {
                self.unlink_dependent(*child, Dependent::Object(id));
            }
        }
    }

    /// Inserts a copy of the object with the same persistence flag, display objects and child
    /// references.
    pub fn clone_object(&mut self, id: ObjectId) -> Result<ObjectId, LibraryError> {
        let entry = self.objects.get(&id).ok_or(LibraryError::UnknownObject(id))?;
        let payload = entry
            .payload
            .as_ref()
            .ok_or_else(|| LibraryError::invalid(format!("{} is busy and cannot be copied", id)))?;
        let copy = payload.clone_object();
        let save = entry.core.save_with_scene;
        let displays = entry.core.display_objects.clone();
        let references = entry.core.references.clone();

        let copy_id = self.insert_boxed(copy);
        if let Some(copy_entry) = self.objects.get_mut(&copy_id) {
            copy_entry.core.save_with_scene = save;
            copy_entry.core.display_objects = displays;
        }
        for child in references {
            self.link(copy_id, child);
        }
        Ok(copy_id)
    }

    fn checkout(&mut self, id: ObjectId) -> Option<Box<dyn DataObject>> {
        self.objects.get_mut(&id)?.payload.take()
    }

    fn checkout_for_write(&mut self, id: ObjectId) -> Result<Box<dyn DataObject>, LibraryError> {
        match self.objects.get_mut(&id) {
            None => Err(LibraryError::UnknownObject(id)),
            Some(entry) => entry
                .payload
                .take()
                .ok_or_else(|| LibraryError::invalid(format!("{} is busy", id))),
        }
    }

    fn checkin(&mut self, id: ObjectId, mut payload: Box<dyn DataObject>) {
        match self.objects.get_mut(&id) {
            Some(entry) => entry.payload = Some(payload),
            None => {
                // Destroyed while one of its own methods was running.
                payload.dispose(self);
                return;
            }
        }
        self.flush_deferred(id);
    }

    /// Runs `f` on the checked-out object. `None` if the object is unknown or already busy.
    fn with_payload<R>(
        &mut self,
        id: ObjectId,
        f: impl FnOnce(&mut dyn DataObject, &mut DataSet) -> R,
    ) -> Option<R> {
        let mut payload = self.checkout(id)?;
        let result = f(payload.as_mut(), self);
        self.checkin(id, payload);
        Some(result)
    }

    // ---- reference graph ---------------------------------------------------------------------

    pub fn references(&self, id: ObjectId) -> &[ObjectId] {
        self.objects
            .get(&id)
            .map_or(&[][..], |e| e.core.references.as_slice())
    }

    pub fn dependents(&self, id: ObjectId) -> &[Dependent] {
        self.objects
            .get(&id)
            .map_or(&[][..], |e| e.core.dependents.as_slice())
    }

    fn reaches(&self, from: ObjectId, to: ObjectId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if visited.insert(current) {
                stack.extend(self.references(current).iter().copied());
            }
        }
        false
    }

    /// Checks that `owner` may reference `target`.
    pub fn check_reference(&self, owner: ObjectId, target: ObjectId) -> Result<(), LibraryError> {
        if !self.contains(owner) {
            return Err(LibraryError::UnknownObject(owner));
        }
        if !self.contains(target) {
            return Err(LibraryError::UnknownObject(target));
        }
        if self.reaches(target, owner) {
            return Err(LibraryError::CyclicReference { owner, target });
        }
        Ok(())
    }

    fn link(&mut self, owner: ObjectId, target: ObjectId) {
        if let Some(entry) = self.objects.get_mut(&owner) {
            entry.core.references.push(target);
        }
        if let Some(entry) = self.objects.get_mut(&target) {
            entry.core.dependents.push(Dependent::Object(owner));
            entry.core.strong_count += 1;
        }
    }

    pub(crate) fn link_dependent(&mut self, target: ObjectId, dependent: Dependent) {
        if let Some(entry) = self.objects.get_mut(&target) {
            if !entry.core.dependents.contains(&dependent) {
                entry.core.dependents.push(dependent);
            }
        }
    }

    pub(crate) fn unlink_dependent(&mut self, target: ObjectId, dependent: Dependent) {
        if let Some(entry) = self.objects.get_mut(&target) {
            entry.core.dependents.retain(|d| *d != dependent);
        }
    }

    fn announce_structure_change(&mut self, owner: ObjectId, kind: ReferenceEventType, payload: EventPayload) {
        self.notify_event(ReferenceEvent::new(kind, owner).with_payload(payload));
        self.notify_dependents(owner, ReferenceEventType::TargetChanged);
    }

    /// Appends `target` to the child references of `owner`. Returns false if it is already there.
    pub fn add_reference(&mut self, owner: ObjectId, target: ObjectId) -> Result<bool, LibraryError> {
        self.check_reference(owner, target)?;
        if self.references(owner).contains(&target) {
            return Ok(false);
        }
        self.link(owner, target);
        self.announce_structure_change(
            owner,
            ReferenceEventType::ReferenceAdded,
            EventPayload::Reference {
                old: None,
                new: Some(target),
            },
        );
        Ok(true)
    }

    pub fn remove_reference(&mut self, owner: ObjectId, target: ObjectId) -> Result<bool, LibraryError> {
        let entry = self
            .objects
            .get_mut(&owner)
            .ok_or(LibraryError::UnknownObject(owner))?;
        let Some(index) = entry.core.references.iter().position(|r| *r == target) else {
            return Ok(false);
        };
        entry.core.references.remove(index);
        self.unlink_dependent(target, Dependent::Object(owner));
        self.announce_structure_change(
            owner,
            ReferenceEventType::ReferenceRemoved,
            EventPayload::Reference {
                old: Some(target),
                new: None,
            },
        );
        self.release(target);
        Ok(true)
    }

    /// Puts `new` in the place of `old`. Returns false if `owner` does not reference `old`.
    pub fn replace_reference(
        &mut self,
        owner: ObjectId,
        old: ObjectId,
        new: ObjectId,
    ) -> Result<bool, LibraryError> {
        if old == new {
            return Ok(self.references(owner).contains(&old));
        }
        self.check_reference(owner, new)?;
        if self.references(owner).contains(&new) {
            return Err(LibraryError::invalid(format!("{} already references {}", owner, new)));
        }
        let Some(index) = self.references(owner).iter().position(|r| *r == old) else {
            return Ok(false);
        };
        if let Some(entry) = self.objects.get_mut(&owner) {
            entry.core.references[index] = new;
        }
        self.unlink_dependent(old, Dependent::Object(owner));
        if let Some(entry) = self.objects.get_mut(&new) {
            entry.core.dependents.push(Dependent::Object(owner));
            entry.core.strong_count += 1;
        }
        self.announce_structure_change(
            owner,
            ReferenceEventType::ReferenceChanged,
            EventPayload::Reference {
                old: Some(old),
                new: Some(new),
            },
        );
        self.release(old);
        Ok(true)
    }

    /// Replaces the whole child list of `owner`. Duplicates in `targets` are dropped.
    /// Nothing changes if any target is invalid.
    pub fn set_references(&mut self, owner: ObjectId, targets: Vec<ObjectId>) -> Result<(), LibraryError> {
        let mut unique = Vec::with_capacity(targets.len());
        for target in targets {
            if !unique.contains(&target) {
                unique.push(target);
            }
        }
        if !self.contains(owner) {
            return Err(LibraryError::UnknownObject(owner));
        }
        for target in &unique {
            self.check_reference(owner, *target)?;
        }
        let old = self.references(owner).to_vec();
        if old == unique {
            return Ok(());
        }

        for target in unique.iter().filter(|t| !old.contains(t)) {
            if let Some(entry) = self.objects.get_mut(target) {
                entry.core.dependents.push(Dependent::Object(owner));
                entry.core.strong_count += 1;
            }
        }
        let removed: Vec<ObjectId> = old.iter().copied().filter(|t| !unique.contains(t)).collect();
        for target in &removed {
            self.unlink_dependent(*target, Dependent::Object(owner));
        }
        if let Some(entry) = self.objects.get_mut(&owner) {
            entry.core.references = unique;
        }
        self.announce_structure_change(owner, ReferenceEventType::ReferenceChanged, EventPayload::None);
        for target in removed {
            self.release(target);
        }
        Ok(())
    }

    /// Nodes that use `id` as their data provider, directly or through objects built on it.
    pub fn dependent_nodes(&self, id: ObjectId) -> HashSet<NodeId> {
        let mut nodes = HashSet::new();
        let mut visited = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            for dependent in self.dependents(current) {
                match dependent {
                    Dependent::Node(node) => {
                        if self
                            .nodes
                            .get(node)
                            .is_some_and(|n| n.data_provider() == Some(current))
                        {
                            nodes.insert(*node);
                        }
                    }
                    Dependent::Object(owner) => stack.push(*owner),
                }
            }
        }
        nodes
    }

    // ---- notification ------------------------------------------------------------------------

    pub fn notify_dependents(&mut self, sender: ObjectId, kind: ReferenceEventType) {
        self.notify_event(ReferenceEvent::new(kind, sender));
    }

    /// Delivers `event` to the dependents of its sender, in the order they were added.
    ///
    /// The dependent list is copied first; dependents added or removed by a handler do not
    /// change this dispatch. A content change bumps the revision of the sender and of every
    /// object that forwards it. Each receiver sees the event at most once.
    pub fn notify_event(&mut self, event: ReferenceEvent) {
        let origin = event.sender();
        if !self.contains(origin) {
            return;
        }
        if event.kind().changes_content() {
            self.mark_changed(origin);
        }
        let mut visited = HashSet::new();
        self.dispatch(origin, &event, &mut visited);
    }

    fn mark_changed(&mut self, id: ObjectId) {
        if let Some(entry) = self.objects.get_mut(&id) {
            entry.core.revision += 1;
        }
        for stale in self.conversion_cache.remove_source(id) {
            self.release(stale);
        }
        self.with_payload(id, |object, dataset| object.content_changed(dataset));
    }

    fn dispatch(&mut self, source: ObjectId, event: &ReferenceEvent, visited: &mut HashSet<Dependent>) {
        let snapshot = self.dependents(source).to_vec();
        for dependent in snapshot {
            if !visited.insert(dependent) {
                continue;
            }
            match dependent {
                Dependent::Object(owner) => self.deliver(owner, source, event, visited),
                Dependent::Node(node) => self.node_reference_event(node, source, event),
            }
        }
    }

    fn deliver(
        &mut self,
        owner: ObjectId,
        source: ObjectId,
        event: &ReferenceEvent,
        visited: &mut HashSet<Dependent>,
    ) {
        let Some(entry) = self.objects.get_mut(&owner) else {
            return;
        };
        let Some(mut payload) = entry.payload.take() else {
            debug!("Deferring {:?} for busy {}", event.kind(), owner);
            self.deferred.push(DeferredEvent {
                receiver: owner,
                source,
                event: event.clone(),
            });
            return;
        };
        let response = payload.reference_event(owner, self, source, event);
        self.checkin(owner, payload);

        if event.kind() == ReferenceEventType::TargetDeleted
            && event.sender() == source
            && self.references(owner).contains(&source)
        {
            if let Err(e) = self.remove_reference(owner, source) {
                warn!("Could not drop deleted {} from {}: {}", source, owner, e);
            }
        }

        if response == EventResponse::Forward && self.contains(owner) {
            if event.kind().changes_content() {
                self.mark_changed(owner);
            }
            self.dispatch(owner, event, visited);
        }
    }

    fn flush_deferred(&mut self, receiver: ObjectId) {
        if !self.deferred.iter().any(|d| d.receiver == receiver) {
            return;
        }
        let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|d| d.receiver == receiver);
        self.deferred = rest;
        for deferred in mine {
            let mut visited = HashSet::from([Dependent::Object(receiver)]);
            self.deliver(receiver, deferred.source, &deferred.event, &mut visited);
        }
    }

    // ---- persistence flag and display objects ------------------------------------------------

    pub fn save_with_scene(&self, id: ObjectId) -> Option<bool> {
        self.objects.get(&id).map(|e| e.core.save_with_scene)
    }

    /// Changes the persistence flag. Setting the current value does nothing.
    pub fn set_save_with_scene(&mut self, id: ObjectId, save: bool) -> Result<(), LibraryError> {
        if self.apply_save_with_scene(id, save)? {
            self.notify_dependents(id, ReferenceEventType::TargetChanged);
        }
        Ok(())
    }

    /// Passes a persistence flag down from an object whose own change is announced by the
    /// caller. `id` gets a new revision but its dependents hear nothing, so the owner's single
    /// `TargetChanged` is the only event of the toggle.
    pub(crate) fn propagate_save_with_scene(&mut self, id: ObjectId, save: bool) -> Result<(), LibraryError> {
        if self.apply_save_with_scene(id, save)? {
            self.mark_changed(id);
        }
        Ok(())
    }

    fn apply_save_with_scene(&mut self, id: ObjectId, save: bool) -> Result<bool, LibraryError> {
        let entry = self
            .objects
            .get_mut(&id)
            .ok_or(LibraryError::UnknownObject(id))?;
        if entry.core.save_with_scene == save {
            return Ok(false);
        }
        entry.core.save_with_scene = save;
        self.with_payload(id, |object, dataset| object.save_with_scene_changed(id, dataset, save));
        Ok(true)
    }

    pub fn display_objects(&self, id: ObjectId) -> &[DisplayHandle] {
        self.objects
            .get(&id)
            .map_or(&[][..], |e| e.core.display_objects.as_slice())
    }

    /// Display objects of `id` that are still alive, in attachment order.
    pub fn live_display_objects(&self, id: ObjectId) -> Vec<Rc<dyn DisplayObject>> {
        self.display_objects(id)
            .iter()
            .filter_map(|d| d.upgrade())
            .collect()
    }

    /// Appends a display object. A handle whose display object is gone is rejected and leaves
    /// the list untouched.
    pub fn add_display_object(&mut self, id: ObjectId, display: &DisplayHandle) -> Result<(), LibraryError> {
        let live = display.upgrade().ok_or(LibraryError::DeadDisplayObject)?;
        let entry = self
            .objects
            .get_mut(&id)
            .ok_or(LibraryError::UnknownObject(id))?;
        entry.core.display_objects.push(display.clone());
        self.notify_event(
            ReferenceEvent::new(ReferenceEventType::ReferenceAdded, id)
                .with_payload(EventPayload::Display(live.id())),
        );
        Ok(())
    }

    /// Makes `display` the only display object of `id`.
    pub fn set_display_object(&mut self, id: ObjectId, display: &DisplayHandle) -> Result<(), LibraryError> {
        let live = display.upgrade().ok_or(LibraryError::DeadDisplayObject)?;
        let entry = self
            .objects
            .get_mut(&id)
            .ok_or(LibraryError::UnknownObject(id))?;
        entry.core.display_objects.clear();
        entry.core.display_objects.push(display.clone());
        self.notify_event(
            ReferenceEvent::new(ReferenceEventType::ReferenceChanged, id)
                .with_payload(EventPayload::Display(live.id())),
        );
        Ok(())
    }

    // ---- evaluation --------------------------------------------------------------------------

    /// Evaluates the object at `time`. The returned state is always valid at `time`.
    pub fn evaluate(&mut self, id: ObjectId, time: TimePoint) -> PipelineFlowState {
        let _timer = ScopedTimer::debug_lazy(|| format!("Evaluating {} at {}", id, time));
        match self.with_payload(id, |object, dataset| object.evaluate(id, dataset, time)) {
            Some(mut state) => {
                if !state.validity().contains(time) {
                    error!(
                        "{} returned a state valid on {} for time {}",
                        id,
                        state.validity(),
                        time
                    );
                    state.set_validity(TimeInterval::instant(time));
                }
                state
            }
            None => {
                let reason = if self.contains(id) {
                    format!("{} is already being evaluated", id)
                } else {
                    format!("{} does not exist", id)
                };
                warn!("Cannot evaluate: {}", reason);
                let mut state = PipelineFlowState::with_validity(TimeInterval::instant(time));
                state.set_status(PipelineStatus::error(reason));
                state
            }
        }
    }

    pub fn object_validity(&self, id: ObjectId, time: TimePoint) -> TimeInterval {
        let validity = self
            .object(id)
            .map(|o| o.object_validity(id, self, time))
            .unwrap_or_else(|| TimeInterval::instant(time));
        if validity.contains(time) {
            validity
        } else {
            TimeInterval::instant(time)
        }
    }

    pub fn status(&self, id: ObjectId) -> PipelineStatus {
        match self.objects.get(&id) {
            None => PipelineStatus::error(format!("{} does not exist", id)),
            Some(entry) => match &entry.payload {
                Some(object) => object.status(),
                None => PipelineStatus::pending("Evaluation in progress"),
            },
        }
    }

    // ---- conversion --------------------------------------------------------------------------

    pub fn can_convert_to(&self, id: ObjectId, target: &ObjectKind) -> bool {
        let Some(entry) = self.objects.get(&id) else {
            return false;
        };
        let own = match &entry.payload {
            Some(object) => object.can_convert_to(target),
            None => entry.kind.is_derived_from(target),
        };
        own || self.converters.find(entry.kind, target).is_some()
    }

    /// Returns an object of kind `target` that represents `id` at `time`, or `None`.
    ///
    /// Objects produced by registered converters are owned by the conversion cache and live
    /// until `id` changes or the cache evicts them; retain them to keep them longer.
    pub fn convert_to(
        &mut self,
        id: ObjectId,
        target: &'static ObjectKind,
        time: TimePoint,
    ) -> Option<ObjectId> {
        if !self.can_convert_to(id, target) {
            return None;
        }
        let source_kind = self.kind_of(id)?;

        let own = self
            .with_payload(id, |object, dataset| {
                if object.can_convert_to(target) {
                    object.convert_to(id, target, time, dataset)
                } else {
                    None
                }
            })
            .flatten();
        if let Some(result) = own {
            return self.checked_conversion(id, result, target);
        }

        let converter = self.converters.find(source_kind, target)?;
        let revision = self.revision_number(id)?;
        if let Some(hit) = self.conversion_cache.get(id, revision, target, time) {
            debug!("Conversion of {} to {} served from cache", id, target);
            return Some(hit);
        }

        let validity = self.object_validity(id, time);
        let converted = converter.convert(self.object(id)?, time)?;
        let converted_id = self.insert_boxed(converted);
        if self.checked_conversion(id, converted_id, target).is_none() {
            self.release(converted_id);
            return None;
        }
        for evicted in self.conversion_cache.put(id, revision, target, converted_id, validity) {
            self.release(evicted);
        }
        Some(converted_id)
    }

    fn checked_conversion(
        &self,
        source: ObjectId,
        result: ObjectId,
        target: &'static ObjectKind,
    ) -> Option<ObjectId> {
        match self.kind_of(result) {
            Some(kind) if kind.is_derived_from(target) => Some(result),
            found => {
                error!(
                    "Converting {} to {} produced {:?}; discarding the result",
                    source, target, found
                );
                None
            }
        }
    }

    // ---- persistence -------------------------------------------------------------------------

    /// Writes a reference to `id`. The object itself is written on its first occurrence in the
    /// stream: kind, persistence flag, display object ids and, if it is saved with the scene,
    /// its children and content. Revision numbers are not written.
    pub fn save_object(&self, id: ObjectId, stream: &mut ObjectSaveStream) -> Result<(), LibraryError> {
        let (pointer, first) = stream.pointer_for(id);
        stream.write_value(&pointer)?;
        if !first {
            return Ok(());
        }

        let entry = self.objects.get(&id).ok_or(LibraryError::UnknownObject(id))?;
        let payload = entry
            .payload
            .as_ref()
            .ok_or_else(|| LibraryError::invalid(format!("{} is busy and cannot be saved", id)))?;
        if self.classes.object_class(entry.kind.name()).is_none() {
            return Err(LibraryError::unsupported(entry.kind.name()));
        }

        let save = entry.core.save_with_scene;
        let display_ids: Vec<Uuid> = entry
            .core
            .display_objects
            .iter()
            .filter_map(|d| d.upgrade().map(|d| d.id()))
            .collect();
        let children: &[ObjectId] = if save { &entry.core.references } else { &[] };

        stream.begin_chunk(OBJECT_CHUNK);
        stream.write_value(entry.kind.name())?;
        stream.write_value(&save)?;
        stream.write_value(&display_ids)?;
        stream.write_value(&(children.len() as u32))?;
        for child in children {
            self.save_object(*child, stream)?;
        }
        stream.begin_chunk(PAYLOAD_CHUNK);
        if save {
            payload.save_payload(id, stream, self)?;
        }
        stream.end_chunk()?;
        stream.end_chunk()
    }

    pub fn save_to_bytes(&self, id: ObjectId) -> Result<Vec<u8>, LibraryError> {
        measure_debug_lazy(
            || format!("Saving {}", id),
            || {
                let mut stream = ObjectSaveStream::new();
                self.save_object(id, &mut stream)?;
                stream.into_bytes()
            },
        )
    }

    /// Reads one object graph written by [`DataSet::save_object`].
    ///
    /// Either the whole graph is inserted or, on any error, nothing is. The caller receives one
    /// strong reference to the returned root.
    pub fn load_object(
        &mut self,
        stream: &mut ObjectLoadStream,
        displays: &DisplayRegistry,
    ) -> Result<ObjectId, LibraryError> {
        match self.load_object_ref(stream, displays) {
            Ok(root) => {
                for id in stream.take_inserted() {
                    if id != root {
                        self.release(id);
                    }
                }
                Ok(root)
            }
            Err(e) => {
                let inserted = stream.take_inserted();
                warn!("Load failed, discarding {} object(s): {}", inserted.len(), e);
                for id in inserted.into_iter().rev() {
                    self.purge(id);
                }
                Err(e)
            }
        }
    }

    pub fn load_from_bytes(
        &mut self,
        bytes: Vec<u8>,
        displays: &DisplayRegistry,
    ) -> Result<ObjectId, LibraryError> {
        measure_debug("Loading scene stream", || {
            let mut stream = ObjectLoadStream::new(bytes)?;
            self.load_object(&mut stream, displays)
        })
    }

    /// Reads an object reference inside an object being loaded.
    pub fn load_object_ref(
        &mut self,
        stream: &mut ObjectLoadStream,
        displays: &DisplayRegistry,
    ) -> Result<ObjectId, LibraryError> {
        let pointer: u64 = stream.read_value()?;
        if let Some(id) = stream.resolve_pointer(pointer) {
            return Ok(id);
        }

        stream.expect_chunk(OBJECT_CHUNK)?;
        let kind_name: String = stream.read_value()?;
        let save: bool = stream.read_value()?;
        let display_ids: Vec<Uuid> = stream.read_value()?;
        let display_handles = display_ids
            .iter()
            .map(|id| {
                displays
                    .handle(*id)
                    .ok_or_else(|| LibraryError::malformed(format!("unknown display object {}", id)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let child_count: u32 = stream.read_value()?;
        let mut children = Vec::with_capacity(child_count as usize);
        for _ in 0..child_count {
            children.push(self.load_object_ref(stream, displays)?);
        }

        let classes = Arc::clone(&self.classes);
        let class = classes
            .object_class(&kind_name)
            .ok_or_else(|| LibraryError::unsupported(kind_name.clone()))?;
        stream.expect_chunk(PAYLOAD_CHUNK)?;
        let payload = if save {
            (class.load)(stream, &classes)?
        } else {
            (class.create)()
        };
        stream.close_chunk()?;
        stream.close_chunk()?;

        let id = self.insert_boxed(payload);
        stream.record_inserted(id);
        stream.register_pointer(pointer, id);
        if let Some(entry) = self.objects.get_mut(&id) {
            entry.core.save_with_scene = save;
            entry.core.display_objects = display_handles;
        }
        for child in children {
            self.link(id, child);
        }
        Ok(id)
    }

    pub(crate) fn emit_node_event(&mut self, event: NodeEvent) {
        for observer in &mut self.observers {
            observer(&event);
        }
    }

    pub(crate) fn task_finished(&mut self, done: crate::task::FinishedTask) {
        let owner = done.owner;
        let handled = self.with_payload(owner, |object, dataset| {
            object.task_finished(owner, dataset, done.id, done.outcome)
        });
        if handled.is_none() {
            debug!("Dropping result of task {}: owner {} is gone or busy", done.id, owner);
        }
    }
}

impl Default for DataSet {
    fn default() -> Self {
        Self::new()
    }
}
