use std::rc::Weak;

use log::{debug, info, warn};

use crate::animation::{TimeInterval, TimePoint};
use crate::error::LibraryError;
use crate::geometry::Box3;
use crate::pipeline::{Modifier, PipelineFlowState, PipelineObject};
use crate::reference::{Dependent, NodeId, ObjectId, ReferenceEvent, ReferenceEventType};
use crate::rendering::{DisplayHandle, FrameStats, SceneRenderer};

use super::DataSet;

/// Something a node observer is told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    /// The node's cached pipeline output was thrown away.
    Invalidated(NodeId),
    StatusChanged(NodeId),
    TitleChanged(NodeId),
    ProviderChanged(NodeId),
    Deleted(NodeId),
}

/// A scene node that shows the output of a data provider.
pub struct ObjectNode {
    name: String,
    data_provider: Option<ObjectId>,
    cache: PipelineFlowState,
    cache_revision: Option<u64>,
    display_objects: Vec<DisplayHandle>,
}

impl ObjectNode {
    fn new(name: String) -> Self {
        Self {
            name,
            data_provider: None,
            cache: PipelineFlowState::default(),
            cache_revision: None,
            display_objects: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_provider(&self) -> Option<ObjectId> {
        self.data_provider
    }

    /// Output of the last evaluation. Empty after the node was invalidated.
    pub fn cached_state(&self) -> &PipelineFlowState {
        &self.cache
    }

    /// Display objects of the objects in the cached output, without repetitions.
    pub fn display_objects(&self) -> &[DisplayHandle] {
        &self.display_objects
    }
}

impl DataSet {
    pub fn create_node(&mut self, name: impl Into<String>) -> NodeId {
        let id = NodeId::new();
        let name = name.into();
        debug!("Created node '{}' ({})", name, id);
        self.nodes.insert(id, ObjectNode::new(name));
        self.node_order.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&ObjectNode> {
        self.nodes.get(&id)
    }

    /// Node ids in creation order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.node_order
    }

    pub fn add_node_observer(&mut self, observer: impl FnMut(&NodeEvent) + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn set_node_name(&mut self, node: NodeId, name: impl Into<String>) -> Result<(), LibraryError> {
        let entry = self.nodes.get_mut(&node).ok_or(LibraryError::UnknownNode(node))?;
        entry.name = name.into();
        self.emit_node_event(NodeEvent::TitleChanged(node));
        Ok(())
    }

    /// Makes `provider` the source of the node's pipeline. The node keeps it alive.
    pub fn set_data_provider(&mut self, node: NodeId, provider: Option<ObjectId>) -> Result<(), LibraryError> {
        let old = self
            .nodes
            .get(&node)
            .ok_or(LibraryError::UnknownNode(node))?
            .data_provider;
        if let Some(provider) = provider {
            if !self.contains(provider) {
                return Err(LibraryError::UnknownObject(provider));
            }
        }
        if old == provider {
            return Ok(());
        }

        if let Some(provider) = provider {
            self.retain(provider)?;
            self.link_dependent(provider, Dependent::Node(node));
        }
        if let Some(old) = old {
            self.unlink_dependent(old, Dependent::Node(node));
        }
        if let Some(entry) = self.nodes.get_mut(&node) {
            entry.data_provider = provider;
        }
        self.invalidate_node(node);
        self.emit_node_event(NodeEvent::ProviderChanged(node));
        if let Some(old) = old {
            self.release(old);
        }
        Ok(())
    }

    pub fn delete_node(&mut self, node: NodeId) -> Result<(), LibraryError> {
        let entry = self.nodes.remove(&node).ok_or(LibraryError::UnknownNode(node))?;
        self.node_order.retain(|n| *n != node);
        info!("Deleting node '{}'", entry.name);
        self.release_state(&entry.cache);
        if let Some(provider) = entry.data_provider {
            self.unlink_dependent(provider, Dependent::Node(node));
            self.release(provider);
        }
        self.emit_node_event(NodeEvent::Deleted(node));
        Ok(())
    }

    fn invalidate_node(&mut self, node: NodeId) {
        let Some(entry) = self.nodes.get_mut(&node) else {
            return;
        };
        let old = std::mem::take(&mut entry.cache);
        entry.cache_revision = None;
        self.release_state(&old);
    }

    /// Evaluates the node's pipeline at `time`, reusing the cached output while it is valid.
    pub fn eval_pipeline(&mut self, node: NodeId, time: TimePoint) -> Result<PipelineFlowState, LibraryError> {
        let entry = self.nodes.get(&node).ok_or(LibraryError::UnknownNode(node))?;
        if !entry.cache.validity().contains(time) {
            let provider = entry.data_provider;
            let state = match provider {
                Some(provider) => self.evaluate(provider, time),
                None => PipelineFlowState::with_validity(TimeInterval::infinite()),
            };
            let revision = provider.and_then(|p| self.revision_number(p));
            self.retain_state(&state);
            let Some(entry) = self.nodes.get_mut(&node) else {
                // Deleted while its provider was evaluated.
                self.release_state(&state);
                return Err(LibraryError::UnknownNode(node));
            };
            let old = std::mem::replace(&mut entry.cache, state);
            entry.cache_revision = revision;
            self.release_state(&old);
        }
        self.sync_node_displays(node);
        self.nodes
            .get(&node)
            .map(|n| n.cache.clone())
            .ok_or(LibraryError::UnknownNode(node))
    }

    /// Keeps the display objects that are still used in place and appends new ones.
    fn sync_node_displays(&mut self, node: NodeId) {
        let Some(entry) = self.nodes.get(&node) else {
            return;
        };
        let mut wanted: Vec<DisplayHandle> = Vec::new();
        for object in entry.cache.objects() {
            for display in self.display_objects(object) {
                if !wanted.iter().any(|w| Weak::ptr_eq(w, display)) {
                    wanted.push(display.clone());
                }
            }
        }
        let Some(entry) = self.nodes.get_mut(&node) else {
            return;
        };
        entry
            .display_objects
            .retain(|d| wanted.iter().any(|w| Weak::ptr_eq(w, d)));
        for display in wanted {
            if !entry.display_objects.iter().any(|d| Weak::ptr_eq(d, &display)) {
                entry.display_objects.push(display);
            }
        }
    }

    /// Draws every object of the node's output with its enabled display objects.
    pub fn render_node(
        &mut self,
        node: NodeId,
        time: TimePoint,
        renderer: &mut dyn SceneRenderer,
    ) -> Result<(), LibraryError> {
        let state = self.eval_pipeline(node, time)?;
        for object in state.objects() {
            let displays = self.live_display_objects(object);
            let dead = self.display_objects(object).len() - displays.len();
            if dead > 0 {
                warn!("Skipping {} dead display object(s) of {}", dead, object);
            }
            for display in displays {
                if display.is_enabled() {
                    display.render(time, object, &state, self, renderer)?;
                }
            }
        }
        Ok(())
    }

    /// Renders all nodes into one frame.
    pub fn render_scene(
        &mut self,
        time: TimePoint,
        renderer: &mut dyn SceneRenderer,
    ) -> Result<FrameStats, LibraryError> {
        renderer.begin_frame(time)?;
        for node in self.node_order.clone() {
            self.render_node(node, time, renderer)?;
        }
        renderer.end_frame()
    }

    pub fn node_bounding_box(&mut self, node: NodeId, time: TimePoint) -> Result<Box3, LibraryError> {
        let state = self.eval_pipeline(node, time)?;
        let mut bounds = Box3::empty();
        for object in state.objects() {
            for display in self.live_display_objects(object) {
                if display.is_enabled() {
                    bounds.add_box(&display.bounding_box(time, object, &state, self));
                }
            }
        }
        Ok(bounds)
    }

    /// Appends a modifier to the node's pipeline, putting a pipeline object in front of the
    /// current data provider if there is none yet. Returns the pipeline object.
    pub fn apply_modifier(&mut self, node: NodeId, modifier: Box<dyn Modifier>) -> Result<ObjectId, LibraryError> {
        let provider = self
            .nodes
            .get(&node)
            .ok_or(LibraryError::UnknownNode(node))?
            .data_provider
            .ok_or_else(|| LibraryError::invalid("the node has no data provider"))?;

        let pipeline = if self.get::<PipelineObject>(provider).is_some() {
            provider
        } else {
            let pipeline = self.insert(PipelineObject::new());
            let wired = PipelineObject::set_source(self, pipeline, Some(provider))
                .and_then(|_| self.set_data_provider(node, Some(pipeline)));
            self.release(pipeline);
            wired?;
            pipeline
        };

        let title = modifier.title();
        self.modify::<PipelineObject, _>(pipeline, |p| p.push_modifier(modifier))?;
        info!("Applied '{}' to node {}", title, node);
        Ok(pipeline)
    }

    /// The object at the start of the node's pipeline chain.
    pub fn source_object(&self, node: NodeId) -> Option<ObjectId> {
        let mut current = self.nodes.get(&node)?.data_provider?;
        let mut steps = 0;
        while self.get::<PipelineObject>(current).is_some() {
            let Some(source) = PipelineObject::source(self, current) else {
                break;
            };
            current = source;
            steps += 1;
            if steps > self.object_count() {
                warn!("Pipeline chain of {} does not terminate", node);
                break;
            }
        }
        Some(current)
    }

    pub(crate) fn node_reference_event(&mut self, node: NodeId, source: ObjectId, event: &ReferenceEvent) {
        let Some(entry) = self.nodes.get(&node) else {
            return;
        };
        if entry.data_provider != Some(source) {
            return;
        }
        match event.kind() {
            ReferenceEventType::TargetChanged => {
                if entry.cache_revision.is_some() && entry.cache_revision == self.revision_number(source) {
                    return;
                }
                self.invalidate_node(node);
                self.emit_node_event(NodeEvent::Invalidated(node));
            }
            ReferenceEventType::PendingStateChanged => {
                self.invalidate_node(node);
                self.emit_node_event(NodeEvent::Invalidated(node));
            }
            ReferenceEventType::TargetDeleted => {
                if let Err(e) = self.delete_node(node) {
                    warn!("Could not delete {}: {}", node, e);
                }
            }
            ReferenceEventType::StatusChanged => self.emit_node_event(NodeEvent::StatusChanged(node)),
            ReferenceEventType::TitleChanged => self.emit_node_event(NodeEvent::TitleChanged(node)),
            _ => {}
        }
    }
}
