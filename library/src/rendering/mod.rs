//! Display objects and the renderer interface they draw through.

pub mod displays;
pub mod recording;
pub mod renderer;

pub use displays::{ParticleDisplay, SimulationCellDisplay, TriMeshDisplay};
pub use recording::{DrawCall, RecordingRenderer};
pub use renderer::{FrameStats, SceneRenderer};

use std::collections::HashMap;
use std::rc::{Rc, Weak};

use uuid::Uuid;

use crate::animation::TimePoint;
use crate::error::LibraryError;
use crate::geometry::Box3;
use crate::pipeline::PipelineFlowState;
use crate::reference::ObjectId;
use crate::scene::DataSet;

/// Knows how to draw one kind of data object. Data objects only hold weak handles to these.
pub trait DisplayObject {
    fn id(&self) -> Uuid;

    fn title(&self) -> String;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    /// Draws `object`, which is part of `state`.
    fn render(
        &self,
        time: TimePoint,
        object: ObjectId,
        state: &PipelineFlowState,
        dataset: &DataSet,
        renderer: &mut dyn SceneRenderer,
    ) -> Result<(), LibraryError>;

    fn bounding_box(
        &self,
        time: TimePoint,
        object: ObjectId,
        state: &PipelineFlowState,
        dataset: &DataSet,
    ) -> Box3;
}

/// Non-owning handle to a display object.
pub type DisplayHandle = Weak<dyn DisplayObject>;

pub fn display_handle<D: DisplayObject + 'static>(display: &Rc<D>) -> DisplayHandle {
    let shared: Rc<dyn DisplayObject> = display.clone();
    Rc::downgrade(&shared)
}

/// Owner of the display objects of a session, also used to resolve display ids while loading.
#[derive(Default)]
pub struct DisplayRegistry {
    displays: HashMap<Uuid, Rc<dyn DisplayObject>>,
}

impl DisplayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<D: DisplayObject + 'static>(&mut self, display: D) -> Rc<D> {
        let display = Rc::new(display);
        self.displays.insert(display.id(), display.clone());
        display
    }

    pub fn handle(&self, id: Uuid) -> Option<DisplayHandle> {
        self.displays.get(&id).map(Rc::downgrade)
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Rc<dyn DisplayObject>> {
        self.displays.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.displays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.displays.is_empty()
    }
}
