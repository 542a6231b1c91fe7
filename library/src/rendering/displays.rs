use std::cell::Cell;

use log::warn;
use uuid::Uuid;

use crate::animation::TimePoint;
use crate::error::LibraryError;
use crate::geometry::{Box3, Color};
use crate::object::{ParticlePropertyObject, ParticlePropertyType, SimulationCellObject, TriMeshObject};
use crate::pipeline::PipelineFlowState;
use crate::reference::ObjectId;
use crate::scene::DataSet;

use super::DisplayObject;
use super::renderer::SceneRenderer;

fn find_property<'a>(
    state: &PipelineFlowState,
    dataset: &'a DataSet,
    property_type: &ParticlePropertyType,
) -> Option<&'a ParticlePropertyObject> {
    state
        .objects()
        .filter_map(|id| dataset.get::<ParticlePropertyObject>(id))
        .find(|p| p.property_type() == property_type)
}

/// Draws particles as spheres. Attached to the position property; radii and colors come from
/// the `Radius` and `Color` properties of the same flow state when present.
pub struct ParticleDisplay {
    id: Uuid,
    enabled: Cell<bool>,
    pub default_radius: f64,
    pub default_color: Color,
}

impl ParticleDisplay {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            enabled: Cell::new(true),
            default_radius: 0.5,
            default_color: Color::new(0.9, 0.9, 0.2),
        }
    }

    fn radii(&self, state: &PipelineFlowState, dataset: &DataSet, count: usize) -> Vec<f64> {
        match find_property(state, dataset, &ParticlePropertyType::Radius) {
            Some(radius) if radius.len() == count => radius
                .data()
                .iter()
                .map(|r| if *r > 0.0 { *r } else { self.default_radius })
                .collect(),
            _ => vec![self.default_radius; count],
        }
    }

    fn colors(&self, state: &PipelineFlowState, dataset: &DataSet, count: usize) -> Vec<Color> {
        match find_property(state, dataset, &ParticlePropertyType::Color) {
            Some(color) if color.len() == count => color.colors(),
            _ => vec![self.default_color; count],
        }
    }
}

impl Default for ParticleDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayObject for ParticleDisplay {
    fn id(&self) -> Uuid {
        self.id
    }

    fn title(&self) -> String {
        "Particles".to_string()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    fn render(
        &self,
        _time: TimePoint,
        object: ObjectId,
        state: &PipelineFlowState,
        dataset: &DataSet,
        renderer: &mut dyn SceneRenderer,
    ) -> Result<(), LibraryError> {
        let Some(positions) = dataset.get::<ParticlePropertyObject>(object) else {
            return Err(LibraryError::TypeMismatch {
                expected: "ParticleProperty",
                found: dataset.kind_of(object).map_or("nothing", |k| k.name()),
            });
        };
        if positions.property_type() != &ParticlePropertyType::Position {
            warn!("Particle display attached to '{}' property", positions.property_type().name());
            return Ok(());
        }
        let points = positions.points();
        let radii = self.radii(state, dataset, points.len());
        let colors = self.colors(state, dataset, points.len());
        renderer.render_particles(&points, &radii, &colors)
    }

    fn bounding_box(
        &self,
        _time: TimePoint,
        object: ObjectId,
        state: &PipelineFlowState,
        dataset: &DataSet,
    ) -> Box3 {
        let Some(positions) = dataset.get::<ParticlePropertyObject>(object) else {
            return Box3::empty();
        };
        let max_radius = self
            .radii(state, dataset, positions.len())
            .into_iter()
            .fold(0.0, f64::max);
        positions.bounding_box().pad(max_radius)
    }
}

/// Draws the edges of a simulation cell.
pub struct SimulationCellDisplay {
    id: Uuid,
    enabled: Cell<bool>,
    pub line_color: Color,
}

impl SimulationCellDisplay {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            enabled: Cell::new(true),
            line_color: Color::new(0.0, 0.0, 0.0),
        }
    }
}

impl Default for SimulationCellDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayObject for SimulationCellDisplay {
    fn id(&self) -> Uuid {
        self.id
    }

    fn title(&self) -> String {
        "Simulation cell".to_string()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    fn render(
        &self,
        _time: TimePoint,
        object: ObjectId,
        _state: &PipelineFlowState,
        dataset: &DataSet,
        renderer: &mut dyn SceneRenderer,
    ) -> Result<(), LibraryError> {
        let cell = dataset
            .get::<SimulationCellObject>(object)
            .ok_or_else(|| LibraryError::render(format!("{} is not a simulation cell", object)))?;
        renderer.render_lines(&cell.edges(), self.line_color)
    }

    fn bounding_box(
        &self,
        _time: TimePoint,
        object: ObjectId,
        _state: &PipelineFlowState,
        dataset: &DataSet,
    ) -> Box3 {
        dataset
            .get::<SimulationCellObject>(object)
            .map_or_else(Box3::empty, |cell| cell.bounding_box())
    }
}

/// Draws triangle meshes in a single color.
pub struct TriMeshDisplay {
    id: Uuid,
    enabled: Cell<bool>,
    pub color: Color,
}

impl TriMeshDisplay {
    pub fn new(color: Color) -> Self {
        Self {
            id: Uuid::new_v4(),
            enabled: Cell::new(true),
            color,
        }
    }
}

impl DisplayObject for TriMeshDisplay {
    fn id(&self) -> Uuid {
        self.id
    }

    fn title(&self) -> String {
        "Triangle mesh".to_string()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    fn render(
        &self,
        _time: TimePoint,
        object: ObjectId,
        _state: &PipelineFlowState,
        dataset: &DataSet,
        renderer: &mut dyn SceneRenderer,
    ) -> Result<(), LibraryError> {
        let mesh = dataset
            .get::<TriMeshObject>(object)
            .ok_or_else(|| LibraryError::render(format!("{} is not a triangle mesh", object)))?;
        renderer.render_mesh(&mesh.vertices, &mesh.faces, self.color)
    }

    fn bounding_box(
        &self,
        _time: TimePoint,
        object: ObjectId,
        _state: &PipelineFlowState,
        dataset: &DataSet,
    ) -> Box3 {
        dataset
            .get::<TriMeshObject>(object)
            .map_or_else(Box3::empty, |mesh| mesh.bounding_box())
    }
}
