use serde::{Deserialize, Serialize};

use crate::error::LibraryError;
use crate::geometry::{Box3, Color, Point3};
use crate::io::{ClassRegistry, ObjectClass, ObjectLoadStream, ObjectSaveStream};
use crate::reference::ObjectId;
use crate::scene::DataSet;

use super::{DATA_OBJECT_KIND, DataObject, ObjectKind};

pub static PARTICLE_PROPERTY_KIND: ObjectKind =
    ObjectKind::derived("ParticleProperty", &DATA_OBJECT_KIND);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParticlePropertyType {
    Position,
    Color,
    Radius,
    Selection,
    User { name: String, components: usize },
}

impl ParticlePropertyType {
    pub fn components(&self) -> usize {
        match self {
            ParticlePropertyType::Position | ParticlePropertyType::Color => 3,
            ParticlePropertyType::Radius | ParticlePropertyType::Selection => 1,
            ParticlePropertyType::User { components, .. } => (*components).max(1),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ParticlePropertyType::Position => "Position",
            ParticlePropertyType::Color => "Color",
            ParticlePropertyType::Radius => "Radius",
            ParticlePropertyType::Selection => "Selection",
            ParticlePropertyType::User { name, .. } => name,
        }
    }
}

/// One per-particle data column, stored row major.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParticlePropertyObject {
    property_type: ParticlePropertyType,
    data: Vec<f64>,
}

impl ParticlePropertyObject {
    pub fn new(property_type: ParticlePropertyType, count: usize) -> Self {
        let data = vec![0.0; count * property_type.components()];
        Self {
            property_type,
            data,
        }
    }

    pub fn from_points(property_type: ParticlePropertyType, points: &[Point3]) -> Self {
        let mut property = Self::new(property_type, points.len());
        property.set_points(points);
        property
    }

    pub fn from_scalars(property_type: ParticlePropertyType, values: Vec<f64>) -> Self {
        let mut property = Self::new(property_type, 0);
        property.data = values;
        property
    }

    pub fn property_type(&self) -> &ParticlePropertyType {
        &self.property_type
    }

    pub fn components(&self) -> usize {
        self.property_type.components()
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.components()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Rows of a three-component property, or nothing for other widths.
    pub fn points(&self) -> Vec<Point3> {
        if self.components() != 3 {
            return Vec::new();
        }
        self.data
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect()
    }

    pub fn colors(&self) -> Vec<Color> {
        self.points()
            .into_iter()
            .map(|[r, g, b]| Color::new(r as f32, g as f32, b as f32))
            .collect()
    }

    pub fn set_points(&mut self, points: &[Point3]) {
        self.data = points.iter().flat_map(|p| p.iter().copied()).collect();
    }

    pub fn bounding_box(&self) -> Box3 {
        Box3::from_points(&self.points())
    }
}

impl DataObject for ParticlePropertyObject {
    fn kind(&self) -> &'static ObjectKind {
        &PARTICLE_PROPERTY_KIND
    }

    fn title(&self) -> String {
        self.property_type.name().to_string()
    }

    fn clone_object(&self) -> Box<dyn DataObject> {
        Box::new(self.clone())
    }

    fn save_payload(
        &self,
        _this: ObjectId,
        stream: &mut ObjectSaveStream,
        _dataset: &DataSet,
    ) -> Result<(), LibraryError> {
        stream.write_value(self)
    }
}

pub(crate) fn object_class() -> ObjectClass {
    ObjectClass {
        kind: &PARTICLE_PROPERTY_KIND,
        create: || Box::new(ParticlePropertyObject::new(ParticlePropertyType::Position, 0)),
        load: |stream: &mut ObjectLoadStream, _: &ClassRegistry| {
            let property: ParticlePropertyObject = stream.read_value()?;
            if property.data.len() % property.components() != 0 {
                return Err(LibraryError::malformed(format!(
                    "property '{}' has a partial row",
                    property.property_type.name()
                )));
            }
            Ok(Box::new(property) as Box<dyn DataObject>)
        },
    }
}
