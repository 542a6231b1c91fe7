use serde::{Deserialize, Serialize};

use crate::error::LibraryError;
use crate::geometry::{Box3, Point3, Vector3, add};
use crate::io::{ClassRegistry, ObjectClass, ObjectLoadStream, ObjectSaveStream};
use crate::reference::ObjectId;
use crate::scene::DataSet;

use super::mesh::TriMeshObject;
use super::{DATA_OBJECT_KIND, DataObject, ObjectKind};

pub static SIMULATION_CELL_KIND: ObjectKind =
    ObjectKind::derived("SimulationCell", &DATA_OBJECT_KIND);

/// Parallelepiped spanned by three cell vectors at `origin`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SimulationCellObject {
    pub cell_vectors: [Vector3; 3],
    pub origin: Point3,
    pub pbc: [bool; 3],
}

impl SimulationCellObject {
    pub fn new(cell_vectors: [Vector3; 3], origin: Point3) -> Self {
        Self {
            cell_vectors,
            origin,
            pbc: [true; 3],
        }
    }

    pub fn orthogonal(size: Vector3) -> Self {
        Self::new(
            [[size[0], 0.0, 0.0], [0.0, size[1], 0.0], [0.0, 0.0, size[2]]],
            [0.0; 3],
        )
    }

    /// The eight corners; bit `i` of the index selects cell vector `i`.
    pub fn corners(&self) -> [Point3; 8] {
        let mut corners = [self.origin; 8];
        for (index, corner) in corners.iter_mut().enumerate() {
            for axis in 0..3 {
                if index & (1 << axis) != 0 {
                    *corner = add(*corner, self.cell_vectors[axis]);
                }
            }
        }
        corners
    }

    pub fn edges(&self) -> Vec<(Point3, Point3)> {
        let corners = self.corners();
        let mut edges = Vec::with_capacity(12);
        for index in 0..8 {
            for axis in 0..3 {
                let bit = 1 << axis;
                if index & bit == 0 {
                    edges.push((corners[index], corners[index | bit]));
                }
            }
        }
        edges
    }

    pub fn bounding_box(&self) -> Box3 {
        Box3::from_points(&self.corners())
    }

    pub fn to_tri_mesh(&self) -> TriMeshObject {
        // Two triangles per face, wound outwards for a right-handed cell.
        const FACES: [[usize; 3]; 12] = [
            [0, 2, 1],
            [1, 2, 3],
            [4, 5, 6],
            [5, 7, 6],
            [0, 1, 4],
            [1, 5, 4],
            [2, 6, 3],
            [3, 6, 7],
            [0, 4, 2],
            [2, 4, 6],
            [1, 3, 5],
            [3, 7, 5],
        ];
        TriMeshObject::new(self.corners().to_vec(), FACES.to_vec())
    }
}

impl DataObject for SimulationCellObject {
    fn kind(&self) -> &'static ObjectKind {
        &SIMULATION_CELL_KIND
    }

    fn title(&self) -> String {
        "Simulation cell".to_string()
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
        kind: &SIMULATION_CELL_KIND,
        create: || Box::new(SimulationCellObject::orthogonal([1.0; 3])),
        load: |stream: &mut ObjectLoadStream, _: &ClassRegistry| {
            let cell: SimulationCellObject = stream.read_value()?;
            Ok(Box::new(cell) as Box<dyn DataObject>)
        },
    }
}
