use serde::{Deserialize, Serialize};

use crate::error::LibraryError;
use crate::geometry::{Box3, Point3};
use crate::io::{ClassRegistry, ObjectClass, ObjectLoadStream, ObjectSaveStream};
use crate::reference::ObjectId;
use crate::scene::DataSet;

use super::{DATA_OBJECT_KIND, DataObject, ObjectKind};

pub static MESH_KIND: ObjectKind = ObjectKind::derived("Mesh", &DATA_OBJECT_KIND);
pub static TRI_MESH_KIND: ObjectKind = ObjectKind::derived("TriMesh", &MESH_KIND);

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TriMeshObject {
    pub vertices: Vec<Point3>,
    pub faces: Vec<[usize; 3]>,
}

impl TriMeshObject {
    pub fn new(vertices: Vec<Point3>, faces: Vec<[usize; 3]>) -> Self {
        Self { vertices, faces }
    }

    pub fn bounding_box(&self) -> Box3 {
        Box3::from_points(&self.vertices)
    }

    fn check_faces(&self) -> Result<(), LibraryError> {
        let n = self.vertices.len();
        match self.faces.iter().find(|f| f.iter().any(|v| *v >= n)) {
            Some(face) => Err(LibraryError::malformed(format!(
                "face {:?} refers to a missing vertex ({} vertices)",
                face, n
            ))),
            None => Ok(()),
        }
    }
}

impl DataObject for TriMeshObject {
    fn kind(&self) -> &'static ObjectKind {
        &TRI_MESH_KIND
    }

    fn title(&self) -> String {
        format!("Triangle mesh ({} faces)", self.faces.len())
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
        kind: &TRI_MESH_KIND,
        create: || Box::new(TriMeshObject::default()),
        load: |stream: &mut ObjectLoadStream, _: &ClassRegistry| {
            let mesh: TriMeshObject = stream.read_value()?;
            mesh.check_faces()?;
            Ok(Box::new(mesh) as Box<dyn DataObject>)
        },
    }
}
