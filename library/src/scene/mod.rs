//! The data set: object arena, reference graph, scene nodes and the waiting helpers.

mod dataset;
mod node;
mod wait;

pub use dataset::DataSet;
pub use node::{NodeEvent, ObjectNode};
