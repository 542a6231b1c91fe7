pub mod animation;
pub mod cli;
pub mod config;
pub mod conversion;
pub mod error;
pub mod geometry;
pub mod io;
pub mod object;
pub mod pipeline;
pub mod reference;
pub mod rendering;
pub mod scene;
pub mod task;
pub mod util;

pub use cli::run;
pub use config::PipelineConfig;
pub use error::LibraryError;
pub use reference::{NodeId, ObjectId};
pub use scene::{DataSet, NodeEvent, ObjectNode};
