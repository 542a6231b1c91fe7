//! Time-dependent evaluation of data objects.
//!
//! Evaluating an object at a time yields a [`PipelineFlowState`]: the resulting objects, the
//! interval over which they stay valid, and a status. [`PipelineObject`] chains modifiers onto a
//! source object and caches its output for the validity interval it reported.

pub mod flow_state;
pub mod modifier;
pub mod modifiers;
pub mod pipeline_object;
pub mod status;

pub use flow_state::{FlowEntry, PipelineFlowState};
pub use modifier::{Modifier, ModifierApplication, ModifierContext};
pub use modifiers::{AffineTransformationModifier, ScalePropertyModifier};
pub use pipeline_object::PipelineObject;
pub use status::{PipelineStatus, StatusType};
