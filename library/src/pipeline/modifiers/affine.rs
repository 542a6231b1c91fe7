use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::animation::{Controller, TimeInterval, TimePoint};
use crate::error::LibraryError;
use crate::geometry::add;
use crate::io::{ModifierClass, ObjectLoadStream, ObjectSaveStream};
use crate::object::cell::SIMULATION_CELL_KIND;
use crate::object::{ParticlePropertyObject, ParticlePropertyType, SimulationCellObject};
use crate::pipeline::{Modifier, ModifierContext, PipelineFlowState, PipelineStatus};

const TYPE_NAME: &str = "AffineTransformation";

/// Moves particles, and optionally the simulation cell, by an animated offset.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AffineTransformationModifier {
    pub translation: [Controller; 3],
    pub transform_cell: bool,
}

impl AffineTransformationModifier {
    pub fn new(translation: [Controller; 3]) -> Self {
        Self {
            translation,
            transform_cell: true,
        }
    }

    pub fn constant(offset: [f64; 3]) -> Self {
        Self::new(offset.map(Controller::constant))
    }

    fn offset_at(&self, time: TimePoint) -> [f64; 3] {
        [0, 1, 2].map(|axis| self.translation[axis].value_at(time))
    }
}

impl Modifier for AffineTransformationModifier {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn title(&self) -> String {
        "Affine transformation".to_string()
    }

    fn modifier_validity(&self, time: TimePoint) -> TimeInterval {
        let mut validity = TimeInterval::infinite();
        for controller in &self.translation {
            validity.intersect(&controller.validity_at(time));
        }
        validity
    }

    fn modify(&self, state: &mut PipelineFlowState, ctx: &mut ModifierContext<'_>) -> PipelineStatus {
        let offset = self.offset_at(ctx.time());

        let Some(positions) = ctx.find_property(state, &ParticlePropertyType::Position) else {
            return PipelineStatus::warning("The input contains no particle positions");
        };
        let moved = ctx.modify::<ParticlePropertyObject, _>(state, positions, |property| {
            property.data_mut().par_chunks_mut(3).for_each(|row| {
                row[0] += offset[0];
                row[1] += offset[1];
                row[2] += offset[2];
            });
            property.len()
        });
        let count = match moved {
            Ok((_, count)) => count,
            Err(e) => return PipelineStatus::error(format!("Cannot transform positions: {}", e)),
        };

        if self.transform_cell {
            if let Some(cell) = state.find_object(&SIMULATION_CELL_KIND, ctx.dataset()) {
                let moved = ctx.modify::<SimulationCellObject, _>(state, cell, |cell| {
                    cell.origin = add(cell.origin, offset);
                });
                if let Err(e) = moved {
                    return PipelineStatus::error(format!("Cannot transform cell: {}", e));
                }
            }
        }

        PipelineStatus::new(
            crate::pipeline::StatusType::Success,
            format!("Translated {} particles", count),
        )
    }

    fn clone_modifier(&self) -> Box<dyn Modifier> {
        Box::new(self.clone())
    }

    fn save(&self, stream: &mut ObjectSaveStream) -> Result<(), LibraryError> {
        stream.write_value(self)
    }
}

pub(crate) fn modifier_class() -> ModifierClass {
    ModifierClass {
        type_name: TYPE_NAME,
        load: |stream: &mut ObjectLoadStream| {
            let modifier: AffineTransformationModifier = stream.read_value()?;
            Ok(Box::new(modifier) as Box<dyn Modifier>)
        },
    }
}
