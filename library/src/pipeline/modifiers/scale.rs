use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::animation::{Controller, TimeInterval, TimePoint};
use crate::error::LibraryError;
use crate::io::{ModifierClass, ObjectLoadStream, ObjectSaveStream};
use crate::object::{ParticlePropertyObject, ParticlePropertyType};
use crate::pipeline::{Modifier, ModifierContext, PipelineFlowState, PipelineStatus};

const TYPE_NAME: &str = "ScaleProperty";

/// Multiplies every value of one particle property by an animated factor.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScalePropertyModifier {
    pub property: ParticlePropertyType,
    pub factor: Controller,
}

impl ScalePropertyModifier {
    pub fn new(property: ParticlePropertyType, factor: Controller) -> Self {
        Self { property, factor }
    }
}

impl Modifier for ScalePropertyModifier {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn title(&self) -> String {
        format!("Scale {}", self.property.name())
    }

    fn modifier_validity(&self, time: TimePoint) -> TimeInterval {
        self.factor.validity_at(time)
    }

    fn modify(&self, state: &mut PipelineFlowState, ctx: &mut ModifierContext<'_>) -> PipelineStatus {
        let Some(property) = ctx.find_property(state, &self.property) else {
            return PipelineStatus::error(format!(
                "The input contains no '{}' property",
                self.property.name()
            ));
        };
        let factor = self.factor.value_at(ctx.time());
        let scaled = ctx.modify::<ParticlePropertyObject, _>(state, property, |p| {
            p.data_mut().par_iter_mut().for_each(|v| *v *= factor);
        });
        match scaled {
            Ok(_) => PipelineStatus::success(),
            Err(e) => PipelineStatus::error(format!("Cannot scale '{}': {}", self.property.name(), e)),
        }
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
            let modifier: ScalePropertyModifier = stream.read_value()?;
            Ok(Box::new(modifier) as Box<dyn Modifier>)
        },
    }
}
