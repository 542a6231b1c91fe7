use log::debug;

use crate::animation::{TimeInterval, TimePoint};
use crate::error::LibraryError;
use crate::io::{ClassRegistry, MODIFIER_CHUNK, ObjectClass, ObjectLoadStream, ObjectSaveStream};
use crate::object::{DATA_OBJECT_KIND, DataObject, ObjectKind};
use crate::reference::{EventResponse, ObjectId, ReferenceEvent, ReferenceEventType};
use crate::scene::DataSet;
use crate::util::timing::ScopedTimer;

use super::flow_state::PipelineFlowState;
use super::modifier::{Modifier, ModifierApplication, ModifierContext};
use super::status::PipelineStatus;

pub static PIPELINE_KIND: ObjectKind = ObjectKind::derived("Pipeline", &DATA_OBJECT_KIND);

struct PipelineCache {
    state: PipelineFlowState,
    source_revision: Option<u64>,
}

/// Applies a list of modifiers to the output of a source object.
///
/// The source is the first child reference of the pipeline. The output is cached for the
/// validity interval it reported and thrown away as soon as the source or the modifier list
/// changes. The cached state holds a strong reference to every object it lists.
#[derive(Default)]
pub struct PipelineObject {
    applications: Vec<ModifierApplication>,
    cache: Option<PipelineCache>,
    status: PipelineStatus,
}

impl PipelineObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(dataset: &DataSet, this: ObjectId) -> Option<ObjectId> {
        dataset.references(this).first().copied()
    }

    pub fn set_source(
        dataset: &mut DataSet,
        this: ObjectId,
        source: Option<ObjectId>,
    ) -> Result<(), LibraryError> {
        dataset.set_references(this, source.into_iter().collect())
    }

    pub fn modifiers(&self) -> &[ModifierApplication] {
        &self.applications
    }

    /// Mutable access to one application. Use through [`DataSet::modify`] so the pipeline output
    /// is recomputed.
    pub fn application_mut(&mut self, index: usize) -> Option<&mut ModifierApplication> {
        self.applications.get_mut(index)
    }

    pub fn push_modifier(&mut self, modifier: Box<dyn Modifier>) {
        self.applications.push(ModifierApplication::new(modifier));
    }

    pub fn insert_modifier(&mut self, index: usize, modifier: Box<dyn Modifier>) {
        let index = index.min(self.applications.len());
        self.applications.insert(index, ModifierApplication::new(modifier));
    }

    pub fn remove_modifier(&mut self, index: usize) -> Option<ModifierApplication> {
        (index < self.applications.len()).then(|| self.applications.remove(index))
    }

    /// Switches one modifier on or off. Returns false if it already was in that state.
    ///
    /// Dependents see the usual `TargetChanged` followed by `TargetEnabledOrDisabled`.
    pub fn set_modifier_enabled(
        dataset: &mut DataSet,
        this: ObjectId,
        index: usize,
        enabled: bool,
    ) -> Result<bool, LibraryError> {
        let pipeline = dataset.get::<PipelineObject>(this).ok_or_else(|| {
            if dataset.contains(this) {
                LibraryError::invalid(format!("{} is not an idle pipeline", this))
            } else {
                LibraryError::UnknownObject(this)
            }
        })?;
        let application = pipeline
            .applications
            .get(index)
            .ok_or_else(|| LibraryError::invalid(format!("{} has no modifier {}", this, index)))?;
        if application.is_enabled() == enabled {
            return Ok(false);
        }
        dataset.modify::<PipelineObject, _>(this, |p| {
            if let Some(application) = p.applications.get_mut(index) {
                application.set_enabled(enabled);
            }
        })?;
        dataset.notify_dependents(this, ReferenceEventType::TargetEnabledOrDisabled);
        Ok(true)
    }

    pub fn has_cached_state(&self) -> bool {
        self.cache.is_some()
    }

    fn discard_cache(&mut self, dataset: &mut DataSet) {
        if let Some(cache) = self.cache.take() {
            debug!("Discarding cached pipeline output valid on {}", cache.state.validity());
            dataset.release_state(&cache.state);
        }
    }

    fn modifiers_validity(&self, time: TimePoint) -> TimeInterval {
        let mut validity = TimeInterval::infinite();
        for application in self.applications.iter().filter(|a| a.is_enabled()) {
            validity.intersect(&application.modifier().modifier_validity(time));
        }
        validity
    }

    fn compute(&mut self, this: ObjectId, dataset: &mut DataSet, time: TimePoint) -> PipelineFlowState {
        let _timer = ScopedTimer::debug_lazy(|| format!("Pipeline {} at {}", this, time));

        let Some(source) = Self::source(dataset, this) else {
            let mut state = PipelineFlowState::with_validity(TimeInterval::infinite());
            state.set_status(PipelineStatus::warning("The pipeline has no data source"));
            return state;
        };

        let mut state = dataset.evaluate(source, time);
        let source_revision = dataset.revision_number(source);
        let mut status = state.status().clone();
        let mut transients = Vec::new();

        for application in self.applications.iter_mut().filter(|a| a.is_enabled()) {
            state.intersect_validity(&application.modifier().modifier_validity(time));
            let outcome = {
                let mut ctx = ModifierContext::new(dataset, time, &mut transients);
                application.modifier().modify(&mut state, &mut ctx)
            };
            status = status.merge(outcome.clone());
            application.set_status(outcome);
        }

        state.update_revision_numbers(dataset);
        state.set_status(status);
        if !state.validity().contains(time) {
            state.set_validity(TimeInterval::instant(time));
        }

        // The cache takes over the copies the modifiers made; copies that did not make it into
        // the output are destroyed.
        dataset.retain_state(&state);
        for transient in transients {
            dataset.release(transient);
        }
        self.cache = Some(PipelineCache {
            state: state.clone(),
            source_revision,
        });
        state
    }
}

impl DataObject for PipelineObject {
    fn kind(&self) -> &'static ObjectKind {
        &PIPELINE_KIND
    }

    fn title(&self) -> String {
        format!("Pipeline ({} modifiers)", self.applications.len())
    }

    fn clone_object(&self) -> Box<dyn DataObject> {
        Box::new(PipelineObject {
            applications: self.applications.clone(),
            cache: None,
            status: self.status.clone(),
        })
    }

    fn object_validity(&self, this: ObjectId, dataset: &DataSet, time: TimePoint) -> TimeInterval {
        if let Some(cache) = &self.cache {
            if cache.state.validity().contains(time) {
                return cache.state.validity();
            }
        }
        let mut validity = match Self::source(dataset, this) {
            Some(source) => dataset.object_validity(source, time),
            None => TimeInterval::infinite(),
        };
        validity.intersect(&self.modifiers_validity(time));
        if !validity.contains(time) {
            validity = TimeInterval::instant(time);
        }
        validity
    }

    fn evaluate(&mut self, this: ObjectId, dataset: &mut DataSet, time: TimePoint) -> PipelineFlowState {
        if let Some(cache) = &self.cache {
            // Output objects edited since they were produced are stale even inside the interval.
            if cache.state.validity().contains(time) && cache.state.is_up_to_date(dataset) {
                debug!("Pipeline {} cache hit at {}", this, time);
                return cache.state.clone();
            }
        }
        self.discard_cache(dataset);

        let state = self.compute(this, dataset, time);
        if state.status() != &self.status {
            self.status = state.status().clone();
            dataset.notify_dependents(this, ReferenceEventType::StatusChanged);
        }
        state
    }

    fn status(&self) -> PipelineStatus {
        self.status.clone()
    }

    fn reference_event(
        &mut self,
        _this: ObjectId,
        dataset: &mut DataSet,
        source: ObjectId,
        event: &ReferenceEvent,
    ) -> EventResponse {
        match event.kind() {
            ReferenceEventType::TargetChanged => {
                // A change the cached output was already computed from needs no recompute.
                let current = dataset.revision_number(source);
                if self.cache.as_ref().is_some_and(|c| c.source_revision == current) {
                    return EventResponse::Absorb;
                }
                self.discard_cache(dataset);
                EventResponse::Forward
            }
            ReferenceEventType::PendingStateChanged => {
                self.discard_cache(dataset);
                EventResponse::Forward
            }
            ReferenceEventType::StatusChanged => EventResponse::Forward,
            _ => EventResponse::default_for(event),
        }
    }

    fn content_changed(&mut self, dataset: &mut DataSet) {
        self.discard_cache(dataset);
    }

    fn dispose(&mut self, dataset: &mut DataSet) {
        self.discard_cache(dataset);
    }

    fn save_payload(
        &self,
        _this: ObjectId,
        stream: &mut ObjectSaveStream,
        _dataset: &DataSet,
    ) -> Result<(), LibraryError> {
        stream.write_value(&(self.applications.len() as u32))?;
        for application in &self.applications {
            stream.write_value(application.modifier().type_name())?;
            stream.write_value(&application.is_enabled())?;
            stream.begin_chunk(MODIFIER_CHUNK);
            application.modifier().save(stream)?;
            stream.end_chunk()?;
        }
        Ok(())
    }
}

fn load_pipeline(
    stream: &mut ObjectLoadStream,
    classes: &ClassRegistry,
) -> Result<Box<dyn DataObject>, LibraryError> {
    let count: u32 = stream.read_value()?;
    let mut pipeline = PipelineObject::new();
    for _ in 0..count {
        let type_name: String = stream.read_value()?;
        let enabled: bool = stream.read_value()?;
        stream.expect_chunk(MODIFIER_CHUNK)?;
        let modifier = classes.load_modifier(&type_name, stream)?;
        stream.close_chunk()?;
        pipeline.push_modifier(modifier);
        if let Some(application) = pipeline.applications.last_mut() {
            application.set_enabled(enabled);
        }
    }
    Ok(Box::new(pipeline))
}

pub(crate) fn object_class() -> ObjectClass {
    ObjectClass {
        kind: &PIPELINE_KIND,
        create: || Box::new(PipelineObject::new()),
        load: load_pipeline,
    }
}
