use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use log::{debug, error, info, warn};
use lru::LruCache;

use crate::animation::{TIME_NEGATIVE_INFINITY, TIME_POSITIVE_INFINITY, TimeInterval, TimePoint};
use crate::error::LibraryError;
use crate::pipeline::{PipelineFlowState, PipelineStatus};
use crate::reference::{ObjectId, ReferenceEventType};
use crate::rendering::DisplayHandle;
use crate::scene::DataSet;
use crate::task::{CancellationToken, TaskId, TaskOutcome};

use super::compound::{COMPOUND_KIND, children_state};
use super::{DataObject, ObjectKind};

pub static FRAME_SOURCE_KIND: ObjectKind = ObjectKind::derived("FrameSource", &COMPOUND_KIND);

const DEFAULT_FRAME_CACHE_CAPACITY: usize = 8;

/// Content of one animation frame produced by a [`FrameLoader`].
pub struct LoadedFrame {
    pub objects: Vec<Box<dyn DataObject + Send>>,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Produces frames on a worker thread.
pub trait FrameLoader: Send + Sync {
    fn frame_count(&self) -> usize;

    /// Loads one frame. Long loads should poll `cancel` and give up once it is set.
    fn load_frame(&self, frame: usize, cancel: &CancellationToken) -> Result<LoadedFrame, LibraryError>;
}

struct CachedFrame {
    objects: Vec<Box<dyn DataObject>>,
    attributes: BTreeMap<String, serde_json::Value>,
}

/// Data object whose children are the objects of the current animation frame, loaded in the
/// background.
///
/// While a frame is loading the previous frame's objects stay in place and evaluation reports a
/// pending status.
pub struct FrameSourceObject {
    loader: Arc<dyn FrameLoader>,
    loaded_frame: Option<usize>,
    pending: Option<(usize, TaskId)>,
    failed_frame: Option<usize>,
    status: PipelineStatus,
    attributes: BTreeMap<String, serde_json::Value>,
    frame_cache: LruCache<usize, CachedFrame>,
    display_templates: Vec<(&'static ObjectKind, DisplayHandle)>,
}

impl FrameSourceObject {
    pub fn new(loader: Arc<dyn FrameLoader>) -> Self {
        Self::with_cache_capacity(loader, DEFAULT_FRAME_CACHE_CAPACITY)
    }

    pub fn with_cache_capacity(loader: Arc<dyn FrameLoader>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            loader,
            loaded_frame: None,
            pending: None,
            failed_frame: None,
            status: PipelineStatus::success(),
            attributes: BTreeMap::new(),
            frame_cache: LruCache::new(capacity),
            display_templates: Vec::new(),
        }
    }

    /// Objects of `kind` get `display` attached whenever a frame is installed.
    pub fn add_display_template(&mut self, kind: &'static ObjectKind, display: DisplayHandle) {
        self.display_templates.push((kind, display));
    }

    pub fn frame_count(&self) -> usize {
        self.loader.frame_count()
    }

    pub fn loaded_frame(&self) -> Option<usize> {
        self.loaded_frame
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// Allows a frame whose load failed to be requested again.
    pub fn retry_failed_frame(&mut self) {
        self.failed_frame = None;
    }

    fn frame_at(&self, dataset: &DataSet, time: TimePoint) -> usize {
        let last = self.frame_count().saturating_sub(1);
        let frame = dataset.animation().time_to_frame(time).max(0) as usize;
        frame.min(last)
    }

    /// Ticks over which `frame` is shown. The first and last frame extend to infinity.
    fn frame_validity(&self, dataset: &DataSet, frame: usize) -> TimeInterval {
        let count = self.frame_count();
        if count <= 1 {
            return TimeInterval::infinite();
        }
        let interval = dataset.animation().frame_interval(frame as i32);
        let start = if frame == 0 { TIME_NEGATIVE_INFINITY } else { interval.start() };
        let end = if frame + 1 == count { TIME_POSITIVE_INFINITY } else { interval.end() };
        TimeInterval::new(start, end)
    }

    fn set_status(&mut self, this: ObjectId, dataset: &mut DataSet, status: PipelineStatus) {
        if self.status != status {
            self.status = status;
            dataset.notify_dependents(this, ReferenceEventType::StatusChanged);
        }
    }

    fn schedule_load(&mut self, this: ObjectId, dataset: &mut DataSet, frame: usize) {
        if let Some((old_frame, task)) = self.pending.take() {
            debug!("Frame {} superseded by frame {}", old_frame, frame);
            dataset.tasks().cancel(task);
        }
        let loader = Arc::clone(&self.loader);
        let spawned = dataset.tasks_mut().spawn(this, format!("Loading frame {}", frame), move |cancel| {
            let loaded = loader.load_frame(frame, cancel)?;
            Ok(Box::new((frame, loaded)) as Box<dyn Any + Send>)
        });
        match spawned {
            Ok(task) => {
                self.pending = Some((frame, task));
                self.set_status(this, dataset, PipelineStatus::pending(format!("Loading frame {}", frame)));
            }
            Err(e) => {
                self.set_status(this, dataset, PipelineStatus::error(format!("Cannot load frame {}: {}", frame, e)));
            }
        }
    }

    fn install_frame(
        &mut self,
        this: ObjectId,
        dataset: &mut DataSet,
        frame: usize,
        objects: Vec<Box<dyn DataObject>>,
        attributes: BTreeMap<String, serde_json::Value>,
    ) {
        let save = dataset.save_with_scene(this).unwrap_or(true);
        let ids: Vec<ObjectId> = objects.into_iter().map(|o| dataset.insert_boxed(o)).collect();
        for id in &ids {
            let Some(kind) = dataset.kind_of(*id) else { continue };
            if let Err(e) = dataset.set_save_with_scene(*id, save) {
                warn!("Could not set persistence flag of {}: {}", id, e);
            }
            for (template_kind, display) in &self.display_templates {
                if kind.is_derived_from(template_kind) {
                    if let Err(e) = dataset.add_display_object(*id, display) {
                        warn!("Display for {} objects not attached: {}", template_kind, e);
                    }
                }
            }
        }

        self.loaded_frame = Some(frame);
        self.attributes = attributes;
        self.attributes
            .insert("SourceFrame".to_string(), serde_json::Value::from(frame));
        if let Err(e) = dataset.set_references(this, ids.clone()) {
            error!("Failed to install frame {}: {}", frame, e);
        }
        for id in ids {
            dataset.release(id);
        }
        info!("Installed frame {} ({} objects)", frame, dataset.references(this).len());
    }

    fn install_cached(&mut self, this: ObjectId, dataset: &mut DataSet, frame: usize) -> bool {
        let Some(cached) = self.frame_cache.get(&frame) else {
            return false;
        };
        let objects = cached.objects.iter().map(|o| o.clone_object()).collect();
        let attributes = cached.attributes.clone();
        debug!("Frame {} served from cache", frame);
        self.install_frame(this, dataset, frame, objects, attributes);
        true
    }
}

impl fmt::Debug for FrameSourceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSourceObject")
            .field("frames", &self.frame_count())
            .field("loaded_frame", &self.loaded_frame)
            .field("pending", &self.pending)
            .field("status", &self.status)
            .finish()
    }
}

impl DataObject for FrameSourceObject {
    fn kind(&self) -> &'static ObjectKind {
        &FRAME_SOURCE_KIND
    }

    fn title(&self) -> String {
        format!("Frame source ({} frames)", self.frame_count())
    }

    fn clone_object(&self) -> Box<dyn DataObject> {
        let mut copy = FrameSourceObject::with_cache_capacity(Arc::clone(&self.loader), self.frame_cache.cap().get());
        copy.display_templates = self.display_templates.clone();
        Box::new(copy)
    }

    fn object_validity(&self, _this: ObjectId, dataset: &DataSet, time: TimePoint) -> TimeInterval {
        if self.frame_count() == 0 {
            return TimeInterval::infinite();
        }
        let frame = self.frame_at(dataset, time);
        if self.loaded_frame == Some(frame) {
            self.frame_validity(dataset, frame)
        } else {
            TimeInterval::instant(time)
        }
    }

    fn evaluate(&mut self, this: ObjectId, dataset: &mut DataSet, time: TimePoint) -> PipelineFlowState {
        if self.frame_count() == 0 {
            self.set_status(this, dataset, PipelineStatus::error("The source contains no frames"));
            let mut state = PipelineFlowState::with_validity(TimeInterval::infinite());
            state.set_status(self.status.clone());
            return state;
        }

        let frame = self.frame_at(dataset, time);
        if self.loaded_frame != Some(frame) {
            let loading_this_frame = matches!(self.pending, Some((f, _)) if f == frame);
            let failed = self.failed_frame == Some(frame);
            if !loading_this_frame && !failed && !self.install_cached(this, dataset, frame) {
                self.schedule_load(this, dataset, frame);
            }
        }

        if self.loaded_frame == Some(frame) {
            let validity = self.frame_validity(dataset, frame);
            let mut state = children_state(dataset, this, validity, &self.attributes);
            state.set_status(self.status.clone());
            state
        } else {
            // Keep showing the previous frame until the requested one arrives.
            let mut state = children_state(dataset, this, TimeInterval::instant(time), &self.attributes);
            state.set_status(self.status.clone());
            state
        }
    }

    fn status(&self) -> PipelineStatus {
        self.status.clone()
    }

    fn task_finished(&mut self, this: ObjectId, dataset: &mut DataSet, task: TaskId, outcome: TaskOutcome) {
        let Some((frame, pending_task)) = self.pending else {
            return;
        };
        if pending_task != task {
            return;
        }
        self.pending = None;

        let status = match outcome {
            TaskOutcome::Finished(value) => match value.downcast::<(usize, LoadedFrame)>() {
                Ok(result) => {
                    let (frame, loaded) = *result;
                    let objects: Vec<Box<dyn DataObject>> =
                        loaded.objects.into_iter().map(|o| o as Box<dyn DataObject>).collect();
                    self.frame_cache.put(
                        frame,
                        CachedFrame {
                            objects: objects.iter().map(|o| o.clone_object()).collect(),
                            attributes: loaded.attributes.clone(),
                        },
                    );
                    self.failed_frame = None;
                    self.install_frame(this, dataset, frame, objects, loaded.attributes);
                    PipelineStatus::success()
                }
                Err(_) => PipelineStatus::error("Frame loader returned an unexpected result"),
            },
            TaskOutcome::Failed(e) => {
                warn!("Loading frame {} failed: {}", frame, e);
                self.failed_frame = Some(frame);
                PipelineStatus::error(format!("Failed to load frame {}: {}", frame, e))
            }
            TaskOutcome::Canceled => PipelineStatus::warning(format!("Loading of frame {} was canceled", frame)),
        };
        self.set_status(this, dataset, status);
        dataset.notify_dependents(this, ReferenceEventType::PendingStateChanged);
    }

    fn dispose(&mut self, dataset: &mut DataSet) {
        if let Some((_, task)) = self.pending.take() {
            dataset.tasks_mut().forget(task);
        }
    }
}
