use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use scene_pipeline::animation::{TIME_NEGATIVE_INFINITY, TIME_POSITIVE_INFINITY, TimeInterval};
use scene_pipeline::object::{
    DATA_OBJECT_KIND, DataObject, FrameLoader, FrameSourceObject, LoadedFrame, ObjectKind,
    ParticlePropertyObject, ParticlePropertyType, SimulationCellObject,
};
use scene_pipeline::pipeline::{AffineTransformationModifier, PipelineObject, PipelineStatus, StatusType};
use scene_pipeline::task::{CancellationToken, ProgressHost};
use scene_pipeline::{DataSet, LibraryError, NodeEvent, PipelineConfig};

fn dataset() -> DataSet {
    DataSet::with_config(PipelineConfig {
        wait_poll_interval_ms: 5,
        ..PipelineConfig::default()
    })
}

/// Frame `n` holds `n + 1` particles and a cell.
struct CountingLoader {
    frames: usize,
    loads: Arc<AtomicUsize>,
}

impl CountingLoader {
    fn new(frames: usize) -> (Arc<Self>, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = Arc::new(CountingLoader {
            frames,
            loads: loads.clone(),
        });
        (loader, loads)
    }
}

impl FrameLoader for CountingLoader {
    fn frame_count(&self) -> usize {
        self.frames
    }

    fn load_frame(&self, frame: usize, _cancel: &CancellationToken) -> Result<LoadedFrame, LibraryError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let points: Vec<[f64; 3]> = (0..=frame).map(|i| [i as f64, 0.0, 0.0]).collect();
        Ok(LoadedFrame {
            objects: vec![
                Box::new(ParticlePropertyObject::from_points(ParticlePropertyType::Position, &points)),
                Box::new(SimulationCellObject::orthogonal([10.0; 3])),
            ],
            attributes: BTreeMap::new(),
        })
    }
}

/// Never finishes on its own; gives up once canceled.
struct StuckLoader;

impl FrameLoader for StuckLoader {
    fn frame_count(&self) -> usize {
        1
    }

    fn load_frame(&self, _frame: usize, cancel: &CancellationToken) -> Result<LoadedFrame, LibraryError> {
        while !cancel.is_canceled() {
            thread::sleep(Duration::from_millis(2));
        }
        Err(LibraryError::task("canceled"))
    }
}

struct BrokenLoader;

impl FrameLoader for BrokenLoader {
    fn frame_count(&self) -> usize {
        1
    }

    fn load_frame(&self, _frame: usize, _cancel: &CancellationToken) -> Result<LoadedFrame, LibraryError> {
        Err(LibraryError::malformed("unexpected end of file"))
    }
}

/// Cancels once it has been polled `limit` times.
struct CancelAfter {
    polls: Cell<usize>,
    limit: usize,
    messages: Vec<String>,
}

impl CancelAfter {
    fn new(limit: usize) -> Self {
        Self {
            polls: Cell::new(0),
            limit,
            messages: Vec::new(),
        }
    }
}

impl ProgressHost for CancelAfter {
    fn set_message(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }

    fn is_canceled(&self) -> bool {
        self.polls.set(self.polls.get() + 1);
        self.polls.get() > self.limit
    }
}

static PENDING_KIND: ObjectKind = ObjectKind::derived("AlwaysPending", &DATA_OBJECT_KIND);

struct AlwaysPending;

impl DataObject for AlwaysPending {
    fn kind(&self) -> &'static ObjectKind {
        &PENDING_KIND
    }

    fn clone_object(&self) -> Box<dyn DataObject> {
        Box::new(AlwaysPending)
    }

    fn status(&self) -> PipelineStatus {
        PipelineStatus::pending("waiting for nothing")
    }
}

#[test]
fn first_evaluation_is_pending_until_the_frame_arrives() {
    let mut dataset = dataset();
    let (loader, _) = CountingLoader::new(1);
    let source = dataset.insert(FrameSourceObject::new(loader));

    let state = dataset.evaluate(source, 0);
    assert!(state.status().is_pending());
    assert!(state.is_empty());
    assert_eq!(state.validity(), TimeInterval::instant(0));
    assert!(dataset.get::<FrameSourceObject>(source).unwrap().is_loading());

    assert!(dataset.wait_until_ready(source, 0, "Loading", None));
    let state = dataset.evaluate(source, 0);
    assert_eq!(state.status().kind(), StatusType::Success);
    assert_eq!(state.objects().collect::<Vec<_>>(), dataset.references(source).to_vec());
    assert_eq!(state.entries().len(), 2);
    assert_eq!(state.attributes()["SourceFrame"], serde_json::json!(0));
    assert!(state.validity().is_infinite());
}

#[test]
fn old_frame_stays_visible_while_the_next_one_loads() {
    let mut dataset = dataset();
    let (loader, _) = CountingLoader::new(3);
    let source = dataset.insert(FrameSourceObject::new(loader));
    assert!(dataset.wait_until_ready(source, 0, "Frame 0", None));
    let frame_zero = dataset.references(source).to_vec();

    let time = dataset.animation().frame_to_time(1);
    let state = dataset.evaluate(source, time);
    assert!(state.status().is_pending());
    assert_eq!(state.objects().collect::<Vec<_>>(), frame_zero);

    assert!(dataset.wait_until_ready(source, time, "Frame 1", None));
    let state = dataset.evaluate(source, time);
    let positions = state
        .objects()
        .find_map(|id| dataset.get::<ParticlePropertyObject>(id))
        .unwrap();
    assert_eq!(positions.len(), 2);
    assert_eq!(state.validity(), TimeInterval::new(160, 319));
    for old in frame_zero {
        assert!(!dataset.contains(old));
    }
}

#[test]
fn first_and_last_frames_extend_to_infinity() {
    let mut dataset = dataset();
    let (loader, _) = CountingLoader::new(3);
    let source = dataset.insert(FrameSourceObject::new(loader));

    assert!(dataset.wait_until_ready(source, 0, "Frame 0", None));
    assert_eq!(
        dataset.evaluate(source, 0).validity(),
        TimeInterval::new(TIME_NEGATIVE_INFINITY, 159)
    );
    assert!(dataset.wait_until_ready(source, 400, "Frame 2", None));
    assert_eq!(
        dataset.evaluate(source, 400).validity(),
        TimeInterval::new(320, TIME_POSITIVE_INFINITY)
    );
}

#[test]
fn revisited_frames_come_from_the_frame_cache() {
    let mut dataset = dataset();
    let (loader, loads) = CountingLoader::new(2);
    let source = dataset.insert(FrameSourceObject::new(loader));
    assert!(dataset.wait_until_ready(source, 0, "Frame 0", None));
    assert!(dataset.wait_until_ready(source, 160, "Frame 1", None));
    assert_eq!(loads.load(Ordering::SeqCst), 2);

    let state = dataset.evaluate(source, 0);
    assert!(!state.status().is_pending());
    assert_eq!(dataset.get::<FrameSourceObject>(source).unwrap().loaded_frame(), Some(0));
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[test]
fn cached_frame_installed_mid_evaluation_keeps_the_pipeline_output() {
    let mut dataset = dataset();
    let (loader, loads) = CountingLoader::new(2);
    let source = dataset.insert(FrameSourceObject::new(loader));
    assert!(dataset.wait_until_ready(source, 0, "Frame 0", None));
    assert!(dataset.wait_until_ready(source, 160, "Frame 1", None));

    let pipeline = dataset.insert(PipelineObject::new());
    PipelineObject::set_source(&mut dataset, pipeline, Some(source)).unwrap();
    dataset.release(source);
    dataset
        .modify::<PipelineObject, _>(pipeline, |p| {
            p.push_modifier(Box::new(AffineTransformationModifier::constant([1.0, 0.0, 0.0])))
        })
        .unwrap();
    let node = dataset.create_node("Shifted trajectory");
    dataset.set_data_provider(node, Some(pipeline)).unwrap();
    dataset.release(pipeline);

    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    dataset.add_node_observer(move |e| sink.borrow_mut().push(*e));
    let source_revision = dataset.revision_number(source).unwrap();
    let pipeline_revision = dataset.revision_number(pipeline).unwrap();

    // Frame 0 is swapped in from the frame cache while the pipeline is evaluating its source.
    // The source's change reaches the pipeline only after that evaluation is over.
    let state = dataset.eval_pipeline(node, 0).unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 2);
    assert_eq!(dataset.get::<FrameSourceObject>(source).unwrap().loaded_frame(), Some(0));
    assert!(dataset.revision_number(source).unwrap() > source_revision);

    // The output already reflects that change, so the pipeline keeps it.
    assert_eq!(dataset.revision_number(pipeline), Some(pipeline_revision));
    assert!(dataset.get::<PipelineObject>(pipeline).unwrap().has_cached_state());
    assert!(!events.borrow().contains(&NodeEvent::Invalidated(node)));
    let positions = state
        .objects()
        .find_map(|id| dataset.get::<ParticlePropertyObject>(id))
        .unwrap();
    assert_eq!(positions.data(), &[1.0, 0.0, 0.0]);

    let again = dataset.eval_pipeline(node, 0).unwrap();
    assert_eq!(again.objects().collect::<Vec<_>>(), state.objects().collect::<Vec<_>>());
}

#[test]
fn canceling_a_wait_leaves_the_scene_consistent() {
    let mut dataset = dataset();
    let source = dataset.insert(FrameSourceObject::new(Arc::new(StuckLoader)));
    let revision = dataset.revision_number(source);

    let mut progress = CancelAfter::new(3);
    let ready = dataset.wait_until_ready(source, 0, "Loading stuck frame", Some(&mut progress));
    assert!(!ready);
    assert_eq!(progress.messages, vec!["Loading stuck frame".to_string()]);
    assert_eq!(dataset.revision_number(source), revision);
    assert!(dataset.references(source).is_empty());

    // The worker notices the cancellation and reports back.
    assert_eq!(dataset.process_events(Some(Duration::from_secs(5))), 1);
    let frame_source = dataset.get::<FrameSourceObject>(source).unwrap();
    assert!(!frame_source.is_loading());
    assert_eq!(dataset.status(source).kind(), StatusType::Warning);
    assert!(!dataset.tasks().has_pending());

    // Evaluating again starts a fresh attempt.
    assert!(dataset.evaluate(source, 0).status().is_pending());
}

#[test]
fn interrupt_token_cancels_waits_without_progress_host() {
    let mut dataset = dataset();
    let source = dataset.insert(FrameSourceObject::new(Arc::new(StuckLoader)));
    let token = dataset.interrupt_token();
    let canceler = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        token.cancel();
    });

    assert!(!dataset.wait_until_ready(source, 0, "Loading", None));
    canceler.join().unwrap();
    // The token is reset for the next wait.
    assert!(!dataset.interrupt_token().is_canceled());
}

#[test]
fn failed_load_ends_the_wait_with_an_error() {
    let mut dataset = dataset();
    let source = dataset.insert(FrameSourceObject::new(Arc::new(BrokenLoader)));
    assert!(dataset.wait_until_ready(source, 0, "Loading", None));
    let state = dataset.evaluate(source, 0);
    // The failed frame is not retried on its own.
    assert!(state.status().is_error());
    assert!(!dataset.tasks().has_pending());
    assert!(dataset.references(source).is_empty());

    dataset
        .modify::<FrameSourceObject, _>(source, |s| s.retry_failed_frame())
        .unwrap();
    assert!(dataset.evaluate(source, 0).status().is_pending());
}

#[test]
fn waiting_without_running_work_gives_up() {
    let mut dataset = dataset();
    let stuck = dataset.insert(AlwaysPending);
    assert!(!dataset.wait_until_ready(stuck, 0, "Waiting", None));

    let missing = {
        let id = dataset.insert(AlwaysPending);
        dataset.release(id);
        id
    };
    assert!(!dataset.wait_until_ready(missing, 0, "Waiting", None));
}

#[test]
fn nodes_wait_for_their_pipeline() {
    let mut dataset = dataset();
    let (loader, _) = CountingLoader::new(2);
    let source = dataset.insert(FrameSourceObject::new(loader));
    let node = dataset.create_node("Trajectory");
    dataset.set_data_provider(node, Some(source)).unwrap();
    dataset.release(source);

    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    dataset.add_node_observer(move |e| sink.borrow_mut().push(*e));

    assert!(dataset.wait_until_node_ready(node, 0, "Loading", None));
    let state = dataset.eval_pipeline(node, 0).unwrap();
    assert_eq!(state.entries().len(), 2);
    assert!(events.borrow().contains(&NodeEvent::Invalidated(node)));
    assert!(events.borrow().contains(&NodeEvent::StatusChanged(node)));
}

#[test]
fn deleting_a_loading_source_drops_its_task() {
    let mut dataset = dataset();
    let source = dataset.insert(FrameSourceObject::new(Arc::new(StuckLoader)));
    dataset.evaluate(source, 0);
    assert!(dataset.tasks().has_pending());

    dataset.release(source);
    assert!(!dataset.contains(source));
    assert!(!dataset.tasks().has_pending());
}
