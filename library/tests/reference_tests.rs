use std::cell::{Cell, RefCell};
use std::rc::Rc;

use scene_pipeline::animation::{Controller, TimeInterval, TimePoint};
use scene_pipeline::object::{
    CompoundObject, DATA_OBJECT_KIND, DataObject, ObjectKind, ParticlePropertyObject, ParticlePropertyType,
    SimulationCellObject, TriMeshObject,
};
use scene_pipeline::object::cell::SIMULATION_CELL_KIND;
use scene_pipeline::object::mesh::{MESH_KIND, TRI_MESH_KIND};
use scene_pipeline::pipeline::{PipelineFlowState, PipelineObject, ScalePropertyModifier};
use scene_pipeline::reference::{EventResponse, ObjectId, ReferenceEvent, ReferenceEventType};
use scene_pipeline::{DataSet, LibraryError, NodeEvent};

static RECORDER_KIND: ObjectKind = ObjectKind::derived("Recorder", &DATA_OBJECT_KIND);

type EventLog = Rc<RefCell<Vec<(ObjectId, ReferenceEventType)>>>;

/// Remembers every event it receives.
struct Recorder {
    log: EventLog,
    absorb: bool,
}

impl DataObject for Recorder {
    fn kind(&self) -> &'static ObjectKind {
        &RECORDER_KIND
    }

    fn clone_object(&self) -> Box<dyn DataObject> {
        Box::new(Recorder {
            log: self.log.clone(),
            absorb: self.absorb,
        })
    }

    fn reference_event(
        &mut self,
        this: ObjectId,
        _dataset: &mut DataSet,
        _source: ObjectId,
        event: &ReferenceEvent,
    ) -> EventResponse {
        self.log.borrow_mut().push((this, event.kind()));
        if self.absorb {
            EventResponse::Absorb
        } else {
            EventResponse::default_for(event)
        }
    }
}

fn recorder(dataset: &mut DataSet, log: &EventLog) -> ObjectId {
    dataset.insert(Recorder {
        log: log.clone(),
        absorb: false,
    })
}

fn positions(dataset: &mut DataSet) -> ObjectId {
    dataset.insert(ParticlePropertyObject::from_points(
        ParticlePropertyType::Position,
        &[[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]],
    ))
}

fn received(log: &EventLog, receiver: ObjectId, kind: ReferenceEventType) -> usize {
    log.borrow().iter().filter(|(r, k)| *r == receiver && *k == kind).count()
}

#[test]
fn new_objects_start_at_revision_zero_and_count_changes() {
    let mut dataset = DataSet::new();
    let particles = positions(&mut dataset);
    assert_eq!(dataset.revision_number(particles), Some(0));
    assert_eq!(dataset.save_with_scene(particles), Some(true));

    dataset
        .modify::<ParticlePropertyObject, _>(particles, |p| p.data_mut()[0] = 5.0)
        .expect("modify positions");
    assert_eq!(dataset.revision_number(particles), Some(1));

    dataset.notify_dependents(particles, ReferenceEventType::TargetChanged);
    assert_eq!(dataset.revision_number(particles), Some(2));

    // Events that do not change content leave the counter alone.
    dataset.notify_dependents(particles, ReferenceEventType::StatusChanged);
    assert_eq!(dataset.revision_number(particles), Some(2));
}

#[test]
fn modify_with_wrong_type_is_rejected_without_side_effects() {
    let mut dataset = DataSet::new();
    let particles = positions(&mut dataset);
    let result = dataset.modify::<TriMeshObject, _>(particles, |_| ());
    assert!(matches!(result, Err(LibraryError::TypeMismatch { found: "ParticleProperty", .. })));
    assert_eq!(dataset.revision_number(particles), Some(0));
    assert!(dataset.get::<ParticlePropertyObject>(particles).is_some());
}

#[test]
fn change_reaches_every_dependent_exactly_once() {
    // particles <- left, right <- top (diamond)
    let log: EventLog = Rc::default();
    let mut dataset = DataSet::new();
    let particles = positions(&mut dataset);
    let left = recorder(&mut dataset, &log);
    let right = recorder(&mut dataset, &log);
    let top = recorder(&mut dataset, &log);
    dataset.add_reference(left, particles).unwrap();
    dataset.add_reference(right, particles).unwrap();
    dataset.add_reference(top, left).unwrap();
    dataset.add_reference(top, right).unwrap();
    log.borrow_mut().clear();

    dataset.notify_dependents(particles, ReferenceEventType::TargetChanged);

    assert_eq!(received(&log, left, ReferenceEventType::TargetChanged), 1);
    assert_eq!(received(&log, right, ReferenceEventType::TargetChanged), 1);
    assert_eq!(received(&log, top, ReferenceEventType::TargetChanged), 1);
}

#[test]
fn forwarding_bumps_revisions_along_the_way() {
    let log: EventLog = Rc::default();
    let mut dataset = DataSet::new();
    let particles = positions(&mut dataset);
    let parent = recorder(&mut dataset, &log);
    dataset.add_reference(parent, particles).unwrap();
    let parent_revision = dataset.revision_number(parent).unwrap();

    dataset
        .modify::<ParticlePropertyObject, _>(particles, |p| p.data_mut()[1] = 2.0)
        .unwrap();
    assert_eq!(dataset.revision_number(parent), Some(parent_revision + 1));
}

#[test]
fn absorbed_events_stop_travelling() {
    let log: EventLog = Rc::default();
    let mut dataset = DataSet::new();
    let particles = positions(&mut dataset);
    let wall = dataset.insert(Recorder {
        log: log.clone(),
        absorb: true,
    });
    let behind = recorder(&mut dataset, &log);
    dataset.add_reference(wall, particles).unwrap();
    dataset.add_reference(behind, wall).unwrap();
    let wall_revision = dataset.revision_number(wall).unwrap();
    log.borrow_mut().clear();

    dataset.notify_dependents(particles, ReferenceEventType::TargetChanged);

    assert_eq!(received(&log, wall, ReferenceEventType::TargetChanged), 1);
    assert_eq!(received(&log, behind, ReferenceEventType::TargetChanged), 0);
    assert_eq!(dataset.revision_number(wall), Some(wall_revision));
}

#[test]
fn status_changes_are_not_forwarded_by_default() {
    let log: EventLog = Rc::default();
    let mut dataset = DataSet::new();
    let particles = positions(&mut dataset);
    let parent = recorder(&mut dataset, &log);
    let grandparent = recorder(&mut dataset, &log);
    dataset.add_reference(parent, particles).unwrap();
    dataset.add_reference(grandparent, parent).unwrap();
    log.borrow_mut().clear();

    dataset.notify_dependents(particles, ReferenceEventType::StatusChanged);
    assert_eq!(received(&log, parent, ReferenceEventType::StatusChanged), 1);
    assert_eq!(received(&log, grandparent, ReferenceEventType::StatusChanged), 0);
}

#[test]
fn toggling_persistence_flag_counts_as_content_change() {
    let log: EventLog = Rc::default();
    let mut dataset = DataSet::new();
    let cell = dataset.insert(SimulationCellObject::orthogonal([2.0, 2.0, 2.0]));
    let watcher = recorder(&mut dataset, &log);
    dataset.add_reference(watcher, cell).unwrap();
    log.borrow_mut().clear();

    let mesh = dataset.convert_to(cell, &TRI_MESH_KIND, 0).expect("cell converts to mesh");

    dataset.set_save_with_scene(cell, false).unwrap();
    assert_eq!(dataset.save_with_scene(cell), Some(false));
    assert_eq!(dataset.revision_number(cell), Some(1));
    assert_eq!(received(&log, watcher, ReferenceEventType::TargetChanged), 1);
    // Conversions of the old content are gone.
    assert!(!dataset.contains(mesh));

    // Setting the same value again is not a change.
    dataset.set_save_with_scene(cell, false).unwrap();
    assert_eq!(dataset.revision_number(cell), Some(1));
    assert_eq!(received(&log, watcher, ReferenceEventType::TargetChanged), 1);
}

#[test]
fn compound_passes_persistence_flag_to_children() {
    let log: EventLog = Rc::default();
    let mut dataset = DataSet::new();
    let compound = dataset.insert(CompoundObject::new());
    let particles = positions(&mut dataset);
    let cell = dataset.insert(SimulationCellObject::orthogonal([1.0; 3]));
    CompoundObject::add_data_object(&mut dataset, compound, particles).unwrap();
    CompoundObject::add_data_object(&mut dataset, compound, cell).unwrap();
    let watcher = recorder(&mut dataset, &log);
    dataset.add_reference(watcher, compound).unwrap();
    let revision = dataset.revision_number(compound).unwrap();
    log.borrow_mut().clear();

    dataset.set_save_with_scene(compound, false).unwrap();

    assert_eq!(dataset.save_with_scene(particles), Some(false));
    assert_eq!(dataset.save_with_scene(cell), Some(false));
    // One toggle, one change wave at the compound.
    assert_eq!(received(&log, watcher, ReferenceEventType::TargetChanged), 1);
    assert_eq!(dataset.revision_number(compound), Some(revision + 1));
}

#[test]
fn nested_compounds_toggle_with_a_single_event() {
    let log: EventLog = Rc::default();
    let mut dataset = DataSet::new();
    let outer = dataset.insert(CompoundObject::new());
    let inner = dataset.insert(CompoundObject::new());
    let particles = positions(&mut dataset);
    CompoundObject::add_data_object(&mut dataset, inner, particles).unwrap();
    CompoundObject::add_data_object(&mut dataset, outer, inner).unwrap();
    let watcher = recorder(&mut dataset, &log);
    dataset.add_reference(watcher, outer).unwrap();
    log.borrow_mut().clear();

    dataset.set_save_with_scene(outer, false).unwrap();
    assert_eq!(dataset.save_with_scene(particles), Some(false));
    assert_eq!(received(&log, watcher, ReferenceEventType::TargetChanged), 1);
}

#[test]
fn remove_inactive_objects_drops_the_rest_at_once() {
    let log: EventLog = Rc::default();
    let mut dataset = DataSet::new();
    let compound = dataset.insert(CompoundObject::new());
    let keep = positions(&mut dataset);
    let stale = positions(&mut dataset);
    let cell = dataset.insert(SimulationCellObject::orthogonal([1.0; 3]));
    dataset.set_references(compound, vec![keep, stale, cell]).unwrap();
    for child in [keep, stale, cell] {
        dataset.release(child);
    }
    let watcher = recorder(&mut dataset, &log);
    dataset.add_reference(watcher, compound).unwrap();
    log.borrow_mut().clear();

    CompoundObject::remove_inactive_objects(&mut dataset, compound, &[cell, keep]).unwrap();
    assert_eq!(dataset.references(compound), &[keep, cell]);
    assert!(!dataset.contains(stale));
    assert_eq!(received(&log, watcher, ReferenceEventType::TargetChanged), 1);

    // Nothing inactive, nothing happens.
    CompoundObject::remove_inactive_objects(&mut dataset, compound, &[keep, cell]).unwrap();
    assert_eq!(received(&log, watcher, ReferenceEventType::TargetChanged), 1);
}

#[test]
fn find_data_object_matches_specializations() {
    let mut dataset = DataSet::new();
    let compound = dataset.insert(CompoundObject::new());
    let particles = positions(&mut dataset);
    let mesh = dataset.insert(TriMeshObject::default());
    dataset.set_references(compound, vec![particles, mesh]).unwrap();

    assert_eq!(CompoundObject::find_data_object(&dataset, compound, &TRI_MESH_KIND), Some(mesh));
    assert_eq!(CompoundObject::find_data_object(&dataset, compound, &MESH_KIND), Some(mesh));
    assert_eq!(
        CompoundObject::find_data_object(&dataset, compound, &DATA_OBJECT_KIND),
        Some(particles)
    );
    assert_eq!(
        CompoundObject::find_data_object(&dataset, compound, &SIMULATION_CELL_KIND),
        None
    );
}

static TOUCHER_KIND: ObjectKind = ObjectKind::derived("Toucher", &DATA_OBJECT_KIND);

/// Changes its first child while it is being evaluated.
struct Toucher {
    log: EventLog,
    seen_while_busy: Rc<Cell<usize>>,
}

impl DataObject for Toucher {
    fn kind(&self) -> &'static ObjectKind {
        &TOUCHER_KIND
    }

    fn clone_object(&self) -> Box<dyn DataObject> {
        Box::new(Toucher {
            log: self.log.clone(),
            seen_while_busy: self.seen_while_busy.clone(),
        })
    }

    fn evaluate(&mut self, this: ObjectId, dataset: &mut DataSet, time: TimePoint) -> PipelineFlowState {
        if let Some(child) = dataset.references(this).first().copied() {
            dataset.notify_dependents(child, ReferenceEventType::TargetChanged);
        }
        self.seen_while_busy.set(self.log.borrow().len());
        PipelineFlowState::with_validity(TimeInterval::instant(time))
    }

    fn reference_event(
        &mut self,
        this: ObjectId,
        _dataset: &mut DataSet,
        _source: ObjectId,
        event: &ReferenceEvent,
    ) -> EventResponse {
        self.log.borrow_mut().push((this, event.kind()));
        EventResponse::default_for(event)
    }
}

#[test]
fn events_for_a_busy_object_arrive_after_its_hook_returns() {
    let log: EventLog = Rc::default();
    let seen_while_busy = Rc::new(Cell::new(usize::MAX));
    let mut dataset = DataSet::new();
    let particles = positions(&mut dataset);
    let toucher = dataset.insert(Toucher {
        log: log.clone(),
        seen_while_busy: seen_while_busy.clone(),
    });
    let watcher = recorder(&mut dataset, &log);
    dataset.add_reference(toucher, particles).unwrap();
    dataset.add_reference(watcher, toucher).unwrap();
    let revision = dataset.revision_number(toucher).unwrap();
    log.borrow_mut().clear();

    dataset.evaluate(toucher, 0);

    assert_eq!(seen_while_busy.get(), 0);
    assert_eq!(received(&log, toucher, ReferenceEventType::TargetChanged), 1);
    // The queued event is forwarded like any other once the object is back.
    assert_eq!(received(&log, watcher, ReferenceEventType::TargetChanged), 1);
    assert_eq!(dataset.revision_number(toucher), Some(revision + 1));
}

#[test]
fn cycles_are_rejected() {
    let log: EventLog = Rc::default();
    let mut dataset = DataSet::new();
    let a = recorder(&mut dataset, &log);
    let b = recorder(&mut dataset, &log);
    let c = recorder(&mut dataset, &log);
    dataset.add_reference(a, b).unwrap();
    dataset.add_reference(b, c).unwrap();

    assert!(matches!(
        dataset.add_reference(c, a),
        Err(LibraryError::CyclicReference { .. })
    ));
    assert!(matches!(
        dataset.add_reference(a, a),
        Err(LibraryError::CyclicReference { .. })
    ));
    assert!(dataset.references(c).is_empty());
}

#[test]
fn adding_the_same_reference_twice_is_a_no_op() {
    let mut dataset = DataSet::new();
    let compound = dataset.insert(CompoundObject::new());
    let particles = positions(&mut dataset);
    assert!(dataset.add_reference(compound, particles).unwrap());
    let revision = dataset.revision_number(compound);
    assert!(!dataset.add_reference(compound, particles).unwrap());
    assert_eq!(dataset.references(compound), &[particles]);
    assert_eq!(dataset.revision_number(compound), revision);
}

#[test]
fn set_references_is_all_or_nothing() {
    let mut dataset = DataSet::new();
    let compound = dataset.insert(CompoundObject::new());
    let first = positions(&mut dataset);
    let second = positions(&mut dataset);
    dataset.set_references(compound, vec![first]).unwrap();

    let gone = positions(&mut dataset);
    dataset.release(gone);
    assert!(!dataset.contains(gone));

    let result = dataset.set_references(compound, vec![second, gone]);
    assert!(matches!(result, Err(LibraryError::UnknownObject(id)) if id == gone));
    assert_eq!(dataset.references(compound), &[first]);

    // Duplicates collapse, order is kept.
    dataset.set_references(compound, vec![second, first, second]).unwrap();
    assert_eq!(dataset.references(compound), &[second, first]);
}

#[test]
fn replace_reference_keeps_position() {
    let mut dataset = DataSet::new();
    let compound = dataset.insert(CompoundObject::new());
    let a = positions(&mut dataset);
    let b = positions(&mut dataset);
    let c = positions(&mut dataset);
    dataset.set_references(compound, vec![a, b]).unwrap();

    assert!(dataset.replace_reference(compound, a, c).unwrap());
    assert_eq!(dataset.references(compound), &[c, b]);
    assert!(dataset.contains(a));

    let d = positions(&mut dataset);
    assert!(!dataset.replace_reference(compound, a, d).unwrap());
    assert!(matches!(
        dataset.replace_reference(compound, c, b),
        Err(LibraryError::InvalidOperation(_))
    ));
    assert_eq!(dataset.references(compound), &[c, b]);
}

#[test]
fn children_live_as_long_as_someone_holds_them() {
    let mut dataset = DataSet::new();
    let compound = dataset.insert(CompoundObject::new());
    let particles = positions(&mut dataset);
    CompoundObject::add_data_object(&mut dataset, compound, particles).unwrap();
    dataset.release(particles);
    assert!(dataset.contains(particles));
    assert_eq!(dataset.strong_count(particles), Some(1));

    CompoundObject::remove_data_object(&mut dataset, compound, particles).unwrap();
    assert!(!dataset.contains(particles));
}

#[test]
fn releasing_the_root_destroys_the_tree() {
    let mut dataset = DataSet::new();
    let compound = dataset.insert(CompoundObject::new());
    let particles = positions(&mut dataset);
    let cell = dataset.insert(SimulationCellObject::orthogonal([1.0; 3]));
    dataset.set_references(compound, vec![particles, cell]).unwrap();
    dataset.release(particles);
    dataset.release(cell);

    dataset.release(compound);
    assert_eq!(dataset.object_count(), 0);
}

#[test]
fn deleting_an_object_detaches_it_from_owners_and_nodes() {
    let mut dataset = DataSet::new();
    let compound = dataset.insert(CompoundObject::new());
    let particles = positions(&mut dataset);
    CompoundObject::add_data_object(&mut dataset, compound, particles).unwrap();

    let node = dataset.create_node("Particles");
    dataset.set_data_provider(node, Some(particles)).unwrap();
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    dataset.add_node_observer(move |e| sink.borrow_mut().push(*e));

    dataset.delete_object(particles).unwrap();

    assert!(!dataset.contains(particles));
    assert!(dataset.references(compound).is_empty());
    assert!(dataset.node(node).is_none());
    assert!(events.borrow().contains(&NodeEvent::Deleted(node)));
    assert!(matches!(
        dataset.delete_object(particles),
        Err(LibraryError::UnknownObject(_))
    ));
}

#[test]
fn dependent_nodes_are_reported_once() {
    let mut dataset = DataSet::new();
    let particles = positions(&mut dataset);
    let compound = dataset.insert(CompoundObject::new());
    CompoundObject::add_data_object(&mut dataset, compound, particles).unwrap();

    let direct = dataset.create_node("direct");
    let shared_a = dataset.create_node("shared a");
    let shared_b = dataset.create_node("shared b");
    dataset.set_data_provider(direct, Some(particles)).unwrap();
    dataset.set_data_provider(shared_a, Some(compound)).unwrap();
    dataset.set_data_provider(shared_b, Some(compound)).unwrap();

    let nodes = dataset.dependent_nodes(particles);
    assert_eq!(nodes.len(), 3);
    assert!(nodes.contains(&direct) && nodes.contains(&shared_a) && nodes.contains(&shared_b));

    dataset.set_data_provider(direct, None).unwrap();
    assert_eq!(dataset.dependent_nodes(particles).len(), 2);
    assert!(dataset.dependent_nodes(compound).contains(&shared_a));
}

#[test]
fn cloned_objects_share_children_and_bindings() {
    let mut dataset = DataSet::new();
    let compound = dataset.insert(CompoundObject::new());
    let particles = positions(&mut dataset);
    CompoundObject::add_data_object(&mut dataset, compound, particles).unwrap();
    dataset.set_save_with_scene(compound, false).unwrap();

    let copy = dataset.clone_object(compound).unwrap();
    assert_ne!(copy, compound);
    assert_eq!(dataset.references(copy), &[particles]);
    assert_eq!(dataset.save_with_scene(copy), Some(false));
    assert_eq!(dataset.revision_number(copy), Some(0));
    assert_eq!(dataset.strong_count(particles), Some(3));
}

#[test]
fn pipelines_announce_title_and_enabled_state() {
    let log: EventLog = Rc::default();
    let mut dataset = DataSet::new();
    let pipeline = dataset.insert(PipelineObject::new());
    let watcher = recorder(&mut dataset, &log);
    dataset.add_reference(watcher, pipeline).unwrap();
    log.borrow_mut().clear();

    dataset
        .modify::<PipelineObject, _>(pipeline, |p| {
            p.push_modifier(Box::new(ScalePropertyModifier::new(
                ParticlePropertyType::Radius,
                Controller::constant(2.0),
            )))
        })
        .unwrap();
    assert_eq!(received(&log, watcher, ReferenceEventType::TitleChanged), 1);
    assert_eq!(received(&log, watcher, ReferenceEventType::TargetChanged), 1);

    PipelineObject::set_modifier_enabled(&mut dataset, pipeline, 0, false).unwrap();
    assert_eq!(received(&log, watcher, ReferenceEventType::TargetEnabledOrDisabled), 1);
    assert_eq!(received(&log, watcher, ReferenceEventType::TargetChanged), 2);
    assert_eq!(received(&log, watcher, ReferenceEventType::TitleChanged), 1);
}
