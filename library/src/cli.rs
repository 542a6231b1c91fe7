//! Command line driver: builds a small animated particle scene, renders every frame into a
//! recording renderer and round-trips a snapshot through the save stream.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::info;

use crate::animation::{Controller, Key};
use crate::config::PipelineConfig;
use crate::error::LibraryError;
use crate::object::cell::SIMULATION_CELL_KIND;
use crate::object::particles::PARTICLE_PROPERTY_KIND;
use crate::object::{
    CompoundObject, DataObject, FrameLoader, FrameSourceObject, LoadedFrame, ParticlePropertyObject,
    ParticlePropertyType, SimulationCellObject,
};
use crate::pipeline::{AffineTransformationModifier, ScalePropertyModifier};
use crate::rendering::{
    DisplayRegistry, ParticleDisplay, RecordingRenderer, SimulationCellDisplay, display_handle,
};
use crate::scene::DataSet;
use crate::task::CancellationToken;

const DEFAULT_FRAMES: usize = 5;

struct Options {
    config: Option<PathBuf>,
    frames: usize,
}

fn parse_args(args: &[String]) -> Result<Options, LibraryError> {
    let mut options = Options {
        config: None,
        frames: DEFAULT_FRAMES,
    };
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| LibraryError::Config("--config needs a file name".into()))?;
                options.config = Some(PathBuf::from(path));
            }
            "--frames" => {
                let value = iter
                    .next()
                    .ok_or_else(|| LibraryError::Config("--frames needs a number".into()))?;
                options.frames = value
                    .parse()
                    .map_err(|_| LibraryError::Config(format!("invalid frame count '{}'", value)))?;
            }
            other => return Err(LibraryError::Config(format!("unknown argument '{}'", other))),
        }
    }
    Ok(options)
}

/// A small lattice of particles that breathes from frame to frame.
struct LatticeLoader {
    frames: usize,
    side: usize,
}

impl FrameLoader for LatticeLoader {
    fn frame_count(&self) -> usize {
        self.frames
    }

    fn load_frame(&self, frame: usize, cancel: &CancellationToken) -> Result<LoadedFrame, LibraryError> {
        let spacing = 1.0 + 0.1 * frame as f64;
        let mut points = Vec::with_capacity(self.side.pow(3));
        for x in 0..self.side {
            if cancel.is_canceled() {
                return Err(LibraryError::task("canceled"));
            }
            for y in 0..self.side {
                for z in 0..self.side {
                    points.push([x as f64 * spacing, y as f64 * spacing, z as f64 * spacing]);
                }
            }
            thread::sleep(Duration::from_millis(2));
        }
        let size = spacing * self.side as f64;
        let radii = vec![0.3; points.len()];
        let objects: Vec<Box<dyn DataObject + Send>> = vec![
            Box::new(ParticlePropertyObject::from_points(ParticlePropertyType::Position, &points)),
            Box::new(ParticlePropertyObject::from_scalars(ParticlePropertyType::Radius, radii)),
            Box::new(SimulationCellObject::orthogonal([size; 3])),
        ];
        let mut attributes = BTreeMap::new();
        attributes.insert("Spacing".to_string(), serde_json::Value::from(spacing));
        Ok(LoadedFrame { objects, attributes })
    }
}

pub fn run(args: Vec<String>) -> Result<(), LibraryError> {
    let options = parse_args(&args)?;
    let config = match &options.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let frame_cache_capacity = config.frame_cache_capacity;
    let mut dataset = DataSet::with_config(config);
    let mut displays = DisplayRegistry::new();
    let particle_display = displays.add(ParticleDisplay::new());
    let cell_display = displays.add(SimulationCellDisplay::new());

    let loader = Arc::new(LatticeLoader {
        frames: options.frames.max(1),
        side: 4,
    });
    let mut source = FrameSourceObject::with_cache_capacity(loader, frame_cache_capacity);
    source.add_display_template(&PARTICLE_PROPERTY_KIND, display_handle(&particle_display));
    source.add_display_template(&SIMULATION_CELL_KIND, display_handle(&cell_display));
    let source = dataset.insert(source);

    let node = dataset.create_node("Lattice");
    dataset.set_data_provider(node, Some(source))?;
    dataset.release(source);

    let last_time = dataset.animation().frame_to_time(options.frames.max(1) as i32 - 1);
    let drift = Controller::keyed(vec![Key::new(0, 0.0), Key::new(last_time, 2.0)]);
    dataset.apply_modifier(
        node,
        Box::new(AffineTransformationModifier::new([
            drift,
            Controller::constant(0.0),
            Controller::constant(0.0),
        ])),
    )?;
    dataset.apply_modifier(
        node,
        Box::new(ScalePropertyModifier::new(
            ParticlePropertyType::Radius,
            Controller::constant(1.5),
        )),
    )?;

    let mut renderer = RecordingRenderer::new();
    for frame in 0..options.frames {
        let time = dataset.animation().frame_to_time(frame as i32);
        if !dataset.wait_until_node_ready(node, time, &format!("Loading frame {}", frame), None) {
            return Err(LibraryError::task(format!("frame {} did not become ready", frame)));
        }
        let stats = dataset.render_scene(time, &mut renderer)?;
        let bounds = dataset.node_bounding_box(node, time)?;
        println!(
            "frame {}: {} particles, {} cell edges, bounds {:?} .. {:?}",
            frame, stats.particles, stats.line_segments, bounds.min, bounds.max
        );
    }

    // Snapshot of the last output, saved and loaded back.
    let time = dataset.animation().frame_to_time(options.frames.max(1) as i32 - 1);
    let state = dataset.eval_pipeline(node, time)?;
    let snapshot = dataset.insert(CompoundObject::new());
    for object in state.objects() {
        CompoundObject::add_data_object(&mut dataset, snapshot, object)?;
    }
    let bytes = dataset.save_to_bytes(snapshot)?;
    let restored = dataset.load_from_bytes(bytes.clone(), &displays)?;
    info!(
        "Snapshot of {} objects saved in {} bytes",
        dataset.references(snapshot).len(),
        bytes.len()
    );
    println!(
        "restored snapshot with {} objects",
        dataset.references(restored).len()
    );
    dataset.release(restored);
    dataset.release(snapshot);
    Ok(())
}
