use crate::animation::TimePoint;
use crate::error::LibraryError;
use crate::geometry::{Box3, Color, Point3};

use super::renderer::{FrameStats, SceneRenderer};

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCall {
    Particles { count: usize, bounds: Box3 },
    Mesh { triangles: usize, color: Color },
    Lines { segments: usize, color: Color },
}

/// Renderer that only remembers what it was asked to draw.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    current: Option<(TimePoint, Vec<DrawCall>)>,
    frames: Vec<(FrameStats, Vec<DrawCall>)>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[(FrameStats, Vec<DrawCall>)] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&(FrameStats, Vec<DrawCall>)> {
        self.frames.last()
    }

    fn record(&mut self, call: DrawCall) -> Result<(), LibraryError> {
        let (_, calls) = self
            .current
            .as_mut()
            .ok_or_else(|| LibraryError::render("draw call outside of begin_frame/end_frame"))?;
        calls.push(call);
        Ok(())
    }
}

impl SceneRenderer for RecordingRenderer {
    fn begin_frame(&mut self, time: TimePoint) -> Result<(), LibraryError> {
        if self.current.is_some() {
            return Err(LibraryError::render("begin_frame called twice"));
        }
        self.current = Some((time, Vec::new()));
        Ok(())
    }

    fn render_particles(
        &mut self,
        positions: &[Point3],
        radii: &[f64],
        _colors: &[Color],
    ) -> Result<(), LibraryError> {
        let mut bounds = Box3::empty();
        for (i, p) in positions.iter().enumerate() {
            let r = radii.get(i).copied().unwrap_or(0.0);
            bounds.add_point(p.map(|v| v - r));
            bounds.add_point(p.map(|v| v + r));
        }
        self.record(DrawCall::Particles {
            count: positions.len(),
            bounds,
        })
    }

    fn render_mesh(
        &mut self,
        _vertices: &[Point3],
        faces: &[[usize; 3]],
        color: Color,
    ) -> Result<(), LibraryError> {
        self.record(DrawCall::Mesh {
            triangles: faces.len(),
            color,
        })
    }

    fn render_lines(&mut self, segments: &[(Point3, Point3)], color: Color) -> Result<(), LibraryError> {
        self.record(DrawCall::Lines {
            segments: segments.len(),
            color,
        })
    }

    fn end_frame(&mut self) -> Result<FrameStats, LibraryError> {
        let (time, calls) = self
            .current
            .take()
            .ok_or_else(|| LibraryError::render("end_frame without begin_frame"))?;
        let mut stats = FrameStats {
            time,
            ..FrameStats::default()
        };
        for call in &calls {
            match call {
                DrawCall::Particles { count, .. } => stats.particles += count,
                DrawCall::Mesh { triangles, .. } => stats.triangles += triangles,
                DrawCall::Lines { segments, .. } => stats.line_segments += segments,
            }
        }
        self.frames.push((stats.clone(), calls));
        Ok(stats)
    }
}
