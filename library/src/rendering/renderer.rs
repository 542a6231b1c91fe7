use crate::animation::TimePoint;
use crate::error::LibraryError;
use crate::geometry::{Color, Point3};

/// What a renderer reports when a frame is finished.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    pub time: TimePoint,
    pub particles: usize,
    pub triangles: usize,
    pub line_segments: usize,
}

/// Drawing back end consumed by display objects.
pub trait SceneRenderer {
    fn begin_frame(&mut self, time: TimePoint) -> Result<(), LibraryError>;

    fn render_particles(
        &mut self,
        positions: &[Point3],
        radii: &[f64],
        colors: &[Color],
    ) -> Result<(), LibraryError>;

    fn render_mesh(
        &mut self,
        vertices: &[Point3],
        faces: &[[usize; 3]],
        color: Color,
    ) -> Result<(), LibraryError>;

    fn render_lines(&mut self, segments: &[(Point3, Point3)], color: Color) -> Result<(), LibraryError>;

    fn end_frame(&mut self) -> Result<FrameStats, LibraryError>;
}
