use serde::{Deserialize, Serialize};

pub type Point3 = [f64; 3];
pub type Vector3 = [f64; 3];

pub fn add(a: Point3, b: Vector3) -> Point3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

/// Axis-aligned bounding box. A box with `min > max` on any axis is empty.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Box3 {
    pub min: Point3,
    pub max: Point3,
}

impl Box3 {
    pub fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3>) -> Self {
        let mut bbox = Self::empty();
        for p in points {
            bbox.add_point(*p);
        }
        bbox
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    pub fn add_point(&mut self, p: Point3) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    pub fn add_box(&mut self, other: &Box3) {
        if other.is_empty() {
            return;
        }
        self.add_point(other.min);
        self.add_point(other.max);
    }

    /// Grows the box by `padding` on every side.
    pub fn pad(&self, padding: f64) -> Self {
        if self.is_empty() {
            return *self;
        }
        Self {
            min: self.min.map(|v| v - padding),
            max: self.max.map(|v| v + padding),
        }
    }
}

impl Default for Box3 {
    fn default() -> Self {
        Self::empty()
    }
}
