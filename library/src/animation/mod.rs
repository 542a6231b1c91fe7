//! Animation time, validity intervals and animated parameters.

pub mod controller;

pub use controller::{Controller, Easing, Key};

use serde::{Deserialize, Serialize};
use std::fmt;

/// A point on the animation time line, measured in ticks.
pub type TimePoint = i32;

pub const TIME_NEGATIVE_INFINITY: TimePoint = TimePoint::MIN;
pub const TIME_POSITIVE_INFINITY: TimePoint = TimePoint::MAX;

/// A closed interval `[start, end]` of animation time.
///
/// An interval whose start lies after its end is empty. The infinite interval spans the whole
/// time line, including both sentinel values.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeInterval {
    start: TimePoint,
    end: TimePoint,
}

impl TimeInterval {
    pub const fn new(start: TimePoint, end: TimePoint) -> Self {
        Self { start, end }
    }

    pub const fn infinite() -> Self {
        Self::new(TIME_NEGATIVE_INFINITY, TIME_POSITIVE_INFINITY)
    }

    pub const fn empty() -> Self {
        Self::new(TIME_POSITIVE_INFINITY, TIME_NEGATIVE_INFINITY)
    }

    pub const fn instant(time: TimePoint) -> Self {
        Self::new(time, time)
    }

    pub fn start(&self) -> TimePoint {
        self.start
    }

    pub fn end(&self) -> TimePoint {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn is_infinite(&self) -> bool {
        self.start == TIME_NEGATIVE_INFINITY && self.end == TIME_POSITIVE_INFINITY
    }

    pub fn contains(&self, time: TimePoint) -> bool {
        self.start <= time && time <= self.end
    }

    pub fn set_empty(&mut self) {
        *self = Self::empty();
    }

    pub fn set_infinite(&mut self) {
        *self = Self::infinite();
    }

    /// Shrinks this interval to its overlap with `other`.
    pub fn intersect(&mut self, other: &TimeInterval) {
        if self.is_empty() || other.is_empty() {
            self.set_empty();
            return;
        }
        self.start = self.start.max(other.start);
        self.end = self.end.min(other.end);
        if self.is_empty() {
            self.set_empty();
        }
    }

    pub fn intersection(a: &TimeInterval, b: &TimeInterval) -> TimeInterval {
        let mut result = *a;
        result.intersect(b);
        result
    }
}

impl Default for TimeInterval {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "[empty]");
        }
        let bound = |t: TimePoint| match t {
            TIME_NEGATIVE_INFINITY => "-inf".to_string(),
            TIME_POSITIVE_INFINITY => "+inf".to_string(),
            t => t.to_string(),
        };
        write!(f, "[{}, {}]", bound(self.start), bound(self.end))
    }
}

/// Mapping between animation frames and ticks.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationSettings {
    pub ticks_per_frame: i32,
}

impl AnimationSettings {
    pub fn new(ticks_per_frame: i32) -> Self {
        Self {
            ticks_per_frame: ticks_per_frame.max(1),
        }
    }

    pub fn frame_to_time(&self, frame: i32) -> TimePoint {
        frame.saturating_mul(self.ticks_per_frame)
    }

    /// Frame that contains `time`; rounds towards negative infinity.
    pub fn time_to_frame(&self, time: TimePoint) -> i32 {
        time.div_euclid(self.ticks_per_frame)
    }

    /// The ticks belonging to one frame.
    pub fn frame_interval(&self, frame: i32) -> TimeInterval {
        let start = self.frame_to_time(frame);
        TimeInterval::new(start, start.saturating_add(self.ticks_per_frame - 1))
    }
}

impl Default for AnimationSettings {
    fn default() -> Self {
        Self::new(160)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinite_interval_contains_everything() {
        let iv = TimeInterval::infinite();
        assert!(iv.contains(TIME_NEGATIVE_INFINITY));
        assert!(iv.contains(0));
        assert!(iv.contains(TIME_POSITIVE_INFINITY));
        assert!(iv.is_infinite());
        assert!(!iv.is_empty());
    }

    #[test]
    fn empty_interval_contains_nothing() {
        let iv = TimeInterval::empty();
        assert!(iv.is_empty());
        assert!(!iv.contains(0));
        assert!(!iv.contains(TIME_POSITIVE_INFINITY));
    }

    #[test]
    fn intersection_of_overlapping_intervals() {
        let mut iv = TimeInterval::new(0, 100);
        iv.intersect(&TimeInterval::new(50, 200));
        assert_eq!(iv, TimeInterval::new(50, 100));

        iv.intersect(&TimeInterval::new(101, 300));
        assert!(iv.is_empty());
        assert_eq!(iv, TimeInterval::empty());
    }

    #[test]
    fn intersection_with_infinite_is_identity() {
        let iv = TimeInterval::new(-5, 5);
        assert_eq!(TimeInterval::intersection(&iv, &TimeInterval::infinite()), iv);
    }

    #[test]
    fn display_uses_infinity_markers() {
        assert_eq!(TimeInterval::infinite().to_string(), "[-inf, +inf]");
        assert_eq!(TimeInterval::new(TIME_NEGATIVE_INFINITY, 5).to_string(), "[-inf, 5]");
        assert_eq!(TimeInterval::empty().to_string(), "[empty]");
    }

    #[test]
    fn frames_map_to_tick_ranges() {
        let settings = AnimationSettings::new(10);
        assert_eq!(settings.frame_to_time(3), 30);
        assert_eq!(settings.time_to_frame(39), 3);
        assert_eq!(settings.time_to_frame(-1), -1);
        assert_eq!(settings.frame_interval(2), TimeInterval::new(20, 29));
    }
}
