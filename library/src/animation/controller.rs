use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use super::{TIME_NEGATIVE_INFINITY, TIME_POSITIVE_INFINITY, TimeInterval, TimePoint};

/// How a key blends into the following one.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Easing {
    #[default]
    Linear,
    /// Keep the key value until the next key is reached.
    Hold,
    EaseInOutSine,
}

impl Easing {
    pub fn apply(&self, t: f64) -> f64 {
        match self {
            Easing::Linear => t,
            Easing::Hold => 0.0,
            Easing::EaseInOutSine => -((std::f64::consts::PI * t).cos() - 1.0) / 2.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub time: TimePoint,
    pub value: OrderedFloat<f64>,
    #[serde(default)]
    pub easing: Easing,
}

impl Key {
    pub fn new(time: TimePoint, value: f64) -> Self {
        Self {
            time,
            value: OrderedFloat(value),
            easing: Easing::Linear,
        }
    }

    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }
}

/// A scalar parameter that may change over animation time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub enum Controller {
    Constant(OrderedFloat<f64>),
    Keyed(Vec<Key>),
}

impl Controller {
    pub fn constant(value: f64) -> Self {
        Controller::Constant(OrderedFloat(value))
    }

    /// Builds a keyed controller; keys are kept sorted by time and later duplicates win.
    pub fn keyed(mut keys: Vec<Key>) -> Self {
        keys.sort_by_key(|k| k.time);
        keys.dedup_by(|later, earlier| {
            if later.time == earlier.time {
                *earlier = later.clone();
                true
            } else {
                false
            }
        });
        Controller::Keyed(keys)
    }

    /// Returns the value at `time` and shrinks `validity` to the interval over which that
    /// value stays the same.
    pub fn value(&self, time: TimePoint, validity: &mut TimeInterval) -> f64 {
        let (value, interval) = self.evaluate(time);
        validity.intersect(&interval);
        value
    }

    pub fn value_at(&self, time: TimePoint) -> f64 {
        self.evaluate(time).0
    }

    pub fn validity_at(&self, time: TimePoint) -> TimeInterval {
        self.evaluate(time).1
    }

    fn evaluate(&self, time: TimePoint) -> (f64, TimeInterval) {
        let keys = match self {
            Controller::Constant(v) => return (v.0, TimeInterval::infinite()),
            Controller::Keyed(keys) => keys,
        };

        let (Some(first), Some(last)) = (keys.first(), keys.last()) else {
            return (0.0, TimeInterval::infinite());
        };
        if keys.len() == 1 {
            return (first.value.0, TimeInterval::infinite());
        }
        if time <= first.time {
            return (first.value.0, TimeInterval::new(TIME_NEGATIVE_INFINITY, first.time));
        }
        if time >= last.time {
            return (last.value.0, TimeInterval::new(last.time, TIME_POSITIVE_INFINITY));
        }

        // `time` lies strictly inside the key range, so a following key exists.
        let index = keys.partition_point(|k| k.time <= time) - 1;
        let (a, b) = (&keys[index], &keys[index + 1]);
        match a.easing {
            Easing::Hold => (a.value.0, TimeInterval::new(a.time, b.time - 1)),
            _ if time == a.time => (a.value.0, TimeInterval::instant(time)),
            easing => {
                let span = f64::from(b.time - a.time);
                let t = easing.apply(f64::from(time - a.time) / span);
                let value = a.value.0 + (b.value.0 - a.value.0) * t;
                (value, TimeInterval::instant(time))
            }
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Controller::constant(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Controller {
        Controller::keyed(vec![Key::new(100, 0.0), Key::new(0, 10.0), Key::new(200, 20.0)])
    }

    #[test]
    fn constant_is_valid_forever() {
        let mut validity = TimeInterval::infinite();
        assert_eq!(Controller::constant(2.5).value(42, &mut validity), 2.5);
        assert!(validity.is_infinite());
    }

    #[test]
    fn keys_are_sorted_on_construction() {
        let Controller::Keyed(keys) = ramp() else {
            panic!("expected keyed controller");
        };
        let times: Vec<_> = keys.iter().map(|k| k.time).collect();
        assert_eq!(times, vec![0, 100, 200]);
    }

    #[test]
    fn value_before_first_key_is_clamped() {
        let mut validity = TimeInterval::infinite();
        assert_eq!(ramp().value(-50, &mut validity), 10.0);
        assert_eq!(validity, TimeInterval::new(TIME_NEGATIVE_INFINITY, 0));
    }

    #[test]
    fn value_after_last_key_is_clamped() {
        let mut validity = TimeInterval::infinite();
        assert_eq!(ramp().value(500, &mut validity), 20.0);
        assert_eq!(validity, TimeInterval::new(200, TIME_POSITIVE_INFINITY));
    }

    #[test]
    fn interpolated_value_is_valid_for_an_instant() {
        let mut validity = TimeInterval::infinite();
        let value = ramp().value(150, &mut validity);
        assert!((value - 10.0).abs() < 1e-9);
        assert_eq!(validity, TimeInterval::instant(150));
    }

    #[test]
    fn hold_key_is_valid_until_next_key() {
        let controller =
            Controller::keyed(vec![Key::new(0, 1.0).with_easing(Easing::Hold), Key::new(10, 2.0)]);
        let mut validity = TimeInterval::infinite();
        assert_eq!(controller.value(5, &mut validity), 1.0);
        assert_eq!(validity, TimeInterval::new(0, 9));
        assert!(validity.contains(5));
    }

    #[test]
    fn validity_always_contains_query_time() {
        let controller = ramp();
        for t in [-1000, 0, 1, 99, 100, 101, 199, 200, 201, 5000] {
            assert!(controller.validity_at(t).contains(t), "time {}", t);
        }
    }
}
