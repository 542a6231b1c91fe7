use std::borrow::Cow;
use std::time::Instant;

use log::{self, Level};

/// Logs the wall time between construction and drop.
///
/// The label is only built when the level is enabled, so timers can stay in hot
/// evaluation paths.
pub struct ScopedTimer {
    label: Option<Cow<'static, str>>,
    level: Level,
    start: Instant,
}

impl ScopedTimer {
    pub fn with_level(label: impl Into<Cow<'static, str>>, level: Level) -> Self {
        let label = log::log_enabled!(level).then(|| label.into());
        Self {
            label,
            level,
            start: Instant::now(),
        }
    }

    pub fn debug(label: impl Into<Cow<'static, str>>) -> Self {
        Self::with_level(label, Level::Debug)
    }

    pub fn debug_lazy<F>(label_gen: F) -> Self
    where
        F: FnOnce() -> String,
    {
        let label = log::log_enabled!(Level::Debug).then(|| Cow::Owned(label_gen()));
        Self {
            label,
            level: Level::Debug,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        if let Some(label) = &self.label {
            let micros = self.start.elapsed().as_micros();
            log::log!(self.level, "{} took {}.{:03} ms", label, micros / 1000, micros % 1000);
        }
    }
}

pub fn measure_debug<T, F>(label: impl Into<Cow<'static, str>>, f: F) -> T
where
    F: FnOnce() -> T,
{
    let _timer = ScopedTimer::debug(label);
    f()
}

pub fn measure_debug_lazy<T, F, L>(label_gen: L, f: F) -> T
where
    F: FnOnce() -> T,
    L: FnOnce() -> String,
{
    let _timer = ScopedTimer::debug_lazy(label_gen);
    f()
}
