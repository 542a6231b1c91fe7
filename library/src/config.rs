use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::LibraryError;

/// Tunables of a `DataSet` session, read from a TOML file.
///
/// ```toml
/// ticks_per_frame = 160
/// worker_threads = 2
/// wait_poll_interval_ms = 50
/// conversion_cache_capacity = 64
/// frame_cache_capacity = 8
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub ticks_per_frame: i32,
    pub worker_threads: usize,
    pub wait_poll_interval_ms: u64,
    pub conversion_cache_capacity: usize,
    pub frame_cache_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ticks_per_frame: 160,
            worker_threads: 2,
            wait_poll_interval_ms: 50,
            conversion_cache_capacity: 64,
            frame_cache_capacity: 8,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, LibraryError> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, LibraryError> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded pipeline config from {}", path.display());
        Ok(config)
    }

    /// Like [`PipelineConfig::load`], but a missing or broken file yields the defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            info!("No pipeline config at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load pipeline config {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), LibraryError> {
        if self.ticks_per_frame <= 0 {
            return Err(LibraryError::Config(format!(
                "ticks_per_frame must be positive, got {}",
                self.ticks_per_frame
            )));
        }
        if self.worker_threads == 0 {
            return Err(LibraryError::Config("worker_threads must be at least 1".into()));
        }
        if self.conversion_cache_capacity == 0 || self.frame_cache_capacity == 0 {
            return Err(LibraryError::Config("cache capacities must be at least 1".into()));
        }
        Ok(())
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms.max(1))
    }

    pub fn to_toml_string(&self) -> Result<String, LibraryError> {
        toml::to_string(self).map_err(|e| LibraryError::Config(e.to_string()))
    }
}
