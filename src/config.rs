/// Centralized configuration for traversal rules and the path return pipeline
///
/// Constants live in small modules grouped by subsystem, the same way the
/// runtime tunables below group them. Everything a host application may want
/// to change at startup is also exposed through `PipelineConfig` and
/// `SchedulerConfig`, which can be loaded from JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tag configuration constants
pub mod tags {
    /// Number of tag slots. Tag arrays on a cost model must have exactly this length.
    pub const COUNT: usize = 32;

    /// Tag mask with every tag enabled
    pub const ALL: u32 = u32::MAX;

    /// Check if a raw tag value fits in a tag slot
    #[inline]
    pub fn is_valid(tag: u8) -> bool {
        (tag as usize) < COUNT
    }
}

/// Cost configuration constants
pub mod cost {
    /// Distances are accumulated in millimeters: 1 world unit = 1000
    pub const MM_PER_UNIT: u32 = 1000;

    /// Rounded sqrt(2) * 1000, used for diagonal grid steps
    pub const DIAGONAL_MM: u32 = 1414;

    /// Multiplier used when no per-tag multiplier is configured
    pub const DEFAULT_MULTIPLIER: f32 = 1.0;
}

/// Return pipeline constants
pub mod pipeline {
    use std::time::Duration;

    /// Minimum number of requests returned by one time-sliced drain,
    /// even when the time budget runs out earlier
    pub const MIN_RETURNS_PER_SLICE: usize = 5;

    /// Default time budget for one time-sliced drain
    pub const DEFAULT_TIME_SLICE: Duration = Duration::from_millis(1);
}

/// Nearest node query constants
pub mod nearest {
    /// Library-wide default for the max search distance (world units)
    pub const DEFAULT_MAX_DISTANCE: f32 = 100.0;

    /// Squared form of `DEFAULT_MAX_DISTANCE`, the unit queries compare in
    pub const DEFAULT_MAX_DISTANCE_SQR: f32 = DEFAULT_MAX_DISTANCE * DEFAULT_MAX_DISTANCE;

    /// Weight applied to the vertical axis by the "soft" seen-from-above metric
    pub const SOFT_VERTICAL_WEIGHT: f32 = 0.2;
}

/// Worker pool constants
pub mod scheduler {
    /// Default number of path worker threads
    pub const DEFAULT_WORKER_COUNT: usize = 4;
}

/// Runtime tunables for the return pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Time budget for a time-sliced drain, in microseconds
    pub time_slice_us: u64,

    /// Minimum requests returned per time-sliced drain
    pub min_returns_per_slice: usize,

    /// Pending requests above this count mark the pipeline as backlogged.
    /// `None` disables the watermark.
    pub max_pending: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            time_slice_us: pipeline::DEFAULT_TIME_SLICE.as_micros() as u64,
            min_returns_per_slice: pipeline::MIN_RETURNS_PER_SLICE,
            max_pending: None,
        }
    }
}

impl PipelineConfig {
    /// Parse a config from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    #[inline]
    pub fn time_slice(&self) -> Duration {
        Duration::from_micros(self.time_slice_us)
    }
}

/// Runtime tunables for the worker pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub worker_count: usize,

    /// Prefix for worker thread names; the worker index is appended
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: scheduler::DEFAULT_WORKER_COUNT,
            thread_name_prefix: "path-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::InvalidWorkerCount(self.worker_count));
        }
        Ok(())
    }
}
