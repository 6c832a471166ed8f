//! Configuration types for the scheduling engine.

use pyo3::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calendar::ShiftCalendar;

/// Errors raised by [`SchedulerConfig::validate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Shift start hour {start} must be before shift end hour {end}")]
    EmptyShift { start: u32, end: u32 },
    #[error("Shift end hour {0} is past midnight")]
    ShiftEndOutOfRange(u32),
    #[error("Granularity of {0} minutes does not divide a day")]
    BadGranularity(u32),
    #[error("{0} must be at least 1")]
    ZeroBound(&'static str),
}

/// Tuning constants for slot search and cascade resolution.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Hour of day (0-23) at which the shift window opens
    #[pyo3(get, set)]
    pub shift_start_hour: u32,
    /// Hour of day (1-24) at which the shift window closes (exclusive)
    #[pyo3(get, set)]
    pub shift_end_hour: u32,
    /// Start times must fall on multiples of this many minutes
    #[pyo3(get, set)]
    pub granularity_minutes: u32,
    /// Number of days the slot finder scans before giving up
    #[pyo3(get, set)]
    pub search_horizon_days: u32,
    /// Deepest cascade level allowed (1 = directly displaced jobs only)
    #[pyo3(get, set)]
    pub max_cascade_depth: u32,
    /// Upper bound on re-snaps while settling one cascaded job
    #[pyo3(get, set)]
    pub max_settle_iterations: u32,
    /// Verbosity level: 0=silent, 1=changes, 2=checks, 3=debug
    #[pyo3(get, set)]
    pub verbosity: u8,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shift_start_hour: 7,
            shift_end_hour: 16,
            granularity_minutes: 15,
            search_horizon_days: 30,
            max_cascade_depth: 3,
            max_settle_iterations: 64,
            verbosity: 0,
        }
    }
}

impl SchedulerConfig {
    /// Check that the constants describe a usable shift calendar and bounded searches.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shift_end_hour > 24 {
            return Err(ConfigError::ShiftEndOutOfRange(self.shift_end_hour));
        }
        if self.shift_start_hour >= self.shift_end_hour {
            return Err(ConfigError::EmptyShift {
                start: self.shift_start_hour,
                end: self.shift_end_hour,
            });
        }
        if self.granularity_minutes == 0 || 1440 % self.granularity_minutes != 0 {
            return Err(ConfigError::BadGranularity(self.granularity_minutes));
        }
        if self.search_horizon_days == 0 {
            return Err(ConfigError::ZeroBound("search_horizon_days"));
        }
        if self.max_cascade_depth == 0 {
            return Err(ConfigError::ZeroBound("max_cascade_depth"));
        }
        if self.max_settle_iterations == 0 {
            return Err(ConfigError::ZeroBound("max_settle_iterations"));
        }
        Ok(())
    }

    /// Shift calendar described by this configuration.
    pub fn calendar(&self) -> ShiftCalendar {
        ShiftCalendar::new(
            self.shift_start_hour,
            self.shift_end_hour,
            self.granularity_minutes,
        )
    }
}

#[pymethods]
impl SchedulerConfig {
    #[new]
    #[pyo3(signature = (
        shift_start_hour=None,
        shift_end_hour=None,
        granularity_minutes=None,
        search_horizon_days=None,
        max_cascade_depth=None,
        max_settle_iterations=None,
        verbosity=None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        shift_start_hour: Option<u32>,
        shift_end_hour: Option<u32>,
        granularity_minutes: Option<u32>,
        search_horizon_days: Option<u32>,
        max_cascade_depth: Option<u32>,
        max_settle_iterations: Option<u32>,
        verbosity: Option<u8>,
    ) -> PyResult<Self> {
        let defaults = Self::default();
        let config = Self {
            shift_start_hour: shift_start_hour.unwrap_or(defaults.shift_start_hour),
            shift_end_hour: shift_end_hour.unwrap_or(defaults.shift_end_hour),
            granularity_minutes: granularity_minutes.unwrap_or(defaults.granularity_minutes),
            search_horizon_days: search_horizon_days.unwrap_or(defaults.search_horizon_days),
            max_cascade_depth: max_cascade_depth.unwrap_or(defaults.max_cascade_depth),
            max_settle_iterations: max_settle_iterations
                .unwrap_or(defaults.max_settle_iterations),
            verbosity: verbosity.unwrap_or(defaults.verbosity),
        };
        config
            .validate()
            .map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))?;
        Ok(config)
    }

    fn __repr__(&self) -> String {
        format!(
            "SchedulerConfig(shift={}-{}h, granularity={}m, horizon={}d, max_depth={})",
            self.shift_start_hour,
            self.shift_end_hour,
            self.granularity_minutes,
            self.search_horizon_days,
            self.max_cascade_depth
        )
    }
}
