//! Machine-timeline scheduling engine for shift-based production jobs.
//!
//! Finds free shift-aligned slots, detects overlaps on a machine, and resolves
//! intentional overlaps by cascading push-backs or returns to the queue. The
//! engine works on a snapshot and only emits the writes to apply.

// Allow clippy warning triggered by PyO3 macro expansion
#![allow(clippy::useless_conversion)]

use chrono::{NaiveDate, NaiveDateTime};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::collections::HashMap;

pub mod calendar;
pub mod clock;
mod config;
pub mod hints;
pub mod logging;
mod models;
pub mod scheduler;
pub mod store;

pub use calendar::ShiftCalendar;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, SchedulerConfig};
pub use models::{
    CascadeMove, CascadeResult, CascadeWrite, CommitPayload, Machine, MachineHint,
    PlacementWrite, QueueReturn, Resolution, ScheduledInterval,
};
pub use scheduler::{
    CascadeResolver, ConflictSet, PlacementCandidate, PlacementError, PlacementState,
    PlacementValidator, SlotFinder, TimelineIndex,
};
pub use store::{apply_commit, CommitError, InMemoryJobStore, JobStore, StoreError};

fn checked_config(config: Option<SchedulerConfig>) -> PyResult<SchedulerConfig> {
    let config = config.unwrap_or_default();
    config
        .validate()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    Ok(config)
}

/// Find the first free, shift-aligned slot on a machine.
///
/// # Arguments
/// * `intervals` - Snapshot of scheduled jobs (any machines)
/// * `machine_id` - Machine to search
/// * `from_date` - Earliest day to consider
/// * `duration_minutes` - Length of the job
/// * `now` - Current time; the host clock is used when omitted
/// * `exclude_job_id` - Job whose own placement should be ignored
/// * `config` - Scheduler configuration
///
/// # Returns
/// * Start of the slot, or None when the search horizon is exhausted
///
/// # Raises
/// * ValueError if the duration is not positive or the config is invalid
#[pyfunction]
#[pyo3(signature = (intervals, machine_id, from_date, duration_minutes, now=None, exclude_job_id=None, config=None))]
#[allow(clippy::too_many_arguments)]
fn find_next_available(
    intervals: Vec<ScheduledInterval>,
    machine_id: String,
    from_date: NaiveDate,
    duration_minutes: i64,
    now: Option<NaiveDateTime>,
    exclude_job_id: Option<String>,
    config: Option<SchedulerConfig>,
) -> PyResult<Option<NaiveDateTime>> {
    let config = checked_config(config)?;
    if duration_minutes <= 0 {
        return Err(PyValueError::new_err(format!(
            "duration_minutes must be positive, got {}",
            duration_minutes
        )));
    }

    let index = TimelineIndex::new(intervals);
    let fixed;
    let clock: &dyn Clock = match now {
        Some(instant) => {
            fixed = FixedClock(instant);
            &fixed
        }
        None => &SystemClock,
    };

    let finder = SlotFinder::new(&index, &config, clock);
    Ok(finder
        .find_next_available(
            &machine_id,
            from_date,
            duration_minutes,
            exclude_job_id.as_deref(),
        )
        .map(|slot| slot.start))
}

/// Jobs on `machine_id` overlapping `[start, end)`.
#[pyfunction]
#[pyo3(name = "detect_conflicts", signature = (intervals, machine_id, start, end, exclude_job_id=None))]
fn py_detect_conflicts(
    intervals: Vec<ScheduledInterval>,
    machine_id: String,
    start: NaiveDateTime,
    end: NaiveDateTime,
    exclude_job_id: Option<String>,
) -> PyResult<Vec<ScheduledInterval>> {
    if end <= start {
        return Err(PyValueError::new_err("end must be after start"));
    }
    let index = TimelineIndex::new(intervals);
    Ok(scheduler::detect_conflicts(
        &index,
        &machine_id,
        start,
        end,
        exclude_job_id.as_deref(),
    ))
}

/// Compute the cascade of moves for a candidate interval.
///
/// # Arguments
/// * `resolutions` - Dict mapping conflicting job ID to Resolution
///
/// # Returns
/// * CascadeResult; `too_deep` means nothing may be committed
///
/// # Raises
/// * ValueError if any conflicting job has no entry in `resolutions`
#[pyfunction]
#[pyo3(signature = (intervals, machine_id, candidate_start, candidate_end, resolutions, exclude_job_id=None, config=None))]
#[allow(clippy::too_many_arguments)]
fn resolve_cascade(
    intervals: Vec<ScheduledInterval>,
    machine_id: String,
    candidate_start: NaiveDateTime,
    candidate_end: NaiveDateTime,
    resolutions: HashMap<String, Resolution>,
    exclude_job_id: Option<String>,
    config: Option<SchedulerConfig>,
) -> PyResult<CascadeResult> {
    let config = checked_config(config)?;
    if candidate_end <= candidate_start {
        return Err(PyValueError::new_err("candidate_end must be after candidate_start"));
    }
    let index = TimelineIndex::new(intervals);
    let exclude = exclude_job_id.as_deref();
    let found = scheduler::detect_conflicts(
        &index,
        &machine_id,
        candidate_start,
        candidate_end,
        exclude,
    );
    let conflicts =
        ConflictSet::with_resolutions(found, |job_id| resolutions.get(job_id).copied());
    CascadeResolver::new(&index, &config)
        .resolve(candidate_start, candidate_end, &conflicts, &machine_id, exclude)
        .map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Validate a placement and build its commit payload.
///
/// # Raises
/// * ValueError for missing/invalid fields, unresolved conflicts, or a cascade
///   deeper than the configured limit
#[pyfunction]
#[pyo3(signature = (intervals, job_id, machine_id, start, duration_minutes, resolutions=None, config=None))]
#[allow(clippy::too_many_arguments)]
fn plan_placement(
    intervals: Vec<ScheduledInterval>,
    job_id: String,
    machine_id: Option<String>,
    start: Option<NaiveDateTime>,
    duration_minutes: Option<i64>,
    resolutions: Option<HashMap<String, Resolution>>,
    config: Option<SchedulerConfig>,
) -> PyResult<CommitPayload> {
    let config = checked_config(config)?;
    let index = TimelineIndex::new(intervals);
    let resolutions = resolutions.unwrap_or_default();
    let candidate = PlacementCandidate {
        job_id,
        machine_id,
        start,
        duration_minutes,
    };
    scheduler::plan_placement(&index, &config, &candidate, |id| {
        resolutions.get(id).copied()
    })
    .map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Active machines ordered for selection, hinted machines first.
#[pyfunction]
#[pyo3(name = "rank_machines")]
fn py_rank_machines(machines: Vec<Machine>, hints: Vec<MachineHint>) -> Vec<Machine> {
    hints::rank_machines(&machines, &hints)
}

/// Install a log subscriber honoring RUST_LOG. Returns False if one already exists.
#[pyfunction]
fn init_logging() -> bool {
    logging::init()
}

/// The slotwise.rust Python module.
#[pymodule]
fn rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Core data types
    m.add_class::<Machine>()?;
    m.add_class::<MachineHint>()?;
    m.add_class::<ScheduledInterval>()?;
    m.add_class::<Resolution>()?;
    m.add_class::<CascadeMove>()?;
    m.add_class::<CascadeResult>()?;
    m.add_class::<PlacementWrite>()?;
    m.add_class::<CascadeWrite>()?;
    m.add_class::<QueueReturn>()?;
    m.add_class::<CommitPayload>()?;

    // Config types
    m.add_class::<SchedulerConfig>()?;

    // Algorithms
    m.add_function(wrap_pyfunction!(find_next_available, m)?)?;
    m.add_function(wrap_pyfunction!(py_detect_conflicts, m)?)?;
    m.add_function(wrap_pyfunction!(resolve_cascade, m)?)?;
    m.add_function(wrap_pyfunction!(plan_placement, m)?)?;
    m.add_function(wrap_pyfunction!(py_rank_machines, m)?)?;
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;

    Ok(())
}
