//! Core data types for the scheduling engine.

use chrono::NaiveDateTime;
use pyo3::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calendar::add_minutes;

/// A machine jobs can be placed on.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    #[pyo3(get, set)]
    pub id: String,
    #[pyo3(get, set)]
    pub is_active: bool,
    #[pyo3(get, set)]
    pub display_order: i32,
}

#[pymethods]
impl Machine {
    #[new]
    #[pyo3(signature = (id, is_active=true, display_order=0))]
    fn new(id: String, is_active: bool, display_order: i32) -> Self {
        Self {
            id,
            is_active,
            display_order,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "Machine(id={:?}, is_active={}, display_order={})",
            self.id, self.is_active, self.display_order
        )
    }
}

/// A job placed on a machine for `[start, end)`.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledInterval {
    #[pyo3(get, set)]
    pub job_id: String,
    #[pyo3(get, set)]
    pub machine_id: String,
    #[pyo3(get, set)]
    pub start: NaiveDateTime,
    /// Stored end, if any. See [`ScheduledInterval::end`].
    #[pyo3(get, set)]
    pub end: Option<NaiveDateTime>,
    #[pyo3(get, set)]
    pub duration_minutes: i64,
    #[pyo3(get, set)]
    pub job_number: Option<String>,
    #[pyo3(get, set)]
    pub part: Option<String>,
    #[pyo3(get, set)]
    pub priority: Option<i32>,
    #[pyo3(get, set)]
    pub requires_attendance: bool,
}

impl ScheduledInterval {
    /// Minimal interval with no display fields.
    pub fn new(
        job_id: impl Into<String>,
        machine_id: impl Into<String>,
        start: NaiveDateTime,
        duration_minutes: i64,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            machine_id: machine_id.into(),
            start,
            end: None,
            duration_minutes,
            job_number: None,
            part: None,
            priority: None,
            requires_attendance: false,
        }
    }

    /// Effective end of the interval.
    ///
    /// The stored end wins when it is after `start`; otherwise the job is treated
    /// as open-ended and runs for its stored duration (at least one minute). A
    /// duration running past the representable range ends at `NaiveDateTime::MAX`.
    pub fn end(&self) -> NaiveDateTime {
        match self.end {
            Some(end) if end > self.start => end,
            _ => add_minutes(self.start, self.duration_minutes.max(1))
                .unwrap_or(NaiveDateTime::MAX),
        }
    }

    /// Length of the effective interval in whole minutes.
    pub fn span_minutes(&self) -> i64 {
        (self.end() - self.start).num_minutes().max(1)
    }
}

#[pymethods]
impl ScheduledInterval {
    #[new]
    #[pyo3(signature = (
        job_id,
        machine_id,
        start,
        duration_minutes,
        end=None,
        job_number=None,
        part=None,
        priority=None,
        requires_attendance=false
    ))]
    #[allow(clippy::too_many_arguments)]
    fn py_new(
        job_id: String,
        machine_id: String,
        start: NaiveDateTime,
        duration_minutes: i64,
        end: Option<NaiveDateTime>,
        job_number: Option<String>,
        part: Option<String>,
        priority: Option<i32>,
        requires_attendance: bool,
    ) -> Self {
        Self {
            job_id,
            machine_id,
            start,
            end,
            duration_minutes,
            job_number,
            part,
            priority,
            requires_attendance,
        }
    }

    #[pyo3(name = "effective_end")]
    fn py_effective_end(&self) -> NaiveDateTime {
        self.end()
    }

    fn __repr__(&self) -> String {
        format!(
            "ScheduledInterval(job_id={:?}, machine_id={:?}, start={}, end={})",
            self.job_id,
            self.machine_id,
            self.start,
            self.end()
        )
    }
}

/// How a user chose to relieve one conflict.
#[pyclass(eq, eq_int)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Move the job to after the interval that displaced it.
    PushBack,
    /// Remove the job's machine and time assignment.
    ReturnToQueue,
}

/// A computed move of an existing interval.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeMove {
    /// The interval as it was before the move.
    #[pyo3(get)]
    pub interval: ScheduledInterval,
    #[pyo3(get)]
    pub new_start: NaiveDateTime,
    #[pyo3(get)]
    pub new_end: NaiveDateTime,
    /// 1 for directly displaced jobs, n+1 for jobs displaced by a depth-n move.
    #[pyo3(get)]
    pub depth: u32,
}

#[pymethods]
impl CascadeMove {
    fn __repr__(&self) -> String {
        format!(
            "CascadeMove(job_id={:?}, new_start={}, new_end={}, depth={})",
            self.interval.job_id, self.new_start, self.new_end, self.depth
        )
    }
}

/// Output of the cascade resolver.
#[pyclass]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeResult {
    /// Accepted moves, breadth-first by depth then original start.
    #[pyo3(get)]
    pub moves: Vec<CascadeMove>,
    /// Some chain needed more than the allowed depth. Nothing may be committed.
    #[pyo3(get)]
    pub too_deep: bool,
}

#[pymethods]
impl CascadeResult {
    fn __repr__(&self) -> String {
        format!(
            "CascadeResult(moves={}, too_deep={})",
            self.moves.len(),
            self.too_deep
        )
    }
}

/// New or rescheduled placement of the job being edited.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementWrite {
    #[pyo3(get)]
    pub job_id: String,
    #[pyo3(get)]
    pub machine_id: String,
    #[pyo3(get)]
    pub start: NaiveDateTime,
    #[pyo3(get)]
    pub end: NaiveDateTime,
    #[pyo3(get)]
    pub duration_minutes: i64,
}

/// New times for a job displaced by the cascade.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeWrite {
    #[pyo3(get)]
    pub job_id: String,
    #[pyo3(get)]
    pub new_start: NaiveDateTime,
    #[pyo3(get)]
    pub new_end: NaiveDateTime,
}

/// Instruction to send a job back to the unscheduled pool.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueReturn {
    #[pyo3(get)]
    pub job_id: String,
    #[pyo3(get)]
    pub clear_machine: bool,
    #[pyo3(get)]
    pub clear_schedule: bool,
}

impl QueueReturn {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            clear_machine: true,
            clear_schedule: true,
        }
    }
}

/// Every mutation a committed placement asks the job store to apply.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPayload {
    #[pyo3(get)]
    pub placement: PlacementWrite,
    #[pyo3(get)]
    pub moves: Vec<CascadeWrite>,
    #[pyo3(get)]
    pub returns: Vec<QueueReturn>,
}

#[pymethods]
impl CommitPayload {
    fn __repr__(&self) -> String {
        format!(
            "CommitPayload(job_id={:?}, moves={}, returns={})",
            self.placement.job_id,
            self.moves.len(),
            self.returns.len()
        )
    }
}

/// A job's preference for a machine, with the expected run time there.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineHint {
    #[pyo3(get, set)]
    pub machine_id: String,
    #[pyo3(get, set)]
    pub estimated_minutes: Option<i64>,
}

#[pymethods]
impl MachineHint {
    #[new]
    #[pyo3(signature = (machine_id, estimated_minutes=None))]
    fn new(machine_id: String, estimated_minutes: Option<i64>) -> Self {
        Self {
            machine_id,
            estimated_minutes,
        }
    }
}
