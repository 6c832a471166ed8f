//! Press / move / release interactions on an existing interval.
//!
//! The preview is recomputed on every pointer update but nothing is checked until
//! release, where the Conflict Detector runs once.

use chrono::NaiveDateTime;

use crate::calendar::add_minutes;
use crate::config::SchedulerConfig;
use crate::models::ScheduledInterval;

use super::conflict::detect_conflicts;
use super::placement::PlacementCandidate;
use super::timeline::TimelineIndex;

/// What the drag changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DragMode {
    /// Shift the whole interval, keeping its length.
    Move,
    /// Drag the end edge, keeping the start.
    ResizeEnd,
}

/// Outcome of releasing a drag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DragRelease {
    pub candidate: PlacementCandidate,
    pub conflicts: Vec<ScheduledInterval>,
}

/// A drag in progress.
#[derive(Clone, Debug)]
pub struct DragSession {
    origin: ScheduledInterval,
    mode: DragMode,
    machine_id: String,
    granularity: i64,
    delta_minutes: i64,
}

impl DragSession {
    pub fn press(origin: ScheduledInterval, mode: DragMode, config: &SchedulerConfig) -> Self {
        Self {
            machine_id: origin.machine_id.clone(),
            origin,
            mode,
            granularity: i64::from(config.granularity_minutes.max(1)),
            delta_minutes: 0,
        }
    }

    pub fn mode(&self) -> DragMode {
        self.mode
    }

    /// Record the pointer's total offset from the press point, in minutes.
    ///
    /// Returns the snapped preview.
    pub fn update(&mut self, delta_minutes: i64) -> (NaiveDateTime, NaiveDateTime) {
        self.delta_minutes = delta_minutes;
        self.preview()
    }

    /// Move the dragged interval to another machine row. Only meaningful for `Move`.
    pub fn set_machine(&mut self, machine_id: impl Into<String>) {
        if self.mode == DragMode::Move {
            self.machine_id = machine_id.into();
        }
    }

    /// Current `[start, end)` with the offset snapped to the nearest granule.
    ///
    /// An offset that leaves the representable range previews the original interval.
    pub fn preview(&self) -> (NaiveDateTime, NaiveDateTime) {
        let snapped = self.snapped_delta();
        let span = self.origin.span_minutes();
        let moved = match self.mode {
            DragMode::Move => add_minutes(self.origin.start, snapped)
                .and_then(|start| Some((start, add_minutes(start, span)?))),
            DragMode::ResizeEnd => {
                let minutes = span.saturating_add(snapped).max(self.granularity);
                add_minutes(self.origin.start, minutes).map(|end| (self.origin.start, end))
            }
        };
        moved.unwrap_or((self.origin.start, self.origin.end()))
    }

    /// Finish the drag and check the final interval once.
    pub fn release(self, index: &TimelineIndex) -> DragRelease {
        let (start, end) = self.preview();
        let conflicts = detect_conflicts(
            index,
            &self.machine_id,
            start,
            end,
            Some(&self.origin.job_id),
        );
        DragRelease {
            candidate: PlacementCandidate {
                job_id: self.origin.job_id,
                machine_id: Some(self.machine_id),
                start: Some(start),
                duration_minutes: Some((end - start).num_minutes()),
            },
            conflicts,
        }
    }

    fn snapped_delta(&self) -> i64 {
        let g = self.granularity;
        self.delta_minutes
            .saturating_add(g / 2)
            .div_euclid(g)
            .saturating_mul(g)
    }
}
