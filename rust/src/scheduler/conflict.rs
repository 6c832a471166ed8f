//! Conflict detection and the per-conflict resolution set.

use chrono::NaiveDateTime;

use crate::models::{Resolution, ScheduledInterval};

use super::timeline::TimelineIndex;

/// Half-open overlap test: touching endpoints do not overlap.
#[inline]
pub fn overlaps(
    a_start: NaiveDateTime,
    a_end: NaiveDateTime,
    b_start: NaiveDateTime,
    b_end: NaiveDateTime,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// Existing intervals on `machine_id` that overlap `[start, end)`.
pub fn detect_conflicts(
    index: &TimelineIndex,
    machine_id: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
    exclude_job_id: Option<&str>,
) -> Vec<ScheduledInterval> {
    index
        .overlapping(machine_id, start, end, exclude_job_id)
        .into_iter()
        .cloned()
        .collect()
}

/// One conflicting interval and the resolution chosen for it, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConflictEntry {
    pub interval: ScheduledInterval,
    pub resolution: Option<Resolution>,
}

/// Conflicts produced by a candidate placement, in original start order.
///
/// The placement may only be committed once every entry has a resolution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConflictSet {
    entries: Vec<ConflictEntry>,
}

impl ConflictSet {
    /// Wrap detected conflicts with no resolutions assigned yet.
    pub fn new(conflicts: Vec<ScheduledInterval>) -> Self {
        let mut entries: Vec<ConflictEntry> = conflicts
            .into_iter()
            .map(|interval| ConflictEntry {
                interval,
                resolution: None,
            })
            .collect();
        entries.sort_by(|a, b| {
            a.interval
                .start
                .cmp(&b.interval.start)
                .then_with(|| a.interval.job_id.cmp(&b.interval.job_id))
        });
        Self { entries }
    }

    /// Wrap detected conflicts and assign resolutions looked up by job id.
    pub fn with_resolutions<F>(conflicts: Vec<ScheduledInterval>, mut lookup: F) -> Self
    where
        F: FnMut(&str) -> Option<Resolution>,
    {
        let mut set = Self::new(conflicts);
        for entry in &mut set.entries {
            entry.resolution = lookup(&entry.interval.job_id);
        }
        set
    }

    pub fn entries(&self) -> &[ConflictEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.entries.iter().any(|e| e.interval.job_id == job_id)
    }

    pub fn resolution(&self, job_id: &str) -> Option<Resolution> {
        self.entries
            .iter()
            .find(|e| e.interval.job_id == job_id)
            .and_then(|e| e.resolution)
    }

    /// Assign a resolution. Returns false if `job_id` is not a conflict.
    pub fn set_resolution(&mut self, job_id: &str, resolution: Resolution) -> bool {
        match self.entries.iter_mut().find(|e| e.interval.job_id == job_id) {
            Some(entry) => {
                entry.resolution = Some(resolution);
                true
            }
            None => false,
        }
    }

    /// Job ids still waiting for a resolution.
    pub fn unresolved_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.resolution.is_none())
            .map(|e| e.interval.job_id.clone())
            .collect()
    }

    pub fn is_fully_resolved(&self) -> bool {
        self.entries.iter().all(|e| e.resolution.is_some())
    }

    /// Conflicts resolved as push back, in original start order.
    pub fn pushed_back(&self) -> impl Iterator<Item = &ScheduledInterval> {
        self.with_resolution(Resolution::PushBack)
    }

    /// Conflicts resolved as return to queue, in original start order.
    pub fn returned_to_queue(&self) -> impl Iterator<Item = &ScheduledInterval> {
        self.with_resolution(Resolution::ReturnToQueue)
    }

    fn with_resolution(&self, wanted: Resolution) -> impl Iterator<Item = &ScheduledInterval> {
        self.entries
            .iter()
            .filter(move |e| e.resolution == Some(wanted))
            .map(|e| &e.interval)
    }
}
