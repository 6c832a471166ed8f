//! Per-machine timeline snapshot with intervals sorted by start.

use chrono::NaiveDateTime;
use rustc_hash::FxHashMap;

use crate::models::ScheduledInterval;

use super::conflict::overlaps;

/// Read-only snapshot of every scheduled interval, grouped by machine.
///
/// Invariant: each machine's list is sorted by (start, job_id). This lets lookups
/// stop at the first interval starting at or after a window's end.
#[derive(Clone, Debug, Default)]
pub struct TimelineIndex {
    by_machine: FxHashMap<String, Vec<ScheduledInterval>>,
}

impl TimelineIndex {
    /// Build the index from a snapshot of scheduled jobs.
    pub fn new<I>(intervals: I) -> Self
    where
        I: IntoIterator<Item = ScheduledInterval>,
    {
        let mut by_machine: FxHashMap<String, Vec<ScheduledInterval>> = FxHashMap::default();
        for interval in intervals {
            by_machine
                .entry(interval.machine_id.clone())
                .or_default()
                .push(interval);
        }
        for list in by_machine.values_mut() {
            list.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.job_id.cmp(&b.job_id)));
        }
        Self { by_machine }
    }

    /// Total number of intervals across all machines.
    pub fn len(&self) -> usize {
        self.by_machine.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_machine.values().all(Vec::is_empty)
    }

    /// Machines that have at least one interval.
    pub fn machine_ids(&self) -> impl Iterator<Item = &str> {
        self.by_machine.keys().map(String::as_str)
    }

    /// Look up a job's current placement.
    pub fn get(&self, job_id: &str) -> Option<&ScheduledInterval> {
        self.by_machine
            .values()
            .flat_map(|list| list.iter())
            .find(|iv| iv.job_id == job_id)
    }

    /// All intervals on a machine sorted by start, minus `exclude_job_id`.
    pub fn intervals_for(
        &self,
        machine_id: &str,
        exclude_job_id: Option<&str>,
    ) -> Vec<&ScheduledInterval> {
        self.sorted(machine_id)
            .iter()
            .filter(|iv| Some(iv.job_id.as_str()) != exclude_job_id)
            .collect()
    }

    /// Intervals on a machine that overlap `[start, end)`, sorted by start.
    pub fn overlapping(
        &self,
        machine_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        exclude_job_id: Option<&str>,
    ) -> Vec<&ScheduledInterval> {
        let list = self.sorted(machine_id);
        // Nothing starting at or after `end` can overlap.
        let cutoff = list.partition_point(|iv| iv.start < end);
        list[..cutoff]
            .iter()
            .filter(|iv| Some(iv.job_id.as_str()) != exclude_job_id)
            .filter(|iv| overlaps(start, end, iv.start, iv.end()))
            .collect()
    }

    fn sorted(&self, machine_id: &str) -> &[ScheduledInterval] {
        self.by_machine
            .get(machine_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl FromIterator<ScheduledInterval> for TimelineIndex {
    fn from_iter<I: IntoIterator<Item = ScheduledInterval>>(iter: I) -> Self {
        Self::new(iter)
    }
}
