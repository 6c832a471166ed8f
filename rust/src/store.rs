//! Applying a commit payload to the external job store.
//!
//! The engine never writes jobs itself. A [`JobStore`] implementation receives
//! "set to value" writes, so replaying a payload is safe. Writes are not rolled
//! back: the first failure stops the batch and names the job that failed.

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::log_changes;
use crate::models::{CascadeWrite, CommitPayload, PlacementWrite, ScheduledInterval};
use crate::scheduler::TimelineIndex;

/// Errors reported by a job store for a single write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    JobNotFound(String),
    #[error("Write rejected: {0}")]
    Write(String),
}

/// A commit stopped part-way through its batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to update job {job_id} after {applied} successful writes: {source}")]
pub struct CommitError {
    pub job_id: String,
    /// Writes applied (and left in place) before the failure.
    pub applied: usize,
    pub source: StoreError,
}

/// Persistence collaborator for scheduled jobs.
pub trait JobStore {
    /// Assign a job to a machine and time range.
    fn set_placement(&mut self, write: &PlacementWrite) -> Result<(), StoreError>;

    /// Change the times of a job already on a machine.
    fn set_times(&mut self, write: &CascadeWrite) -> Result<(), StoreError>;

    /// Clear a job's machine and schedule, returning it to the unscheduled pool.
    fn clear_schedule(&mut self, job_id: &str) -> Result<(), StoreError>;
}

/// Apply every mutation in `payload`: queue returns, then cascade moves, then
/// the placement itself. Returns the number of writes applied.
pub fn apply_commit<S>(
    store: &mut S,
    payload: &CommitPayload,
    verbosity: u8,
) -> Result<usize, CommitError>
where
    S: JobStore + ?Sized,
{
    let mut applied = 0;
    let fail = |job_id: &str, applied: usize, source: StoreError| {
        log_changes!(verbosity, "Commit failed on job {}: {}", job_id, source);
        CommitError {
            job_id: job_id.to_string(),
            applied,
            source,
        }
    };

    for ret in &payload.returns {
        store
            .clear_schedule(&ret.job_id)
            .map_err(|e| fail(&ret.job_id, applied, e))?;
        log_changes!(verbosity, "Returned job {} to queue", ret.job_id);
        applied += 1;
    }

    for write in &payload.moves {
        store
            .set_times(write)
            .map_err(|e| fail(&write.job_id, applied, e))?;
        log_changes!(
            verbosity,
            "Moved job {} to {}..{}",
            write.job_id,
            write.new_start,
            write.new_end
        );
        applied += 1;
    }

    let placement = &payload.placement;
    store
        .set_placement(placement)
        .map_err(|e| fail(&placement.job_id, applied, e))?;
    log_changes!(
        verbosity,
        "Placed job {} on {} at {}",
        placement.job_id,
        placement.machine_id,
        placement.start
    );
    applied += 1;

    Ok(applied)
}

/// Job store held in memory. Also serves as the snapshot source for tests and
/// offline runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InMemoryJobStore {
    scheduled: FxHashMap<String, ScheduledInterval>,
    queued: FxHashSet<String>,
    locked: FxHashSet<String>,
}

impl InMemoryJobStore {
    pub fn new<I>(intervals: I) -> Self
    where
        I: IntoIterator<Item = ScheduledInterval>,
    {
        Self {
            scheduled: intervals
                .into_iter()
                .map(|iv| (iv.job_id.clone(), iv))
                .collect(),
            ..Self::default()
        }
    }

    pub fn get(&self, job_id: &str) -> Option<&ScheduledInterval> {
        self.scheduled.get(job_id)
    }

    /// Whether the job sits in the unscheduled pool.
    pub fn is_queued(&self, job_id: &str) -> bool {
        self.queued.contains(job_id)
    }

    /// Reject further writes to `job_id`, as if another actor held it.
    pub fn lock(&mut self, job_id: impl Into<String>) {
        self.locked.insert(job_id.into());
    }

    pub fn unlock(&mut self, job_id: &str) {
        self.locked.remove(job_id);
    }

    /// Timeline snapshot of every scheduled job.
    pub fn snapshot(&self) -> TimelineIndex {
        TimelineIndex::new(self.scheduled.values().cloned())
    }

    fn check_lock(&self, job_id: &str) -> Result<(), StoreError> {
        if self.locked.contains(job_id) {
            return Err(StoreError::Write(format!("job {} is locked", job_id)));
        }
        Ok(())
    }
}

impl JobStore for InMemoryJobStore {
    fn set_placement(&mut self, write: &PlacementWrite) -> Result<(), StoreError> {
        self.check_lock(&write.job_id)?;
        let entry = self
            .scheduled
            .entry(write.job_id.clone())
            .or_insert_with(|| {
                ScheduledInterval::new(
                    write.job_id.clone(),
                    write.machine_id.clone(),
                    write.start,
                    write.duration_minutes,
                )
            });
        entry.machine_id = write.machine_id.clone();
        entry.start = write.start;
        entry.end = Some(write.end);
        entry.duration_minutes = write.duration_minutes;
        self.queued.remove(&write.job_id);
        Ok(())
    }

    fn set_times(&mut self, write: &CascadeWrite) -> Result<(), StoreError> {
        self.check_lock(&write.job_id)?;
        let entry = self
            .scheduled
            .get_mut(&write.job_id)
            .ok_or_else(|| StoreError::JobNotFound(write.job_id.clone()))?;
        entry.start = write.new_start;
        entry.end = Some(write.new_end);
        entry.duration_minutes = (write.new_end - write.new_start).num_minutes();
        Ok(())
    }

    fn clear_schedule(&mut self, job_id: &str) -> Result<(), StoreError> {
        self.check_lock(job_id)?;
        if self.scheduled.remove(job_id).is_none() && !self.queued.contains(job_id) {
            return Err(StoreError::JobNotFound(job_id.to_string()));
        }
        self.queued.insert(job_id.to_string());
        Ok(())
    }
}
