//! Placement validation state machine.
//!
//! ```text
//! Draft -> Checking -> Clean ----------------------------> Committed
//!                   \-> Conflicted -> Resolving -> Resolved -> Committed
//! ```
//! Any candidate change re-enters `Checking` and drops previously chosen
//! resolutions. Commit is refused while a conflict is unresolved or the cascade
//! is too deep.

use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;
use thiserror::Error;

use crate::calendar::add_minutes;
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::models::{
    CascadeResult, CascadeWrite, CommitPayload, PlacementWrite, QueueReturn, Resolution,
};
use crate::log_checks;

use super::cascade::CascadeResolver;
use super::conflict::{detect_conflicts, ConflictSet};
use super::slot_finder::{SlotFinder, SlotSuggestion};
use super::timeline::TimelineIndex;

/// A missing or malformed input field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that block a placement from being committed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    #[error("Invalid placement: {}", join_fields(.0))]
    Input(Vec<FieldError>),
    #[error("Conflicts need a resolution: {}", .job_ids.join(", "))]
    UnresolvedConflict { job_ids: Vec<String> },
    #[error("Cascade deeper than {max_depth} levels; return at least one job to the queue instead")]
    CascadeTooDeep { max_depth: u32 },
    #[error("Job {0} is not in conflict with this placement")]
    UnknownConflict(String),
    #[error("Placement cannot be committed while {0}")]
    NotCommittable(PlacementState),
    #[error("Placement was already committed")]
    AlreadyCommitted,
}

/// Lifecycle of one placement interaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlacementState {
    Draft,
    Checking,
    Clean,
    Conflicted,
    Resolving,
    Resolved,
    Committed,
}

impl PlacementState {
    pub fn can_commit(self) -> bool {
        matches!(self, Self::Clean | Self::Resolved)
    }
}

impl fmt::Display for PlacementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::Checking => "checking",
            Self::Clean => "clean",
            Self::Conflicted => "conflicted",
            Self::Resolving => "resolving",
            Self::Resolved => "resolved",
            Self::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// What the user is currently editing. Any field may still be missing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlacementCandidate {
    pub job_id: String,
    pub machine_id: Option<String>,
    pub start: Option<NaiveDateTime>,
    pub duration_minutes: Option<i64>,
}

impl PlacementCandidate {
    pub fn new(
        job_id: impl Into<String>,
        machine_id: impl Into<String>,
        start: NaiveDateTime,
        duration_minutes: i64,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            machine_id: Some(machine_id.into()),
            start: Some(start),
            duration_minutes: Some(duration_minutes),
        }
    }

    /// Check required fields, collecting every field-level problem.
    pub fn validate(&self) -> Result<ValidCandidate, PlacementError> {
        let mut errors = Vec::new();
        if self.job_id.trim().is_empty() {
            errors.push(FieldError::new("job_id", "a job is required"));
        }
        let machine_id = match self.machine_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Some(id.to_string()),
            _ => {
                errors.push(FieldError::new("machine_id", "a machine is required"));
                None
            }
        };
        if self.start.is_none() {
            errors.push(FieldError::new("start", "a start time is required"));
        }
        let duration_minutes = match self.duration_minutes {
            Some(minutes) if minutes > 0 => Some(minutes),
            Some(minutes) => {
                errors.push(FieldError::new(
                    "duration_minutes",
                    format!("duration must be positive, got {}", minutes),
                ));
                None
            }
            None => {
                errors.push(FieldError::new("duration_minutes", "a duration is required"));
                None
            }
        };

        let end = match (self.start, duration_minutes) {
            (Some(start), Some(minutes)) => {
                let end = add_minutes(start, minutes);
                if end.is_none() {
                    errors.push(FieldError::new("duration_minutes", "duration out of range"));
                }
                end
            }
            _ => None,
        };

        match (machine_id, self.start, end, duration_minutes) {
            (Some(machine_id), Some(start), Some(end), Some(duration_minutes))
                if errors.is_empty() =>
            {
                Ok(ValidCandidate {
                    job_id: self.job_id.clone(),
                    machine_id,
                    start,
                    end,
                    duration_minutes,
                })
            }
            _ => Err(PlacementError::Input(errors)),
        }
    }
}

/// A candidate whose required fields are all present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidCandidate {
    pub job_id: String,
    pub machine_id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration_minutes: i64,
}

/// Conflicts of a candidate against the snapshot, with no resolutions chosen.
///
/// The candidate's own job is excluded so a reschedule never conflicts with its
/// prior placement.
pub fn recompute(
    index: &TimelineIndex,
    candidate: &PlacementCandidate,
) -> Result<ConflictSet, PlacementError> {
    let valid = candidate.validate()?;
    Ok(ConflictSet::new(detect_conflicts(
        index,
        &valid.machine_id,
        valid.start,
        valid.end,
        Some(&valid.job_id),
    )))
}

/// Drives one placement from draft to commit.
pub struct PlacementValidator<'a> {
    index: &'a TimelineIndex,
    config: SchedulerConfig,
    state: PlacementState,
    candidate: Option<ValidCandidate>,
    conflicts: ConflictSet,
    cascade: Option<CascadeResult>,
}

impl<'a> PlacementValidator<'a> {
    pub fn new(index: &'a TimelineIndex, config: &SchedulerConfig) -> Self {
        Self {
            index,
            config: config.clone(),
            state: PlacementState::Draft,
            candidate: None,
            conflicts: ConflictSet::default(),
            cascade: None,
        }
    }

    pub fn state(&self) -> PlacementState {
        self.state
    }

    pub fn candidate(&self) -> Option<&ValidCandidate> {
        self.candidate.as_ref()
    }

    pub fn conflicts(&self) -> &ConflictSet {
        &self.conflicts
    }

    /// Cascade computed once every conflict had a resolution.
    pub fn cascade(&self) -> Option<&CascadeResult> {
        self.cascade.as_ref()
    }

    /// Replace the candidate and recompute its conflicts.
    ///
    /// Input errors leave the validator in `Draft`.
    pub fn update(
        &mut self,
        candidate: &PlacementCandidate,
    ) -> Result<PlacementState, PlacementError> {
        if self.state == PlacementState::Committed {
            return Err(PlacementError::AlreadyCommitted);
        }
        self.cascade = None;
        self.conflicts = ConflictSet::default();

        let valid = match candidate.validate() {
            Ok(valid) => valid,
            Err(e) => {
                self.candidate = None;
                self.set_state(PlacementState::Draft);
                return Err(e);
            }
        };

        self.set_state(PlacementState::Checking);
        self.conflicts = ConflictSet::new(detect_conflicts(
            self.index,
            &valid.machine_id,
            valid.start,
            valid.end,
            Some(&valid.job_id),
        ));
        self.candidate = Some(valid);

        let next = if self.conflicts.is_empty() {
            PlacementState::Clean
        } else {
            PlacementState::Conflicted
        };
        self.set_state(next);
        Ok(next)
    }

    /// Assign a resolution to one conflict.
    ///
    /// Once every conflict has one, the cascade is computed; the state becomes
    /// `Resolved` unless the cascade is too deep.
    pub fn resolve(
        &mut self,
        job_id: &str,
        resolution: Resolution,
    ) -> Result<PlacementState, PlacementError> {
        if self.state == PlacementState::Committed {
            return Err(PlacementError::AlreadyCommitted);
        }
        if !self.conflicts.set_resolution(job_id, resolution) {
            return Err(PlacementError::UnknownConflict(job_id.to_string()));
        }

        let next = match (&self.candidate, self.conflicts.is_fully_resolved()) {
            (Some(candidate), true) => {
                let result = CascadeResolver::new(self.index, &self.config).resolve(
                    candidate.start,
                    candidate.end,
                    &self.conflicts,
                    &candidate.machine_id,
                    Some(&candidate.job_id),
                )?;
                let next = if result.too_deep {
                    PlacementState::Resolving
                } else {
                    PlacementState::Resolved
                };
                self.cascade = Some(result);
                next
            }
            _ => {
                self.cascade = None;
                PlacementState::Resolving
            }
        };
        self.set_state(next);
        Ok(next)
    }

    /// Pre-fill a start time for `candidate` using the shared slot finder.
    ///
    /// Only the machine and duration need to be present.
    pub fn suggest_start(
        &self,
        candidate: &PlacementCandidate,
        from_date: NaiveDate,
        clock: &dyn Clock,
    ) -> Result<SlotSuggestion, PlacementError> {
        let start = candidate
            .start
            .unwrap_or_else(|| self.config.calendar().shift_start(from_date));
        let filled = PlacementCandidate {
            start: Some(start),
            ..candidate.clone()
        };
        let valid = filled.validate()?;
        let finder = SlotFinder::new(self.index, &self.config, clock);
        Ok(finder.suggest(
            &valid.machine_id,
            from_date,
            valid.duration_minutes,
            Some(&valid.job_id),
        ))
    }

    /// Emit the mutations for this placement and close the interaction.
    pub fn commit(&mut self) -> Result<CommitPayload, PlacementError> {
        match self.state {
            PlacementState::Committed => return Err(PlacementError::AlreadyCommitted),
            PlacementState::Conflicted | PlacementState::Resolving => {
                let unresolved = self.conflicts.unresolved_ids();
                if !unresolved.is_empty() {
                    return Err(PlacementError::UnresolvedConflict {
                        job_ids: unresolved,
                    });
                }
                if self.cascade.as_ref().is_some_and(|c| c.too_deep) {
                    return Err(PlacementError::CascadeTooDeep {
                        max_depth: self.config.max_cascade_depth,
                    });
                }
                return Err(PlacementError::NotCommittable(self.state));
            }
            state if !state.can_commit() => return Err(PlacementError::NotCommittable(state)),
            _ => {}
        }

        let Some(candidate) = self.candidate.as_ref() else {
            return Err(PlacementError::NotCommittable(self.state));
        };

        let moves = self
            .cascade
            .as_ref()
            .map(|c| {
                c.moves
                    .iter()
                    .map(|m| CascadeWrite {
                        job_id: m.interval.job_id.clone(),
                        new_start: m.new_start,
                        new_end: m.new_end,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let returns = self
            .conflicts
            .returned_to_queue()
            .map(|iv| QueueReturn::new(iv.job_id.clone()))
            .collect();

        let payload = CommitPayload {
            placement: PlacementWrite {
                job_id: candidate.job_id.clone(),
                machine_id: candidate.machine_id.clone(),
                start: candidate.start,
                end: candidate.end,
                duration_minutes: candidate.duration_minutes,
            },
            moves,
            returns,
        };
        self.set_state(PlacementState::Committed);
        Ok(payload)
    }

    fn set_state(&mut self, next: PlacementState) {
        if self.state != next {
            log_checks!(self.config.verbosity, "Placement {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

/// Validate a candidate in one shot, applying resolutions looked up by job id.
pub fn plan_placement<F>(
    index: &TimelineIndex,
    config: &SchedulerConfig,
    candidate: &PlacementCandidate,
    mut resolution_for: F,
) -> Result<CommitPayload, PlacementError>
where
    F: FnMut(&str) -> Option<Resolution>,
{
    let mut validator = PlacementValidator::new(index, config);
    validator.update(candidate)?;
    let job_ids: Vec<String> = validator
        .conflicts()
        .entries()
        .iter()
        .map(|e| e.interval.job_id.clone())
        .collect();
    for job_id in job_ids {
        if let Some(resolution) = resolution_for(&job_id) {
            validator.resolve(&job_id, resolution)?;
        }
    }
    validator.commit()
}
