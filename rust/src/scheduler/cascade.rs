//! Breadth-first cascading push-back of displaced jobs.
//!
//! Jobs resolved as push back are re-placed after whatever displaced them. A
//! re-placed job that lands on other jobs displaces those in turn, one level
//! deeper. Jobs resolved as return to queue are removed from the timeline before
//! anything is computed.

use chrono::NaiveDateTime;
use rustc_hash::FxHashSet;

use crate::calendar::{add_minutes, ShiftCalendar};
use crate::config::SchedulerConfig;
use crate::models::{CascadeMove, CascadeResult, ScheduledInterval};
use crate::{log_changes, log_checks, log_debug};

use super::conflict::{overlaps, ConflictSet};
use super::placement::PlacementError;
use super::timeline::TimelineIndex;

/// A displaced job waiting to be re-placed.
struct PendingMove<'a> {
    interval: &'a ScheduledInterval,
    push_after: NaiveDateTime,
}

/// Computes the full chain of moves needed to relieve a placement's conflicts.
pub struct CascadeResolver<'a> {
    index: &'a TimelineIndex,
    calendar: ShiftCalendar,
    max_depth: u32,
    max_settle_iterations: u32,
    verbosity: u8,
}

impl<'a> CascadeResolver<'a> {
    pub fn new(index: &'a TimelineIndex, config: &SchedulerConfig) -> Self {
        Self {
            index,
            calendar: config.calendar(),
            max_depth: config.max_cascade_depth,
            max_settle_iterations: config.max_settle_iterations,
            verbosity: config.verbosity,
        }
    }

    /// Resolve the conflicts of a candidate `[candidate_start, candidate_end)` on
    /// `machine_id`.
    ///
    /// Every conflict must carry a resolution. Moves are accepted depth by depth,
    /// ordered by original start (then job id) within a depth. Items deeper than
    /// the depth limit are discarded and flag the result as `too_deep`; processing
    /// continues so the full extent of the problem is reported. A `too_deep`
    /// result must not be committed.
    pub fn resolve(
        &self,
        candidate_start: NaiveDateTime,
        candidate_end: NaiveDateTime,
        conflicts: &ConflictSet,
        machine_id: &str,
        exclude_job_id: Option<&str>,
    ) -> Result<CascadeResult, PlacementError> {
        let verbosity = self.verbosity;
        let unresolved = conflicts.unresolved_ids();
        if !unresolved.is_empty() {
            log_checks!(
                verbosity,
                "Refusing cascade on {}: unresolved conflicts {}",
                machine_id,
                unresolved.join(", ")
            );
            return Err(PlacementError::UnresolvedConflict {
                job_ids: unresolved,
            });
        }
        log_checks!(
            verbosity,
            "Resolving {} conflicts for {}..{} on {}",
            conflicts.len(),
            candidate_start,
            candidate_end,
            machine_id
        );

        let mut removed: FxHashSet<&str> = conflicts
            .returned_to_queue()
            .map(|iv| iv.job_id.as_str())
            .collect();
        if let Some(job_id) = exclude_job_id {
            removed.insert(job_id);
        }

        let timeline: Vec<&ScheduledInterval> = self
            .index
            .intervals_for(machine_id, None)
            .into_iter()
            .filter(|iv| !removed.contains(iv.job_id.as_str()))
            .collect();

        let mut seen: FxHashSet<&str> = FxHashSet::default();
        let mut level: Vec<PendingMove> = Vec::new();
        for interval in conflicts.pushed_back() {
            if removed.contains(interval.job_id.as_str()) {
                continue;
            }
            if seen.insert(interval.job_id.as_str()) {
                level.push(PendingMove {
                    interval,
                    push_after: candidate_end,
                });
            }
        }

        let mut result = CascadeResult::default();
        let mut depth: u32 = 1;

        while !level.is_empty() {
            level.sort_by(|a, b| {
                a.interval
                    .start
                    .cmp(&b.interval.start)
                    .then_with(|| a.interval.job_id.cmp(&b.interval.job_id))
            });
            let mut next_level = Vec::new();

            for pending in level {
                let job_id = pending.interval.job_id.as_str();
                if depth > self.max_depth {
                    log_changes!(
                        verbosity,
                        "Cascade too deep: job {} would be displaced at depth {} (max {})",
                        job_id,
                        depth,
                        self.max_depth
                    );
                    result.too_deep = true;
                    continue;
                }

                let span = pending.interval.span_minutes();
                let Some((new_start, new_end)) =
                    self.settle(&result.moves, pending.push_after, span)
                else {
                    log_changes!(
                        verbosity,
                        "Job {} found no free start within {} attempts",
                        job_id,
                        self.max_settle_iterations
                    );
                    result.too_deep = true;
                    continue;
                };

                log_changes!(
                    verbosity,
                    "Cascade depth {}: job {} {} -> {}",
                    depth,
                    job_id,
                    pending.interval.start,
                    new_start
                );

                for &other in &timeline {
                    if seen.contains(other.job_id.as_str()) {
                        continue;
                    }
                    if overlaps(other.start, other.end(), new_start, new_end) {
                        seen.insert(other.job_id.as_str());
                        next_level.push(PendingMove {
                            interval: other,
                            push_after: new_end,
                        });
                    }
                }

                result.moves.push(CascadeMove {
                    interval: pending.interval.clone(),
                    new_start,
                    new_end,
                    depth,
                });
            }

            level = next_level;
            depth = depth.saturating_add(1);
        }

        Ok(result)
    }

    /// Earliest valid `[start, end)` at or after `push_after` that clears every
    /// accepted move. `None` when the guard runs out or the end is not representable.
    fn settle(
        &self,
        accepted: &[CascadeMove],
        push_after: NaiveDateTime,
        span_minutes: i64,
    ) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let mut candidate = self.calendar.snap_to_shift_start(push_after);
        for attempt in 0..self.max_settle_iterations {
            let end = add_minutes(candidate, span_minutes)?;
            match accepted
                .iter()
                .find(|m| overlaps(candidate, end, m.new_start, m.new_end))
            {
                None => return Some((candidate, end)),
                Some(blocking) => {
                    log_debug!(
                        self.verbosity,
                        "    settle #{}: {} blocked by {}, retrying at {}",
                        attempt,
                        candidate,
                        blocking.interval.job_id,
                        blocking.new_end
                    );
                    candidate = self.calendar.snap_to_shift_start(blocking.new_end);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Resolution;
    use crate::scheduler::conflict::detect_conflicts;
    use chrono::NaiveDate;

    fn d(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        d(2025, 3, 4).and_hms_opt(hour, minute, 0).unwrap()
    }

    fn job(id: &str, hour: u32, minute: u32, minutes: i64) -> ScheduledInterval {
        ScheduledInterval::new(id, "m1", at(hour, minute), minutes)
    }

    fn resolve_all(
        index: &TimelineIndex,
        config: &SchedulerConfig,
        start: NaiveDateTime,
        end: NaiveDateTime,
        choose: impl FnMut(&str) -> Option<Resolution>,
    ) -> CascadeResult {
        let found = detect_conflicts(index, "m1", start, end, None);
        let set = ConflictSet::with_resolutions(found, choose);
        CascadeResolver::new(index, config)
            .resolve(start, end, &set, "m1", None)
            .unwrap()
    }

    fn summary(result: &CascadeResult) -> Vec<(String, NaiveDateTime, NaiveDateTime, u32)> {
        result
            .moves
            .iter()
            .map(|m| (m.interval.job_id.clone(), m.new_start, m.new_end, m.depth))
            .collect()
    }

    #[test]
    fn test_single_push_back() {
        let index = TimelineIndex::new(vec![job("a", 10, 0, 30)]);
        let config = SchedulerConfig::default();
        let result = resolve_all(&index, &config, at(9, 0), at(11, 0), |_| {
            Some(Resolution::PushBack)
        });

        assert!(!result.too_deep);
        assert_eq!(
            summary(&result),
            vec![("a".to_string(), at(11, 0), at(11, 30), 1)]
        );
    }

    #[test]
    fn test_chain_beyond_max_depth_is_too_deep() {
        let index = TimelineIndex::new(vec![
            job("j1", 9, 0, 60),
            job("j2", 10, 0, 60),
            job("j3", 11, 0, 60),
            job("j4", 12, 0, 60),
        ]);
        let config = SchedulerConfig::default();
        let result = resolve_all(&index, &config, at(9, 0), at(10, 0), |_| {
            Some(Resolution::PushBack)
        });

        assert!(result.too_deep);
        assert!(result.moves.iter().all(|m| m.depth <= config.max_cascade_depth));
        assert_eq!(
            summary(&result),
            vec![
                ("j1".to_string(), at(10, 0), at(11, 0), 1),
                ("j2".to_string(), at(11, 0), at(12, 0), 2),
                ("j3".to_string(), at(12, 0), at(13, 0), 3),
            ]
        );
    }

    #[test]
    fn test_chain_within_depth_is_accepted() {
        let index = TimelineIndex::new(vec![
            job("j1", 9, 0, 60),
            job("j2", 10, 0, 60),
            job("j3", 11, 0, 60),
        ]);
        let config = SchedulerConfig::default();
        let result = resolve_all(&index, &config, at(9, 0), at(10, 0), |_| {
            Some(Resolution::PushBack)
        });

        assert!(!result.too_deep);
        assert_eq!(result.moves.len(), 3);
        assert_eq!(result.moves[2].depth, 3);
    }

    #[test]
    fn test_return_to_queue_vanishes() {
        let index = TimelineIndex::new(vec![job("j1", 9, 0, 60), job("j2", 10, 0, 60)]);
        let config = SchedulerConfig::default();
        let result = resolve_all(&index, &config, at(9, 0), at(10, 0), |_| {
            Some(Resolution::ReturnToQueue)
        });

        assert!(!result.too_deep);
        assert!(result.moves.is_empty());
    }

    #[test]
    fn test_returned_job_is_not_displaced_downstream() {
        // b returns to queue; a is pushed to 10:00 where b used to sit.
        let index = TimelineIndex::new(vec![
            job("a", 9, 0, 30),
            job("b", 9, 30, 30),
            job("c", 10, 30, 60),
        ]);
        let config = SchedulerConfig::default();
        let result = resolve_all(&index, &config, at(9, 0), at(10, 0), |id| {
            Some(if id == "b" {
                Resolution::ReturnToQueue
            } else {
                Resolution::PushBack
            })
        });

        assert!(!result.too_deep);
        assert_eq!(
            summary(&result),
            vec![("a".to_string(), at(10, 0), at(10, 30), 1)]
        );
    }

    #[test]
    fn test_breadth_first_order_and_settling() {
        let index = TimelineIndex::new(vec![
            job("a", 9, 0, 60),
            job("b", 10, 0, 30),
            job("c", 11, 30, 30),
        ]);
        let config = SchedulerConfig::default();
        let result = resolve_all(&index, &config, at(9, 0), at(11, 0), |_| {
            Some(Resolution::PushBack)
        });

        assert!(!result.too_deep);
        assert_eq!(
            summary(&result),
            vec![
                ("a".to_string(), at(11, 0), at(12, 0), 1),
                ("b".to_string(), at(12, 0), at(12, 30), 1),
                ("c".to_string(), at(12, 30), at(13, 0), 2),
            ]
        );
    }

    #[test]
    fn test_unresolved_conflict_is_rejected() {
        let index = TimelineIndex::new(vec![job("a", 10, 0, 30), job("u", 10, 30, 60)]);
        let config = SchedulerConfig::default();
        let found = detect_conflicts(&index, "m1", at(9, 0), at(11, 0), None);
        let set = ConflictSet::with_resolutions(found, |id| {
            (id == "a").then_some(Resolution::PushBack)
        });

        let err = CascadeResolver::new(&index, &config)
            .resolve(at(9, 0), at(11, 0), &set, "m1", None)
            .unwrap_err();
        assert_eq!(
            err,
            PlacementError::UnresolvedConflict {
                job_ids: vec!["u".to_string()]
            }
        );
    }

    #[test]
    fn test_moves_ordered_by_start_within_depth() {
        let index = TimelineIndex::new(vec![
            job("a", 8, 0, 45),
            job("b", 8, 45, 90),
            job("c", 10, 0, 30),
            job("d", 10, 30, 20),
            job("e", 11, 0, 60),
            job("f", 13, 0, 15),
            job("g", 13, 10, 40),
        ]);
        let config = SchedulerConfig {
            max_cascade_depth: 10,
            ..SchedulerConfig::default()
        };
        let result = resolve_all(&index, &config, at(8, 30), at(10, 15), |_| {
            Some(Resolution::PushBack)
        });

        assert!(!result.too_deep);
        for pair in result.moves.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert!(prev.depth <= next.depth);
            if prev.depth == next.depth {
                assert!(prev.interval.start <= next.interval.start);
            }
        }
    }

    #[test]
    fn test_unrepresentable_span_marks_too_deep() {
        let index = TimelineIndex::new(vec![
            job("endless", 9, 0, 1_000_000_000_000),
            job("a", 10, 0, 30),
        ]);
        let config = SchedulerConfig::default();
        let result = resolve_all(&index, &config, at(9, 0), at(11, 0), |_| {
            Some(Resolution::PushBack)
        });

        assert!(result.too_deep);
        assert!(result.moves.iter().all(|m| m.interval.job_id != "endless"));
    }

    #[test]
    fn test_settle_guard_marks_too_deep() {
        let index = TimelineIndex::new(vec![job("a", 9, 0, 60), job("b", 10, 0, 30)]);
        let config = SchedulerConfig {
            max_settle_iterations: 1,
            ..SchedulerConfig::default()
        };
        let result = resolve_all(&index, &config, at(9, 0), at(11, 0), |_| {
            Some(Resolution::PushBack)
        });

        assert!(result.too_deep);
        assert_eq!(result.moves.len(), 1);
        assert_eq!(result.moves[0].interval.job_id, "a");
    }

    #[test]
    fn test_push_past_shift_end_rolls_to_next_day() {
        let index = TimelineIndex::new(vec![job("late", 14, 0, 60)]);
        let config = SchedulerConfig::default();
        let result = resolve_all(&index, &config, at(13, 0), at(16, 0), |_| {
            Some(Resolution::PushBack)
        });

        let next_morning = d(2025, 3, 5).and_hms_opt(7, 0, 0).unwrap();
        assert_eq!(result.moves[0].new_start, next_morning);
    }

    #[test]
    fn test_unaligned_push_after_is_snapped() {
        let index = TimelineIndex::new(vec![job("a", 9, 30, 30)]);
        let config = SchedulerConfig::default();
        let result = resolve_all(&index, &config, at(9, 0), at(10, 5), |_| {
            Some(Resolution::PushBack)
        });
        assert_eq!(result.moves[0].new_start, at(10, 15));
    }

    #[test]
    fn test_final_timeline_is_pairwise_non_overlapping() {
        let jobs = vec![
            job("a", 8, 0, 45),
            job("b", 8, 45, 90),
            job("c", 10, 0, 30),
            job("d", 10, 30, 20),
            job("e", 11, 0, 60),
            job("f", 13, 0, 15),
            job("g", 13, 10, 40),
        ];
        let index = TimelineIndex::new(jobs.clone());
        let config = SchedulerConfig {
            max_cascade_depth: 10,
            ..SchedulerConfig::default()
        };
        let (start, end) = (at(8, 30), at(10, 15));
        let result = resolve_all(&index, &config, start, end, |_| Some(Resolution::PushBack));
        assert!(!result.too_deep);

        let mut final_intervals: Vec<(String, NaiveDateTime, NaiveDateTime)> =
            vec![("candidate".to_string(), start, end)];
        for original in &jobs {
            match result.moves.iter().find(|m| m.interval.job_id == original.job_id) {
                Some(m) => final_intervals.push((original.job_id.clone(), m.new_start, m.new_end)),
                None => final_intervals.push((
                    original.job_id.clone(),
                    original.start,
                    original.end(),
                )),
            }
        }

        for (i, (id_a, s1, e1)) in final_intervals.iter().enumerate() {
            for (id_b, s2, e2) in final_intervals.iter().skip(i + 1) {
                assert!(
                    !overlaps(*s1, *e1, *s2, *e2),
                    "{} and {} overlap after cascade",
                    id_a,
                    id_b
                );
            }
        }
    }
}
