//! Bounded forward search for the next free, shift-aligned slot on a machine.
//!
//! This is the single slot search used by grid placement, rescheduling and the
//! placement validator's start suggestion.

use chrono::{Days, NaiveDate, NaiveDateTime};

use crate::calendar::{add_minutes, ShiftCalendar};
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::models::ScheduledInterval;
use crate::{log_changes, log_checks};

use super::conflict::overlaps;
use super::timeline::TimelineIndex;

/// A free interval found by the slot finder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AvailableSlot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl AvailableSlot {
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }
}

/// Start time to pre-fill, with an advisory when no free slot was found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotSuggestion {
    pub start: NaiveDateTime,
    pub found: bool,
    pub advisory: Option<String>,
}

/// Searches a machine's timeline day by day, up to the configured horizon.
pub struct SlotFinder<'a> {
    index: &'a TimelineIndex,
    calendar: ShiftCalendar,
    clock: &'a dyn Clock,
    horizon_days: u32,
    verbosity: u8,
}

impl<'a> SlotFinder<'a> {
    pub fn new(
        index: &'a TimelineIndex,
        config: &SchedulerConfig,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            index,
            calendar: config.calendar(),
            clock,
            horizon_days: config.search_horizon_days,
            verbosity: config.verbosity,
        }
    }

    /// First non-conflicting slot starting inside a shift window, or `None` when
    /// the horizon is exhausted.
    ///
    /// Days before today are never searched. On today the search starts no
    /// earlier than the current time rounded up to the granularity.
    ///
    /// `duration_minutes` below one is searched as a one-minute job, matching how
    /// [`ScheduledInterval::end`] treats open-ended jobs. Callers that must reject
    /// non-positive durations check them first. A duration whose end is not
    /// representable finds no slot.
    pub fn find_next_available(
        &self,
        machine_id: &str,
        from_date: NaiveDate,
        duration_minutes: i64,
        exclude_job_id: Option<&str>,
    ) -> Option<AvailableSlot> {
        let verbosity = self.verbosity;
        let now = self.clock.now();
        let today = now.date();
        let first_day = from_date.max(today);
        let minutes = duration_minutes.max(1);
        let intervals = self.index.intervals_for(machine_id, exclude_job_id);

        for offset in 0..self.horizon_days {
            let Some(day) = first_day.checked_add_days(Days::new(u64::from(offset))) else {
                break;
            };
            let shift_start = self.calendar.shift_start(day);
            let shift_end = self.calendar.shift_end(day);

            let mut candidate = if day == today {
                shift_start.max(self.calendar.round_up(now))
            } else {
                shift_start
            };
            if candidate >= shift_end {
                log_checks!(verbosity, "  {}: day already past shift end, skipping", day);
                continue;
            }

            // Each advance passes one interval's end, so every interval is visited at most once.
            loop {
                let Some(end) = add_minutes(candidate, minutes) else {
                    log_changes!(
                        verbosity,
                        "No slot on {}: {}m from {} is out of range",
                        machine_id,
                        minutes,
                        candidate
                    );
                    return None;
                };
                let Some(blocker) = first_overlap(&intervals, candidate, end) else {
                    break;
                };
                let next = self.calendar.round_up(blocker.end());
                log_checks!(
                    verbosity,
                    "  {}: {} overlaps job {}, advancing to {}",
                    day,
                    candidate.time(),
                    blocker.job_id,
                    next.time()
                );
                candidate = next;
                if candidate >= shift_end {
                    break;
                }
            }

            if candidate < shift_end {
                let end = add_minutes(candidate, minutes)?;
                log_changes!(verbosity, "Slot on {} for {}m: {}", machine_id, minutes, candidate);
                return Some(AvailableSlot {
                    start: candidate,
                    end,
                });
            }
        }

        log_changes!(
            verbosity,
            "No slot on {} within {} days of {}",
            machine_id,
            self.horizon_days,
            first_day
        );
        None
    }

    /// Start time to pre-fill a placement with.
    ///
    /// Falls back to the shift start of `from_date` with an advisory when the
    /// horizon holds no free slot.
    pub fn suggest(
        &self,
        machine_id: &str,
        from_date: NaiveDate,
        duration_minutes: i64,
        exclude_job_id: Option<&str>,
    ) -> SlotSuggestion {
        match self.find_next_available(machine_id, from_date, duration_minutes, exclude_job_id) {
            Some(slot) => SlotSuggestion {
                start: slot.start,
                found: true,
                advisory: None,
            },
            None => SlotSuggestion {
                start: self.calendar.shift_start(from_date),
                found: false,
                advisory: Some(format!(
                    "No free {}-minute slot on machine {} in the next {} days; using shift start on {}",
                    duration_minutes, machine_id, self.horizon_days, from_date
                )),
            },
        }
    }
}

fn first_overlap<'i>(
    intervals: &[&'i ScheduledInterval],
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Option<&'i ScheduledInterval> {
    intervals
        .iter()
        .take_while(|iv| iv.start < end)
        .find(|iv| overlaps(start, end, iv.start, iv.end()))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::Timelike;

    fn d(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn at(date: NaiveDate, hour: u32, minute: u32) -> NaiveDateTime {
        date.and_hms_opt(hour, minute, 0).unwrap()
    }

    fn job(id: &str, start: NaiveDateTime, minutes: i64) -> ScheduledInterval {
        ScheduledInterval::new(id, "m1", start, minutes)
    }

    #[test]
    fn test_slot_before_existing_job() {
        let today = d(2025, 3, 4);
        let index = TimelineIndex::new(vec![job("a", at(today, 9, 0), 120)]);
        let clock = FixedClock(at(today, 8, 0));
        let config = SchedulerConfig::default();
        let finder = SlotFinder::new(&index, &config, &clock);

        let slot = finder.find_next_available("m1", today, 60, None).unwrap();
        assert_eq!(slot.start, at(today, 8, 0));
        assert_eq!(slot.end, at(today, 9, 0));
    }

    #[test]
    fn test_non_positive_duration_searched_as_one_minute() {
        let today = d(2025, 3, 4);
        let index = TimelineIndex::new(vec![job("a", at(today, 7, 0), 60)]);
        let clock = FixedClock(at(today, 6, 0));
        let config = SchedulerConfig::default();
        let finder = SlotFinder::new(&index, &config, &clock);

        for minutes in [0, -30] {
            let slot = finder.find_next_available("m1", today, minutes, None).unwrap();
            assert_eq!(slot.start, at(today, 8, 0));
            assert_eq!(slot.end, at(today, 8, 1));
        }
    }

    #[test]
    fn test_out_of_range_duration_finds_nothing() {
        let today = d(2025, 3, 4);
        let index = TimelineIndex::default();
        let clock = FixedClock(at(today, 6, 0));
        let config = SchedulerConfig::default();
        let finder = SlotFinder::new(&index, &config, &clock);

        assert_eq!(
            finder.find_next_available("m1", today, 1_000_000_000_000, None),
            None
        );
        assert!(!finder.suggest("m1", today, i64::MAX, None).found);
    }

    #[test]
    fn test_endless_blocker_exhausts_horizon() {
        let today = d(2025, 3, 4);
        let index = TimelineIndex::new(vec![job("forever", at(today, 9, 0), 1_000_000_000_000)]);
        let clock = FixedClock(at(today, 6, 0));
        let config = SchedulerConfig::default();
        let finder = SlotFinder::new(&index, &config, &clock);

        let slot = finder.find_next_available("m1", today, 60, None).unwrap();
        assert_eq!(slot.start, at(today, 7, 0));
        assert_eq!(finder.find_next_available("m1", today, 180, None), None);
    }

    #[test]
    fn test_touching_jobs_are_not_a_gap() {
        let today = d(2025, 3, 4);
        let index = TimelineIndex::new(vec![
            job("a", at(today, 9, 0), 120),
            job("b", at(today, 11, 0), 60),
        ]);
        let clock = FixedClock(at(today, 8, 30));
        let config = SchedulerConfig::default();
        let finder = SlotFinder::new(&index, &config, &clock);

        let slot = finder.find_next_available("m1", today, 90, None).unwrap();
        assert_eq!(slot.start, at(today, 12, 0));
    }

    #[test]
    fn test_fully_booked_horizon_returns_none() {
        let today = d(2025, 3, 4);
        let booked: Vec<ScheduledInterval> = (0..30)
            .map(|i| {
                let day = today + Days::new(i);
                job(&format!("full{}", i), at(day, 7, 0), 9 * 60)
            })
            .collect();
        let index = TimelineIndex::new(booked);
        let clock = FixedClock(at(today, 6, 0));
        let config = SchedulerConfig::default();
        let finder = SlotFinder::new(&index, &config, &clock);

        assert_eq!(finder.find_next_available("m1", today, 15, None), None);

        let suggestion = finder.suggest("m1", today, 15, None);
        assert!(!suggestion.found);
        assert_eq!(suggestion.start, at(today, 7, 0));
        assert!(suggestion.advisory.is_some());
    }

    #[test]
    fn test_slot_found_after_booked_days() {
        let today = d(2025, 3, 4);
        let booked: Vec<ScheduledInterval> = (0..3)
            .map(|i| {
                let day = today + Days::new(i);
                job(&format!("full{}", i), at(day, 7, 0), 9 * 60)
            })
            .collect();
        let index = TimelineIndex::new(booked);
        let clock = FixedClock(at(today, 6, 0));
        let config = SchedulerConfig::default();
        let finder = SlotFinder::new(&index, &config, &clock);

        let slot = finder.find_next_available("m1", today, 60, None).unwrap();
        assert_eq!(slot.start, at(d(2025, 3, 7), 7, 0));
    }

    #[test]
    fn test_today_starts_at_rounded_now() {
        let today = d(2025, 3, 4);
        let index = TimelineIndex::default();
        let clock = FixedClock(at(today, 10, 7));
        let config = SchedulerConfig::default();
        let finder = SlotFinder::new(&index, &config, &clock);

        let slot = finder.find_next_available("m1", today, 30, None).unwrap();
        assert_eq!(slot.start, at(today, 10, 15));
    }

    #[test]
    fn test_today_after_shift_moves_to_tomorrow() {
        let today = d(2025, 3, 4);
        let index = TimelineIndex::default();
        let clock = FixedClock(at(today, 17, 30));
        let config = SchedulerConfig::default();
        let finder = SlotFinder::new(&index, &config, &clock);

        let slot = finder.find_next_available("m1", today, 30, None).unwrap();
        assert_eq!(slot.start, at(d(2025, 3, 5), 7, 0));
    }

    #[test]
    fn test_future_day_starts_at_shift_start() {
        let today = d(2025, 3, 4);
        let index = TimelineIndex::default();
        let clock = FixedClock(at(today, 13, 0));
        let config = SchedulerConfig::default();
        let finder = SlotFinder::new(&index, &config, &clock);

        let slot = finder
            .find_next_available("m1", d(2025, 3, 10), 30, None)
            .unwrap();
        assert_eq!(slot.start, at(d(2025, 3, 10), 7, 0));
    }

    #[test]
    fn test_past_from_date_clamped_to_today() {
        let today = d(2025, 3, 4);
        let index = TimelineIndex::default();
        let clock = FixedClock(at(today, 9, 0));
        let config = SchedulerConfig::default();
        let finder = SlotFinder::new(&index, &config, &clock);

        let slot = finder
            .find_next_available("m1", d(2025, 2, 1), 30, None)
            .unwrap();
        assert_eq!(slot.start, at(today, 9, 0));
    }

    #[test]
    fn test_excluded_job_frees_its_slot() {
        let today = d(2025, 3, 4);
        let index = TimelineIndex::new(vec![job("self", at(today, 7, 0), 60)]);
        let clock = FixedClock(at(today, 6, 0));
        let config = SchedulerConfig::default();
        let finder = SlotFinder::new(&index, &config, &clock);

        let with_self = finder.find_next_available("m1", today, 60, None).unwrap();
        assert_eq!(with_self.start, at(today, 8, 0));
        let without_self = finder
            .find_next_available("m1", today, 60, Some("self"))
            .unwrap();
        assert_eq!(without_self.start, at(today, 7, 0));
    }

    #[test]
    fn test_overnight_run_blocks_next_morning() {
        let today = d(2025, 3, 4);
        // Dark run from 14:00 to 09:10 the next day.
        let index = TimelineIndex::new(vec![job("dark", at(today, 14, 0), 19 * 60 + 10)]);
        let clock = FixedClock(at(today, 15, 0));
        let config = SchedulerConfig::default();
        let finder = SlotFinder::new(&index, &config, &clock);

        let slot = finder.find_next_available("m1", today, 60, None).unwrap();
        assert_eq!(slot.start, at(d(2025, 3, 5), 9, 15));
    }

    #[test]
    fn test_unaligned_job_end_rounds_up() {
        let today = d(2025, 3, 4);
        let index = TimelineIndex::new(vec![job("a", at(today, 7, 0), 50)]);
        let clock = FixedClock(at(today, 6, 0));
        let config = SchedulerConfig::default();
        let finder = SlotFinder::new(&index, &config, &clock);

        let slot = finder.find_next_available("m1", today, 30, None).unwrap();
        assert_eq!(slot.start, at(today, 8, 0));
    }

    #[test]
    fn test_results_stay_inside_shift_and_on_grid() {
        let today = d(2025, 3, 4);
        let mut jobs = Vec::new();
        for i in 0..10u64 {
            let day = today + Days::new(i / 3);
            let hour = 7 + (i as u32 * 3) % 9;
            let minute = (i as u32 * 7) % 60;
            jobs.push(job(&format!("j{}", i), at(day, hour, minute), 37 + 11 * i as i64));
        }
        let index = TimelineIndex::new(jobs);
        let config = SchedulerConfig::default();
        let calendar = config.calendar();

        for now_minute in (0..(24 * 60)).step_by(53) {
            let clock = FixedClock(at(today, now_minute / 60, now_minute % 60));
            let finder = SlotFinder::new(&index, &config, &clock);
            for duration in [15, 45, 90, 240] {
                if let Some(slot) = finder.find_next_available("m1", today, duration, None) {
                    assert!(calendar.is_within_shift(slot.start));
                    assert_eq!(slot.start.minute() % 15, 0);
                    assert_eq!(slot.start.second(), 0);
                    assert!(index
                        .overlapping("m1", slot.start, slot.end, None)
                        .is_empty());
                }
            }
        }
    }
}
