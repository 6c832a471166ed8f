//! Daily shift window and start-time alignment.
//!
//! Every day has exactly one shift window `[start_hour, end_hour)`. New placements
//! must start inside the window on a multiple of the granularity; intervals are
//! free to run past the window's end.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// `start` offset by `minutes`, or `None` when the result is not representable.
pub fn add_minutes(start: NaiveDateTime, minutes: i64) -> Option<NaiveDateTime> {
    Duration::try_minutes(minutes).and_then(|delta| start.checked_add_signed(delta))
}

/// Shift window plus start-time granularity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShiftCalendar {
    start_hour: u32,
    end_hour: u32,
    granularity_minutes: u32,
}

impl Default for ShiftCalendar {
    fn default() -> Self {
        Self::new(7, 16, 15)
    }
}

impl ShiftCalendar {
    /// Create a calendar. Hours are validated by `SchedulerConfig::validate`.
    pub fn new(start_hour: u32, end_hour: u32, granularity_minutes: u32) -> Self {
        Self {
            start_hour,
            end_hour,
            granularity_minutes: granularity_minutes.max(1),
        }
    }

    pub fn granularity_minutes(&self) -> u32 {
        self.granularity_minutes
    }

    /// Opening instant of the shift on `date`.
    pub fn shift_start(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(NaiveTime::MIN) + Duration::hours(i64::from(self.start_hour))
    }

    /// Closing instant (exclusive) of the shift on `date`.
    ///
    /// An end hour of 24 yields the following midnight.
    pub fn shift_end(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(NaiveTime::MIN) + Duration::hours(i64::from(self.end_hour))
    }

    /// Whether `time` lies in `[shift_start, shift_end)` of its own day.
    pub fn is_within_shift(&self, time: NaiveDateTime) -> bool {
        let date = time.date();
        time >= self.shift_start(date) && time < self.shift_end(date)
    }

    /// Whether `time` sits exactly on the granularity grid.
    pub fn is_aligned(&self, time: NaiveDateTime) -> bool {
        time.second() == 0
            && time.nanosecond() == 0
            && (time.hour() * 60 + time.minute()) % self.granularity_minutes == 0
    }

    /// Whether a new placement may start at `time`.
    pub fn is_valid_start_time(&self, time: NaiveDateTime) -> bool {
        self.is_within_shift(time) && self.is_aligned(time)
    }

    /// Round `time` up to the next multiple of the granularity (identity when aligned).
    ///
    /// Saturates at `NaiveDateTime::MAX`.
    pub fn round_up(&self, time: NaiveDateTime) -> NaiveDateTime {
        if self.is_aligned(time) {
            return time;
        }
        let midnight = time.date().and_time(NaiveTime::MIN);
        let step = i64::from(self.granularity_minutes) * 60;
        let mut secs = i64::from(time.num_seconds_from_midnight());
        if time.nanosecond() > 0 {
            secs += 1;
        }
        let rounded = (secs + step - 1) / step * step;
        midnight
            .checked_add_signed(Duration::seconds(rounded))
            .unwrap_or(NaiveDateTime::MAX)
    }

    /// Earliest valid start at or after `time`.
    ///
    /// Before the shift: that day's shift start. At or after the shift end: the next
    /// day's shift start. Otherwise rounded up to the granularity; a rounding that
    /// lands on the shift end also rolls to the next day.
    pub fn snap_to_shift_start(&self, time: NaiveDateTime) -> NaiveDateTime {
        let date = time.date();
        let start = self.shift_start(date);
        if time < start {
            return start;
        }
        let end = self.shift_end(date);
        if time >= end {
            return self.next_day_start(date);
        }
        let rounded = self.round_up(time);
        if rounded >= end {
            return self.next_day_start(date);
        }
        rounded
    }

    fn next_day_start(&self, date: NaiveDate) -> NaiveDateTime {
        match date.succ_opt() {
            Some(next) => self.shift_start(next),
            None => self.shift_start(date),
        }
    }
}
