//! Exchange Calendar - US Eastern time with the post-2007 DST rule
//!
//! Standard time is UTC-5, daylight time is UTC-4. Daylight time starts at
//! 02:00 local on the second Sunday of March and ends at 02:00 local on the
//! first Sunday of November.
//!
//! Both directions decide DST from a *local* clock reading. `to_local` reads
//! the rule at the standard-time wall clock (instant - 5h), so on the November
//! transition day the instants 06:00-06:59 UTC come out as 02:xx instead of
//! 01:xx, and those instants do not round-trip. Every other instant does.

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc,
    Weekday,
};

pub const STANDARD_OFFSET_HOURS: i64 = 5;
pub const DAYLIGHT_OFFSET_HOURS: i64 = 4;

/// Local clock hour at which DST starts and ends
const TRANSITION_HOUR: u32 = 2;

/// Session boundaries, seconds from local midnight
pub const PREMARKET_START_SECS: u32 = 4 * 3600;
pub const REGULAR_OPEN_SECS: u32 = 9 * 3600 + 30 * 60;
pub const REGULAR_CLOSE_SECS: u32 = 16 * 3600;

/// Nth occurrence of `weekday` in a month (n = 1 is the first)
pub fn nth_weekday_of_month(year: i32, month: u32, weekday: Weekday, n: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let offset = (weekday.num_days_from_sunday() + 7 - first.weekday().num_days_from_sunday()) % 7;
    let day = 1 + offset + 7 * n.checked_sub(1)?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Whether a local wall-clock reading falls in daylight time
pub fn is_daylight(local: NaiveDateTime) -> bool {
    let year = local.year();
    let start = nth_weekday_of_month(year, 3, Weekday::Sun, 2)
        .and_then(|d| d.and_hms_opt(TRANSITION_HOUR, 0, 0));
    let end = nth_weekday_of_month(year, 11, Weekday::Sun, 1)
        .and_then(|d| d.and_hms_opt(TRANSITION_HOUR, 0, 0));

    match (start, end) {
        (Some(start), Some(end)) => local >= start && local < end,
        _ => false,
    }
}

/// UTC offset in hours for a local reading (-4 or -5)
pub fn utc_offset_hours(local: NaiveDateTime) -> i64 {
    if is_daylight(local) {
        -DAYLIGHT_OFFSET_HOURS
    } else {
        -STANDARD_OFFSET_HOURS
    }
}

/// Absolute instant -> exchange-local wall clock
pub fn to_local(instant: DateTime<Utc>) -> NaiveDateTime {
    let standard = instant.naive_utc() - Duration::hours(STANDARD_OFFSET_HOURS);
    if is_daylight(standard) {
        instant.naive_utc() - Duration::hours(DAYLIGHT_OFFSET_HOURS)
    } else {
        standard
    }
}

/// Exchange-local wall clock -> absolute instant
pub fn to_absolute(local: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&(local - Duration::hours(utc_offset_hours(local))))
}

/// Local calendar date an instant belongs to
pub fn trading_day(instant: DateTime<Utc>) -> NaiveDate {
    to_local(instant).date()
}

/// Local wall clock on `day` at `secs` past midnight
pub fn local_at(day: NaiveDate, secs: u32) -> NaiveDateTime {
    day.and_time(NaiveTime::default()) + Duration::seconds(i64::from(secs))
}

fn seconds_of_day(local: NaiveDateTime) -> u32 {
    local.num_seconds_from_midnight()
}

/// Named local-time windows of a trading day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClock {
    opening_range_end_secs: u32,
}

impl SessionClock {
    pub fn new(opening_range_minutes: u32) -> Self {
        let end = REGULAR_OPEN_SECS.saturating_add(opening_range_minutes.saturating_mul(60));
        Self {
            opening_range_end_secs: end.min(REGULAR_CLOSE_SECS),
        }
    }

    /// 09:30 <= t < 09:30 + N minutes
    pub fn in_opening_range(&self, local: NaiveDateTime) -> bool {
        let t = seconds_of_day(local);
        t >= REGULAR_OPEN_SECS && t < self.opening_range_end_secs
    }

    /// 04:00 <= t < 09:30
    pub fn in_premarket(&self, local: NaiveDateTime) -> bool {
        let t = seconds_of_day(local);
        t >= PREMARKET_START_SECS && t < REGULAR_OPEN_SECS
    }

    /// 09:30 <= t <= 16:00, both ends inclusive
    pub fn in_regular_session(&self, local: NaiveDateTime) -> bool {
        let t = seconds_of_day(local);
        t >= REGULAR_OPEN_SECS && t <= REGULAR_CLOSE_SECS
    }

    pub fn regular_open(&self, day: NaiveDate) -> NaiveDateTime {
        local_at(day, REGULAR_OPEN_SECS)
    }

    pub fn regular_close(&self, day: NaiveDate) -> NaiveDateTime {
        local_at(day, REGULAR_CLOSE_SECS)
    }

    pub fn opening_range_end(&self, day: NaiveDate) -> NaiveDateTime {
        local_at(day, self.opening_range_end_secs)
    }
}
