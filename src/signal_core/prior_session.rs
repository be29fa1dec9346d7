//! Prior session lookup
//!
//! On each day rollover, finds the most recent earlier day (up to a week
//! back, to step over weekends and holidays) that has regular-session bars in
//! history and returns that session's high/low.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::calendar::{to_local, trading_day, SessionClock};
use super::windows::PriceRange;
use crate::types::Bar;

/// Calendar days searched backward from the current trading day
pub const LOOKBACK_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorSession {
    pub day: NaiveDate,
    pub range: PriceRange,
}

/// Regular-session range of the nearest earlier day with data, in a single
/// pass over `history`
pub fn compute_prior_session(
    day: NaiveDate,
    history: &[Bar],
    clock: &SessionClock,
) -> Option<PriorSession> {
    let mut buckets: [Option<PriceRange>; LOOKBACK_DAYS as usize] = [None; LOOKBACK_DAYS as usize];

    for bar in history {
        let local = to_local(bar.timestamp);
        let back = (day - local.date()).num_days();
        if !(1..=LOOKBACK_DAYS).contains(&back) || !clock.in_regular_session(local) {
            continue;
        }
        PriceRange::extend(&mut buckets[(back - 1) as usize], bar);
    }

    buckets
        .into_iter()
        .enumerate()
        .find_map(|(i, range)| {
            range.map(|range| PriorSession {
                day: day - Duration::days(i as i64 + 1),
                range,
            })
        })
}

/// Drop bars older than the lookback of `day`; they can never be consulted
/// again because trading days only move forward.
pub fn prune_history(history: &mut Vec<Bar>, day: NaiveDate) -> usize {
    let cutoff = day - Duration::days(LOOKBACK_DAYS);
    let stale = history.partition_point(|bar| trading_day(bar.timestamp) < cutoff);
    history.drain(..stale);
    stale
}
