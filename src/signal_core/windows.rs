//! Session window aggregation
//!
//! Tracks running (max-high, min-low) for the opening range and premarket
//! windows of one trading day. A fresh aggregator is built on every day
//! rollover; a window freezes by simply receiving no further bars.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::calendar::SessionClock;
use crate::config::EnabledLevels;
use crate::types::Bar;

/// High/low extremes over a set of bars
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub high: f64,
    pub low: f64,
}

impl PriceRange {
    pub fn from_bar(bar: &Bar) -> Self {
        Self {
            high: bar.high,
            low: bar.low,
        }
    }

    pub fn mid(&self) -> f64 {
        (self.high + self.low) * 0.5
    }

    /// Seed on first observation, compare-and-replace afterwards
    pub fn extend(range: &mut Option<PriceRange>, bar: &Bar) {
        match range {
            Some(r) => {
                r.high = r.high.max(bar.high);
                r.low = r.low.min(bar.low);
            }
            None => *range = Some(Self::from_bar(bar)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionWindow {
    OpeningRange,
    Premarket,
}

#[derive(Debug, Clone)]
pub struct SessionWindowAggregator {
    day: NaiveDate,
    clock: SessionClock,
    enabled: EnabledLevels,
    opening_range: Option<PriceRange>,
    premarket: Option<PriceRange>,
}

impl SessionWindowAggregator {
    pub fn new(day: NaiveDate, clock: SessionClock, enabled: EnabledLevels) -> Self {
        Self {
            day,
            clock,
            enabled,
            opening_range: None,
            premarket: None,
        }
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    /// Fold a bar into every enabled window containing its local time.
    /// Returns the window it landed in, if any.
    pub fn ingest(&mut self, bar: &Bar, local: NaiveDateTime) -> Option<SessionWindow> {
        debug_assert_eq!(local.date(), self.day, "bar from another trading day");

        if self.enabled.opening_range && self.clock.in_opening_range(local) {
            PriceRange::extend(&mut self.opening_range, bar);
            return Some(SessionWindow::OpeningRange);
        }
        if self.enabled.premarket && self.clock.in_premarket(local) {
            PriceRange::extend(&mut self.premarket, bar);
            return Some(SessionWindow::Premarket);
        }
        None
    }

    pub fn range(&self, window: SessionWindow) -> Option<PriceRange> {
        match window {
            SessionWindow::OpeningRange => self.opening_range,
            SessionWindow::Premarket => self.premarket,
        }
    }
}
