//! Pattern classification of the newest bar
//!
//! Two mutually exclusive modes:
//! - Breakout: the bar's body is the first to cross a level today.
//! - Retest: after a level has broken, a rejection candle (pin bar) wicks back
//!   through it and closes on the breakout side, below the previous bar's
//!   high (longs) or above the previous bar's low (shorts).
//!
//! Levels are checked in priority order (opening range, prior day,
//! premarket) and the first match wins, so a bar yields at most one event.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::breakout::{body_crosses, BreakoutTracker};
use super::levels::{Direction, LevelKind, LevelSet};
use crate::config::DetectionMode;
use crate::types::Bar;

/// Trade side of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl From<Direction> for Side {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Up => Side::Buy,
            Direction::Down => Side::Sell,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    Breakout,
    Retest,
}

impl SignalKind {
    pub fn prefix(self) -> &'static str {
        match self {
            SignalKind::Breakout => "BO",
            SignalKind::Retest => "RT",
        }
    }
}

/// A classified bar, alive only until the emitter has handled it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub trading_day: NaiveDate,
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub level: LevelKind,
    pub level_price: f64,
    pub side: Side,
    pub kind: SignalKind,
    /// Close of the signal bar
    pub price: f64,
}

/// Bullish pin bar rejecting an up-broken level
pub fn is_bullish_retest(bar: &Bar, prev: &Bar, level: f64, rejection_ratio: f64) -> bool {
    bar.open > level
        && bar.low < level
        && bar.lower_wick() >= rejection_ratio * bar.upper_wick()
        && bar.is_green()
        && prev.high > bar.high
}

/// Bearish pin bar rejecting a down-broken level
pub fn is_bearish_retest(bar: &Bar, prev: &Bar, level: f64, rejection_ratio: f64) -> bool {
    bar.open < level
        && bar.high > level
        && bar.upper_wick() >= rejection_ratio * bar.lower_wick()
        && bar.is_red()
        && prev.low < bar.low
}

#[derive(Debug, Clone, Copy)]
pub struct PatternClassifier {
    mode: DetectionMode,
    rejection_ratio: f64,
}

impl PatternClassifier {
    pub fn new(mode: DetectionMode, rejection_ratio: f64) -> Self {
        Self {
            mode,
            rejection_ratio,
        }
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    /// Classify the newest bar. `prev` is the preceding bar of the same
    /// trading day, if any. Latches must already include this bar.
    pub fn classify(
        &self,
        day: NaiveDate,
        index: usize,
        bar: &Bar,
        prev: Option<&Bar>,
        levels: &LevelSet,
        latches: &BreakoutTracker,
    ) -> Option<SignalEvent> {
        let (level, level_price, direction, kind) = match self.mode {
            DetectionMode::Breakout => self.find_breakout(index, bar, levels, latches)?,
            DetectionMode::Retest => self.find_retest(bar, prev?, levels, latches)?,
        };

        Some(SignalEvent {
            trading_day: day,
            index,
            timestamp: bar.timestamp,
            level,
            level_price,
            side: direction.into(),
            kind,
            price: bar.close,
        })
    }

    /// First level, in priority order, whose latch was set by this very bar
    /// and whose body still crosses it. A live bar that falls back through
    /// the level stops matching but the latch stays.
    fn find_breakout(
        &self,
        index: usize,
        bar: &Bar,
        levels: &LevelSet,
        latches: &BreakoutTracker,
    ) -> Option<(LevelKind, f64, Direction, SignalKind)> {
        LevelKind::PRIORITY.into_iter().find_map(|kind| {
            let level = levels.active(kind)?;
            let direction = kind.breakout_direction()?;
            (latches.broken_at(kind) == Some(index) && body_crosses(bar, level, direction))
                .then_some((kind, level, direction, SignalKind::Breakout))
        })
    }

    fn find_retest(
        &self,
        bar: &Bar,
        prev: &Bar,
        levels: &LevelSet,
        latches: &BreakoutTracker,
    ) -> Option<(LevelKind, f64, Direction, SignalKind)> {
        LevelKind::PRIORITY.into_iter().find_map(|kind| {
            let direction = kind.breakout_direction()?;
            if !latches.is_broken(kind) {
                return None;
            }
            let Some(level) = levels.active(kind) else {
                debug_assert!(false, "{} latched while unset", kind);
                return None;
            };
            let matched = match direction {
                Direction::Up => is_bullish_retest(bar, prev, level, self.rejection_ratio),
                Direction::Down => is_bearish_retest(bar, prev, level, self.rejection_ratio),
            };
            matched.then_some((kind, level, direction, SignalKind::Retest))
        })
    }
}
