//! Breakout latches
//!
//! One latch per tradeable level. A latch flips from `Untested` to
//! `Broken` the first time a bar's *body* crosses the level in the level's
//! breakout direction and stays there until the next trading day.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::levels::{Direction, LevelKind, LevelSet};
use crate::types::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LatchState {
    #[default]
    Untested,
    /// Broken by the bar at `index`
    Broken { index: usize },
}

/// Body-confirmed crossing: wick-only pokes never count.
///
/// Up: opens below, closes at or above, green body.
/// Down: opens above, closes at or below, red body.
pub fn body_crosses(bar: &Bar, level: f64, direction: Direction) -> bool {
    match direction {
        Direction::Up => bar.open < level && bar.close >= level && bar.close > bar.open,
        Direction::Down => bar.open > level && bar.close <= level && bar.close < bar.open,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BreakoutTracker {
    latches: [LatchState; 7],
}

impl BreakoutTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch every untested level whose value this bar's body crosses.
    /// Returns the levels latched by this call.
    pub fn update(&mut self, index: usize, bar: &Bar, levels: &LevelSet) -> Vec<LevelKind> {
        let mut latched = Vec::new();

        for kind in LevelKind::PRIORITY {
            let (Some(level), Some(direction)) = (levels.active(kind), kind.breakout_direction())
            else {
                continue;
            };
            let slot = &mut self.latches[kind.index()];
            if *slot == LatchState::Untested && body_crosses(bar, level, direction) {
                *slot = LatchState::Broken { index };
                debug!(
                    "{} broken {:?} at {:.2} by bar {} (o={:.2} c={:.2})",
                    kind, direction, level, index, bar.open, bar.close
                );
                latched.push(kind);
            }
        }

        latched
    }

    pub fn state(&self, kind: LevelKind) -> LatchState {
        self.latches[kind.index()]
    }

    pub fn is_broken(&self, kind: LevelKind) -> bool {
        self.broken_at(kind).is_some()
    }

    pub fn broken_at(&self, kind: LevelKind) -> Option<usize> {
        match self.state(kind) {
            LatchState::Broken { index } => Some(index),
            LatchState::Untested => None,
        }
    }
}
