//! Reference levels for the current trading day, stored in a fixed arena
//! indexed by [`LevelKind`].

use serde::{Deserialize, Serialize};

use crate::config::EnabledLevels;

/// Direction in which a level can be broken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

/// Group a level belongs to, for enabling and colouring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LevelGroup {
    OpeningRange,
    Premarket,
    PriorDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LevelKind {
    OpeningRangeHigh,
    OpeningRangeLow,
    OpeningRangeMid,
    PremarketHigh,
    PremarketLow,
    PriorDayHigh,
    PriorDayLow,
}

impl LevelKind {
    pub const ALL: [LevelKind; 7] = [
        LevelKind::OpeningRangeHigh,
        LevelKind::OpeningRangeLow,
        LevelKind::OpeningRangeMid,
        LevelKind::PremarketHigh,
        LevelKind::PremarketLow,
        LevelKind::PriorDayHigh,
        LevelKind::PriorDayLow,
    ];

    /// Tradeable levels in detection priority: opening range, prior day, premarket
    pub const PRIORITY: [LevelKind; 6] = [
        LevelKind::OpeningRangeHigh,
        LevelKind::OpeningRangeLow,
        LevelKind::PriorDayHigh,
        LevelKind::PriorDayLow,
        LevelKind::PremarketHigh,
        LevelKind::PremarketLow,
    ];

    pub fn index(self) -> usize {
        match self {
            LevelKind::OpeningRangeHigh => 0,
            LevelKind::OpeningRangeLow => 1,
            LevelKind::OpeningRangeMid => 2,
            LevelKind::PremarketHigh => 3,
            LevelKind::PremarketLow => 4,
            LevelKind::PriorDayHigh => 5,
            LevelKind::PriorDayLow => 6,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            LevelKind::OpeningRangeHigh => "ORH",
            LevelKind::OpeningRangeLow => "ORL",
            LevelKind::OpeningRangeMid => "ORM",
            LevelKind::PremarketHigh => "PMH",
            LevelKind::PremarketLow => "PML",
            LevelKind::PriorDayHigh => "PDH",
            LevelKind::PriorDayLow => "PDL",
        }
    }

    pub fn group(self) -> LevelGroup {
        match self {
            LevelKind::OpeningRangeHigh | LevelKind::OpeningRangeLow | LevelKind::OpeningRangeMid => {
                LevelGroup::OpeningRange
            }
            LevelKind::PremarketHigh | LevelKind::PremarketLow => LevelGroup::Premarket,
            LevelKind::PriorDayHigh | LevelKind::PriorDayLow => LevelGroup::PriorDay,
        }
    }

    /// The one direction this level can break; the mid is drawn, never traded
    pub fn breakout_direction(self) -> Option<Direction> {
        match self {
            LevelKind::OpeningRangeHigh | LevelKind::PremarketHigh | LevelKind::PriorDayHigh => {
                Some(Direction::Up)
            }
            LevelKind::OpeningRangeLow | LevelKind::PremarketLow | LevelKind::PriorDayLow => {
                Some(Direction::Down)
            }
            LevelKind::OpeningRangeMid => None,
        }
    }
}

impl std::fmt::Display for LevelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl EnabledLevels {
    pub fn contains(&self, group: LevelGroup) -> bool {
        match group {
            LevelGroup::OpeningRange => self.opening_range,
            LevelGroup::Premarket => self.premarket,
            LevelGroup::PriorDay => self.prior_day,
        }
    }
}

/// A level's value; `None` until its defining window has seen a bar
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Level {
    pub value: Option<f64>,
    pub enabled: bool,
}

impl Level {
    /// Value usable for drawing and detection
    pub fn active(&self) -> Option<f64> {
        if self.enabled {
            self.value
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LevelSet {
    slots: [Level; 7],
}

impl LevelSet {
    pub fn new(enabled: EnabledLevels) -> Self {
        let mut slots = [Level::default(); 7];
        for kind in LevelKind::ALL {
            slots[kind.index()].enabled = enabled.contains(kind.group());
        }
        Self { slots }
    }

    pub fn get(&self, kind: LevelKind) -> Level {
        self.slots[kind.index()]
    }

    pub fn active(&self, kind: LevelKind) -> Option<f64> {
        self.get(kind).active()
    }

    pub fn set(&mut self, kind: LevelKind, value: Option<f64>) {
        self.slots[kind.index()].value = value;
    }

    /// Set and enabled levels, in arena order
    pub fn iter_active(&self) -> impl Iterator<Item = (LevelKind, f64)> + '_ {
        LevelKind::ALL
            .into_iter()
            .filter_map(|kind| self.active(kind).map(|value| (kind, value)))
    }
}
