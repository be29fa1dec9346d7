//! Level signal engine
//!
//! Tracks the opening range, premarket and prior-session levels of each
//! trading day, latches body-confirmed breakouts through them and classifies
//! breakout or retest bars into buy/sell signals.
//!
//! Module layout:
//! - calendar: US Eastern session clock and DST conversion
//! - levels: level identities and the per-day level set
//! - windows: opening range and premarket aggregation
//! - prior_session: previous regular session high/low
//! - breakout: per-level breakout latches
//! - classifier: breakout and pin-bar retest detection
//! - emitter: marker/alert dispatch with per-day dedup
//! - engine: per-bar orchestration

pub mod breakout;
pub mod calendar;
pub mod classifier;
pub mod emitter;
pub mod engine;
pub mod levels;
pub mod prior_session;
pub mod windows;

pub use breakout::{BreakoutTracker, LatchState};
pub use calendar::SessionClock;
pub use classifier::{PatternClassifier, Side, SignalEvent, SignalKind};
pub use emitter::{AlertSink, ChartSink, SignalEmitter, SignalKey, SignalSink};
pub use engine::{EngineStats, SignalEngine};
pub use levels::{Direction, LevelGroup, LevelKind, LevelSet};
pub use prior_session::PriorSession;
pub use windows::{PriceRange, SessionWindow};
