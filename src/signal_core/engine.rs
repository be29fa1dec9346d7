//! Streaming signal engine
//!
//! Per bar: resolve local time, roll the day over if needed, fold the bar
//! into the session windows, then (inside the regular session) draw levels,
//! update breakout latches, classify the bar and dispatch any signal.
//!
//! One engine instance owns all state for one instrument. It is plain owned
//! data driven through `&mut self`; run one engine per instrument to
//! parallelize.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::breakout::{BreakoutTracker, LatchState};
use super::calendar::{to_local, trading_day, SessionClock};
use super::classifier::{PatternClassifier, SignalEvent};
use super::emitter::{SignalEmitter, SignalSink};
use super::levels::{LevelKind, LevelSet};
use super::prior_session::{compute_prior_session, prune_history, PriorSession, LOOKBACK_DAYS};
use super::windows::{SessionWindow, SessionWindowAggregator};
use crate::config::EngineConfig;
use crate::types::{Bar, BarUpdate, SignalOutput};

/// Everything that resets when the trading day changes
#[derive(Debug, Clone)]
struct DayState {
    day: NaiveDate,
    windows: SessionWindowAggregator,
    prior: Option<PriorSession>,
    levels: LevelSet,
    latches: BreakoutTracker,
}

impl DayState {
    fn new(day: NaiveDate, config: &EngineConfig, clock: SessionClock, prior: Option<PriorSession>) -> Self {
        let mut state = Self {
            day,
            windows: SessionWindowAggregator::new(day, clock, config.levels),
            prior,
            levels: LevelSet::new(config.levels),
            latches: BreakoutTracker::new(),
        };
        state.refresh_levels();
        state
    }

    fn refresh_levels(&mut self) {
        let or = self.windows.range(SessionWindow::OpeningRange);
        self.levels.set(LevelKind::OpeningRangeHigh, or.map(|r| r.high));
        self.levels.set(LevelKind::OpeningRangeLow, or.map(|r| r.low));
        self.levels.set(LevelKind::OpeningRangeMid, or.map(|r| r.mid()));

        let pm = self.windows.range(SessionWindow::Premarket);
        self.levels.set(LevelKind::PremarketHigh, pm.map(|r| r.high));
        self.levels.set(LevelKind::PremarketLow, pm.map(|r| r.low));

        self.levels.set(LevelKind::PriorDayHigh, self.prior.map(|p| p.range.high));
        self.levels.set(LevelKind::PriorDayLow, self.prior.map(|p| p.range.low));
    }
}

/// Running counters, mainly for logging and the CLI summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub bars: usize,
    pub days: usize,
    pub signals: usize,
    pub stale_updates: usize,
}

pub struct SignalEngine {
    config: EngineConfig,
    clock: SessionClock,
    classifier: PatternClassifier,
    emitter: SignalEmitter,
    history: Vec<Bar>,
    last_index: Option<usize>,
    today: Option<DayState>,
    stats: EngineStats,
}

impl SignalEngine {
    pub fn new(config: EngineConfig) -> Self {
        let clock = SessionClock::new(config.opening_range_minutes);
        let classifier = PatternClassifier::new(config.mode, config.rejection_ratio);
        let emitter = SignalEmitter::new(&config);

        Self {
            config,
            clock,
            classifier,
            emitter,
            history: Vec::new(),
            last_index: None,
            today: None,
            stats: EngineStats::default(),
        }
    }

    /// Process one feed update. Returns the signal classified on this bar, if
    /// any; re-deliveries of the live bar keep returning it, while the marker
    /// and alert are dispatched only once.
    pub fn on_bar<S: SignalSink>(&mut self, update: &BarUpdate, sink: &mut S) -> Option<SignalEvent> {
        let BarUpdate { index, bar, is_live } = *update;

        match self.last_index {
            Some(last) if index < last => {
                warn!("Ignoring update for bar {} (newest is {})", index, last);
                self.stats.stale_updates += 1;
                return None;
            }
            Some(last) if index == last => {
                if let Some(newest) = self.history.last_mut() {
                    debug_assert_eq!(
                        newest.timestamp, bar.timestamp,
                        "bar {} re-delivered with a different timestamp",
                        index
                    );
                    *newest = bar;
                }
            }
            _ => {
                self.history.push(bar);
                self.last_index = Some(index);
                self.stats.bars += 1;
            }
        }

        sink.set_output(index, SignalOutput::default());

        let local = to_local(bar.timestamp);
        let day = local.date();
        if self.today.as_ref().map(|t| t.day) != Some(day) {
            self.roll_over(day);
        }

        let prev = self
            .history
            .len()
            .checked_sub(2)
            .map(|i| self.history[i])
            .filter(|p| trading_day(p.timestamp) == day);

        let state = self.today.as_mut()?;
        if state.windows.ingest(&bar, local).is_some() {
            state.refresh_levels();
        }

        if !self.clock.in_regular_session(local) {
            return None;
        }

        self.emitter.render_levels(day, &state.levels, &self.clock, sink);
        state.latches.update(index, &bar, &state.levels);

        let event = self.classifier.classify(
            day,
            index,
            &bar,
            prev.as_ref(),
            &state.levels,
            &state.latches,
        )?;

        if self.emitter.emit(&event, &bar, is_live, sink) {
            self.stats.signals += 1;
        }
        Some(event)
    }

    fn roll_over(&mut self, day: NaiveDate) {
        let pruned = prune_history(&mut self.history, day);
        if pruned > 0 {
            debug!("Pruned {} bars older than {} days", pruned, LOOKBACK_DAYS);
        }

        let prior = if self.config.levels.prior_day {
            let prior = compute_prior_session(day, &self.history, &self.clock);
            match &prior {
                Some(p) => info!(
                    "{}: prior session {} high={:.2} low={:.2}",
                    day, p.day, p.range.high, p.range.low
                ),
                None => info!(
                    "{}: no regular session in the last {} days, PDH/PDL disabled today",
                    day, LOOKBACK_DAYS
                ),
            }
            prior
        } else {
            None
        };

        self.today = Some(DayState::new(day, &self.config, self.clock, prior));
        self.emitter.begin_day(day);
        self.stats.days += 1;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn trading_day(&self) -> Option<NaiveDate> {
        self.today.as_ref().map(|t| t.day)
    }

    pub fn levels(&self) -> Option<&LevelSet> {
        self.today.as_ref().map(|t| &t.levels)
    }

    pub fn prior_session(&self) -> Option<PriorSession> {
        self.today.as_ref().and_then(|t| t.prior)
    }

    pub fn latch(&self, kind: LevelKind) -> LatchState {
        self.today
            .as_ref()
            .map(|t| t.latches.state(kind))
            .unwrap_or_default()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectionMode, EnabledLevels};
    use crate::signal_core::calendar::to_absolute;
    use crate::signal_core::classifier::{Side, SignalKind};
    use crate::sinks::{JsonLinesSink, MemorySink};

    /// Bar at an ET wall-clock time
    fn bar(d: (i32, u32, u32), h: u32, m: u32, ohlc: (f64, f64, f64, f64)) -> Bar {
        let local = NaiveDate::from_ymd_opt(d.0, d.1, d.2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap();
        Bar::new(to_absolute(local), ohlc.0, ohlc.1, ohlc.2, ohlc.3)
    }

    const FRI: (i32, u32, u32) = (2025, 1, 3);
    const MON: (i32, u32, u32) = (2025, 1, 6);

    struct Harness {
        engine: SignalEngine,
        sink: MemorySink,
        next_index: usize,
        events: Vec<SignalEvent>,
    }

    impl Harness {
        fn new(config: EngineConfig) -> Self {
            Self {
                engine: SignalEngine::new(config),
                sink: MemorySink::default(),
                next_index: 0,
                events: Vec::new(),
            }
        }

        fn closed(&mut self, bar: Bar) -> Option<SignalEvent> {
            let update = BarUpdate {
                index: self.next_index,
                bar,
                is_live: false,
            };
            self.next_index += 1;
            let event = self.engine.on_bar(&update, &mut self.sink);
            self.events.extend(event);
            event
        }

        /// Opening range 101 / 99 on the given day
        fn opening_range(&mut self, d: (i32, u32, u32)) {
            self.closed(bar(d, 9, 30, (100.0, 101.0, 99.0, 100.5)));
            self.closed(bar(d, 9, 35, (99.5, 100.5, 99.2, 100.0)));
            self.closed(bar(d, 9, 40, (100.2, 100.8, 99.9, 100.3)));
        }
    }

    #[test]
    fn test_opening_range_levels() {
        let mut h = Harness::new(EngineConfig::default());
        h.closed(bar(FRI, 9, 0, (100.0, 100.2, 99.8, 100.0)));
        assert_eq!(h.engine.levels().unwrap().active(LevelKind::OpeningRangeHigh), None);

        h.opening_range(FRI);
        let levels = h.engine.levels().unwrap();
        assert_eq!(levels.active(LevelKind::OpeningRangeHigh), Some(101.0));
        assert_eq!(levels.active(LevelKind::OpeningRangeLow), Some(99.0));
        assert_eq!(levels.active(LevelKind::OpeningRangeMid), Some(100.0));
        assert_eq!(levels.active(LevelKind::PremarketHigh), Some(100.2));
        assert_eq!(levels.active(LevelKind::PremarketLow), Some(99.8));
        // No earlier history
        assert_eq!(levels.active(LevelKind::PriorDayHigh), None);
    }

    #[test]
    fn test_breakout_then_retest() {
        let mut h = Harness::new(EngineConfig::default());
        h.opening_range(FRI);

        // Body closes above ORH: latches, but retest mode emits nothing
        assert_eq!(h.closed(bar(FRI, 9, 45, (100.5, 101.4, 100.4, 101.2))), None);
        assert_eq!(
            h.engine.latch(LevelKind::OpeningRangeHigh),
            LatchState::Broken { index: 3 }
        );

        h.closed(bar(FRI, 9, 50, (101.2, 101.9, 101.1, 101.8)));
        let event = h
            .closed(bar(FRI, 9, 55, (101.3, 101.6, 100.8, 101.5)))
            .unwrap();

        assert_eq!(event.kind, SignalKind::Retest);
        assert_eq!(event.side, Side::Buy);
        assert_eq!(event.level, LevelKind::OpeningRangeHigh);
        assert_eq!(event.index, 5);
        assert_eq!(h.sink.markers.len(), 1);
        assert!(h.sink.markers.contains_key("RT_UP_ORH_202501030955_5"));
        assert_eq!(h.sink.outputs[&5].buy, Some(1.0));
        // Replay bars are not live
        assert!(h.sink.alerts.is_empty());
        assert_eq!(h.engine.stats().signals, 1);
    }

    #[test]
    fn test_red_pin_bar_is_not_a_retest() {
        let mut h = Harness::new(EngineConfig::default());
        h.opening_range(FRI);
        h.closed(bar(FRI, 9, 45, (100.5, 101.4, 100.4, 101.2)));
        h.closed(bar(FRI, 9, 50, (101.2, 101.9, 101.1, 101.8)));
        assert_eq!(h.closed(bar(FRI, 9, 55, (101.5, 101.6, 100.8, 101.3))), None);
    }

    #[test]
    fn test_no_retest_before_breakout() {
        let mut h = Harness::new(EngineConfig::default());
        h.opening_range(FRI);
        // Same pin-bar shape, but ORH was never broken by a body
        h.closed(bar(FRI, 9, 50, (101.2, 101.9, 101.1, 101.8)));
        assert_eq!(h.closed(bar(FRI, 9, 55, (101.3, 101.6, 100.8, 101.5))), None);
        assert!(h.events.is_empty());
    }

    #[test]
    fn test_breakout_mode() {
        let mut h = Harness::new(EngineConfig {
            mode: DetectionMode::Breakout,
            ..Default::default()
        });
        h.opening_range(FRI);

        let event = h
            .closed(bar(FRI, 9, 45, (100.5, 101.4, 100.4, 101.2)))
            .unwrap();
        assert_eq!(event.kind, SignalKind::Breakout);
        assert_eq!(event.level, LevelKind::OpeningRangeHigh);
        assert!(h.sink.markers.contains_key("BO_UP_ORH_202501030945_3"));

        // Second crossing of an already broken level is silent
        h.closed(bar(FRI, 9, 50, (101.2, 101.3, 100.5, 100.6)));
        assert_eq!(h.closed(bar(FRI, 9, 55, (100.6, 101.3, 100.5, 101.2))), None);
        assert_eq!(h.events.len(), 1);
    }

    #[test]
    fn test_live_bar_redelivery_dispatches_once() {
        let mut h = Harness::new(EngineConfig::default());
        h.opening_range(FRI);
        h.closed(bar(FRI, 9, 45, (100.5, 101.4, 100.4, 101.2)));
        h.closed(bar(FRI, 9, 50, (101.2, 101.9, 101.1, 101.8)));

        // The forming 09:55 bar arrives tick by tick under index 5
        let ticks = [
            (101.3, 101.4, 101.1, 101.35),
            (101.3, 101.5, 100.8, 101.45),
            (101.3, 101.6, 100.8, 101.5),
            (101.3, 101.6, 100.8, 101.5),
        ];
        let mut hits = 0;
        for ohlc in ticks {
            let update = BarUpdate {
                index: 5,
                bar: bar(FRI, 9, 55, ohlc),
                is_live: true,
            };
            if h.engine.on_bar(&update, &mut h.sink).is_some() {
                hits += 1;
            }
        }

        assert!(hits >= 2);
        assert_eq!(h.sink.marker_draws, 1);
        assert_eq!(h.sink.alerts.len(), 1);
        assert!(h.sink.alerts[0].0.starts_with("BUY RT_ORH @ 101.45"));
        assert_eq!(h.engine.stats().signals, 1);
        assert_eq!(h.engine.history_len(), 6);
    }

    #[test]
    fn test_output_cleared_when_live_bar_stops_matching() {
        let mut h = Harness::new(EngineConfig::default());
        h.opening_range(FRI);
        h.closed(bar(FRI, 9, 45, (100.5, 101.4, 100.4, 101.2)));
        h.closed(bar(FRI, 9, 50, (101.2, 101.9, 101.1, 101.8)));

        let matching = BarUpdate {
            index: 5,
            bar: bar(FRI, 9, 55, (101.3, 101.6, 100.8, 101.5)),
            is_live: true,
        };
        assert!(h.engine.on_bar(&matching, &mut h.sink).is_some());
        assert!(h.sink.outputs.contains_key(&5));

        // Rallies to a fresh high above the previous bar: no longer a pullback
        let broken = BarUpdate {
            index: 5,
            bar: bar(FRI, 9, 55, (101.3, 102.0, 100.8, 101.95)),
            is_live: true,
        };
        assert!(h.engine.on_bar(&broken, &mut h.sink).is_none());
        assert!(!h.sink.outputs.contains_key(&5));
    }

    #[test]
    fn test_breakout_live_bar_falling_back_stops_matching() {
        let mut h = Harness::new(EngineConfig {
            mode: DetectionMode::Breakout,
            ..Default::default()
        });
        h.opening_range(FRI);

        let live = |ohlc| BarUpdate {
            index: 3,
            bar: bar(FRI, 9, 45, ohlc),
            is_live: true,
        };

        let event = h.engine.on_bar(&live((100.5, 101.4, 100.4, 101.2)), &mut h.sink);
        assert_eq!(event.map(|e| e.level), Some(LevelKind::OpeningRangeHigh));
        assert_eq!(h.sink.outputs[&3].buy, Some(1.0));

        // Body drops back under ORH before the bar closes
        assert_eq!(h.engine.on_bar(&live((100.5, 101.4, 100.2, 100.6)), &mut h.sink), None);
        assert!(!h.sink.outputs.contains_key(&3));
        assert_eq!(
            h.engine.latch(LevelKind::OpeningRangeHigh),
            LatchState::Broken { index: 3 }
        );

        // And back above: same key, no second marker or alert
        assert!(h.engine.on_bar(&live((100.5, 101.5, 100.2, 101.3)), &mut h.sink).is_some());
        assert_eq!(h.sink.outputs[&3].buy, Some(1.0));
        assert_eq!(h.sink.marker_draws, 1);
        assert_eq!(h.sink.alerts.len(), 1);
    }

    #[test]
    fn test_json_stream_sees_cleared_output() {
        let mut engine = SignalEngine::new(EngineConfig::default());
        let mut sink = JsonLinesSink::new(Vec::new());
        let closed = [
            bar(FRI, 9, 30, (100.0, 101.0, 99.0, 100.5)),
            bar(FRI, 9, 35, (99.5, 100.5, 99.2, 100.0)),
            bar(FRI, 9, 40, (100.2, 100.8, 99.9, 100.3)),
            bar(FRI, 9, 45, (100.5, 101.4, 100.4, 101.2)),
            bar(FRI, 9, 50, (101.2, 101.9, 101.1, 101.8)),
        ];
        for (index, bar) in closed.into_iter().enumerate() {
            engine.on_bar(&BarUpdate { index, bar, is_live: false }, &mut sink);
        }

        let pin = bar(FRI, 9, 55, (101.3, 101.6, 100.8, 101.5));
        let fresh_high = bar(FRI, 9, 55, (101.3, 102.0, 100.8, 101.95));
        assert!(engine.on_bar(&BarUpdate { index: 5, bar: pin, is_live: true }, &mut sink).is_some());
        assert!(engine.on_bar(&BarUpdate { index: 5, bar: fresh_high, is_live: true }, &mut sink).is_none());

        let text = String::from_utf8(sink.finish().unwrap()).unwrap();
        let outputs: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap())
            .filter(|v| v["type"] == "Output" && v["index"] == 5)
            .collect();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0]["buy"], 1.0);
        assert!(outputs[1]["buy"].is_null());
        assert!(outputs[1]["sell"].is_null());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "different timestamp")]
    fn test_redelivery_must_keep_timestamp() {
        let mut h = Harness::new(EngineConfig::default());
        h.closed(bar(FRI, 9, 30, (100.0, 101.0, 99.0, 100.5)));
        let moved = BarUpdate {
            index: 0,
            bar: bar(MON, 9, 30, (100.0, 101.0, 99.0, 100.5)),
            is_live: true,
        };
        h.engine.on_bar(&moved, &mut h.sink);
    }

    #[test]
    fn test_day_rollover_resets_and_uses_friday_session() {
        let mut h = Harness::new(EngineConfig::default());
        h.opening_range(FRI);
        h.closed(bar(FRI, 9, 45, (100.5, 101.4, 100.4, 101.2)));
        h.closed(bar(FRI, 15, 55, (101.0, 103.0, 100.0, 102.0)));
        h.closed(bar(FRI, 16, 30, (102.0, 150.0, 50.0, 102.0)));

        h.closed(bar(MON, 8, 0, (102.0, 102.5, 101.5, 102.2)));
        assert_eq!(h.engine.trading_day(), NaiveDate::from_ymd_opt(2025, 1, 6));
        assert_eq!(h.engine.latch(LevelKind::OpeningRangeHigh), LatchState::Untested);

        let prior = h.engine.prior_session().unwrap();
        assert_eq!(prior.day, NaiveDate::from_ymd_opt(2025, 1, 3).unwrap());
        assert_eq!(prior.range.high, 103.0);
        assert_eq!(prior.range.low, 99.0);

        let levels = h.engine.levels().unwrap();
        assert_eq!(levels.active(LevelKind::PriorDayHigh), Some(103.0));
        assert_eq!(levels.active(LevelKind::PriorDayLow), Some(99.0));
        assert_eq!(levels.active(LevelKind::OpeningRangeHigh), None);
        assert_eq!(h.engine.stats().days, 2);
    }

    #[test]
    fn test_prior_day_breakout_and_retest() {
        let mut h = Harness::new(EngineConfig {
            levels: EnabledLevels {
                opening_range: false,
                premarket: false,
                prior_day: true,
            },
            ..Default::default()
        });
        h.closed(bar(FRI, 10, 0, (100.0, 105.0, 95.0, 101.0)));

        // Monday: break PDL (95) with a red body, then a bearish pin bar
        h.closed(bar(MON, 9, 30, (96.0, 96.5, 94.0, 94.5)));
        assert!(matches!(
            h.engine.latch(LevelKind::PriorDayLow),
            LatchState::Broken { .. }
        ));
        h.closed(bar(MON, 9, 35, (94.5, 94.8, 93.5, 94.0)));
        let event = h
            .closed(bar(MON, 9, 40, (94.7, 95.5, 94.4, 94.5)))
            .unwrap();
        assert_eq!(event.level, LevelKind::PriorDayLow);
        assert_eq!(event.side, Side::Sell);
        assert_eq!(h.sink.outputs[&3].sell, Some(-1.0));
        assert!(h.sink.segments.contains_key("PDL_SEG_20250106"));
    }

    #[test]
    fn test_gap_day_without_opening_range_bars() {
        let mut h = Harness::new(EngineConfig::default());
        h.closed(bar(FRI, 10, 0, (100.0, 101.0, 99.0, 100.5)));
        h.closed(bar(FRI, 10, 5, (100.5, 102.0, 100.4, 101.9)));

        let levels = h.engine.levels().unwrap();
        assert_eq!(levels.active(LevelKind::OpeningRangeHigh), None);
        assert_eq!(h.engine.latch(LevelKind::OpeningRangeHigh), LatchState::Untested);
        assert!(h.sink.segments.is_empty());
    }

    #[test]
    fn test_no_detection_outside_session() {
        let mut h = Harness::new(EngineConfig {
            mode: DetectionMode::Breakout,
            ..Default::default()
        });
        h.opening_range(FRI);
        assert_eq!(h.closed(bar(FRI, 16, 5, (100.5, 101.4, 100.4, 101.2))), None);
        assert_eq!(h.engine.latch(LevelKind::OpeningRangeHigh), LatchState::Untested);
    }

    #[test]
    fn test_daylight_time_session() {
        // July: 9:30 ET is 13:30 UTC
        let mut h = Harness::new(EngineConfig::default());
        h.opening_range((2025, 7, 7));
        let levels = h.engine.levels().unwrap();
        assert_eq!(levels.active(LevelKind::OpeningRangeHigh), Some(101.0));
        assert_eq!(
            h.sink.segments["ORH_SEG_20250707"].start.to_rfc3339(),
            "2025-07-07T13:30:00+00:00"
        );
    }

    #[test]
    fn test_stale_update_is_ignored() {
        let mut h = Harness::new(EngineConfig::default());
        h.opening_range(FRI);
        let stale = BarUpdate {
            index: 0,
            bar: bar(FRI, 9, 30, (100.0, 200.0, 1.0, 100.0)),
            is_live: false,
        };
        assert_eq!(h.engine.on_bar(&stale, &mut h.sink), None);
        assert_eq!(h.engine.stats().stale_updates, 1);
        assert_eq!(
            h.engine.levels().unwrap().active(LevelKind::OpeningRangeHigh),
            Some(101.0)
        );
    }

    #[test]
    fn test_at_most_one_event_per_bar() {
        let mut h = Harness::new(EngineConfig {
            mode: DetectionMode::Breakout,
            ..Default::default()
        });
        h.closed(bar(FRI, 8, 0, (100.0, 100.8, 99.5, 100.0)));
        h.opening_range(FRI);

        // One body crosses both PMH (100.8) and ORH (101.0)
        let event = h
            .closed(bar(FRI, 9, 45, (100.5, 101.4, 100.4, 101.2)))
            .unwrap();
        assert_eq!(event.level, LevelKind::OpeningRangeHigh);
        assert!(matches!(
            h.engine.latch(LevelKind::PremarketHigh),
            LatchState::Broken { .. }
        ));
        assert_eq!(h.sink.marker_draws, 1);
    }
}
