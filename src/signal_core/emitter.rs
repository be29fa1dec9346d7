//! Signal dispatch
//!
//! Turns classified events into marker draws, output values and alerts, and
//! keeps the per-day set of already-emitted keys so re-evaluating the live bar
//! never draws or alerts twice. Also issues the daily level segments.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use tracing::{debug, info};

use super::calendar::{to_absolute, to_local, SessionClock};
use super::classifier::{SignalEvent, SignalKind, Side};
use super::levels::{LevelGroup, LevelKind, LevelSet};
use crate::config::EngineConfig;
use crate::types::{
    Bar, ChartColor, LineStyle, MarkerDraw, MarkerGlyph, SegmentDraw, SignalOutput,
};

/// Markers sit this many pips beyond the bar extreme
const MARKER_OFFSET_PIPS: f64 = 3.0;

/// Rendering collaborator. Re-issuing an id must replace, never duplicate.
pub trait ChartSink {
    fn draw_segment(&mut self, segment: SegmentDraw);
    fn draw_marker(&mut self, marker: MarkerDraw);
    fn set_output(&mut self, index: usize, output: SignalOutput);
}

/// Alerting collaborator
pub trait AlertSink {
    fn alert(&mut self, text: &str, play_sound: bool);
}

/// Everything the engine dispatches to
pub trait SignalSink: ChartSink + AlertSink {}

impl<T: ChartSink + AlertSink> SignalSink for T {}

/// Identity of an emitted signal: at most one marker and alert per key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalKey {
    pub day: NaiveDate,
    /// Local open time of the bar; rendered into the id
    pub bar_time: NaiveDateTime,
    pub index: usize,
    pub level: LevelKind,
    pub side: Side,
    pub kind: SignalKind,
}

impl From<&SignalEvent> for SignalKey {
    fn from(event: &SignalEvent) -> Self {
        Self {
            day: event.trading_day,
            bar_time: to_local(event.timestamp),
            index: event.index,
            level: event.level,
            side: event.side,
            kind: event.kind,
        }
    }
}

impl std::fmt::Display for SignalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let arrow = match self.side {
            Side::Buy => "UP",
            Side::Sell => "DN",
        };
        write!(
            f,
            "{}_{}_{}_{}_{}",
            self.kind.prefix(),
            arrow,
            self.level.tag(),
            self.bar_time.format("%Y%m%d%H%M"),
            self.index
        )
    }
}

/// Price with up to five decimals, trailing zeros trimmed
fn format_price(price: f64) -> String {
    let text = format!("{:.5}", price);
    let text = text.trim_end_matches('0');
    text.trim_end_matches('.').to_string()
}

fn level_style(kind: LevelKind) -> (ChartColor, LineStyle) {
    match (kind.group(), kind) {
        (_, LevelKind::OpeningRangeMid) => (ChartColor::Gray, LineStyle::Dashed),
        (LevelGroup::OpeningRange, _) => (ChartColor::Gray, LineStyle::Solid),
        (LevelGroup::PriorDay, _) => (ChartColor::Yellow, LineStyle::Solid),
        (LevelGroup::Premarket, _) => (ChartColor::Blue, LineStyle::Solid),
    }
}

#[derive(Debug, Clone)]
pub struct SignalEmitter {
    symbol: String,
    timeframe: String,
    pip_size: f64,
    alerts_enabled: bool,
    sound_alerts: bool,
    day: Option<NaiveDate>,
    emitted: HashSet<SignalKey>,
}

impl SignalEmitter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            symbol: config.symbol.clone(),
            timeframe: config.timeframe.clone(),
            pip_size: config.pip_size,
            alerts_enabled: config.alerts_enabled,
            sound_alerts: config.sound_alerts,
            day: None,
            emitted: HashSet::new(),
        }
    }

    /// Dedup only has to hold within a day
    pub fn begin_day(&mut self, day: NaiveDate) {
        self.day = Some(day);
        self.emitted.clear();
    }

    pub fn emitted_today(&self) -> usize {
        self.emitted.len()
    }

    /// Dispatch an event for `bar`. Output values are written on every call;
    /// the marker and the alert only the first time the key is seen.
    /// Returns true when the key was new.
    pub fn emit<S: ChartSink + AlertSink>(
        &mut self,
        event: &SignalEvent,
        bar: &Bar,
        is_live: bool,
        sink: &mut S,
    ) -> bool {
        debug_assert_eq!(self.day, Some(event.trading_day), "emit before begin_day");

        let output = match event.side {
            Side::Buy => SignalOutput {
                buy: Some(SignalOutput::BUY),
                sell: None,
            },
            Side::Sell => SignalOutput {
                buy: None,
                sell: Some(SignalOutput::SELL),
            },
        };
        sink.set_output(event.index, output);

        let key = SignalKey::from(event);
        if !self.emitted.insert(key) {
            debug!("{} already emitted, skipping marker", key);
            return false;
        }

        let offset = self.pip_size * MARKER_OFFSET_PIPS;
        let (glyph, color, price) = match event.side {
            Side::Buy => (MarkerGlyph::UpTriangle, ChartColor::LimeGreen, bar.low - offset),
            Side::Sell => (MarkerGlyph::DownTriangle, ChartColor::Red, bar.high + offset),
        };
        sink.draw_marker(MarkerDraw {
            id: key.to_string(),
            timestamp: bar.timestamp,
            price,
            glyph,
            color,
        });

        info!(
            "{} {}_{} @ {:.2} (level {:.2}) bar {} [{}]",
            event.side,
            event.kind.prefix(),
            event.level,
            event.price,
            event.level_price,
            event.index,
            key
        );

        if is_live && self.alerts_enabled {
            sink.alert(&self.alert_text(event), self.sound_alerts);
        }

        true
    }

    fn alert_text(&self, event: &SignalEvent) -> String {
        format!(
            "{} {}_{} @ {}  {}  {}  {}",
            event.side,
            event.kind.prefix(),
            event.level,
            format_price(event.price),
            self.symbol,
            self.timeframe,
            to_local(event.timestamp).format("%Y-%m-%d %H:%M")
        )
    }

    /// Draw every set level as a segment spanning the regular session
    pub fn render_levels<S: ChartSink>(
        &self,
        day: NaiveDate,
        levels: &LevelSet,
        clock: &SessionClock,
        sink: &mut S,
    ) {
        let start = to_absolute(clock.regular_open(day));
        let end = to_absolute(clock.regular_close(day));

        for (kind, price) in levels.iter_active() {
            let (color, style) = level_style(kind);
            sink.draw_segment(SegmentDraw {
                id: format!("{}_SEG_{}", kind.tag(), day.format("%Y%m%d")),
                start,
                end,
                price,
                color,
                style,
            });
        }
    }
}
