use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLC bar, stamped with the open time of its interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Bar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
        }
    }

    pub fn body_top(&self) -> f64 {
        self.open.max(self.close)
    }

    pub fn body_bottom(&self) -> f64 {
        self.open.min(self.close)
    }

    /// Distance from the top of the body to the high, never negative
    pub fn upper_wick(&self) -> f64 {
        (self.high - self.body_top()).max(0.0)
    }

    /// Distance from the bottom of the body to the low, never negative
    pub fn lower_wick(&self) -> f64 {
        (self.body_bottom() - self.low).max(0.0)
    }

    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    pub fn is_red(&self) -> bool {
        self.close < self.open
    }
}

/// A bar as delivered by the feed.
///
/// `index` is the bar's position in the stream. The still-forming bar is
/// re-delivered under the same index with `is_live = true` every time it
/// changes; closed and historical bars carry `is_live = false`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarUpdate {
    pub index: usize,
    pub bar: Bar,
    #[serde(rename = "isLive")]
    pub is_live: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChartColor {
    Gray,
    Yellow,
    Blue,
    LimeGreen,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineStyle {
    Solid,
    Dashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerGlyph {
    UpTriangle,
    DownTriangle,
}

/// Horizontal line from `start` to `end` at `price`. Re-drawing an id replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDraw {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub price: f64,
    pub color: ChartColor,
    pub style: LineStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerDraw {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub glyph: MarkerGlyph,
    pub color: ChartColor,
}

/// Numeric buy/sell marker values written at a bar position
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalOutput {
    pub buy: Option<f64>,
    pub sell: Option<f64>,
}

impl SignalOutput {
    pub const BUY: f64 = 1.0;
    pub const SELL: f64 = -1.0;

    pub fn is_empty(&self) -> bool {
        self.buy.is_none() && self.sell.is_none()
    }
}

/// Everything the engine dispatches, in wire form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SinkMessage {
    Segment(SegmentDraw),
    Marker(MarkerDraw),
    Output {
        index: usize,
        buy: Option<f64>,
        sell: Option<f64>,
    },
    Alert {
        text: String,
        #[serde(rename = "playSound")]
        play_sound: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(Utc.with_ymd_and_hms(2025, 1, 3, 15, 0, 0).unwrap(), open, high, low, close)
    }

    #[test]
    fn test_wick_geometry() {
        let b = bar(101.3, 101.6, 100.8, 101.5);
        assert_eq!(b.body_top(), 101.5);
        assert_eq!(b.body_bottom(), 101.3);
        assert!((b.upper_wick() - 0.1).abs() < 1e-9);
        assert!((b.lower_wick() - 0.5).abs() < 1e-9);
        assert!(b.is_green());
        assert!(!b.is_red());
    }

    #[test]
    fn test_wicks_clamped_at_zero() {
        // Malformed bar whose high sits inside the body
        let b = bar(100.0, 99.5, 99.0, 101.0);
        assert_eq!(b.upper_wick(), 0.0);
        assert_eq!(b.lower_wick(), 1.0);
    }

    #[test]
    fn test_doji_is_neither_color() {
        let b = bar(100.0, 101.0, 99.0, 100.0);
        assert!(!b.is_green());
        assert!(!b.is_red());
    }

    #[test]
    fn test_sink_message_is_tagged() {
        let msg = SinkMessage::Alert {
            text: "BUY RT_ORH".to_string(),
            play_sound: true,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"Alert\""));
        assert!(json.contains("\"playSound\":true"));
    }
}
