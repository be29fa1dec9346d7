//! Sink implementations for the engine's rendering and alert traits

use anyhow::Result;
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use tracing::{debug, info, warn};

use crate::signal_core::{AlertSink, ChartSink};
use crate::types::{MarkerDraw, SegmentDraw, SignalOutput, SinkMessage};

/// Logs every dispatch. Segments go to debug since they are re-issued on
/// every session bar.
#[derive(Debug, Default)]
pub struct TracingSink {
    pub label: String,
}

impl TracingSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ChartSink for TracingSink {
    fn draw_segment(&mut self, segment: SegmentDraw) {
        debug!("[{}] segment {} @ {:.2}", self.label, segment.id, segment.price);
    }

    fn draw_marker(&mut self, marker: MarkerDraw) {
        info!(
            "[{}] marker {} {:?} @ {:.2}",
            self.label, marker.id, marker.glyph, marker.price
        );
    }

    fn set_output(&mut self, index: usize, output: SignalOutput) {
        if !output.is_empty() {
            debug!("[{}] output bar {}: {:?}", self.label, index, output);
        }
    }
}

impl AlertSink for TracingSink {
    fn alert(&mut self, text: &str, play_sound: bool) {
        warn!("[{}] ALERT {}", self.label, text);
        if play_sound {
            // Terminal bell
            eprint!("\x07");
        }
    }
}

/// Serializes every dispatch as one JSON object per line.
///
/// Trait methods can't fail, so the first write error is kept and reported
/// by `finish`; later writes are skipped.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    lines: usize,
    error: Option<std::io::Error>,
    /// Positions whose last written output carried a value
    marked: HashSet<usize>,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            lines: 0,
            error: None,
            marked: HashSet::new(),
        }
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    fn write(&mut self, message: &SinkMessage) {
        if self.error.is_some() {
            return;
        }
        let result = serde_json::to_writer(&mut self.writer, message)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"));
        match result {
            Ok(()) => self.lines += 1,
            Err(e) => self.error = Some(e),
        }
    }

    /// Flush and hand back the writer, or the first error seen
    pub fn finish(mut self) -> Result<W> {
        if let Some(e) = self.error.take() {
            return Err(e.into());
        }
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> ChartSink for JsonLinesSink<W> {
    fn draw_segment(&mut self, segment: SegmentDraw) {
        self.write(&SinkMessage::Segment(segment));
    }

    fn draw_marker(&mut self, marker: MarkerDraw) {
        self.write(&SinkMessage::Marker(marker));
    }

    fn set_output(&mut self, index: usize, output: SignalOutput) {
        // Every bar gets cleared first; a clear is only written for a
        // position that currently shows a value
        if output.is_empty() {
            if !self.marked.remove(&index) {
                return;
            }
        } else {
            self.marked.insert(index);
        }
        self.write(&SinkMessage::Output {
            index,
            buy: output.buy,
            sell: output.sell,
        });
    }
}

impl<W: Write> AlertSink for JsonLinesSink<W> {
    fn alert(&mut self, text: &str, play_sound: bool) {
        self.write(&SinkMessage::Alert {
            text: text.to_string(),
            play_sound,
        });
    }
}

/// Keeps the latest state of every id, like a chart would
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub segments: BTreeMap<String, SegmentDraw>,
    pub markers: BTreeMap<String, MarkerDraw>,
    pub outputs: BTreeMap<usize, SignalOutput>,
    pub alerts: Vec<(String, bool)>,
    /// Raw draw_marker calls, to catch duplicates the map would hide
    pub marker_draws: usize,
}

impl ChartSink for MemorySink {
    fn draw_segment(&mut self, segment: SegmentDraw) {
        self.segments.insert(segment.id.clone(), segment);
    }

    fn draw_marker(&mut self, marker: MarkerDraw) {
        self.marker_draws += 1;
        self.markers.insert(marker.id.clone(), marker);
    }

    fn set_output(&mut self, index: usize, output: SignalOutput) {
        if output.is_empty() {
            self.outputs.remove(&index);
        } else {
            self.outputs.insert(index, output);
        }
    }
}

impl AlertSink for MemorySink {
    fn alert(&mut self, text: &str, play_sound: bool) {
        self.alerts.push((text.to_string(), play_sound));
    }
}

/// Forwards every call to both sinks
pub struct Tee<'a, A, B> {
    pub first: &'a mut A,
    pub second: &'a mut B,
}

impl<A: ChartSink, B: ChartSink> ChartSink for Tee<'_, A, B> {
    fn draw_segment(&mut self, segment: SegmentDraw) {
        self.first.draw_segment(segment.clone());
        self.second.draw_segment(segment);
    }

    fn draw_marker(&mut self, marker: MarkerDraw) {
        self.first.draw_marker(marker.clone());
        self.second.draw_marker(marker);
    }

    fn set_output(&mut self, index: usize, output: SignalOutput) {
        self.first.set_output(index, output);
        self.second.set_output(index, output);
    }
}

impl<A: AlertSink, B: AlertSink> AlertSink for Tee<'_, A, B> {
    fn alert(&mut self, text: &str, play_sound: bool) {
        self.first.alert(text, play_sound);
        self.second.alert(text, play_sound);
    }
}
