//! Configuration for the signal engine

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::signal_core::calendar::{REGULAR_CLOSE_SECS, REGULAR_OPEN_SECS};

/// Which pattern the classifier looks for on the newest bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum DetectionMode {
    /// First body-confirmed crossing of a level
    Breakout,
    /// Pin-bar rejection at a level that already broke
    #[default]
    Retest,
}

impl std::fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Breakout => write!(f, "Breakout"),
            Self::Retest => write!(f, "Retest"),
        }
    }
}

/// Level groups that take part in drawing and detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnabledLevels {
    pub opening_range: bool,
    pub premarket: bool,
    pub prior_day: bool,
}

impl Default for EnabledLevels {
    fn default() -> Self {
        Self {
            opening_range: true,
            premarket: true,
            prior_day: true,
        }
    }
}

/// Configuration for the signal engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Instrument name used in alert text (e.g., "NQ")
    pub symbol: String,

    /// Bar timeframe label used in alert text (e.g., "m5")
    pub timeframe: String,

    /// Enabled level groups
    pub levels: EnabledLevels,

    /// Opening range length, starting at 9:30 ET
    pub opening_range_minutes: u32,

    /// Breakout or retest detection
    pub mode: DetectionMode,

    /// Fire alerts for signals on the live bar
    pub alerts_enabled: bool,

    /// Ask the alert sink to play a sound
    pub sound_alerts: bool,

    /// Dominant wick must be at least this multiple of the opposite wick
    pub rejection_ratio: f64,

    /// Price increment; markers are drawn 3 pips beyond the bar extreme
    pub pip_size: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: "NQ".to_string(),
            timeframe: "m5".to_string(),
            levels: EnabledLevels::default(),
            opening_range_minutes: 15,
            mode: DetectionMode::Retest,
            alerts_enabled: true,
            sound_alerts: true,
            rejection_ratio: 1.5,
            pip_size: 0.25,
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file; missing fields fall back to defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let session_minutes = (REGULAR_CLOSE_SECS - REGULAR_OPEN_SECS) / 60;
        if self.opening_range_minutes == 0 || self.opening_range_minutes > session_minutes {
            bail!(
                "opening_range_minutes must be within 1..={}, got {}",
                session_minutes,
                self.opening_range_minutes
            );
        }
        if !(self.rejection_ratio.is_finite() && self.rejection_ratio > 0.0) {
            bail!("rejection_ratio must be positive, got {}", self.rejection_ratio);
        }
        if !(self.pip_size.is_finite() && self.pip_size >= 0.0) {
            bail!("pip_size must be non-negative, got {}", self.pip_size);
        }
        Ok(())
    }
}
