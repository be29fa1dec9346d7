// Library crate - exports the signal engine and its feed/sink adapters

pub mod types;
pub mod config;
pub mod signal_core;
pub mod feed;
pub mod sinks;

// Re-export commonly used types
pub use types::*;
pub use config::{DetectionMode, EnabledLevels, EngineConfig};
pub use signal_core::SignalEngine;
