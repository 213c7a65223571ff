//! ringr - sound event detection
//!
//! Listens to an audio input and decides whether a specific tone (e.g. a
//! doorbell chime) is sounding, using the magnitude of one FFT bin, a sliding
//! majority window and an alert state machine with cooldown. State changes
//! are forwarded to Home Assistant (MQTT), Telegram or the log.

pub mod capture;
pub mod config;
pub mod detector;
pub mod dispatch;
pub mod home_assistant;
pub mod magnitude;
pub mod notifier;
pub mod params;
pub mod replay;
pub mod source;
pub mod state;
pub mod telegram;
pub mod window;

// Re-export main types
pub use config::{load_config, Config, ConfigError, DetectorConfig, NotifierConfig};
pub use detector::{BlockOutcome, DetectorError, PipelineStats, StatsSnapshot, ToneDetector};
pub use dispatch::{NotificationDispatcher, NotifyHandle};
pub use magnitude::MagnitudeExtractor;
pub use notifier::{build_notifier, LogNotifier, Notifier, NotifierError};
pub use params::{map_frequency_bin, DerivedParameters, FrequencyBin};
pub use source::{AudioSource, BlockAssembler, CaptureError};
pub use state::{AlertState, DetectionStateMachine, Notifications};
pub use window::SlidingPeakWindow;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
