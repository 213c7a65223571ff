//! Service configuration
//!
//! Values are read from a TOML file with `[detector]` and `[notifier]`
//! sections. Every key can be overridden by an environment variable named
//! `RINGR_<SECTION>_<KEY>`, e.g. `RINGR_DETECTOR_THRESHOLD`.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_FILE: &str = "/etc/ringr/ringr.toml";

/// Prefix of the environment variables overriding file values
pub const ENV_PREFIX: &str = "RINGR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required option '{key}' in section [{section}]")]
    Missing {
        section: &'static str,
        key: &'static str,
    },

    #[error("Invalid value for '{key}' in section [{section}]: {value}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },

    #[error("Unsupported notifier: {0}")]
    UnsupportedNotifier(String),
}

/// Complete service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub detector: DetectorConfig,
    pub notifier: NotifierConfig,
}

/// Configuration for the tone detector
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Input device: enumeration index or name fragment (None = default input)
    pub device: Option<String>,

    /// Match threshold in percent (0 - 100)
    pub threshold: f64,

    /// How long the tone must last (seconds)
    pub peak_duration: f64,

    /// Target frequency (Hz)
    pub frequency: f64,

    /// Number of frequency bins between 0 Hz and Nyquist
    pub num_freq_bins: usize,

    /// Percent of the peak window that must match (0 - 100)
    pub acceptance_ratio: f64,

    /// Magnitude multiplier (0 disables detection)
    pub gain: f64,

    /// Input latency hint (seconds)
    pub latency: Option<f64>,

    /// Minimum time in the alerting state (seconds)
    pub cooldown_secs: f64,

    /// Block duration (milliseconds)
    pub block_duration_ms: u32,

    /// Log every analysed block at debug level
    pub log_analysis: bool,
}

impl DetectorConfig {
    pub const DEFAULT_FREQ_BINS: usize = 256;
    pub const DEFAULT_ACCEPTANCE_RATIO: f64 = 100.0;
    pub const DEFAULT_GAIN: f64 = 0.0;
    pub const DEFAULT_COOLDOWN_SECS: f64 = 10.0;
    pub const DEFAULT_BLOCK_DURATION_MS: u32 = 50;

    /// Configuration with the required values set and defaults elsewhere
    pub fn new(threshold: f64, peak_duration: f64, frequency: f64) -> Self {
        Self {
            device: None,
            threshold,
            peak_duration,
            frequency,
            num_freq_bins: Self::DEFAULT_FREQ_BINS,
            acceptance_ratio: Self::DEFAULT_ACCEPTANCE_RATIO,
            gain: Self::DEFAULT_GAIN,
            latency: None,
            cooldown_secs: Self::DEFAULT_COOLDOWN_SECS,
            block_duration_ms: Self::DEFAULT_BLOCK_DURATION_MS,
            log_analysis: false,
        }
    }

    /// Threshold as a ratio in [0, 1]
    pub fn threshold_ratio(&self) -> f32 {
        (self.threshold / 100.0) as f32
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &'static str, value: String| ConfigError::InvalidValue {
            section: "detector",
            key,
            value,
        };

        if !(0.0..=100.0).contains(&self.threshold) {
            return Err(invalid("threshold", format!("{} (expected 0-100)", self.threshold)));
        }

        if !(0.0..=100.0).contains(&self.acceptance_ratio) {
            return Err(invalid(
                "acceptance_ratio",
                format!("{} (expected 0-100)", self.acceptance_ratio),
            ));
        }

        if !(self.peak_duration >= 0.0) || !self.peak_duration.is_finite() {
            return Err(invalid("peak_duration", self.peak_duration.to_string()));
        }

        if !(self.frequency >= 0.0) || !self.frequency.is_finite() {
            return Err(invalid("frequency", self.frequency.to_string()));
        }

        if self.num_freq_bins < 2 {
            return Err(invalid(
                "frequency_bins",
                format!("{} (expected at least 2)", self.num_freq_bins),
            ));
        }

        if !(self.gain >= 0.0) || !self.gain.is_finite() {
            return Err(invalid("gain", self.gain.to_string()));
        }

        if !(self.cooldown_secs >= 0.0) || !self.cooldown_secs.is_finite() {
            return Err(invalid("cooldown", self.cooldown_secs.to_string()));
        }

        if self.block_duration_ms == 0 {
            return Err(invalid("block_duration", "0".to_string()));
        }

        if let Some(latency) = self.latency {
            if !(latency > 0.0) || !latency.is_finite() {
                return Err(invalid("latency", latency.to_string()));
            }
        }

        Ok(())
    }
}

/// Notifier selected by the `type` key of the `[notifier]` section
#[derive(Debug, Clone, PartialEq)]
pub enum NotifierConfig {
    /// Home Assistant binary sensor over MQTT (`type = "ha"`)
    HomeAssistant(HomeAssistantConfig),

    /// Telegram bot message (`type = "telegram"`)
    Telegram(TelegramConfig),

    /// Log-only notifier (`type = "log"`)
    Log,
}

impl NotifierConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            NotifierConfig::HomeAssistant(_) => "ha",
            NotifierConfig::Telegram(_) => "telegram",
            NotifierConfig::Log => "log",
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct HomeAssistantConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: Option<String>,
    pub mqtt_pass: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_qos: u8,
    pub device_id: String,
    pub device_name: String,

    /// Maximum wait for the broker CONNACK per attempt
    pub connect_timeout: Duration,

    /// Extra connection attempts after the first one fails
    pub connect_retries: u32,
}

impl HomeAssistantConfig {
    pub const DEFAULT_PORT: u16 = 1883;
    pub const DEFAULT_CLIENT_ID: &'static str = "ringr_01";
    pub const DEFAULT_QOS: u8 = 1;
    pub const DEFAULT_DEVICE_ID: &'static str = "ringr_01";
    pub const DEFAULT_DEVICE_NAME: &'static str = "ringr 01";
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: f64 = 10.0;
    pub const DEFAULT_CONNECT_RETRIES: u32 = 3;

    pub fn new(mqtt_host: impl Into<String>) -> Self {
        Self {
            mqtt_host: mqtt_host.into(),
            mqtt_port: Self::DEFAULT_PORT,
            mqtt_user: None,
            mqtt_pass: None,
            mqtt_client_id: Self::DEFAULT_CLIENT_ID.to_string(),
            mqtt_qos: Self::DEFAULT_QOS,
            device_id: Self::DEFAULT_DEVICE_ID.to_string(),
            device_name: Self::DEFAULT_DEVICE_NAME.to_string(),
            connect_timeout: Duration::from_secs_f64(Self::DEFAULT_CONNECT_TIMEOUT_SECS),
            connect_retries: Self::DEFAULT_CONNECT_RETRIES,
        }
    }
}

// Keeps the broker password out of logs
impl fmt::Debug for HomeAssistantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HomeAssistantConfig")
            .field("mqtt_host", &self.mqtt_host)
            .field("mqtt_port", &self.mqtt_port)
            .field("mqtt_user", &self.mqtt_user)
            .field("mqtt_pass", &self.mqtt_pass.as_ref().map(|_| "***"))
            .field("mqtt_client_id", &self.mqtt_client_id)
            .field("mqtt_qos", &self.mqtt_qos)
            .field("device_id", &self.device_id)
            .field("device_name", &self.device_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("connect_retries", &self.connect_retries)
            .finish()
    }
}

#[derive(Clone, PartialEq)]
pub struct TelegramConfig {
    pub api_token: String,
    pub chat_id: String,
    pub message: String,
}

impl TelegramConfig {
    pub const DEFAULT_MESSAGE: &'static str = "Event detected";
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("api_token", &"***")
            .field("chat_id", &self.chat_id)
            .field("message", &self.message)
            .finish()
    }
}

/// Scalar that may be written as a number or a string in the file
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Integer(i64),
    Text(String),
}

impl From<RawScalar> for String {
    fn from(value: RawScalar) -> Self {
        match value {
            RawScalar::Integer(n) => n.to_string(),
            RawScalar::Text(s) => s,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    detector: RawDetector,

    #[serde(default)]
    notifier: RawNotifier,
}

#[derive(Debug, Default, Deserialize)]
struct RawDetector {
    device: Option<RawScalar>,
    threshold: Option<f64>,
    peak_duration: Option<f64>,
    frequency: Option<f64>,
    frequency_bins: Option<usize>,
    acceptance_ratio: Option<f64>,
    gain: Option<f64>,
    latency: Option<f64>,
    cooldown: Option<f64>,
    block_duration: Option<u32>,
    log_analysis: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RawNotifier {
    #[serde(rename = "type")]
    kind: Option<String>,

    // Home Assistant
    mqtt_host: Option<String>,
    mqtt_port: Option<u16>,
    mqtt_user: Option<String>,
    mqtt_pass: Option<String>,
    mqtt_client_id: Option<String>,
    mqtt_qos: Option<u8>,
    device_id: Option<String>,
    device_name: Option<String>,
    connect_timeout: Option<f64>,
    connect_retries: Option<u32>,

    // Telegram
    api_token: Option<String>,
    chat_id: Option<RawScalar>,
    message: Option<String>,
}

/// Boolean accepting the usual config spellings (true/yes/on/1 and opposites)
struct Flag(bool);

impl FromStr for Flag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Flag(true)),
            "0" | "false" | "no" | "off" => Ok(Flag(false)),
            _ => Err(()),
        }
    }
}

/// Applies `RINGR_<SECTION>_<KEY>` overrides on top of file values
struct EnvOverlay<F> {
    lookup: F,
}

impl<F> EnvOverlay<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn var_name(section: &str, key: &str) -> String {
        format!(
            "{}_{}_{}",
            ENV_PREFIX,
            section.to_ascii_uppercase(),
            key.to_ascii_uppercase()
        )
    }

    /// Environment value if set and non-empty, file value otherwise
    fn get<T: FromStr>(
        &self,
        section: &'static str,
        key: &'static str,
        file_value: Option<T>,
    ) -> Result<Option<T>, ConfigError> {
        match (self.lookup)(&Self::var_name(section, key)) {
            Some(raw) if !raw.trim().is_empty() => {
                raw.trim()
                    .parse::<T>()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidValue {
                        section,
                        key,
                        value: raw.clone(),
                    })
            }
            _ => Ok(file_value),
        }
    }

    fn require<T: FromStr>(
        &self,
        section: &'static str,
        key: &'static str,
        file_value: Option<T>,
    ) -> Result<T, ConfigError> {
        self.get(section, key, file_value)?
            .ok_or(ConfigError::Missing { section, key })
    }

    fn flag(
        &self,
        section: &'static str,
        key: &'static str,
        file_value: Option<bool>,
    ) -> Result<Option<bool>, ConfigError> {
        Ok(self
            .get(section, key, file_value.map(Flag))?
            .map(|Flag(value)| value))
    }
}

/// Load configuration from `path`, overlaying environment values.
///
/// A missing file is not an error: every value may come from the
/// environment.
pub fn load_config<F>(path: &Path, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let text = if path.is_file() {
        std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        debug!("Config file {} not found, using environment only", path.display());
        String::new()
    };

    let config = parse_config(&text, env)?;
    debug!("Config used: {:?}", config);

    Ok(config)
}

/// Parse configuration from TOML text, overlaying environment values
pub fn parse_config<F>(text: &str, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw: RawConfig = toml::from_str(text)?;
    let overlay = EnvOverlay { lookup: env };

    let notifier = notifier_config(&overlay, raw.notifier)?;
    let detector = detector_config(&overlay, raw.detector)?;

    Ok(Config { detector, notifier })
}

fn detector_config<F>(env: &EnvOverlay<F>, raw: RawDetector) -> Result<DetectorConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    const SECTION: &str = "detector";

    let config = DetectorConfig {
        device: env.get(SECTION, "device", raw.device.map(String::from))?,
        threshold: env.require(SECTION, "threshold", raw.threshold)?,
        peak_duration: env.require(SECTION, "peak_duration", raw.peak_duration)?,
        frequency: env.require(SECTION, "frequency", raw.frequency)?,
        num_freq_bins: env
            .get(SECTION, "frequency_bins", raw.frequency_bins)?
            .unwrap_or(DetectorConfig::DEFAULT_FREQ_BINS),
        acceptance_ratio: env
            .get(SECTION, "acceptance_ratio", raw.acceptance_ratio)?
            .unwrap_or(DetectorConfig::DEFAULT_ACCEPTANCE_RATIO),
        gain: env
            .get(SECTION, "gain", raw.gain)?
            .unwrap_or(DetectorConfig::DEFAULT_GAIN),
        latency: env.get(SECTION, "latency", raw.latency)?,
        cooldown_secs: env
            .get(SECTION, "cooldown", raw.cooldown)?
            .unwrap_or(DetectorConfig::DEFAULT_COOLDOWN_SECS),
        block_duration_ms: env
            .get(SECTION, "block_duration", raw.block_duration)?
            .unwrap_or(DetectorConfig::DEFAULT_BLOCK_DURATION_MS),
        log_analysis: env
            .flag(SECTION, "log_analysis", raw.log_analysis)?
            .unwrap_or(false),
    };

    config.validate()?;
    Ok(config)
}

fn notifier_config<F>(env: &EnvOverlay<F>, raw: RawNotifier) -> Result<NotifierConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    const SECTION: &str = "notifier";

    let kind: String = env
        .get(SECTION, "type", raw.kind)?
        .unwrap_or_else(|| "log".to_string());

    match kind.as_str() {
        "ha" => {
            let mqtt_qos = env
                .get(SECTION, "mqtt_qos", raw.mqtt_qos)?
                .unwrap_or(HomeAssistantConfig::DEFAULT_QOS);
            if mqtt_qos > 2 {
                return Err(ConfigError::InvalidValue {
                    section: SECTION,
                    key: "mqtt_qos",
                    value: mqtt_qos.to_string(),
                });
            }

            let timeout_secs = env
                .get(SECTION, "connect_timeout", raw.connect_timeout)?
                .unwrap_or(HomeAssistantConfig::DEFAULT_CONNECT_TIMEOUT_SECS);
            let connect_timeout = Duration::try_from_secs_f64(timeout_secs)
                .ok()
                .filter(|timeout| !timeout.is_zero())
                .ok_or_else(|| ConfigError::InvalidValue {
                    section: SECTION,
                    key: "connect_timeout",
                    value: timeout_secs.to_string(),
                })?;

            Ok(NotifierConfig::HomeAssistant(HomeAssistantConfig {
                mqtt_host: env.require(SECTION, "mqtt_host", raw.mqtt_host)?,
                mqtt_port: env
                    .get(SECTION, "mqtt_port", raw.mqtt_port)?
                    .unwrap_or(HomeAssistantConfig::DEFAULT_PORT),
                mqtt_user: env.get(SECTION, "mqtt_user", raw.mqtt_user)?,
                mqtt_pass: env.get(SECTION, "mqtt_pass", raw.mqtt_pass)?,
                mqtt_client_id: env
                    .get(SECTION, "mqtt_client_id", raw.mqtt_client_id)?
                    .unwrap_or_else(|| HomeAssistantConfig::DEFAULT_CLIENT_ID.to_string()),
                mqtt_qos,
                device_id: env
                    .get(SECTION, "device_id", raw.device_id)?
                    .unwrap_or_else(|| HomeAssistantConfig::DEFAULT_DEVICE_ID.to_string()),
                device_name: env
                    .get(SECTION, "device_name", raw.device_name)?
                    .unwrap_or_else(|| HomeAssistantConfig::DEFAULT_DEVICE_NAME.to_string()),
                connect_timeout,
                connect_retries: env
                    .get(SECTION, "connect_retries", raw.connect_retries)?
                    .unwrap_or(HomeAssistantConfig::DEFAULT_CONNECT_RETRIES),
            }))
        }
        "telegram" => Ok(NotifierConfig::Telegram(TelegramConfig {
            api_token: env.require(SECTION, "api_token", raw.api_token)?,
            chat_id: env.require(SECTION, "chat_id", raw.chat_id.map(String::from))?,
            message: env
                .get(SECTION, "message", raw.message)?
                .unwrap_or_else(|| TelegramConfig::DEFAULT_MESSAGE.to_string()),
        })),
        "log" => Ok(NotifierConfig::Log),
        other => Err(ConfigError::UnsupportedNotifier(other.to_string())),
    }
}
