//! Configuration management for touchtalk

pub mod file;

use std::time::Duration;

use crate::session::SessionConfig;
use crate::{Error, Result};

use file::TouchtalkConfigFile;

/// Default wake-state poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default pause after an unexpected monitor error
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Default sample rate for capture, playback and the session (mono, 16-bit)
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

/// Default hardware period (50ms)
pub const DEFAULT_PERIOD_MS: u32 = 50;

/// Default number of reply chunks held before the oldest is dropped
pub const DEFAULT_PLAYBACK_CAPACITY: usize = 10;

/// touchtalk configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Physical device connection
    pub device: DeviceConfig,

    /// Audio stream configuration
    pub audio: AudioConfig,

    /// Remote session configuration
    pub session: SessionSettings,
}

/// Device connection configuration
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Base URL of the device web server (from `TOUCHTALK_DEVICE_URL`)
    pub url: Option<String>,

    /// Wake-state poll interval
    pub poll_interval: Duration,

    /// Pause after an unexpected monitor error
    pub error_backoff: Duration,

    /// Timeout for a single wake-state poll
    pub poll_timeout: Duration,

    /// Timeout for a device command
    pub command_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            url: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            poll_timeout: Duration::from_secs(3),
            command_timeout: Duration::from_secs(5),
        }
    }
}

/// Audio stream configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Hardware period in milliseconds
    pub period_ms: u32,

    /// Maximum queued reply chunks
    pub playback_capacity: usize,
}

impl AudioConfig {
    /// Samples per hardware period (`sample_rate * period_seconds`)
    #[must_use]
    pub const fn frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.period_ms as usize) / 1000
    }

    /// Duration of one hardware period
    #[must_use]
    pub const fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms as u64)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            period_ms: DEFAULT_PERIOD_MS,
            playback_capacity: DEFAULT_PLAYBACK_CAPACITY,
        }
    }
}

/// Remote session settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Realtime model identifier
    pub model: String,

    /// Reply voice identifier
    pub voice: String,

    /// Input transcription model
    pub transcription_model: String,

    /// Replay delay of the local echo session
    pub echo_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-realtime-preview".to_string(),
            voice: "sage".to_string(),
            transcription_model: "whisper-1".to_string(),
            echo_delay: Duration::from_millis(1500),
        }
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range
    pub fn resolve(fc: TouchtalkConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let env_parse = |key: &str| env(key).and_then(|v| v.parse::<u64>().ok());

        let device = DeviceConfig {
            url: env("TOUCHTALK_DEVICE_URL").or(fc.device.url),
            poll_interval: env_parse("TOUCHTALK_POLL_INTERVAL_MS")
                .or(fc.device.poll_interval_ms)
                .map_or(defaults.device.poll_interval, Duration::from_millis),
            error_backoff: env_parse("TOUCHTALK_ERROR_BACKOFF_MS")
                .or(fc.device.error_backoff_ms)
                .map_or(defaults.device.error_backoff, Duration::from_millis),
            poll_timeout: fc
                .device
                .poll_timeout_ms
                .map_or(defaults.device.poll_timeout, Duration::from_millis),
            command_timeout: fc
                .device
                .command_timeout_ms
                .map_or(defaults.device.command_timeout, Duration::from_millis),
        };

        let audio = AudioConfig {
            sample_rate: env("TOUCHTALK_SAMPLE_RATE")
                .and_then(|v| v.parse().ok())
                .or(fc.audio.sample_rate)
                .unwrap_or(defaults.audio.sample_rate),
            period_ms: fc.audio.period_ms.unwrap_or(defaults.audio.period_ms),
            playback_capacity: env("TOUCHTALK_PLAYBACK_CAPACITY")
                .and_then(|v| v.parse().ok())
                .or(fc.audio.playback_capacity)
                .unwrap_or(defaults.audio.playback_capacity),
        };

        let session = SessionSettings {
            model: env("TOUCHTALK_MODEL")
                .or(fc.session.model)
                .unwrap_or(defaults.session.model),
            voice: env("TOUCHTALK_VOICE")
                .or(fc.session.voice)
                .unwrap_or(defaults.session.voice),
            transcription_model: fc
                .session
                .transcription_model
                .unwrap_or(defaults.session.transcription_model),
            echo_delay: fc
                .session
                .echo_delay_ms
                .map_or(defaults.session.echo_delay, Duration::from_millis),
        };

        let config = Self {
            device,
            audio,
            session,
        };
        config.validate()?;
        Ok(config)
    }

    /// Override the device URL (CLI flag beats env and file)
    #[must_use]
    pub fn with_device_url(mut self, url: Option<String>) -> Self {
        if url.is_some() {
            self.device.url = url;
        }
        self
    }

    /// The device URL, required for anything that talks to the device
    ///
    /// # Errors
    ///
    /// Returns error if no device URL is configured
    pub fn device_url(&self) -> Result<&str> {
        self.device.url.as_deref().ok_or_else(|| {
            Error::Config(
                "device URL required (set TOUCHTALK_DEVICE_URL or --device-url)".to_string(),
            )
        })
    }

    /// Build the session configuration handed to a connector
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.session.model.clone(),
            voice: self.session.voice.clone(),
            transcription_model: self.session.transcription_model.clone(),
            sample_rate: self.audio.sample_rate,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be positive".to_string()));
        }
        if self.audio.frame_samples() == 0 {
            return Err(Error::Config(
                "audio.period_ms too short for the sample rate".to_string(),
            ));
        }
        if self.audio.playback_capacity == 0 {
            return Err(Error::Config(
                "audio.playback_capacity must be at least 1".to_string(),
            ));
        }
        if self.device.poll_interval.is_zero() {
            return Err(Error::Config(
                "device.poll_interval_ms must be positive".to_string(),
            ));
        }
        if let Some(url) = &self.device.url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(Error::Config(format!(
                "device URL must start with http:// or https://: {url}"
            )));
        }
        Ok(())
    }
}
