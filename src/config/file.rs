//! TOML configuration file loading
//!
//! Supports `~/.config/touchtalk/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct TouchtalkConfigFile {
    /// Physical device connection
    #[serde(default)]
    pub device: DeviceFileConfig,

    /// Speaker/microphone stream configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Remote conversational session configuration
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Device polling configuration
#[derive(Debug, Default, Deserialize)]
pub struct DeviceFileConfig {
    /// Base URL of the device web server (e.g. "http://192.168.1.100")
    pub url: Option<String>,

    /// Wake-state poll interval in milliseconds
    pub poll_interval_ms: Option<u64>,

    /// Pause after an unexpected monitor error, in milliseconds
    pub error_backoff_ms: Option<u64>,

    /// Timeout for a single wake-state poll, in milliseconds
    pub poll_timeout_ms: Option<u64>,

    /// Timeout for a device command, in milliseconds
    pub command_timeout_ms: Option<u64>,
}

/// Audio stream configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Sample rate shared by capture, playback and the session
    pub sample_rate: Option<u32>,

    /// Hardware period in milliseconds
    pub period_ms: Option<u32>,

    /// Maximum number of queued reply chunks
    pub playback_capacity: Option<usize>,
}

/// Session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Realtime model identifier
    pub model: Option<String>,

    /// Reply voice identifier
    pub voice: Option<String>,

    /// Input transcription model
    pub transcription_model: Option<String>,

    /// Replay delay of the local echo session, in milliseconds
    pub echo_delay_ms: Option<u64>,
}

/// Parse a TOML config document
///
/// # Errors
///
/// Returns error if the document is not valid TOML for this schema
pub fn parse_config_file(content: &str) -> crate::Result<TouchtalkConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `TouchtalkConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> TouchtalkConfigFile {
    let Some(path) = config_file_path() else {
        return TouchtalkConfigFile::default();
    };

    if !path.exists() {
        return TouchtalkConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                TouchtalkConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            TouchtalkConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/touchtalk/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("touchtalk").join("config.toml"))
}
