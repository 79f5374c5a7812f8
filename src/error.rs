//! Error types for touchtalk

use thiserror::Error;

/// Result type alias for touchtalk operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in touchtalk
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio hardware error (device open, stream build, stream start)
    #[error("audio error: {0}")]
    Audio(String),

    /// Device transport error (poll or command rejected)
    #[error("device error: {0}")]
    Device(String),

    /// Remote session failed mid-conversation
    #[error("session error: {0}")]
    Session(String),

    /// Remote session could not be established
    #[error("connect error: {0}")]
    Connect(String),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error must take the process down
    ///
    /// Only hardware failures are fatal; everything else is absorbed at the
    /// poll-tick or session boundary.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Audio(_))
    }
}
