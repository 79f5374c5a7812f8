//! Physical device client
//!
//! The touch device reports whether it is awake and whether a wake gesture
//! is pending, and accepts single-letter commands.

mod http;

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpDevice;

use crate::Result;

/// Snapshot of the device's wake state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    /// The device considers itself awake
    #[serde(default)]
    pub is_awake: bool,

    /// A wake gesture was detected and not yet acted on
    #[serde(default)]
    pub wake_requested: bool,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "awake={} wake_requested={}",
            self.is_awake, self.wake_requested
        )
    }
}

/// Command understood by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Put the device to sleep
    Sleep,
}

impl DeviceCommand {
    /// Wire code sent to the device
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Sleep => "z",
        }
    }
}

/// Client for the physical device
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Read the current wake state
    ///
    /// # Errors
    ///
    /// Returns error if the device is unreachable or answers malformed data
    async fn poll(&self) -> Result<DeviceState>;

    /// Send a command
    ///
    /// # Errors
    ///
    /// Returns error if the device is unreachable or rejects the command
    async fn send_command(&self, command: DeviceCommand) -> Result<()>;
}

/// Last observed wake state, shared with the session task
///
/// Written only by the wake monitor.
#[derive(Debug, Default)]
pub struct DeviceFlags {
    awake: AtomicBool,
}

impl DeviceFlags {
    /// Record whether the device is awake
    pub fn set_awake(&self, awake: bool) {
        self.awake.store(awake, Ordering::Release);
    }

    /// Whether the device was awake at the last poll
    #[must_use]
    pub fn is_awake(&self) -> bool {
        self.awake.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_missing_fields_default_false() {
        let state: DeviceState = serde_json::from_str(r#"{"is_awake": true}"#).unwrap();
        assert!(state.is_awake);
        assert!(!state.wake_requested);
    }

    #[test]
    fn test_sleep_code() {
        assert_eq!(DeviceCommand::Sleep.code(), "z");
    }

    #[test]
    fn test_flags() {
        let flags = DeviceFlags::default();
        assert!(!flags.is_awake());
        flags.set_awake(true);
        assert!(flags.is_awake());
    }
}
