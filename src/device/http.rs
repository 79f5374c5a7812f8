//! HTTP transport for the device web server
//!
//! `GET /wake` returns the wake state; `POST /command` takes a single-letter
//! command.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{DeviceClient, DeviceCommand, DeviceState};
use crate::config::DeviceConfig;
use crate::{Error, Result};

#[derive(Serialize)]
struct CommandRequest<'a> {
    command: &'a str,
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Device reached over its HTTP API
#[derive(Debug, Clone)]
pub struct HttpDevice {
    base_url: String,
    client: Client,
    poll_timeout: Duration,
    command_timeout: Duration,
}

impl HttpDevice {
    /// Create a client for the device at `base_url` (e.g. `http://192.168.1.100`)
    #[must_use]
    pub fn new(base_url: &str, poll_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            poll_timeout,
            command_timeout,
        }
    }

    /// Create a client from the device configuration
    ///
    /// # Errors
    ///
    /// Returns error if no device URL is configured
    pub fn from_config(config: &DeviceConfig) -> Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| {
            Error::Config(
                "device URL required (set TOUCHTALK_DEVICE_URL or --device-url)".to_string(),
            )
        })?;
        Ok(Self::new(url, config.poll_timeout, config.command_timeout))
    }

    /// Base URL without a trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl DeviceClient for HttpDevice {
    async fn poll(&self) -> Result<DeviceState> {
        let url = format!("{}/wake", self.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(self.poll_timeout)
            .send()
            .await
            .map_err(|e| Error::Device(format!("wake poll failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Device(format!("wake poll returned {status}")));
        }

        response
            .json::<DeviceState>()
            .await
            .map_err(|e| Error::Device(format!("malformed wake state: {e}")))
    }

    async fn send_command(&self, command: DeviceCommand) -> Result<()> {
        let url = format!("{}/command", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&CommandRequest {
                command: command.code(),
            })
            .timeout(self.command_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Device("command timed out, device may be busy".to_string())
                } else {
                    Error::Device(format!("command failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Device(format!("command returned {status} - {body}")));
        }

        let reply: CommandResponse = response
            .json()
            .await
            .map_err(|e| Error::Device(format!("malformed command reply: {e}")))?;

        if reply.status != "success" {
            return Err(Error::Device(format!(
                "command {:?} rejected: {}",
                command.code(),
                reply.message.as_deref().unwrap_or(&reply.status)
            )));
        }

        tracing::info!(
            command = command.code(),
            message = reply.message.as_deref().unwrap_or("command executed"),
            "device command accepted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let device = HttpDevice::new(
            "http://10.0.0.7/",
            Duration::from_secs(3),
            Duration::from_secs(5),
        );
        assert_eq!(device.base_url(), "http://10.0.0.7");
    }

    #[test]
    fn test_from_config_requires_url() {
        let config = DeviceConfig::default();
        assert!(matches!(
            HttpDevice::from_config(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_command_body() {
        let body = serde_json::to_string(&CommandRequest {
            command: DeviceCommand::Sleep.code(),
        })
        .unwrap();
        assert_eq!(body, r#"{"command":"z"}"#);
    }
}
