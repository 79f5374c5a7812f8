//! Daemon - the main touchtalk service
//!
//! Opens the speaker, wires the wake monitor to the session lifecycle, and
//! runs until Ctrl-C. On the way out the session is stopped, the speaker
//! released, and the device put back to sleep.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::audio::{AudioInput, AudioThreadHandle, InterruptSignal, PlaybackBuffer};
use crate::device::{DeviceClient, DeviceCommand, DeviceFlags, HttpDevice};
use crate::monitor::WakeMonitor;
use crate::session::{SessionConnector, SessionContext, SessionLifecycle};
use crate::{Config, Result};

/// The touchtalk daemon
pub struct Daemon {
    config: Config,
    connector: Arc<dyn SessionConnector>,
}

impl Daemon {
    /// Create a daemon that opens sessions through `connector`
    #[must_use]
    pub fn new(config: Config, connector: Arc<dyn SessionConnector>) -> Self {
        Self { config, connector }
    }

    /// Run until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if no device URL is configured or the audio hardware
    /// fails
    pub async fn run(self) -> Result<()> {
        let device: Arc<dyn DeviceClient> = Arc::new(HttpDevice::from_config(&self.config.device)?);

        match device.poll().await {
            Ok(state) if state.is_awake => tracing::info!(%state, "device is already awake"),
            Ok(state) => tracing::info!(%state, "device is sleeping"),
            Err(e) => tracing::warn!(error = %e, "device not reachable yet, will keep polling"),
        }

        let playback = PlaybackBuffer::new(self.config.audio.playback_capacity);
        let interrupt = InterruptSignal::new();
        let audio = Arc::new(AudioThreadHandle::spawn(
            self.config.audio,
            playback.clone(),
            interrupt.clone(),
        )?);

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                signal.cancel();
            }
        });

        tracing::info!("waiting for device to wake, touch the sensor to start");

        let input: Arc<dyn AudioInput> = audio.clone();
        let result = self
            .supervise(Arc::clone(&device), input, playback, interrupt, shutdown)
            .await;

        audio.shutdown();
        put_device_to_sleep(device.as_ref()).await;

        tracing::info!("daemon stopped");
        result
    }

    /// Run the wake monitor over the given device and microphone until
    /// `shutdown` fires; any running session is stopped before returning
    ///
    /// # Errors
    ///
    /// Returns the first hardware error a session hits
    pub async fn supervise(
        &self,
        device: Arc<dyn DeviceClient>,
        input: Arc<dyn AudioInput>,
        playback: PlaybackBuffer,
        interrupt: InterruptSignal,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let flags = Arc::new(DeviceFlags::default());

        let lifecycle = SessionLifecycle::new(SessionContext {
            connector: Arc::clone(&self.connector),
            config: self.config.session_config(),
            input,
            frame_samples: self.config.audio.frame_samples(),
            playback,
            interrupt,
            flags: Arc::clone(&flags),
        });

        WakeMonitor::new(device, lifecycle, flags, &self.config.device)
            .run(shutdown)
            .await
    }
}

/// Send the sleep command, logging rather than failing if the device is gone
pub async fn put_device_to_sleep(device: &dyn DeviceClient) {
    match device.send_command(DeviceCommand::Sleep).await {
        Ok(()) => tracing::info!("device set to sleep"),
        Err(e) => tracing::warn!(error = %e, "could not put device to sleep"),
    }
}
