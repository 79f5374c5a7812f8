//! Wake monitor
//!
//! Polls the device on a fixed interval and starts or stops the session on
//! wake and sleep edges.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::DeviceConfig;
use crate::device::{DeviceClient, DeviceFlags, DeviceState};
use crate::session::SessionLifecycle;

/// What a poll tick did to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// A session was started
    Started,
    /// The running session was stopped
    Stopped,
    /// Nothing changed
    Unchanged,
}

/// Result of one poll tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// The state acted on (`{false, false}` if the poll failed)
    pub state: DeviceState,

    /// Whether the poll itself succeeded
    pub polled: bool,

    /// What happened to the session
    pub action: TickAction,
}

/// Drives the session lifecycle from device wake state
pub struct WakeMonitor {
    device: Arc<dyn DeviceClient>,
    lifecycle: SessionLifecycle,
    flags: Arc<DeviceFlags>,
    poll_interval: Duration,
    error_backoff: Duration,
}

impl WakeMonitor {
    /// Create a monitor polling at the configured interval
    #[must_use]
    pub fn new(
        device: Arc<dyn DeviceClient>,
        lifecycle: SessionLifecycle,
        flags: Arc<DeviceFlags>,
        config: &DeviceConfig,
    ) -> Self {
        Self {
            device,
            lifecycle,
            flags,
            poll_interval: config.poll_interval,
            error_backoff: config.error_backoff,
        }
    }

    /// The lifecycle being driven
    #[must_use]
    pub const fn lifecycle(&self) -> &SessionLifecycle {
        &self.lifecycle
    }

    /// Poll until `shutdown` fires, then stop any running session
    ///
    /// # Errors
    ///
    /// Returns the first hardware error a session hits
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            interval_ms = u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "wake monitor started"
        );

        let result = loop {
            let pause = match self.tick().await {
                Ok(tick) if tick.polled => self.poll_interval,
                Ok(_) => self.error_backoff,
                Err(e) => break Err(e),
            };

            tokio::select! {
                () = shutdown.cancelled() => break Ok(()),
                () = tokio::time::sleep(pause) => {}
            }
        };

        let stopped = self.lifecycle.stop().await;
        self.flags.set_awake(false);
        tracing::info!("wake monitor stopped");
        result.and(stopped)
    }

    /// Run a single poll tick
    ///
    /// # Errors
    ///
    /// Returns a hardware error surfaced by the session
    pub async fn tick(&mut self) -> Result<Tick> {
        self.lifecycle.reap().await?;

        let (state, polled) = match self.device.poll().await {
            Ok(state) => (state, true),
            Err(e) => {
                tracing::warn!(error = %e, "wake poll failed, treating device as asleep");
                (DeviceState::default(), false)
            }
        };

        let active = self.lifecycle.is_active();

        let action = if state.wake_requested && !active {
            tracing::info!("wake detected, starting session");
            self.flags.set_awake(true);
            self.lifecycle.start();
            TickAction::Started
        } else if !state.is_awake && active {
            tracing::info!("device asleep, stopping session");
            self.flags.set_awake(false);
            self.lifecycle.stop().await?;
            TickAction::Stopped
        } else {
            self.flags.set_awake(state.is_awake);
            TickAction::Unchanged
        };

        tracing::trace!(%state, polled, ?action, "poll tick");
        Ok(Tick {
            state,
            polled,
            action,
        })
    }
}
