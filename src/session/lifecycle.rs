//! Session lifecycle
//!
//! Owns at most one running session task. The task connects, starts the
//! microphone pump, and routes inbound events into the playback buffer and
//! the interrupt signal until the device sleeps, the session fails, or the
//! task is cancelled.
//!
//! State moves `Idle → Connecting → Active → Ending → Idle`. `start`
//! publishes `Connecting`, the task publishes `Active` and `Ending`, and
//! `Idle` is published once the task has been joined.

use std::ops::ControlFlow;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::{
    RemoteSession, SessionConfig, SessionConnector, SessionEvent, SessionHandle, truncate_for_log,
};
use crate::Result;
use crate::audio::{AudioChunk, AudioInput, AudioInputEngine, InterruptSignal, PlaybackBuffer};
use crate::device::DeviceFlags;

/// Longest tool output written to the log
const TOOL_OUTPUT_LOG_CHARS: usize = 200;

/// Where the session lifecycle is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session
    Idle,
    /// Waiting for the connector
    Connecting,
    /// Streaming in both directions
    Active,
    /// Tearing down
    Ending,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Active => write!(f, "active"),
            Self::Ending => write!(f, "ending"),
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The device stopped reporting awake
    DeviceAsleep,
    /// `stop` was called
    Cancelled,
    /// The server closed the event stream
    StreamClosed,
    /// The connector could not open a session
    ConnectFailed(String),
    /// The session reported or hit an error
    Failed(String),
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceAsleep => write!(f, "device asleep"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::StreamClosed => write!(f, "stream closed"),
            Self::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Everything a session task needs
#[derive(Clone)]
pub struct SessionContext {
    /// Opens the remote session
    pub connector: Arc<dyn SessionConnector>,

    /// Passed to the connector
    pub config: SessionConfig,

    /// Microphone
    pub input: Arc<dyn AudioInput>,

    /// Samples per uplinked frame
    pub frame_samples: usize,

    /// Reply audio destination
    pub playback: PlaybackBuffer,

    /// Barge-in signal read by the output callback
    pub interrupt: InterruptSignal,

    /// Device wake state as last polled
    pub flags: Arc<DeviceFlags>,
}

impl SessionContext {
    /// Silence the speaker and drop any pending interrupt
    fn reset_audio(&self) {
        self.playback.flush();
        self.interrupt.clear();
    }

    /// Route one inbound event
    fn dispatch(&self, handle: SessionHandle, event: SessionEvent) -> ControlFlow<EndReason> {
        match event {
            SessionEvent::Audio { data } => {
                if self.playback.enqueue(AudioChunk::from_pcm_bytes(&data)) {
                    tracing::debug!(
                        session = %handle,
                        evicted = self.playback.evicted(),
                        "playback queue full, dropped oldest chunk"
                    );
                }
            }
            SessionEvent::AudioInterrupted => {
                tracing::info!(
                    session = %handle,
                    already_pending = self.interrupt.is_raised(),
                    "reply interrupted"
                );
                self.interrupt.raise();
            }
            SessionEvent::AudioEnd => {
                tracing::debug!(session = %handle, "reply audio complete");
            }
            SessionEvent::Error { message } => {
                tracing::warn!(session = %handle, error = %message, "session error");
                return ControlFlow::Break(EndReason::Failed(message));
            }
            SessionEvent::ToolStart { name } => {
                tracing::info!(session = %handle, tool = %name, "tool started");
            }
            SessionEvent::ToolEnd { name, output } => {
                tracing::info!(
                    session = %handle,
                    tool = %name,
                    output = %truncate_for_log(&output, TOOL_OUTPUT_LOG_CHARS),
                    "tool finished"
                );
            }
            SessionEvent::AgentStart { name } => {
                tracing::info!(session = %handle, agent = %name, "agent started");
            }
            SessionEvent::AgentEnd { name } => {
                tracing::info!(session = %handle, agent = %name, "agent finished");
            }
            SessionEvent::Handoff { from, to } => {
                tracing::info!(session = %handle, from = %from, to = %to, "agent handoff");
            }
            informational @ (SessionEvent::HistoryUpdated
            | SessionEvent::HistoryAdded
            | SessionEvent::Raw) => {
                tracing::trace!(session = %handle, kind = informational.kind(), "session event");
            }
            SessionEvent::Unknown { kind } => {
                tracing::debug!(session = %handle, kind = %kind, "unknown session event");
            }
        }
        ControlFlow::Continue(())
    }
}

struct RunningSession {
    cancel: CancellationToken,
    task: JoinHandle<Result<EndReason>>,
}

/// Owner of the (at most one) running session
pub struct SessionLifecycle {
    ctx: SessionContext,
    state: Arc<watch::Sender<SessionState>>,
    current: Option<RunningSession>,
}

impl SessionLifecycle {
    /// Create an idle lifecycle
    #[must_use]
    pub fn new(ctx: SessionContext) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            ctx,
            state: Arc::new(state),
            current: None,
        }
    }

    /// Start a session unless one is already running
    ///
    /// Returns `true` if a session task was spawned. Must be called from
    /// within a tokio runtime.
    pub fn start(&mut self) -> bool {
        if self.current.is_some() {
            tracing::debug!(state = %self.state(), "session already running");
            return false;
        }

        let cancel = CancellationToken::new();
        self.state.send_replace(SessionState::Connecting);
        let task = tokio::spawn(run_session(
            self.ctx.clone(),
            Arc::clone(&self.state),
            cancel.clone(),
        ));
        self.current = Some(RunningSession { cancel, task });
        true
    }

    /// Cancel the running session and wait for it to finish
    ///
    /// Idempotent. The microphone is stopped and the playback buffer flushed
    /// whether or not a session was running.
    ///
    /// # Errors
    ///
    /// Returns the session's hardware error, if it hit one
    pub async fn stop(&mut self) -> Result<()> {
        let joined = match self.current.take() {
            Some(running) => {
                running.cancel.cancel();
                Some(running.task.await)
            }
            None => None,
        };

        self.ctx.input.stop();
        self.ctx.reset_audio();
        self.state.send_replace(SessionState::Idle);

        joined.map_or(Ok(()), finish)
    }

    /// Join the session task if it ended on its own
    ///
    /// # Errors
    ///
    /// Returns the session's hardware error, if it hit one
    pub async fn reap(&mut self) -> Result<()> {
        if !self
            .current
            .as_ref()
            .is_some_and(|running| running.task.is_finished())
        {
            return Ok(());
        }
        let Some(running) = self.current.take() else {
            return Ok(());
        };

        let joined = running.task.await;
        self.state.send_replace(SessionState::Idle);
        finish(joined)
    }

    /// Whether a session task is running or awaiting `reap`
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }
}

fn finish(joined: std::result::Result<Result<EndReason>, JoinError>) -> Result<()> {
    match joined {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.is_fatal() => Err(e),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "session ended with error");
            Ok(())
        }
        Err(e) if e.is_panic() => {
            tracing::error!(error = %e, "session task panicked");
            Ok(())
        }
        Err(_) => Ok(()),
    }
}

async fn run_session(
    ctx: SessionContext,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
) -> Result<EndReason> {
    let connected = tokio::select! {
        () = cancel.cancelled() => None,
        result = ctx.connector.connect(&ctx.config) => Some(result),
    };

    let session = match connected {
        None => {
            state.send_replace(SessionState::Ending);
            ctx.reset_audio();
            return Ok(EndReason::Cancelled);
        }
        Some(Err(e)) if e.is_fatal() => {
            state.send_replace(SessionState::Ending);
            ctx.reset_audio();
            return Err(e);
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "session connect failed");
            state.send_replace(SessionState::Ending);
            ctx.reset_audio();
            return Ok(EndReason::ConnectFailed(e.to_string()));
        }
        Some(Ok(session)) => session,
    };

    let RemoteSession {
        handle,
        uplink,
        mut events,
    } = session;

    state.send_replace(SessionState::Active);
    tracing::info!(session = %handle, model = %ctx.config.model, "session active");

    if let Err(e) = ctx.input.start() {
        tracing::error!(session = %handle, error = %e, "failed to start microphone");
        state.send_replace(SessionState::Ending);
        uplink.close().await;
        ctx.reset_audio();
        return Err(e);
    }

    let capture_cancel = cancel.child_token();
    let capture = tokio::spawn(
        AudioInputEngine::new(Arc::clone(&ctx.input), ctx.frame_samples).run(
            Arc::clone(&uplink),
            Arc::clone(&ctx.flags),
            capture_cancel.clone(),
        ),
    );

    let reason = loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break EndReason::Cancelled,
            next = events.next() => next,
        };

        match next {
            None => break EndReason::StreamClosed,
            Some(Err(e)) => {
                tracing::warn!(session = %handle, error = %e, "session stream failed");
                break EndReason::Failed(e.to_string());
            }
            Some(Ok(event)) => {
                if let ControlFlow::Break(reason) = ctx.dispatch(handle, event) {
                    break reason;
                }
            }
        }

        if !ctx.flags.is_awake() {
            break EndReason::DeviceAsleep;
        }
    };

    state.send_replace(SessionState::Ending);

    capture_cancel.cancel();
    match capture.await {
        Ok(Ok(frames)) => tracing::debug!(session = %handle, frames, "capture joined"),
        Ok(Err(_)) => {}
        Err(e) => tracing::warn!(session = %handle, error = %e, "capture task failed"),
    }
    ctx.input.stop();

    uplink.close().await;
    drop(events);
    ctx.reset_audio();

    tracing::info!(session = %handle, reason = %reason, "session ended");
    Ok(reason)
}
