//! Remote conversational session
//!
//! A session is a bidirectional streaming conversation: microphone frames go
//! up through an [`AudioUplink`], reply audio and status events come back as
//! a stream of [`SessionEvent`]s. The transport behind a session is supplied
//! by a [`SessionConnector`].

pub mod echo;
pub mod lifecycle;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use echo::EchoConnector;
pub use lifecycle::{EndReason, SessionContext, SessionLifecycle, SessionState};

use crate::Result;

/// Parameters handed to a connector when opening a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Realtime model identifier
    pub model: String,

    /// Reply voice identifier
    pub voice: String,

    /// Input transcription model
    pub transcription_model: String,

    /// Sample rate of both directions (mono, 16-bit PCM)
    pub sample_rate: u32,
}

/// Opaque identifier of one open session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(uuid::Uuid);

impl SessionHandle {
    /// Allocate a fresh handle
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event received from a remote session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Reply audio as little-endian 16-bit PCM
    Audio {
        /// PCM bytes
        data: Vec<u8>,
    },
    /// The server finished sending a reply's audio
    AudioEnd,
    /// The user spoke over the reply; queued audio is stale
    AudioInterrupted,
    /// The server reported an error
    Error {
        /// Error description
        message: String,
    },
    /// A tool call started
    ToolStart {
        /// Tool name
        name: String,
    },
    /// A tool call finished
    ToolEnd {
        /// Tool name
        name: String,
        /// Tool output
        output: String,
    },
    /// An agent took over the conversation
    AgentStart {
        /// Agent name
        name: String,
    },
    /// An agent finished its turn
    AgentEnd {
        /// Agent name
        name: String,
    },
    /// Control passed from one agent to another
    Handoff {
        /// Agent handing off
        from: String,
        /// Agent taking over
        to: String,
    },
    /// The conversation history changed
    HistoryUpdated,
    /// An item was added to the conversation history
    HistoryAdded,
    /// Raw transport event with no typed counterpart
    Raw,
    /// Event type this client does not know
    Unknown {
        /// Event type as reported by the server
        kind: String,
    },
}

impl SessionEvent {
    /// Short event type name for logging
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Audio { .. } => "audio",
            Self::AudioEnd => "audio_end",
            Self::AudioInterrupted => "audio_interrupted",
            Self::Error { .. } => "error",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::AgentStart { .. } => "agent_start",
            Self::AgentEnd { .. } => "agent_end",
            Self::Handoff { .. } => "handoff",
            Self::HistoryUpdated => "history_updated",
            Self::HistoryAdded => "history_added",
            Self::Raw => "raw",
            Self::Unknown { kind } => kind,
        }
    }
}

/// Upstream half of a session
#[async_trait]
pub trait AudioUplink: Send + Sync {
    /// Send one frame of little-endian 16-bit PCM
    ///
    /// # Errors
    ///
    /// Returns error if the session is closed or the transport fails
    async fn send_audio(&self, pcm: Vec<u8>) -> Result<()>;

    /// Signal that no more audio will be sent
    async fn close(&self);
}

/// Downstream half of a session; ends when the server closes it
pub type EventStream = BoxStream<'static, Result<SessionEvent>>;

/// An open session
pub struct RemoteSession {
    /// Session identifier
    pub handle: SessionHandle,

    /// Where microphone frames go
    pub uplink: Arc<dyn AudioUplink>,

    /// Where reply audio and status events come from
    pub events: EventStream,
}

/// Opens remote sessions
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Establish a session
    ///
    /// # Errors
    ///
    /// Returns error if the session cannot be established
    async fn connect(&self, config: &SessionConfig) -> Result<RemoteSession>;
}

/// Shorten text for logging, on a character boundary
#[must_use]
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
