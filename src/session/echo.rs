//! Local echo session
//!
//! Replays every uplinked frame back as reply audio after a fixed delay.
//! Exercises the whole capture, session and playback path without a remote
//! service. Use headphones, or the speaker feeds back into the microphone.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

use super::{
    AudioUplink, RemoteSession, SessionConfig, SessionConnector, SessionEvent, SessionHandle,
};
use crate::{Error, Result};

const AGENT_NAME: &str = "echo";

/// Frames buffered between the uplink and the replay task
const UPLINK_QUEUE: usize = 64;

/// Events buffered between the replay task and the session loop
const EVENT_QUEUE: usize = 64;

/// Connector for the local echo session
#[derive(Debug, Clone)]
pub struct EchoConnector {
    delay: Duration,
}

impl EchoConnector {
    /// Replay audio after `delay`
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl SessionConnector for EchoConnector {
    async fn connect(&self, config: &SessionConfig) -> Result<RemoteSession> {
        let (uplink_tx, uplink_rx) = mpsc::channel(UPLINK_QUEUE);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);

        tokio::spawn(replay(uplink_rx, event_tx, self.delay));

        let handle = SessionHandle::new();
        tracing::debug!(
            session = %handle,
            sample_rate = config.sample_rate,
            delay_ms = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX),
            "echo session opened"
        );

        Ok(RemoteSession {
            handle,
            uplink: Arc::new(EchoUplink {
                tx: Mutex::new(Some(uplink_tx)),
            }),
            events: ReceiverStream::new(event_rx).boxed(),
        })
    }
}

struct EchoUplink {
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
}

impl EchoUplink {
    fn sender(&self) -> Option<mpsc::Sender<Vec<u8>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl AudioUplink for EchoUplink {
    async fn send_audio(&self, pcm: Vec<u8>) -> Result<()> {
        let tx = self
            .sender()
            .ok_or_else(|| Error::Session("echo session closed".to_string()))?;
        tx.send(pcm)
            .await
            .map_err(|_| Error::Session("echo session closed".to_string()))
    }

    async fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Delay line from uplink frames to reply audio events
///
/// Ends once the uplink is closed and everything pending has been replayed,
/// or as soon as the event receiver goes away.
async fn replay(
    mut uplink: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<Result<SessionEvent>>,
    delay: Duration,
) {
    let started = SessionEvent::AgentStart {
        name: AGENT_NAME.to_string(),
    };
    if events.send(Ok(started)).await.is_err() {
        return;
    }

    let mut pending: VecDeque<(Instant, Vec<u8>)> = VecDeque::new();
    let mut open = true;

    while open || !pending.is_empty() {
        let due = pending.front().map(|(at, _)| *at);

        tokio::select! {
            frame = uplink.recv(), if open => match frame {
                Some(pcm) => pending.push_back((Instant::now() + delay, pcm)),
                None => open = false,
            },
            () = sleep_until_due(due) => {
                if let Some((_, pcm)) = pending.pop_front()
                    && events.send(Ok(SessionEvent::Audio { data: pcm })).await.is_err()
                {
                    return;
                }
            }
        }
    }

    let _ = events
        .send(Ok(SessionEvent::AgentEnd {
            name: AGENT_NAME.to_string(),
        }))
        .await;
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
