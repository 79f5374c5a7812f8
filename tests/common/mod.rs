//! Shared test utilities
//!
//! Scripted stand-ins for the device, the microphone and the remote session,
//! so the lifecycle can be driven without hardware or network.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use touchtalk::audio::{AudioInput, InterruptSignal, PlaybackBuffer};
use touchtalk::device::{DeviceClient, DeviceCommand, DeviceFlags, DeviceState};
use touchtalk::session::{
    AudioUplink, RemoteSession, SessionConfig, SessionConnector, SessionContext, SessionEvent,
    SessionHandle, SessionState,
};
use touchtalk::{Error, Result};

/// Samples per frame used by test sessions
pub const FRAME_SAMPLES: usize = 4;

/// Shorthand for a device state
#[must_use]
pub const fn state(is_awake: bool, wake_requested: bool) -> DeviceState {
    DeviceState {
        is_awake,
        wake_requested,
    }
}

/// One scripted poll answer
#[derive(Debug, Clone, Copy)]
pub enum Poll {
    /// Answer with this state
    State(DeviceState),
    /// Fail the poll
    Fail,
}

/// Device that answers polls from a script, then repeats the last answer
pub struct ScriptedDevice {
    polls: Mutex<VecDeque<Poll>>,
    last: Mutex<Poll>,
    pub commands: Mutex<Vec<DeviceCommand>>,
    pub poll_count: AtomicUsize,
}

impl ScriptedDevice {
    #[must_use]
    pub fn new(polls: impl IntoIterator<Item = Poll>) -> Arc<Self> {
        Arc::new(Self {
            polls: Mutex::new(polls.into_iter().collect()),
            last: Mutex::new(Poll::State(DeviceState::default())),
            commands: Mutex::new(Vec::new()),
            poll_count: AtomicUsize::new(0),
        })
    }

    /// Device answering with states only
    #[must_use]
    pub fn states(states: impl IntoIterator<Item = DeviceState>) -> Arc<Self> {
        Self::new(states.into_iter().map(Poll::State))
    }

    /// Append answers to the script
    pub fn push(&self, poll: Poll) {
        self.polls.lock().unwrap().push_back(poll);
    }

    #[must_use]
    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceClient for ScriptedDevice {
    async fn poll(&self) -> Result<DeviceState> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        let next = self.polls.lock().unwrap().pop_front();
        let poll = match next {
            Some(poll) => {
                *self.last.lock().unwrap() = poll;
                poll
            }
            None => *self.last.lock().unwrap(),
        };
        match poll {
            Poll::State(state) => Ok(state),
            Poll::Fail => Err(Error::Device("scripted poll failure".to_string())),
        }
    }

    async fn send_command(&self, command: DeviceCommand) -> Result<()> {
        self.commands.lock().unwrap().push(command);
        Ok(())
    }
}

/// Microphone fed by the test
#[derive(Default)]
pub struct FakeMic {
    samples: Mutex<VecDeque<i16>>,
    capturing: AtomicBool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    fail_start: AtomicBool,
}

impl FakeMic {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Microphone whose `start` fails like missing hardware
    #[must_use]
    pub fn broken() -> Arc<Self> {
        let mic = Self::default();
        mic.fail_start.store(true, Ordering::SeqCst);
        Arc::new(mic)
    }

    /// Make samples available to `read_frame`
    pub fn feed(&self, samples: &[i16]) {
        self.samples.lock().unwrap().extend(samples);
    }

    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }
}

impl AudioInput for FakeMic {
    fn start(&self) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Audio("no input device available".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.capturing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.capturing.store(false, Ordering::SeqCst);
    }

    fn available(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    fn read_frame(&self, frame_samples: usize) -> Option<Vec<i16>> {
        let mut samples = self.samples.lock().unwrap();
        if frame_samples == 0 || samples.len() < frame_samples {
            return None;
        }
        Some(samples.drain(..frame_samples).collect())
    }
}

/// Uplink that records every frame
#[derive(Default)]
pub struct RecordingUplink {
    pub frames: Mutex<Vec<Vec<u8>>>,
    pub closed: AtomicBool,
    close_delay: Duration,
    fail_sends: AtomicBool,
}

impl RecordingUplink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Uplink whose `close` takes a while, so `Ending` stays observable
    #[must_use]
    pub fn slow_close(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            close_delay: delay,
            ..Self::default()
        })
    }

    /// Reject every frame from now on
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioUplink for RecordingUplink {
    async fn send_audio(&self, pcm: Vec<u8>) -> Result<()> {
        if self.is_closed() || self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Session("uplink closed".to_string()));
        }
        self.frames.lock().unwrap().push(pcm);
        Ok(())
    }

    async fn close(&self) {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Test side of a scripted session
pub struct SessionScript {
    pub events: mpsc::UnboundedSender<Result<SessionEvent>>,
    pub uplink: Arc<RecordingUplink>,
}

impl SessionScript {
    /// Deliver an event to the session loop
    pub fn send(&self, event: SessionEvent) {
        self.events.send(Ok(event)).unwrap();
    }
}

/// Connector handing out pre-scripted sessions; fails when none are queued
#[derive(Default)]
pub struct ScriptedConnector {
    queued: Mutex<VecDeque<(mpsc::UnboundedReceiver<Result<SessionEvent>>, Arc<RecordingUplink>)>>,
    pub connects: AtomicUsize,
}

impl ScriptedConnector {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a session for the next connect
    #[must_use]
    pub fn script(&self) -> SessionScript {
        self.script_with(RecordingUplink::new())
    }

    /// Queue a session using the given uplink
    #[must_use]
    pub fn script_with(&self, uplink: Arc<RecordingUplink>) -> SessionScript {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queued
            .lock()
            .unwrap()
            .push_back((rx, Arc::clone(&uplink)));
        SessionScript { events: tx, uplink }
    }

    #[must_use]
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionConnector for ScriptedConnector {
    async fn connect(&self, _config: &SessionConfig) -> Result<RemoteSession> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (events, uplink) = self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Connect("server unreachable".to_string()))?;

        Ok(RemoteSession {
            handle: SessionHandle::new(),
            uplink,
            events: UnboundedReceiverStream::new(events).boxed(),
        })
    }
}

/// Shared pieces a lifecycle test inspects
pub struct Harness {
    pub connector: Arc<ScriptedConnector>,
    pub mic: Arc<FakeMic>,
    pub playback: PlaybackBuffer,
    pub interrupt: InterruptSignal,
    pub flags: Arc<DeviceFlags>,
}

impl Harness {
    #[must_use]
    pub fn new() -> Self {
        Self::with_mic(FakeMic::new())
    }

    #[must_use]
    pub fn with_mic(mic: Arc<FakeMic>) -> Self {
        Self {
            connector: ScriptedConnector::new(),
            mic,
            playback: PlaybackBuffer::new(4),
            interrupt: InterruptSignal::new(),
            flags: Arc::new(DeviceFlags::default()),
        }
    }

    #[must_use]
    pub fn context(&self) -> SessionContext {
        SessionContext {
            connector: self.connector.clone(),
            config: SessionConfig {
                model: "test-model".to_string(),
                voice: "test-voice".to_string(),
                transcription_model: "test-stt".to_string(),
                sample_rate: 24000,
            },
            input: self.mic.clone(),
            frame_samples: FRAME_SAMPLES,
            playback: self.playback.clone(),
            interrupt: self.interrupt.clone(),
            flags: Arc::clone(&self.flags),
        }
    }
}

/// Wait until the lifecycle publishes `want`
pub async fn wait_for_state(rx: &mut watch::Receiver<SessionState>, want: SessionState) {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {want}"))
        .unwrap();
}

/// Poll `cond` until it holds
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Record every state the lifecycle publishes from now on
pub fn record_states(mut rx: watch::Receiver<SessionState>) -> Arc<Mutex<Vec<SessionState>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = *rx.borrow_and_update();
            sink.lock().unwrap().push(state);
        }
    });
    seen
}

/// Little-endian PCM bytes of the given samples
#[must_use]
pub fn pcm(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}
