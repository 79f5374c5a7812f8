//! Dedicated audio I/O thread
//!
//! `cpal::Stream` is `!Send` on some platforms, so both the speaker and the
//! microphone streams are confined to one OS thread. [`AudioThreadHandle`]
//! is the `Send + Sync` proxy the rest of the daemon holds; every call is a
//! command sent to the thread over a channel.

use std::sync::mpsc;
use std::thread;

use super::input::MicStream;
use super::{AudioInput, AudioOutputEngine, CaptureBuffer, InterruptSignal, PlaybackBuffer};
use crate::config::AudioConfig;
use crate::{Error, Result};

/// Seconds of microphone audio held before the oldest is dropped
const CAPTURE_SECONDS: usize = 2;

enum AudioCommand {
    StartCapture { reply: mpsc::Sender<Result<()>> },
    StopCapture { reply: mpsc::Sender<()> },
    Shutdown { reply: Option<mpsc::Sender<()>> },
}

/// `Send + Sync` handle to the audio thread
///
/// The speaker stream is opened on spawn and runs until shutdown, pulling
/// from the shared [`PlaybackBuffer`]. The microphone is opened on
/// `start` and released on `stop`.
pub struct AudioThreadHandle {
    cmd_tx: mpsc::Sender<AudioCommand>,
    thread: Option<thread::JoinHandle<()>>,
    capture: CaptureBuffer,
}

impl AudioThreadHandle {
    /// Spawn the audio thread and start the speaker stream
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned or the output device
    /// cannot be opened
    pub fn spawn(
        audio: AudioConfig,
        playback: PlaybackBuffer,
        interrupt: InterruptSignal,
    ) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<AudioCommand>();
        let (init_tx, init_rx) = mpsc::channel::<Result<()>>();

        let capture = CaptureBuffer::new(audio.sample_rate as usize * CAPTURE_SECONDS);
        let capture_clone = capture.clone();

        let thread = thread::Builder::new()
            .name("touchtalk-audio".into())
            .spawn(move || {
                Self::run(audio, playback, interrupt, capture_clone, cmd_rx, init_tx);
            })
            .map_err(|e| Error::Audio(format!("failed to spawn audio thread: {e}")))?;

        init_rx
            .recv()
            .map_err(|_| Error::Audio("audio thread died during startup".to_string()))??;

        Ok(Self {
            cmd_tx,
            thread: Some(thread),
            capture,
        })
    }

    /// Take everything the microphone has captured so far
    #[must_use]
    pub fn take_captured(&self) -> Vec<i16> {
        self.capture.take()
    }

    /// Stop both streams, waiting until they are released
    ///
    /// Later microphone calls fail; the thread is joined on drop.
    pub fn shutdown(&self) {
        let (tx, rx) = mpsc::channel();
        if self
            .cmd_tx
            .send(AudioCommand::Shutdown { reply: Some(tx) })
            .is_ok()
        {
            let _ = rx.recv();
        }
    }

    fn run(
        audio: AudioConfig,
        playback: PlaybackBuffer,
        interrupt: InterruptSignal,
        capture: CaptureBuffer,
        cmd_rx: mpsc::Receiver<AudioCommand>,
        init_tx: mpsc::Sender<Result<()>>,
    ) {
        let output = match AudioOutputEngine::open(&audio, playback, interrupt) {
            Ok(o) => o,
            Err(e) => {
                let _ = init_tx.send(Err(e));
                return;
            }
        };

        if init_tx.send(Ok(())).is_err() {
            return;
        }

        tracing::debug!(channels = output.channels(), "audio thread ready");

        let mut mic: Option<MicStream> = None;
        let mut shutdown_reply = None;

        while let Ok(cmd) = cmd_rx.recv() {
            match cmd {
                AudioCommand::StartCapture { reply } => {
                    let result = if mic.is_some() {
                        Ok(())
                    } else {
                        capture.clear();
                        MicStream::open(&audio, capture.clone()).map(|stream| {
                            mic = Some(stream);
                        })
                    };
                    let _ = reply.send(result);
                }

                AudioCommand::StopCapture { reply } => {
                    if let Some(stream) = mic.take() {
                        stream.close();
                    }
                    if !capture.is_empty() {
                        tracing::trace!(samples = capture.len(), "discarding unread capture");
                        capture.clear();
                    }
                    let _ = reply.send(());
                }

                AudioCommand::Shutdown { reply } => {
                    shutdown_reply = reply;
                    break;
                }
            }
        }

        if let Some(stream) = mic.take() {
            stream.close();
        }
        output.pause();
        drop(output);
        tracing::debug!("audio thread shutting down");

        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }
}

impl AudioInput for AudioThreadHandle {
    fn start(&self) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(AudioCommand::StartCapture { reply: tx })
            .map_err(|_| Error::Audio("audio thread is not running".to_string()))?;
        rx.recv()
            .map_err(|_| Error::Audio("audio thread is not running".to_string()))?
    }

    fn stop(&self) {
        let (tx, rx) = mpsc::channel();
        if self.cmd_tx.send(AudioCommand::StopCapture { reply: tx }).is_ok() {
            let _ = rx.recv();
        }
    }

    fn available(&self) -> usize {
        self.capture.len()
    }

    fn read_frame(&self, frame_samples: usize) -> Option<Vec<i16>> {
        self.capture.read_frame(frame_samples)
    }
}

impl Drop for AudioThreadHandle {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(AudioCommand::Shutdown { reply: None });
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            tracing::error!("audio thread panicked");
        }
    }
}
