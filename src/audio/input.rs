//! Audio capture from microphone
//!
//! The hardware callback appends samples to a [`CaptureBuffer`]; the
//! [`AudioInputEngine`] reads them back one frame at a time and sends each
//! frame to the session uplink.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};
use tokio_util::sync::CancellationToken;

use super::output::fixed_buffer_size;
use super::samples_to_bytes;
use crate::config::AudioConfig;
use crate::device::DeviceFlags;
use crate::session::AudioUplink;
use crate::{Error, Result};

/// How long the pump waits when less than a frame is available
const CAPTURE_RETRY: Duration = Duration::from_millis(10);

/// A microphone the session can stream from
///
/// `start` and `stop` are idempotent and may block the calling thread
/// briefly while the hardware stream opens or closes. `read_frame` never
/// blocks.
pub trait AudioInput: Send + Sync {
    /// Begin capturing
    ///
    /// # Errors
    ///
    /// Returns error if the input device cannot be opened
    fn start(&self) -> Result<()>;

    /// Stop capturing and discard anything not yet read
    fn stop(&self);

    /// Samples captured but not yet read
    fn available(&self) -> usize;

    /// Take exactly `frame_samples` samples, or `None` if fewer are buffered
    fn read_frame(&self, frame_samples: usize) -> Option<Vec<i16>>;
}

/// Bounded sample FIFO filled by the input callback
///
/// When full, the oldest samples are discarded.
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    samples: Arc<Mutex<VecDeque<i16>>>,
    max_samples: usize,
}

impl CaptureBuffer {
    /// Create a buffer holding at most `max_samples`
    #[must_use]
    pub fn new(max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(max_samples))),
            max_samples,
        }
    }

    /// Append samples from an iterator, discarding the oldest on overflow
    pub fn extend<I>(&self, data: I)
    where
        I: ExactSizeIterator<Item = i16>,
    {
        let incoming = data.len();
        let mut samples = self.lock();
        let overflow = (samples.len() + incoming).saturating_sub(self.max_samples);
        let drop_queued = overflow.min(samples.len());
        samples.drain(..drop_queued);
        let skip = incoming.saturating_sub(self.max_samples);
        samples.extend(data.skip(skip));
    }

    /// Take exactly `n` samples if that many are buffered
    #[must_use]
    pub fn read_frame(&self, n: usize) -> Option<Vec<i16>> {
        let mut samples = self.lock();
        if n == 0 || samples.len() < n {
            return None;
        }
        Some(samples.drain(..n).collect())
    }

    /// Take everything buffered
    #[must_use]
    pub fn take(&self) -> Vec<i16> {
        self.lock().drain(..).collect()
    }

    /// Number of buffered samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Discard everything buffered
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<i16>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Open microphone stream writing into a [`CaptureBuffer`]
///
/// `cpal::Stream` is `!Send`, so this lives on the audio thread.
pub struct MicStream {
    stream: Stream,
}

impl MicStream {
    /// Open the default input device and start capturing
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened or the stream cannot start
    pub fn open(audio: &AudioConfig, buffer: CaptureBuffer) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let rate = SampleRate(audio.sample_rate);

        let supported = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| {
                c.min_sample_rate() <= rate
                    && c.max_sample_rate() >= rate
                    && matches!(c.sample_format(), SampleFormat::I16 | SampleFormat::F32)
            })
            .min_by_key(|c| (c.channels(), c.sample_format() != SampleFormat::I16))
            .ok_or_else(|| Error::Audio("no suitable input config found".to_string()))?;

        let sample_format = supported.sample_format();
        let fixed = fixed_buffer_size(supported.buffer_size(), audio.frame_samples());
        let mut config = supported.with_sample_rate(rate).config();
        config.buffer_size = fixed;

        let stream = match sample_format {
            SampleFormat::I16 => build_stream::<i16>(&device, &config, buffer)?,
            SampleFormat::F32 => build_stream::<f32>(&device, &config, buffer)?,
            other => {
                return Err(Error::Audio(format!(
                    "unsupported input sample format: {other:?}"
                )));
            }
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = audio.sample_rate,
            channels = config.channels,
            format = ?sample_format,
            "audio capture started"
        );

        Ok(Self { stream })
    }

    /// Stop and release the stream
    pub fn close(self) {
        if let Err(e) = self.stream.pause() {
            tracing::debug!(error = %e, "failed to pause input stream");
        }
        drop(self.stream);
        tracing::debug!("audio capture stopped");
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    buffer: CaptureBuffer,
) -> Result<Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = usize::from(config.channels);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // First channel only
                buffer.extend(
                    data.chunks_exact(channels)
                        .map(|frame| i16::from_sample(frame[0])),
                );
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

/// Pumps microphone frames to the session uplink
///
/// Runs until cancelled, until the device is no longer awake, or until the
/// uplink fails. The microphone is stopped on every exit path.
pub struct AudioInputEngine {
    input: Arc<dyn AudioInput>,
    frame_samples: usize,
}

impl AudioInputEngine {
    /// Create a pump reading `frame_samples` per frame
    #[must_use]
    pub fn new(input: Arc<dyn AudioInput>, frame_samples: usize) -> Self {
        Self {
            input,
            frame_samples,
        }
    }

    /// Stream frames until told to stop; returns the number of frames sent
    ///
    /// The microphone must already be started.
    ///
    /// # Errors
    ///
    /// Returns error if the uplink rejects a frame
    pub async fn run(
        self,
        uplink: Arc<dyn AudioUplink>,
        flags: Arc<DeviceFlags>,
        cancel: CancellationToken,
    ) -> Result<u64> {
        let result = self.pump(uplink.as_ref(), &flags, &cancel).await;
        self.input.stop();

        match &result {
            Ok(frames) => tracing::debug!(frames, "capture stopped"),
            Err(e) => tracing::warn!(error = %e, "capture stopped on uplink error"),
        }
        result
    }

    async fn pump(
        &self,
        uplink: &dyn AudioUplink,
        flags: &DeviceFlags,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut sent = 0u64;

        while !cancel.is_cancelled() && flags.is_awake() {
            let ready = self.frame_samples > 0 && self.input.available() >= self.frame_samples;
            let frame = if ready {
                self.input.read_frame(self.frame_samples)
            } else {
                None
            };
            let Some(frame) = frame else {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(CAPTURE_RETRY) => continue,
                }
            };

            uplink.send_audio(samples_to_bytes(&frame)).await?;
            sent += 1;
            tokio::task::yield_now().await;
        }

        Ok(sent)
    }
}
