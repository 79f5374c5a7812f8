//! Audio output to speakers
//!
//! The hardware pulls one period of samples at a time; each period is filled
//! by [`render_frame`] from the shared [`PlaybackBuffer`].

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, FromSample, SampleFormat, SampleRate, SizedSample, Stream,
    StreamConfig, SupportedBufferSize,
};

use super::{InterruptSignal, PlaybackBuffer};
use crate::config::AudioConfig;
use crate::{Error, Result};

/// What a single output period played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A pending interrupt flushed the buffer; the frame is silence
    Interrupted,
    /// Samples copied from the buffer, the rest of the frame is silence
    Played(usize),
    /// Nothing to play; the frame is silence
    Underrun,
}

/// Fill one output frame
///
/// A pending interrupt wins: it is consumed, then the buffer is flushed and
/// the frame silenced. Otherwise the frame is drained from the buffer and
/// zero-padded.
pub fn render_frame(
    buffer: &PlaybackBuffer,
    interrupt: &InterruptSignal,
    frame: &mut [i16],
) -> FrameOutcome {
    if interrupt.take() {
        buffer.flush();
        frame.fill(0);
        return FrameOutcome::Interrupted;
    }

    match buffer.drain_into(frame) {
        0 => FrameOutcome::Underrun,
        n => FrameOutcome::Played(n),
    }
}

/// Speaker stream fed from a [`PlaybackBuffer`]
///
/// `cpal::Stream` is `!Send`, so this lives on the audio thread.
pub struct AudioOutputEngine {
    stream: Stream,
    config: StreamConfig,
}

impl AudioOutputEngine {
    /// Open the default output device and start the stream
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened or the stream cannot start
    pub fn open(
        audio: &AudioConfig,
        buffer: PlaybackBuffer,
        interrupt: InterruptSignal,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let rate = SampleRate(audio.sample_rate);
        let frame_samples = audio.frame_samples();

        // Prefer mono over stereo, i16 over f32
        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| {
                c.channels() <= 2
                    && c.min_sample_rate() <= rate
                    && c.max_sample_rate() >= rate
                    && matches!(c.sample_format(), SampleFormat::I16 | SampleFormat::F32)
            })
            .min_by_key(|c| (c.channels(), c.sample_format() != SampleFormat::I16))
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let sample_format = supported.sample_format();
        let fixed = fixed_buffer_size(supported.buffer_size(), frame_samples);
        let mut config = supported.with_sample_rate(rate).config();
        config.buffer_size = fixed;

        let stream = match sample_format {
            SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, buffer, interrupt, frame_samples)?
            }
            SampleFormat::F32 => {
                build_stream::<f32>(&device, &config, buffer, interrupt, frame_samples)?
            }
            other => {
                return Err(Error::Audio(format!(
                    "unsupported output sample format: {other:?}"
                )));
            }
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = audio.sample_rate,
            channels = config.channels,
            format = ?sample_format,
            "audio output started"
        );

        Ok(Self { stream, config })
    }

    /// Channel count the device was opened with
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Stop pulling frames; the stream is released on drop
    pub fn pause(&self) {
        if let Err(e) = self.stream.pause() {
            tracing::debug!(error = %e, "failed to pause output stream");
        }
    }
}

/// Request a fixed hardware period when the device allows it
pub(super) fn fixed_buffer_size(supported: &SupportedBufferSize, frame_samples: usize) -> BufferSize {
    let Ok(frames) = u32::try_from(frame_samples) else {
        return BufferSize::Default;
    };
    match supported {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
            BufferSize::Fixed(frames)
        }
        _ => BufferSize::Default,
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    buffer: PlaybackBuffer,
    interrupt: InterruptSignal,
    frame_samples: usize,
) -> Result<Stream>
where
    T: SizedSample + FromSample<i16>,
{
    let channels = usize::from(config.channels);
    let mut scratch = vec![0i16; frame_samples];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                // Only grows if the host ignores the fixed period
                if scratch.len() < frames {
                    scratch.resize(frames, 0);
                }
                let mono = &mut scratch[..frames];
                render_frame(&buffer, &interrupt, mono);

                for (out, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                    out.fill(T::from_sample(sample));
                }
            },
            |err| {
                tracing::error!(error = %err, "audio output error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}
