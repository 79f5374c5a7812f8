//! Audio streaming core
//!
//! Speaker and microphone streams, the bounded playback buffer that bridges
//! the session task and the hardware callback, and the barge-in signal.
//! All audio is mono signed 16-bit PCM at the configured sample rate.

pub mod buffer;
pub mod input;
pub mod interrupt;
pub mod output;
pub mod thread;

pub use buffer::{AudioChunk, PlaybackBuffer};
pub use input::{AudioInput, AudioInputEngine, CaptureBuffer};
pub use interrupt::InterruptSignal;
pub use output::{AudioOutputEngine, FrameOutcome, render_frame};
pub use thread::AudioThreadHandle;

use crate::{Error, Result};

/// Encode samples as little-endian PCM bytes
#[must_use]
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decode little-endian PCM bytes; a trailing odd byte is dropped
#[must_use]
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// RMS level of samples, normalised to [0.0, 1.0]
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let v = f32::from(s) / 32768.0;
            v * v
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
