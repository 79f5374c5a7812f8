//! Bounded playback buffer shared by the session task and the output callback
//!
//! The session task enqueues reply chunks of whatever length the server
//! sends; the hardware callback drains them into fixed-size frames. When the
//! queue is full the oldest chunk is dropped so reply latency stays bounded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::bytes_to_samples;

/// An immutable run of mono PCM samples as delivered by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    samples: Box<[i16]>,
}

impl AudioChunk {
    /// Wrap decoded samples
    #[must_use]
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into_boxed_slice(),
        }
    }

    /// Decode little-endian 16-bit PCM bytes
    #[must_use]
    pub fn from_pcm_bytes(bytes: &[u8]) -> Self {
        Self::new(bytes_to_samples(bytes))
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the chunk holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }
}

impl From<Vec<i16>> for AudioChunk {
    fn from(samples: Vec<i16>) -> Self {
        Self::new(samples)
    }
}

#[derive(Debug)]
struct Inner {
    queue: VecDeque<AudioChunk>,
    /// Chunk currently being drained; `offset < current.len()` while set
    current: Option<AudioChunk>,
    offset: usize,
}

/// Bounded FIFO of reply chunks plus a cursor into the chunk being played
///
/// Cloning yields another handle to the same buffer. Every operation holds
/// the lock for at most one push, one pop, or one frame-sized copy.
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl PlaybackBuffer {
    /// Create a buffer holding at most `capacity` queued chunks (minimum 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                current: None,
                offset: 0,
            })),
            capacity,
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue a chunk for playback, dropping the oldest queued chunk if full
    ///
    /// Empty chunks are ignored. Returns `true` if a chunk was evicted.
    pub fn enqueue(&self, chunk: AudioChunk) -> bool {
        if chunk.is_empty() {
            return false;
        }

        let mut inner = self.lock();
        let evicted = if inner.queue.len() >= self.capacity {
            inner.queue.pop_front();
            true
        } else {
            false
        };
        inner.queue.push_back(chunk);
        drop(inner);

        if evicted {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Fill `frame` from the cursor and the queued chunks, zeroing the rest
    ///
    /// Returns the number of samples copied. Only the output callback calls
    /// this.
    pub fn drain_into(&self, frame: &mut [i16]) -> usize {
        let mut filled = 0;
        let mut inner = self.lock();
        let Inner {
            queue,
            current,
            offset,
        } = &mut *inner;

        while filled < frame.len() {
            if current.is_none() {
                match queue.pop_front() {
                    Some(next) => {
                        *current = Some(next);
                        *offset = 0;
                    }
                    None => break,
                }
            }
            let Some(chunk) = current.as_ref() else {
                break;
            };

            let n = (frame.len() - filled).min(chunk.len() - *offset);
            frame[filled..filled + n].copy_from_slice(&chunk.samples()[*offset..*offset + n]);
            filled += n;
            *offset += n;

            if *offset >= chunk.len() {
                *current = None;
                *offset = 0;
            }
        }
        drop(inner);

        frame[filled..].fill(0);
        filled
    }

    /// Drop every queued chunk and the partially played one
    pub fn flush(&self) {
        let mut inner = self.lock();
        inner.queue.clear();
        inner.current = None;
        inner.offset = 0;
    }

    /// Number of queued chunks, not counting the one being played
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether nothing is queued or partially played
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let inner = self.lock();
        inner.queue.is_empty() && inner.current.is_none()
    }

    /// Maximum number of queued chunks
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total chunks dropped by overflow since creation
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    // A panic while holding the lock leaves the queue consistent, so a
    // poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
