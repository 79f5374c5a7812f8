//! Barge-in signal
//!
//! Raised by the session task when the server reports that the user spoke
//! over the reply. The output callback takes it at its next frame and
//! flushes the playback buffer once per raised edge.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One-bit interrupt flag shared between the session task and the output callback
#[derive(Debug, Clone, Default)]
pub struct InterruptSignal {
    raised: Arc<AtomicBool>,
}

impl InterruptSignal {
    /// Create a lowered signal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that queued reply audio be discarded
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Whether an interrupt is pending
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Consume a pending interrupt, returning whether one was raised
    ///
    /// A `raise` racing with `take` is either consumed by it or left pending
    /// for the next call, never lost.
    #[must_use]
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }

    /// Drop a pending interrupt without acting on it
    pub fn clear(&self) {
        self.raised.store(false, Ordering::Release);
    }
}
