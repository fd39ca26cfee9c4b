//! Session-wide reference instant for elapsed-time computation.
//!
//! All devices share one timeline: the reference is the arrival time of the
//! first valid sample of the session, whichever device sent it.

use std::sync::OnceLock;
use std::time::Instant;

/// Set-once holder of the session reference instant.
#[derive(Debug, Default)]
pub struct ClockSync {
    reference: OnceLock<Instant>,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Establish the reference if it is not set yet and return the winner.
    ///
    /// Concurrent callers race on a single cell; exactly one value is ever
    /// stored and every caller observes it.
    pub fn establish_once(&self, arrival: Instant) -> Instant {
        *self.reference.get_or_init(|| arrival)
    }

    /// The reference instant, if any sample has been accepted.
    pub fn reference(&self) -> Option<Instant> {
        self.reference.get().copied()
    }

    /// Milliseconds between the reference and `at`, establishing the
    /// reference from `at` when unset. Saturates at zero.
    pub fn elapsed_ms(&self, at: Instant) -> u64 {
        let reference = self.establish_once(at);
        let elapsed = at.saturating_duration_since(reference).as_millis();
        u64::try_from(elapsed).unwrap_or(u64::MAX)
    }
}
