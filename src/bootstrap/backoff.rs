// src/bootstrap/backoff.rs

//! Client-initiated bootstrap retry backoff
//!
//! The first attempt runs after the Client Hold Off Time (or immediately).
//! Every armed attempt doubles the holdoff, clamped to
//! [`MIN_HOLDOFF`]..=[`MAX_HOLDOFF`], so retries run at 3s, 6s, 12s and so
//! on up to 120s.

use crate::sched::MAX_DELAY;
use std::time::{Duration, Instant};

/// Shortest holdoff between two Request Bootstrap attempts
pub const MIN_HOLDOFF: Duration = Duration::from_secs(3);

/// Longest holdoff between two Request Bootstrap attempts
pub const MAX_HOLDOFF: Duration = Duration::from_secs(120);

/// Timing of the next client-initiated bootstrap attempt
///
/// Both fields are `None` until the first attempt is scheduled; a reset
/// returns to that state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    pub last_attempt: Option<Instant>,
    pub holdoff: Option<Duration>,
}

impl BackoffState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once an attempt has been scheduled since the last reset
    pub fn is_started(&self) -> bool {
        self.last_attempt.is_some()
    }

    /// Forget every previous attempt
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Start over with `holdoff` before the first attempt
    pub fn seed(&mut self, holdoff: Duration) {
        self.holdoff = Some(holdoff);
    }

    /// Start over with an immediate first attempt
    pub fn restart(&mut self, now: Instant) {
        self.last_attempt = Some(now);
        self.holdoff = Some(Duration::ZERO);
    }

    /// Instant of the next attempt
    ///
    /// Saturates at `now` plus [`MAX_DELAY`] for holdoffs past the clock's
    /// range.
    pub fn next_attempt(&self, now: Instant) -> Instant {
        let delay = self.next_delay(now);
        now.checked_add(delay).unwrap_or(now)
    }

    /// Delay from `now` until the next attempt, at most [`MAX_DELAY`]
    pub fn next_delay(&self, now: Instant) -> Duration {
        let holdoff = self.holdoff.unwrap_or(Duration::ZERO);
        let last = self.last_attempt.unwrap_or(now);
        let delay = match last.checked_duration_since(now) {
            Some(ahead) => ahead.saturating_add(holdoff),
            None => holdoff.saturating_sub(now.saturating_duration_since(last)),
        };
        delay.min(MAX_DELAY)
    }

    /// Record that the next attempt was armed and grow the holdoff
    pub fn advance(&mut self, now: Instant) {
        let attempt = self.next_attempt(now);
        let grown = self.holdoff.unwrap_or(Duration::ZERO).saturating_mul(2);
        self.last_attempt = Some(attempt);
        self.holdoff = Some(grown.clamp(MIN_HOLDOFF, MAX_HOLDOFF));
    }
}
