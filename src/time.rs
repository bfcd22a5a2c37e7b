// src/time.rs

//! Time sources
//!
//! The scheduler and the bootstrap backoff read the monotonic clock through
//! [`Clock`], so tests can drive time explicitly with [`MockClock`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Source of monotonic and wall-clock time
pub trait Clock: Send + Sync {
    /// Monotonic now
    fn now(&self) -> Instant;

    /// Wall-clock now
    fn real_now(&self) -> DateTime<Utc>;
}

/// The operating system clocks
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn real_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock
///
/// Both clocks start at construction time and only move on [`MockClock::advance`].
#[derive(Debug)]
pub struct MockClock {
    start: Instant,
    real_start: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            real_start: Utc::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move both clocks forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Time elapsed since construction
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock()
    }

    /// Saturates at [`DateTime::MAX_UTC`] once the offset leaves chrono's range
    fn real_now(&self) -> DateTime<Utc> {
        let offset = *self.offset.lock();
        let offset = chrono::Duration::from_std(offset).unwrap_or(chrono::Duration::MAX);
        self.real_start
            .checked_add_signed(offset)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
