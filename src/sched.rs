// src/sched.rs

//! Deferred job scheduler
//!
//! Jobs are plain values rather than closures: the scheduler only keeps
//! track of *what* must run and *when*. The [`crate::Client`] pops due jobs
//! and runs each one under its lock, so a job never runs concurrently with a
//! foreground request.
//!
//! Every handle returned by the scheduler is cancellable. Owners keep handles
//! in `Option<JobHandle>` slots and always cancel the previous one before
//! arming a replacement.

use crate::error::{Error, Result};
use crate::time::Clock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error};

/// Longest delay a job is armed with; longer delays are clamped to it
pub const MAX_DELAY: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Work the engine defers to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    /// Flush the scheduled notification queue
    FlushNotify,
    /// Remove the Bootstrap Server account after its timeout
    PurgeBootstrap,
    /// Bootstrap Finish was not received in time
    FinishTimeout,
    /// Send a client-initiated Request Bootstrap
    RequestBootstrap,
}

/// Handle to an armed job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobHandle(u64);

/// Deadline-ordered job queue
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    capacity: usize,
    next_seq: u64,
    queue: BTreeMap<(Instant, u64), Job>,
    deadlines: HashMap<JobHandle, Instant>,
    wakeup: Arc<Notify>,
}

impl Scheduler {
    /// Create a scheduler holding at most `capacity` armed jobs
    pub fn new(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            clock,
            capacity,
            next_seq: 0,
            queue: BTreeMap::new(),
            deadlines: HashMap::new(),
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Current monotonic time
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Clock the scheduler reads
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Arm `job` to run as soon as the queue is serviced
    pub fn schedule_now(&mut self, job: Job) -> Result<JobHandle> {
        self.schedule_delayed(Duration::ZERO, job)
    }

    /// Arm `job` to run after `delay`, at most [`MAX_DELAY`] from now
    pub fn schedule_delayed(&mut self, delay: Duration, job: Job) -> Result<JobHandle> {
        if self.deadlines.len() >= self.capacity {
            error!(?job, "scheduler full, cannot arm job");
            return Err(Error::OutOfMemory);
        }
        if delay > MAX_DELAY {
            debug!(?job, ?delay, "clamping job delay");
        }
        let delay = delay.min(MAX_DELAY);
        let Some(deadline) = self.now().checked_add(delay) else {
            error!(?job, ?delay, "job deadline out of clock range");
            return Err(Error::internal("job deadline out of clock range"));
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        let handle = JobHandle(seq);
        self.queue.insert((deadline, seq), job);
        self.deadlines.insert(handle, deadline);
        debug!(?job, ?delay, "job armed");
        self.wakeup.notify_one();
        Ok(handle)
    }

    /// Cancel an armed job; returns false if it already ran or was cancelled
    pub fn cancel(&mut self, handle: JobHandle) -> bool {
        match self.deadlines.remove(&handle) {
            Some(deadline) => self.queue.remove(&(deadline, handle.0)).is_some(),
            None => false,
        }
    }

    /// Cancel the job held in `slot`, if any, and clear the slot
    pub fn cancel_slot(&mut self, slot: &mut Option<JobHandle>) {
        if let Some(handle) = slot.take() {
            self.cancel(handle);
        }
    }

    /// True if `handle` is still armed
    pub fn is_armed(&self, handle: JobHandle) -> bool {
        self.deadlines.contains_key(&handle)
    }

    /// Time left until `handle` fires
    pub fn time_to_fire(&self, handle: JobHandle) -> Option<Duration> {
        self.deadlines
            .get(&handle)
            .map(|deadline| deadline.saturating_duration_since(self.now()))
    }

    /// Remove and return the earliest job whose deadline has passed
    pub fn pop_due(&mut self) -> Option<(JobHandle, Job)> {
        let now = self.now();
        let (&(deadline, seq), _) = self.queue.iter().next()?;
        if deadline > now {
            return None;
        }
        let job = self.queue.remove(&(deadline, seq))?;
        let handle = JobHandle(seq);
        self.deadlines.remove(&handle);
        Some((handle, job))
    }

    /// Deadline of the earliest armed job
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Number of armed jobs
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Notifier signalled whenever a job is armed
    pub fn wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }
}
