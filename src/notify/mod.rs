// src/notify/mod.rs

//! Change notification
//!
//! Data model changes are collected in a [`NotifyQueue`] and, once the
//! transaction that produced them committed, fanned out by [`dispatch`] to
//! observations, the server layer and the optional access-control and
//! attribute-storage hooks.
//!
//! Changes reported by object implementations outside any transaction go
//! through [`ScheduledNotify`], which coalesces them until the next
//! [`crate::sched::Job::FlushNotify`] runs.

pub mod dispatch;
pub mod queue;

pub use dispatch::{NotifyContext, flush, perform, perform_without_servers};
pub use queue::{InstanceSetChanges, NotifyQueue, ObjectChanges};

use crate::dm::DataModel;
use crate::error::Result;
use crate::path::{Iid, Oid, Rid};
use crate::sched::{Job, JobHandle, Scheduler};
use crate::servers::Ssid;

/// Optional data model post-processing steps
///
/// Both hooks default to doing nothing.
#[allow(unused_variables)]
pub trait DataModelHooks: Send {
    /// Bring Access Control instances in line with the changes
    fn sync_access_control(
        &mut self,
        dm: &mut DataModel,
        origin: Ssid,
        queue: &NotifyQueue,
    ) -> Result<()> {
        Ok(())
    }

    /// Drop stored attributes of removed entities
    fn attr_storage_notify(&mut self, dm: &mut DataModel, queue: &NotifyQueue) -> Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl DataModelHooks for NoHooks {}

/// Changes waiting for the next notify flush job
#[derive(Debug, Default)]
pub struct ScheduledNotify {
    queue: NotifyQueue,
    handle: Option<JobHandle>,
}

impl ScheduledNotify {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            queue: NotifyQueue::with_limit(limit),
            handle: None,
        }
    }

    /// Pending changes
    pub fn queue(&self) -> &NotifyQueue {
        &self.queue
    }

    /// True while a flush job is armed
    pub fn is_scheduled(&self) -> bool {
        self.handle.is_some()
    }

    pub fn changed(&mut self, sched: &mut Scheduler, oid: Oid, iid: Iid, rid: Rid) -> Result<()> {
        self.queue.resource_changed(oid, iid, rid)?;
        self.reschedule(sched)
    }

    pub fn instances_changed(&mut self, sched: &mut Scheduler, oid: Oid) -> Result<()> {
        self.queue.instance_set_unknown_change(oid)?;
        self.reschedule(sched)
    }

    pub fn instance_created(&mut self, sched: &mut Scheduler, oid: Oid, iid: Iid) -> Result<()> {
        self.queue.instance_created(oid, iid)?;
        self.reschedule(sched)
    }

    fn reschedule(&mut self, sched: &mut Scheduler) -> Result<()> {
        if self.handle.is_none() {
            self.handle = Some(sched.schedule_now(Job::FlushNotify)?);
        }
        Ok(())
    }

    /// Take the pending changes for flushing; the flush job has fired
    pub fn take(&mut self) -> NotifyQueue {
        self.handle = None;
        self.queue.take()
    }

    /// Drop pending changes and the armed job
    pub fn clear(&mut self, sched: &mut Scheduler) {
        sched.cancel_slot(&mut self.handle);
        self.queue.clear();
    }
}
