// src/notify/queue.rs

//! Deduplicated queue of data model changes
//!
//! Changes are grouped per object in ascending Object ID order. Within an
//! object, resource changes are kept as an ordered set of `(iid, rid)` pairs
//! so consumers can walk them in a single forward pass.
//!
//! An object entry exists only while it records something. Any insertion
//! that fails leaves the queue exactly as it was.

use crate::dm::value::ResourceKey;
use crate::error::{Error, Result};
use crate::path::{Iid, Oid, Rid};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use tracing::error;

/// Changes to the instance set of one object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceSetChanges {
    /// Some instance was created or removed
    pub changed: bool,
    /// Precise tracking was given up after an unknown change
    pub unknown: bool,
    /// Instances known to have been created, while tracking is precise
    pub known_added: BTreeSet<Iid>,
}

/// All changes recorded for one object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectChanges {
    pub instance_set: InstanceSetChanges,
    pub resources: BTreeSet<ResourceKey>,
}

impl ObjectChanges {
    fn is_empty(&self) -> bool {
        !self.instance_set.changed && self.resources.is_empty()
    }

    fn records(&self) -> usize {
        1 + self.instance_set.known_added.len() + self.resources.len()
    }

    /// Instances known to have been created, or `None` if an unknown
    /// change made tracking imprecise
    pub fn added_instances(&self) -> Option<&BTreeSet<Iid>> {
        (!self.instance_set.unknown).then_some(&self.instance_set.known_added)
    }
}

/// Ordered, deduplicated change queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyQueue {
    objects: BTreeMap<Oid, ObjectChanges>,
    limit: Option<usize>,
    records: usize,
}

impl NotifyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that refuses to hold more than `limit` records
    ///
    /// Every object entry, added instance and resource change counts as one
    /// record. Exceeding the limit fails with [`Error::OutOfMemory`].
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    fn reserve(&self, extra: usize) -> Result<()> {
        match self.limit {
            Some(limit) if self.records + extra > limit => {
                error!(records = self.records, limit, "notify queue full");
                Err(Error::OutOfMemory)
            }
            _ => Ok(()),
        }
    }

    /// Mutable entry for `oid`, created only if it and `needed` more
    /// records fit
    fn entry(&mut self, oid: Oid, needed: usize) -> Result<&mut ObjectChanges> {
        let fresh = !self.objects.contains_key(&oid);
        self.reserve(needed + usize::from(fresh))?;
        if fresh {
            self.records += 1;
        }
        Ok(self.objects.entry(oid).or_default())
    }

    fn prune(&mut self, oid: Oid) {
        if let Entry::Occupied(entry) = self.objects.entry(oid)
            && entry.get().is_empty()
        {
            debug_assert!(entry.get().instance_set.known_added.is_empty());
            self.records -= entry.get().records();
            entry.remove();
        }
    }

    /// Record that instance `iid` of `oid` was created
    pub fn instance_created(&mut self, oid: Oid, iid: Iid) -> Result<()> {
        let tracked = self
            .objects
            .get(&oid)
            .is_none_or(|o| !o.instance_set.unknown && !o.instance_set.known_added.contains(&iid));
        let entry = self.entry(oid, usize::from(tracked))?;
        entry.instance_set.changed = true;
        if tracked && entry.instance_set.known_added.insert(iid) {
            self.records += 1;
        }
        Ok(())
    }

    /// Record that instance `iid` of `oid` was removed
    pub fn instance_removed(&mut self, oid: Oid, iid: Iid) -> Result<()> {
        let entry = self.entry(oid, 0)?;
        entry.instance_set.changed = true;
        if entry.instance_set.known_added.remove(&iid) {
            self.records -= 1;
        }
        Ok(())
    }

    /// Record that the instance set of `oid` changed in an unknown way
    ///
    /// From now on the queue no longer tracks which instances were added to
    /// this object.
    pub fn instance_set_unknown_change(&mut self, oid: Oid) -> Result<()> {
        let entry = self.entry(oid, 0)?;
        entry.instance_set.changed = true;
        entry.instance_set.unknown = true;
        let dropped = std::mem::take(&mut entry.instance_set.known_added).len();
        self.records -= dropped;
        Ok(())
    }

    /// Record that resource `/oid/iid/rid` changed
    pub fn resource_changed(&mut self, oid: Oid, iid: Iid, rid: Rid) -> Result<()> {
        if self
            .objects
            .get(&oid)
            .is_some_and(|o| o.resources.contains(&(iid, rid)))
        {
            return Ok(());
        }
        self.entry(oid, 1)?.resources.insert((iid, rid));
        self.records += 1;
        Ok(())
    }

    /// Drop every resource change recorded for instance `iid` of `oid`
    pub fn remove_instance_resources(&mut self, oid: Oid, iid: Iid) {
        let Some(entry) = self.objects.get_mut(&oid) else {
            return;
        };
        let before = entry.resources.len();
        entry.resources.retain(|(i, _)| *i != iid);
        self.records -= before - entry.resources.len();
        self.prune(oid);
    }

    /// Move every record of `other` into this queue
    pub fn merge(&mut self, other: NotifyQueue) -> Result<()> {
        for (oid, changes) in other.objects {
            if changes.instance_set.unknown {
                self.instance_set_unknown_change(oid)?;
            } else if changes.instance_set.changed {
                self.instance_removed_marker(oid)?;
            }
            for iid in &changes.instance_set.known_added {
                self.instance_created(oid, *iid)?;
            }
            for (iid, rid) in &changes.resources {
                self.resource_changed(oid, *iid, *rid)?;
            }
        }
        Ok(())
    }

    fn instance_removed_marker(&mut self, oid: Oid) -> Result<()> {
        let entry = self.entry(oid, 0)?;
        entry.instance_set.changed = true;
        Ok(())
    }

    /// Changes recorded for `oid`
    pub fn get(&self, oid: Oid) -> Option<&ObjectChanges> {
        self.objects.get(&oid)
    }

    /// Instances known to have been created in `oid`
    pub fn added_instances(&self, oid: Oid) -> Option<&BTreeSet<Iid>> {
        self.get(oid).and_then(ObjectChanges::added_instances)
    }

    /// Object entries in ascending Object ID order
    pub fn iter(&self) -> impl Iterator<Item = (Oid, &ObjectChanges)> {
        self.objects.iter().map(|(oid, changes)| (*oid, changes))
    }

    /// True if any object's instance set changed
    pub fn instance_set_changed(&self) -> bool {
        self.objects.values().any(|o| o.instance_set.changed)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of object entries
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Remove all records, keeping the limit
    pub fn clear(&mut self) {
        self.objects.clear();
        self.records = 0;
    }

    /// Take the records out, leaving an empty queue with the same limit
    pub fn take(&mut self) -> NotifyQueue {
        let limit = self.limit;
        let mut taken = std::mem::take(self);
        self.limit = limit;
        taken.limit = None;
        taken
    }
}
