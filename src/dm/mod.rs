// src/dm/mod.rs

//! Data model: installed objects plus the transaction that mutates them
//!
//! [`DataModel`] is the single owner of the object [`Registry`] and the
//! [`TransactionSession`]. Mutating helpers include the touched object in
//! the open transaction and record the change into the session's notify
//! queue, so callers never have to remember either step.
//!
//! Mutations require an open transaction; calling them outside one is an
//! [`Error::Internal`].

pub mod handler;
pub mod memory;
pub mod registry;
pub mod value;

pub use handler::{Handler, HandlerSet, ObjectHandler};
pub use memory::MemoryObject;
pub use registry::{InstalledObject, Registry};
pub use value::{ReadEntry, ResourceDescriptor, ResourceKind, Value, WriteEntry};

use crate::error::{Error, Result};
use crate::notify::queue::NotifyQueue;
use crate::path::{ID_INVALID, IdType, Iid, Oid, Rid, UriPath};
use crate::servers::{SSID_BOOTSTRAP, Ssid};
use crate::transaction::TransactionSession;
use tracing::{debug, trace};

/// Well-known Object IDs
pub mod oid {
    use crate::path::Oid;

    pub const SECURITY: Oid = 0;
    pub const SERVER: Oid = 1;
    pub const ACCESS_CONTROL: Oid = 2;
}

/// Security object resources
pub mod security {
    use crate::path::Rid;

    pub const SERVER_URI: Rid = 0;
    pub const BOOTSTRAP: Rid = 1;
    pub const MODE: Rid = 2;
    pub const PUBLIC_KEY: Rid = 3;
    pub const SERVER_PUBLIC_KEY: Rid = 4;
    pub const SECRET_KEY: Rid = 5;
    pub const SSID: Rid = 10;
    pub const CLIENT_HOLD_OFF_TIME: Rid = 11;
    pub const BOOTSTRAP_TIMEOUT: Rid = 12;
}

/// Server object resources
pub mod server {
    use crate::path::Rid;

    pub const SSID: Rid = 0;
    pub const LIFETIME: Rid = 1;
    pub const DEFAULT_MIN_PERIOD: Rid = 2;
    pub const DEFAULT_MAX_PERIOD: Rid = 3;
    pub const NOTIFICATION_STORING: Rid = 6;
    pub const BINDING: Rid = 7;
    pub const LAST_BOOTSTRAPPED: Rid = 12;
    pub const PREFERRED_TRANSPORT: Rid = 22;
    pub const MUTE_SEND: Rid = 23;
}

/// Installed objects and their shared transaction
#[derive(Debug, Default)]
pub struct DataModel {
    registry: Registry,
    txn: TransactionSession,
}

impl DataModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Data model whose per-transaction notify queue is bounded
    pub fn with_queue_limit(limit: usize) -> Self {
        Self {
            registry: Registry::new(),
            txn: TransactionSession::with_queue_limit(limit),
        }
    }

    pub fn register(&mut self, handler: Box<dyn ObjectHandler>) -> Result<()> {
        self.registry.register(handler)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn transaction(&self) -> &TransactionSession {
        &self.txn
    }

    pub fn has_object(&self, oid: Oid) -> bool {
        self.registry.contains(oid)
    }

    fn object(&mut self, oid: Oid) -> Result<&mut InstalledObject> {
        self.registry.get_mut(oid)
    }

    // Transaction control

    pub fn begin(&mut self) -> Result<()> {
        self.txn.begin()
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.is_open()
    }

    pub fn include(&mut self, oid: Oid) -> Result<()> {
        self.txn.include(&mut self.registry, oid)
    }

    pub fn validate(&mut self) -> Result<()> {
        self.txn.validate(&mut self.registry)
    }

    pub fn finish(&mut self, result: Result<()>) -> Result<Option<NotifyQueue>> {
        self.txn.finish(&mut self.registry, result)
    }

    pub fn finish_without_validation(&mut self, result: Result<()>) -> Result<Option<NotifyQueue>> {
        self.txn.finish_without_validation(&mut self.registry, result)
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.txn.rollback(&mut self.registry)
    }

    /// Run `f` in a transaction of its own (or nested in the open one)
    ///
    /// Returns the committed notify queue when this call closed the
    /// outermost level.
    pub fn with_transaction<F>(&mut self, f: F) -> Result<Option<NotifyQueue>>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.begin()?;
        let result = f(self);
        self.finish(result)
    }

    /// Notify queue of the open transaction
    pub fn queue_mut(&mut self) -> Result<&mut NotifyQueue> {
        self.txn.queue_mut()
    }

    // Reads

    /// Sorted, duplicate-free instance IDs of `oid`
    pub fn list_instances(&mut self, oid: Oid) -> Result<Vec<Iid>> {
        self.object(oid)?.list_instances()
    }

    pub fn instance_present(&mut self, oid: Oid, iid: Iid) -> Result<bool> {
        self.object(oid)?.instance_present(iid)
    }

    pub fn list_resources(&mut self, oid: Oid, iid: Iid) -> Result<Vec<ResourceDescriptor>> {
        self.object(oid)?.list_resources(iid)
    }

    /// Read a resource or resource instance
    ///
    /// Inside a transaction the object is included first, so objects that
    /// stage writes until commit answer with their staged state.
    pub fn read_resource(&mut self, path: &UriPath) -> Result<Value> {
        let (oid, iid, rid) = resource_ids(path)?;
        if self.txn.is_open() {
            self.include(oid)?;
        }
        self.object(oid)?.resource_read(iid, rid, path.riid())
    }

    pub fn read_resource_i64(&mut self, path: &UriPath) -> Result<i64> {
        self.read_resource(path)?
            .as_i64()
            .ok_or_else(|| Error::bad_request(format!("{} is not an integer", path)))
    }

    pub fn read_resource_bool(&mut self, path: &UriPath) -> Result<bool> {
        self.read_resource(path)?
            .as_bool()
            .ok_or_else(|| Error::bad_request(format!("{} is not a boolean", path)))
    }

    pub fn read_resource_string(&mut self, path: &UriPath) -> Result<String> {
        match self.read_resource(path)? {
            Value::String(s) => Ok(s),
            _ => Err(Error::bad_request(format!("{} is not a string", path))),
        }
    }

    /// Read every present, readable resource under an object or instance path
    ///
    /// `bootstrap` selects Bootstrap-Server read access. Multiple-instance
    /// resources produce one entry per resource instance.
    pub fn read_tree(&mut self, path: &UriPath, bootstrap: bool) -> Result<Vec<ReadEntry>> {
        let oid = path.oid().ok_or_else(|| Error::bad_request("read of the root"))?;
        let iids = match path.iid() {
            Some(iid) if self.instance_present(oid, iid)? => vec![iid],
            Some(_) => return Err(Error::NotFound),
            None => self.list_instances(oid)?,
        };
        let mut entries = Vec::new();
        for iid in iids {
            for res in self.list_resources(oid, iid)? {
                let readable = if bootstrap {
                    res.kind.is_bootstrap_readable()
                } else {
                    res.kind.is_readable()
                };
                if !res.is_present() || !readable {
                    continue;
                }
                if path.rid().is_some_and(|rid| rid != res.rid) {
                    continue;
                }
                let object = self.object(oid)?;
                if res.kind.is_multiple() {
                    for riid in object.list_resource_instances(iid, res.rid)? {
                        let value = object.resource_read(iid, res.rid, Some(riid))?;
                        let path = UriPath::resource_instance(oid, iid, res.rid, riid);
                        entries.push(ReadEntry { path, value });
                    }
                } else {
                    let value = object.resource_read(iid, res.rid, None)?;
                    let path = UriPath::resource(oid, iid, res.rid);
                    entries.push(ReadEntry { path, value });
                }
            }
        }
        Ok(entries)
    }

    // Mutations

    /// Create instance `iid` and record it as created
    pub fn instance_create(&mut self, oid: Oid, iid: Iid) -> Result<()> {
        if iid == ID_INVALID {
            return Err(Error::bad_request("instance ID 65535 is reserved"));
        }
        self.include(oid)?;
        self.object(oid)?.instance_create(iid)?;
        debug!(oid, iid, "instance created");
        self.queue_mut()?.instance_created(oid, iid)
    }

    /// Remove instance `iid`, dropping its pending resource changes in favor
    /// of a single instance-removed record
    pub fn instance_remove(&mut self, oid: Oid, iid: Iid) -> Result<()> {
        self.include(oid)?;
        self.object(oid)?.instance_remove(iid)?;
        debug!(oid, iid, "instance removed");
        let queue = self.queue_mut()?;
        queue.remove_instance_resources(oid, iid);
        queue.instance_removed(oid, iid)
    }

    /// Reset every resource of an instance
    pub fn instance_reset(&mut self, oid: Oid, iid: Iid) -> Result<()> {
        self.include(oid)?;
        self.object(oid)?.instance_reset(iid)
    }

    /// Write one resource or resource instance and record the change
    pub fn resource_write(&mut self, path: &UriPath, value: &Value) -> Result<()> {
        let (oid, iid, rid) = resource_ids(path)?;
        self.include(oid)?;
        self.object(oid)?.resource_write(iid, rid, path.riid(), value)?;
        trace!(%path, %value, "resource written");
        self.queue_mut()?.resource_changed(oid, iid, rid)
    }

    /// Reset a resource and record the change
    pub fn resource_reset(&mut self, oid: Oid, iid: Iid, rid: Rid) -> Result<()> {
        self.include(oid)?;
        self.object(oid)?.resource_reset(iid, rid)?;
        self.queue_mut()?.resource_changed(oid, iid, rid)
    }

    // Security and Server object helpers

    /// True if Security instance `iid` describes a Bootstrap-Server account
    pub fn is_bootstrap_security_instance(&mut self, iid: Iid) -> bool {
        self.read_resource_bool(&UriPath::resource(oid::SECURITY, iid, security::BOOTSTRAP))
            .unwrap_or(false)
    }

    /// Security instance of the Bootstrap-Server account, if any
    pub fn find_bootstrap_security_iid(&mut self) -> Option<Iid> {
        let iids = self.list_instances(oid::SECURITY).ok()?;
        iids.into_iter()
            .find(|&iid| self.is_bootstrap_security_instance(iid))
    }

    /// True if a Bootstrap-Server account is configured
    pub fn bootstrap_server_exists(&mut self) -> bool {
        self.find_bootstrap_security_iid().is_some()
    }

    /// Short Server ID of the account described by Security instance `iid`
    pub fn ssid_from_security_iid(&mut self, iid: Iid) -> Result<Ssid> {
        if self.is_bootstrap_security_instance(iid) {
            return Ok(SSID_BOOTSTRAP);
        }
        let ssid = self.read_resource_i64(&UriPath::resource(oid::SECURITY, iid, security::SSID))?;
        valid_ssid(ssid).ok_or_else(|| Error::bad_request(format!("invalid SSID {}", ssid)))
    }

    /// Server instance holding `ssid`
    pub fn find_server_iid(&mut self, ssid: Ssid) -> Result<Iid> {
        for iid in self.list_instances(oid::SERVER)? {
            let path = UriPath::resource(oid::SERVER, iid, server::SSID);
            if self.read_resource_i64(&path).ok().and_then(valid_ssid) == Some(ssid) {
                return Ok(iid);
            }
        }
        Err(Error::NotFound)
    }
}

/// SSID in the range usable by a regular server
pub fn valid_ssid(value: i64) -> Option<Ssid> {
    (1..i64::from(SSID_BOOTSTRAP))
        .contains(&value)
        .then(|| value as Ssid)
}

fn resource_ids(path: &UriPath) -> Result<(Oid, Iid, Rid)> {
    if !path.has(IdType::Rid) {
        return Err(Error::bad_request(format!("{} is not a resource path", path)));
    }
    match (path.oid(), path.iid(), path.rid()) {
        (Some(oid), Some(iid), Some(rid)) => Ok((oid, iid, rid)),
        _ => Err(Error::bad_request(format!("{} is not a resource path", path))),
    }
}
