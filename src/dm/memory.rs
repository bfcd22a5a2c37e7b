// src/dm/memory.rs

//! In-memory object implementation
//!
//! [`MemoryObject`] stores its instances in a map and supports
//! transactions by snapshotting the whole instance set on
//! `transaction_begin`. An optional validator runs on
//! `transaction_validate` against the staged state.
//!
//! [`security_object`] and [`server_object`] build the two standard objects
//! the bootstrap engine reasons about. Both reject configurations with
//! duplicate servers when validated.

use crate::dm::handler::{Handler, HandlerSet, ObjectHandler};
use crate::dm::value::{ResourceDescriptor, ResourceKind, Value};
use crate::dm::{oid, security, server};
use crate::error::{Error, Result};
use crate::path::{Iid, Oid, Rid, Riid};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Value held by one resource of an instance
#[derive(Debug, Clone, PartialEq)]
pub enum Stored {
    Single(Value),
    Multiple(BTreeMap<Riid, Value>),
}

/// Resources of one instance
pub type InstanceData = BTreeMap<Rid, Stored>;

/// All instances of a [`MemoryObject`]
pub type Instances = BTreeMap<Iid, InstanceData>;

type Validator = Box<dyn Fn(&Instances) -> Result<()> + Send>;

/// Object storing its instances in memory
pub struct MemoryObject {
    oid: Oid,
    version: Option<String>,
    schema: BTreeMap<Rid, ResourceKind>,
    instances: Instances,
    snapshot: Option<Instances>,
    validator: Option<Validator>,
    handlers: HandlerSet,
}

impl fmt::Debug for MemoryObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryObject")
            .field("oid", &self.oid)
            .field("instances", &self.instances)
            .field("in_transaction", &self.snapshot.is_some())
            .finish_non_exhaustive()
    }
}

impl MemoryObject {
    /// Empty object with read/write and transaction support
    pub fn new(oid: Oid) -> Self {
        Self {
            oid,
            version: None,
            schema: BTreeMap::new(),
            instances: BTreeMap::new(),
            snapshot: None,
            validator: None,
            handlers: HandlerSet::read_write().union(HandlerSet::transactional()),
        }
    }

    /// Declare a resource
    pub fn with_resource(mut self, rid: Rid, kind: ResourceKind) -> Self {
        self.schema.insert(rid, kind);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Validate the staged instance set on `transaction_validate`
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Instances) -> Result<()> + Send + 'static,
    {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Restrict the declared capabilities
    pub fn with_handlers(mut self, handlers: HandlerSet) -> Self {
        self.handlers = handlers;
        self
    }

    /// Add an instance with single-instance resource values
    pub fn with_instance(
        mut self,
        iid: Iid,
        values: impl IntoIterator<Item = (Rid, Value)>,
    ) -> Self {
        let data = values
            .into_iter()
            .map(|(rid, value)| (rid, Stored::Single(value)))
            .collect();
        self.instances.insert(iid, data);
        self
    }

    /// Current instance set
    pub fn instances(&self) -> &Instances {
        &self.instances
    }

    /// Single-instance value of `/iid/rid`, if set
    pub fn value(&self, iid: Iid, rid: Rid) -> Option<&Value> {
        match self.instances.get(&iid)?.get(&rid)? {
            Stored::Single(value) => Some(value),
            Stored::Multiple(_) => None,
        }
    }

    fn kind(&self, rid: Rid) -> Result<ResourceKind> {
        self.schema.get(&rid).copied().ok_or(Error::NotFound)
    }

    fn instance_mut(&mut self, iid: Iid) -> Result<&mut InstanceData> {
        self.instances.get_mut(&iid).ok_or(Error::NotFound)
    }
}

impl ObjectHandler for MemoryObject {
    fn oid(&self) -> Oid {
        self.oid
    }

    fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn handlers(&self) -> HandlerSet {
        self.handlers
    }

    fn list_instances(&mut self) -> Result<Vec<Iid>> {
        Ok(self.instances.keys().copied().collect())
    }

    fn instance_create(&mut self, iid: Iid) -> Result<()> {
        if self.instances.contains_key(&iid) {
            return Err(Error::bad_request(format!("instance {} exists", iid)));
        }
        self.instances.insert(iid, InstanceData::new());
        Ok(())
    }

    fn instance_remove(&mut self, iid: Iid) -> Result<()> {
        self.instances.remove(&iid).map(|_| ()).ok_or(Error::NotFound)
    }

    fn instance_reset(&mut self, iid: Iid) -> Result<()> {
        self.instance_mut(iid)?.clear();
        Ok(())
    }

    fn list_resources(&mut self, iid: Iid) -> Result<Vec<ResourceDescriptor>> {
        let data = self.instances.get(&iid).ok_or(Error::NotFound)?;
        Ok(self
            .schema
            .iter()
            .map(|(&rid, &kind)| {
                if data.contains_key(&rid) {
                    ResourceDescriptor::present(rid, kind)
                } else {
                    ResourceDescriptor::absent(rid, kind)
                }
            })
            .collect())
    }

    fn resource_read(&mut self, iid: Iid, rid: Rid, riid: Option<Riid>) -> Result<Value> {
        let data = self.instances.get(&iid).ok_or(Error::NotFound)?;
        match (data.get(&rid).ok_or(Error::NotFound)?, riid) {
            (Stored::Single(value), None) => Ok(value.clone()),
            (Stored::Multiple(values), Some(riid)) => {
                values.get(&riid).cloned().ok_or(Error::NotFound)
            }
            (Stored::Single(_), Some(_)) => Err(Error::NotFound),
            (Stored::Multiple(_), None) => {
                Err(Error::bad_request("multiple-instance resource read without instance"))
            }
        }
    }

    fn resource_write(
        &mut self,
        iid: Iid,
        rid: Rid,
        riid: Option<Riid>,
        value: &Value,
    ) -> Result<()> {
        let kind = self.kind(rid)?;
        if kind == ResourceKind::E {
            return Err(Error::MethodNotAllowed);
        }
        let data = self.instance_mut(iid)?;
        match (kind.is_multiple(), riid) {
            (false, None) => {
                data.insert(rid, Stored::Single(value.clone()));
            }
            (true, Some(riid)) => {
                let entry = data
                    .entry(rid)
                    .or_insert_with(|| Stored::Multiple(BTreeMap::new()));
                if let Stored::Multiple(values) = entry {
                    values.insert(riid, value.clone());
                }
            }
            _ => return Err(Error::bad_request("resource instance mismatch")),
        }
        Ok(())
    }

    fn resource_reset(&mut self, iid: Iid, rid: Rid) -> Result<()> {
        let kind = self.kind(rid)?;
        let data = self.instance_mut(iid)?;
        if kind.is_multiple() {
            data.insert(rid, Stored::Multiple(BTreeMap::new()));
        } else {
            data.remove(&rid);
        }
        Ok(())
    }

    fn list_resource_instances(&mut self, iid: Iid, rid: Rid) -> Result<Vec<Riid>> {
        let data = self.instances.get(&iid).ok_or(Error::NotFound)?;
        match data.get(&rid) {
            Some(Stored::Multiple(values)) => Ok(values.keys().copied().collect()),
            Some(Stored::Single(_)) => Err(Error::MethodNotAllowed),
            None => Err(Error::NotFound),
        }
    }

    fn transaction_begin(&mut self) -> Result<()> {
        self.snapshot = Some(self.instances.clone());
        Ok(())
    }

    fn transaction_validate(&mut self) -> Result<()> {
        match &self.validator {
            Some(validator) => validator(&self.instances),
            None => Ok(()),
        }
    }

    fn transaction_commit(&mut self) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }

    fn transaction_rollback(&mut self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.instances = snapshot;
        }
        Ok(())
    }
}

fn single(data: &InstanceData, rid: Rid) -> Option<&Value> {
    match data.get(&rid)? {
        Stored::Single(value) => Some(value),
        Stored::Multiple(_) => None,
    }
}

/// LwM2M Security object (OID 0)
pub fn security_object() -> MemoryObject {
    MemoryObject::new(oid::SECURITY)
        .with_resource(security::SERVER_URI, ResourceKind::BsRw)
        .with_resource(security::BOOTSTRAP, ResourceKind::BsRw)
        .with_resource(security::MODE, ResourceKind::BsRw)
        .with_resource(security::PUBLIC_KEY, ResourceKind::BsRw)
        .with_resource(security::SERVER_PUBLIC_KEY, ResourceKind::BsRw)
        .with_resource(security::SECRET_KEY, ResourceKind::BsRw)
        .with_resource(security::SSID, ResourceKind::BsRw)
        .with_resource(security::CLIENT_HOLD_OFF_TIME, ResourceKind::BsRw)
        .with_resource(security::BOOTSTRAP_TIMEOUT, ResourceKind::BsRw)
        .with_validator(validate_security)
}

fn validate_security(instances: &Instances) -> Result<()> {
    let mut bootstrap = 0;
    let mut ssids = BTreeSet::new();
    for (iid, data) in instances {
        if single(data, security::SERVER_URI).is_none() {
            return Err(Error::bad_request(format!("Security instance {} has no URI", iid)));
        }
        if single(data, security::BOOTSTRAP).and_then(Value::as_bool) == Some(true) {
            bootstrap += 1;
            continue;
        }
        let Some(ssid) = single(data, security::SSID).and_then(Value::as_i64) else {
            return Err(Error::bad_request(format!("Security instance {} has no SSID", iid)));
        };
        if !ssids.insert(ssid) {
            return Err(Error::bad_request(format!("duplicate SSID {}", ssid)));
        }
    }
    if bootstrap > 1 {
        return Err(Error::bad_request("more than one Bootstrap Server account"));
    }
    Ok(())
}

/// LwM2M Server object (OID 1)
pub fn server_object() -> MemoryObject {
    MemoryObject::new(oid::SERVER)
        .with_resource(server::SSID, ResourceKind::R)
        .with_resource(server::LIFETIME, ResourceKind::Rw)
        .with_resource(server::DEFAULT_MIN_PERIOD, ResourceKind::Rw)
        .with_resource(server::DEFAULT_MAX_PERIOD, ResourceKind::Rw)
        .with_resource(server::NOTIFICATION_STORING, ResourceKind::Rw)
        .with_resource(server::BINDING, ResourceKind::Rw)
        .with_resource(server::LAST_BOOTSTRAPPED, ResourceKind::R)
        .with_resource(server::PREFERRED_TRANSPORT, ResourceKind::Rw)
        .with_resource(server::MUTE_SEND, ResourceKind::Rw)
        .with_validator(validate_server)
}

fn validate_server(instances: &Instances) -> Result<()> {
    let mut ssids = BTreeSet::new();
    for (iid, data) in instances {
        let ssid = single(data, server::SSID)
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::bad_request(format!("Server instance {} has no SSID", iid)))?;
        if !ssids.insert(ssid) {
            return Err(Error::bad_request(format!("duplicate SSID {}", ssid)));
        }
    }
    Ok(())
}

/// Access Control object (OID 2) with object/instance/owner resources
pub fn access_control_object() -> MemoryObject {
    MemoryObject::new(oid::ACCESS_CONTROL)
        .with_resource(0, ResourceKind::R)
        .with_resource(1, ResourceKind::R)
        .with_resource(2, ResourceKind::Rwm)
        .with_resource(3, ResourceKind::Rw)
        .with_handlers(
            HandlerSet::read_write()
                .union(HandlerSet::transactional())
                .without(Handler::InstanceReset),
        )
}
