// src/dm/registry.rs

//! Object registry and capability-checked dispatch
//!
//! The registry exclusively owns every installed object. Calls go through
//! [`InstalledObject`], which consults the capability set captured at
//! registration time before touching the handler.

use crate::dm::handler::{Handler, HandlerSet, ObjectHandler};
use crate::dm::value::{ExecuteArg, OiAttributes, ResourceAttributes, ResourceDescriptor, Value};
use crate::error::{Error, Result};
use crate::path::{Iid, Oid, Rid, Riid};
use crate::servers::Ssid;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// A registered object
pub struct InstalledObject {
    oid: Oid,
    version: Option<String>,
    handlers: HandlerSet,
    handler: Box<dyn ObjectHandler>,
}

impl fmt::Debug for InstalledObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstalledObject")
            .field("oid", &self.oid)
            .field("version", &self.version)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

impl InstalledObject {
    fn new(handler: Box<dyn ObjectHandler>) -> Self {
        Self {
            oid: handler.oid(),
            version: handler.version().map(str::to_string),
            handlers: handler.handlers(),
            handler,
        }
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// True if the object declared `handler`
    pub fn implements(&self, handler: Handler) -> bool {
        self.handlers.contains(handler)
    }

    fn require(&self, handler: Handler) -> Result<()> {
        if self.implements(handler) {
            Ok(())
        } else {
            debug!(oid = self.oid, ?handler, "handler not implemented");
            Err(handler.unimplemented_error())
        }
    }

    /// Instance IDs, sorted ascending and without duplicates
    pub fn list_instances(&mut self) -> Result<Vec<Iid>> {
        self.require(Handler::ListInstances)?;
        let mut iids = self.handler.list_instances()?;
        iids.sort_unstable();
        iids.dedup();
        Ok(iids)
    }

    /// True if instance `iid` is present
    pub fn instance_present(&mut self, iid: Iid) -> Result<bool> {
        Ok(self.list_instances()?.binary_search(&iid).is_ok())
    }

    /// Lowest instance ID not currently in use
    pub fn free_iid(&mut self) -> Result<Iid> {
        let iids = self.list_instances()?;
        let mut candidate: Iid = 0;
        for iid in iids {
            if iid != candidate {
                break;
            }
            candidate = candidate
                .checked_add(1)
                .filter(|&c| c != crate::path::ID_INVALID)
                .ok_or(Error::OutOfMemory)?;
        }
        Ok(candidate)
    }

    pub fn instance_create(&mut self, iid: Iid) -> Result<()> {
        self.require(Handler::InstanceCreate)?;
        self.handler.instance_create(iid)
    }

    pub fn instance_remove(&mut self, iid: Iid) -> Result<()> {
        self.require(Handler::InstanceRemove)?;
        self.handler.instance_remove(iid)
    }

    pub fn instance_reset(&mut self, iid: Iid) -> Result<()> {
        self.require(Handler::InstanceReset)?;
        self.handler.instance_reset(iid)
    }

    /// Declared resources of an instance, sorted by resource ID
    pub fn list_resources(&mut self, iid: Iid) -> Result<Vec<ResourceDescriptor>> {
        self.require(Handler::ListResources)?;
        let mut resources = self.handler.list_resources(iid)?;
        resources.sort_by_key(|r| r.rid);
        resources.dedup_by_key(|r| r.rid);
        Ok(resources)
    }

    /// Descriptor of a present resource
    pub fn resource_descriptor(&mut self, iid: Iid, rid: Rid) -> Result<ResourceDescriptor> {
        self.list_resources(iid)?
            .into_iter()
            .find(|r| r.rid == rid && r.is_present())
            .ok_or(Error::NotFound)
    }

    pub fn resource_read(&mut self, iid: Iid, rid: Rid, riid: Option<Riid>) -> Result<Value> {
        self.require(Handler::ResourceRead)?;
        self.handler.resource_read(iid, rid, riid)
    }

    pub fn resource_write(
        &mut self,
        iid: Iid,
        rid: Rid,
        riid: Option<Riid>,
        value: &Value,
    ) -> Result<()> {
        self.require(Handler::ResourceWrite)?;
        self.handler.resource_write(iid, rid, riid, value)
    }

    pub fn resource_execute(&mut self, iid: Iid, rid: Rid, args: &[ExecuteArg]) -> Result<()> {
        self.require(Handler::ResourceExecute)?;
        self.handler.resource_execute(iid, rid, args)
    }

    pub fn resource_reset(&mut self, iid: Iid, rid: Rid) -> Result<()> {
        self.require(Handler::ResourceReset)?;
        self.handler.resource_reset(iid, rid)
    }

    /// Resource instance IDs, sorted ascending and without duplicates
    pub fn list_resource_instances(&mut self, iid: Iid, rid: Rid) -> Result<Vec<Riid>> {
        self.require(Handler::ListResourceInstances)?;
        let mut riids = self.handler.list_resource_instances(iid, rid)?;
        riids.sort_unstable();
        riids.dedup();
        Ok(riids)
    }

    pub fn object_read_default_attrs(&mut self, ssid: Ssid) -> Result<OiAttributes> {
        self.require(Handler::ObjectReadDefaultAttrs)?;
        self.handler.object_read_default_attrs(ssid)
    }

    pub fn object_write_default_attrs(&mut self, ssid: Ssid, attrs: &OiAttributes) -> Result<()> {
        self.require(Handler::ObjectWriteDefaultAttrs)?;
        self.handler.object_write_default_attrs(ssid, attrs)
    }

    pub fn instance_read_default_attrs(&mut self, iid: Iid, ssid: Ssid) -> Result<OiAttributes> {
        self.require(Handler::InstanceReadDefaultAttrs)?;
        self.handler.instance_read_default_attrs(iid, ssid)
    }

    pub fn instance_write_default_attrs(
        &mut self,
        iid: Iid,
        ssid: Ssid,
        attrs: &OiAttributes,
    ) -> Result<()> {
        self.require(Handler::InstanceWriteDefaultAttrs)?;
        self.handler.instance_write_default_attrs(iid, ssid, attrs)
    }

    pub fn resource_read_attrs(
        &mut self,
        iid: Iid,
        rid: Rid,
        ssid: Ssid,
    ) -> Result<ResourceAttributes> {
        self.require(Handler::ResourceReadAttrs)?;
        self.handler.resource_read_attrs(iid, rid, ssid)
    }

    pub fn resource_write_attrs(
        &mut self,
        iid: Iid,
        rid: Rid,
        ssid: Ssid,
        attrs: &ResourceAttributes,
    ) -> Result<()> {
        self.require(Handler::ResourceWriteAttrs)?;
        self.handler.resource_write_attrs(iid, rid, ssid, attrs)
    }

    pub fn resource_instance_read_attrs(
        &mut self,
        iid: Iid,
        rid: Rid,
        riid: Riid,
        ssid: Ssid,
    ) -> Result<ResourceAttributes> {
        self.require(Handler::ResourceInstanceReadAttrs)?;
        self.handler.resource_instance_read_attrs(iid, rid, riid, ssid)
    }

    pub fn resource_instance_write_attrs(
        &mut self,
        iid: Iid,
        rid: Rid,
        riid: Riid,
        ssid: Ssid,
        attrs: &ResourceAttributes,
    ) -> Result<()> {
        self.require(Handler::ResourceInstanceWriteAttrs)?;
        self.handler
            .resource_instance_write_attrs(iid, rid, riid, ssid, attrs)
    }

    // Undeclared transaction hooks succeed: the object applies each call
    // atomically on its own.

    pub fn transaction_begin(&mut self) -> Result<()> {
        if !self.implements(Handler::TransactionBegin) {
            return Ok(());
        }
        self.handler.transaction_begin()
    }

    pub fn transaction_validate(&mut self) -> Result<()> {
        if !self.implements(Handler::TransactionValidate) {
            return Ok(());
        }
        self.handler.transaction_validate()
    }

    pub fn transaction_commit(&mut self) -> Result<()> {
        if !self.implements(Handler::TransactionCommit) {
            return Ok(());
        }
        self.handler.transaction_commit()
    }

    pub fn transaction_rollback(&mut self) -> Result<()> {
        if !self.implements(Handler::TransactionRollback) {
            return Ok(());
        }
        self.handler.transaction_rollback()
    }
}

/// Installed objects, keyed and iterated by ascending Object ID
#[derive(Debug, Default)]
pub struct Registry {
    objects: BTreeMap<Oid, InstalledObject>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an object; its Object ID must not be registered yet
    pub fn register(&mut self, handler: Box<dyn ObjectHandler>) -> Result<()> {
        let object = InstalledObject::new(handler);
        let oid = object.oid;
        if oid == crate::path::ID_INVALID {
            return Err(Error::bad_request("object ID 65535 is reserved"));
        }
        if self.objects.contains_key(&oid) {
            warn!(oid, "object already registered");
            return Err(Error::bad_request(format!("object {} already registered", oid)));
        }
        debug!(oid, version = object.version().unwrap_or("1.0"), "object registered");
        self.objects.insert(oid, object);
        Ok(())
    }

    /// Remove an object from the registry
    pub fn unregister(&mut self, oid: Oid) -> Result<()> {
        self.objects
            .remove(&oid)
            .map(|_| debug!(oid, "object unregistered"))
            .ok_or(Error::NotFound)
    }

    pub fn find(&self, oid: Oid) -> Option<&InstalledObject> {
        self.objects.get(&oid)
    }

    pub fn find_mut(&mut self, oid: Oid) -> Option<&mut InstalledObject> {
        self.objects.get_mut(&oid)
    }

    /// Like [`Registry::find_mut`], failing with [`Error::NotFound`]
    pub fn get_mut(&mut self, oid: Oid) -> Result<&mut InstalledObject> {
        self.find_mut(oid).ok_or(Error::NotFound)
    }

    pub fn contains(&self, oid: Oid) -> bool {
        self.objects.contains_key(&oid)
    }

    /// Registered Object IDs in ascending order
    pub fn oids(&self) -> Vec<Oid> {
        self.objects.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstalledObject> {
        self.objects.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut InstalledObject> {
        self.objects.values_mut()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
