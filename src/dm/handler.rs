// src/dm/handler.rs

//! Object handler interface
//!
//! An LwM2M Object is implemented outside the engine as an
//! [`ObjectHandler`]. The handler declares which capabilities it implements
//! through [`HandlerSet`]; the registry never calls a method that is not
//! declared. An undeclared handler is "not implemented", which is distinct
//! from a declared handler returning [`Error::NotFound`].
//!
//! Undeclared transaction handlers are treated as trivially succeeding: the
//! object has no multi-step transaction support and applies writes
//! atomically one call at a time.

use crate::dm::value::{ExecuteArg, OiAttributes, ResourceAttributes, ResourceDescriptor, Value};
use crate::error::{Error, Result};
use crate::path::{Iid, Oid, Rid, Riid};
use crate::servers::Ssid;

/// A single capability of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handler {
    ObjectReadDefaultAttrs,
    ObjectWriteDefaultAttrs,
    ListInstances,
    InstanceReset,
    InstanceCreate,
    InstanceRemove,
    InstanceReadDefaultAttrs,
    InstanceWriteDefaultAttrs,
    ListResources,
    ResourceRead,
    ResourceWrite,
    ResourceExecute,
    ResourceReset,
    ListResourceInstances,
    ResourceReadAttrs,
    ResourceWriteAttrs,
    ResourceInstanceReadAttrs,
    ResourceInstanceWriteAttrs,
    TransactionBegin,
    TransactionValidate,
    TransactionCommit,
    TransactionRollback,
}

impl Handler {
    fn bit(self) -> u32 {
        1 << (self as u32)
    }

    /// True for handlers that change the data model
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Self::ObjectWriteDefaultAttrs
                | Self::InstanceReset
                | Self::InstanceCreate
                | Self::InstanceRemove
                | Self::InstanceWriteDefaultAttrs
                | Self::ResourceWrite
                | Self::ResourceExecute
                | Self::ResourceReset
                | Self::ResourceWriteAttrs
                | Self::ResourceInstanceWriteAttrs
        )
    }

    /// True for the four transaction hooks
    pub fn is_transactional(self) -> bool {
        matches!(
            self,
            Self::TransactionBegin
                | Self::TransactionValidate
                | Self::TransactionCommit
                | Self::TransactionRollback
        )
    }

    /// Error reported when this handler is called but not declared
    pub fn unimplemented_error(self) -> Error {
        if self.is_mutating() {
            Error::MethodNotAllowed
        } else {
            Error::NotImplemented
        }
    }
}

/// Set of capabilities an object implements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerSet(u32);

impl HandlerSet {
    /// No handlers
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Listing and reading only
    pub fn read_only() -> Self {
        Self::from_handlers(&[
            Handler::ListInstances,
            Handler::ListResources,
            Handler::ResourceRead,
            Handler::ListResourceInstances,
        ])
    }

    /// Listing, reading, writing and instance management
    pub fn read_write() -> Self {
        Self::read_only().union(Self::from_handlers(&[
            Handler::InstanceCreate,
            Handler::InstanceRemove,
            Handler::InstanceReset,
            Handler::ResourceWrite,
            Handler::ResourceReset,
        ]))
    }

    /// The four transaction hooks
    pub fn transactional() -> Self {
        Self::from_handlers(&[
            Handler::TransactionBegin,
            Handler::TransactionValidate,
            Handler::TransactionCommit,
            Handler::TransactionRollback,
        ])
    }

    pub fn from_handlers(handlers: &[Handler]) -> Self {
        handlers.iter().fold(Self::empty(), |set, h| set.with(*h))
    }

    pub fn with(self, handler: Handler) -> Self {
        Self(self.0 | handler.bit())
    }

    pub fn without(self, handler: Handler) -> Self {
        Self(self.0 & !handler.bit())
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(&self, handler: Handler) -> bool {
        self.0 & handler.bit() != 0
    }
}

/// Capability interface of an installed LwM2M Object
///
/// Only methods listed in [`ObjectHandler::handlers`] are ever called. The
/// default bodies exist so implementors only write what they declare.
///
/// `list_instances` may return IDs in any order and with duplicates; the
/// registry sorts and deduplicates the result.
#[allow(unused_variables)]
pub trait ObjectHandler: Send {
    /// Object ID, unique within a registry
    fn oid(&self) -> Oid;

    /// Object version, if not 1.0
    fn version(&self) -> Option<&str> {
        None
    }

    /// Capabilities this object implements
    fn handlers(&self) -> HandlerSet;

    fn object_read_default_attrs(&mut self, ssid: Ssid) -> Result<OiAttributes> {
        Err(Error::NotImplemented)
    }

    fn object_write_default_attrs(&mut self, ssid: Ssid, attrs: &OiAttributes) -> Result<()> {
        Err(Error::MethodNotAllowed)
    }

    fn list_instances(&mut self) -> Result<Vec<Iid>> {
        Err(Error::NotImplemented)
    }

    fn instance_reset(&mut self, iid: Iid) -> Result<()> {
        Err(Error::MethodNotAllowed)
    }

    fn instance_create(&mut self, iid: Iid) -> Result<()> {
        Err(Error::MethodNotAllowed)
    }

    fn instance_remove(&mut self, iid: Iid) -> Result<()> {
        Err(Error::MethodNotAllowed)
    }

    fn instance_read_default_attrs(&mut self, iid: Iid, ssid: Ssid) -> Result<OiAttributes> {
        Err(Error::NotImplemented)
    }

    fn instance_write_default_attrs(
        &mut self,
        iid: Iid,
        ssid: Ssid,
        attrs: &OiAttributes,
    ) -> Result<()> {
        Err(Error::MethodNotAllowed)
    }

    fn list_resources(&mut self, iid: Iid) -> Result<Vec<ResourceDescriptor>> {
        Err(Error::NotImplemented)
    }

    fn resource_read(&mut self, iid: Iid, rid: Rid, riid: Option<Riid>) -> Result<Value> {
        Err(Error::NotImplemented)
    }

    fn resource_write(
        &mut self,
        iid: Iid,
        rid: Rid,
        riid: Option<Riid>,
        value: &Value,
    ) -> Result<()> {
        Err(Error::MethodNotAllowed)
    }

    fn resource_execute(&mut self, iid: Iid, rid: Rid, args: &[ExecuteArg]) -> Result<()> {
        Err(Error::MethodNotAllowed)
    }

    fn resource_reset(&mut self, iid: Iid, rid: Rid) -> Result<()> {
        Err(Error::MethodNotAllowed)
    }

    fn list_resource_instances(&mut self, iid: Iid, rid: Rid) -> Result<Vec<Riid>> {
        Err(Error::NotImplemented)
    }

    fn resource_read_attrs(&mut self, iid: Iid, rid: Rid, ssid: Ssid) -> Result<ResourceAttributes> {
        Err(Error::NotImplemented)
    }

    fn resource_write_attrs(
        &mut self,
        iid: Iid,
        rid: Rid,
        ssid: Ssid,
        attrs: &ResourceAttributes,
    ) -> Result<()> {
        Err(Error::MethodNotAllowed)
    }

    fn resource_instance_read_attrs(
        &mut self,
        iid: Iid,
        rid: Rid,
        riid: Riid,
        ssid: Ssid,
    ) -> Result<ResourceAttributes> {
        Err(Error::NotImplemented)
    }

    fn resource_instance_write_attrs(
        &mut self,
        iid: Iid,
        rid: Rid,
        riid: Riid,
        ssid: Ssid,
        attrs: &ResourceAttributes,
    ) -> Result<()> {
        Err(Error::MethodNotAllowed)
    }

    fn transaction_begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn transaction_validate(&mut self) -> Result<()> {
        Ok(())
    }

    fn transaction_commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn transaction_rollback(&mut self) -> Result<()> {
        Ok(())
    }
}
