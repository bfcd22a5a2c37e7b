// src/bootstrap/write.rs

//! Bootstrap Write and composite provisioning writes
//!
//! Instances targeted by a write are created on demand. Writes to an
//! Object or Object Instance skip optional resources the object does not
//! support, as required for Bootstrap Write.

use crate::client::ClientState;
use crate::dm::{Value, WriteEntry, oid, server};
use crate::error::{Error, Result};
use crate::path::{IdType, Iid, Oid, Rid, UriPath};
use crate::servers::Connection;
use std::collections::BTreeSet;
use tracing::{debug, warn};

impl ClientState {
    /// Bootstrap Write of `payload` to `uri`
    pub(crate) fn bootstrap_write(
        &mut self,
        conn: Option<&Connection>,
        uri: &UriPath,
        payload: &[WriteEntry],
    ) -> Result<()> {
        debug!(%uri, entries = payload.len(), "Bootstrap Write");
        let Some(target) = uri.oid() else {
            return Err(Error::MethodNotAllowed);
        };
        if uri.has(IdType::Riid) {
            return Err(Error::MethodNotAllowed);
        }
        self.cancel_client_initiated_bootstrap();
        self.start_bootstrap(conn, true)
            .map_err(|err| Error::internal(format!("cannot start bootstrap: {}", err)))?;
        if !self.dm.has_object(target) {
            debug!(oid = target, "object not found");
            return Err(Error::NotFound);
        }
        if let Some(entry) = payload.iter().find(|e| e.path.outside_base(uri)) {
            return Err(Error::bad_request(format!(
                "payload entry {} outside of {}",
                entry.path, uri
            )));
        }

        let mut created = Vec::new();
        let mut result = match uri.iid() {
            None => self.write_object(target, payload, &mut created),
            Some(iid) => {
                let skip_optional = uri.rid().is_none();
                self.write_instance_on_demand(target, iid, payload, skip_optional, &mut created)
            }
        };
        if result.is_ok() && target == oid::SECURITY && self.has_multiple_bootstrap_accounts() {
            debug!("multiple Security instances configured for the Bootstrap Server account");
            // Instances this write created must not reach Finish
            for iid in created.into_iter().rev() {
                if let Err(err) = self.dm.instance_remove(target, iid) {
                    warn!(oid = target, iid, %err, "could not undo instance creation");
                }
            }
            result = Err(Error::bad_request("multiple Bootstrap Server accounts"));
        }
        result?;

        if let Some(iid) = uri.iid()
            && (target == oid::SECURITY || target == oid::SERVER)
        {
            self.update_last_bootstrapped(target, iid)?;
        }
        Ok(())
    }

    /// Factory-provisioning write of resource entries across objects
    pub(crate) fn bootstrap_write_composite(&mut self, entries: &[WriteEntry]) -> Result<()> {
        debug!(entries = entries.len(), "composite Bootstrap Write");
        self.cancel_client_initiated_bootstrap();
        self.start_bootstrap(None, true)?;

        for entry in entries {
            let (Some(target), Some(iid), Some(_)) =
                (entry.path.oid(), entry.path.iid(), entry.path.rid())
            else {
                return Err(Error::bad_request(format!(
                    "{} is not a resource path",
                    entry.path
                )));
            };
            if !self.dm.has_object(target) {
                debug!(oid = target, "object not found");
                return Err(Error::NotFound);
            }
            let present = self
                .dm
                .instance_present(target, iid)
                .map_err(|err| Error::bad_request(err.to_string()))?;
            if !present {
                self.dm.instance_create(target, iid)?;
            }
            self.dm.resource_write(&entry.path, &entry.value)?;
            if target == oid::SECURITY || target == oid::SERVER {
                self.update_last_bootstrapped(target, iid)?;
            }
        }
        Ok(())
    }

    fn write_object(
        &mut self,
        target: Oid,
        payload: &[WriteEntry],
        created: &mut Vec<Iid>,
    ) -> Result<()> {
        if let Some(entry) = payload.iter().find(|e| e.path.iid().is_none()) {
            return Err(Error::bad_request(format!(
                "object-level write entry {} has no instance",
                entry.path
            )));
        }
        for run in payload.chunk_by(|a, b| a.path.iid() == b.path.iid()) {
            let Some(iid) = run[0].path.iid() else {
                continue;
            };
            self.write_instance_on_demand(target, iid, run, true, created)?;
        }
        Ok(())
    }

    fn write_instance_on_demand(
        &mut self,
        target: Oid,
        iid: Iid,
        entries: &[WriteEntry],
        skip_optional: bool,
        created: &mut Vec<Iid>,
    ) -> Result<()> {
        let present = self.dm.instance_present(target, iid)?;
        if !present {
            self.dm.instance_create(target, iid).inspect_err(|err| {
                debug!(oid = target, iid, %err, "instance create handler failed");
            })?;
        }
        self.write_resources(target, iid, entries, skip_optional)?;
        if !present {
            created.push(iid);
        }
        Ok(())
    }

    fn write_resources(
        &mut self,
        target: Oid,
        iid: Iid,
        entries: &[WriteEntry],
        skip_optional: bool,
    ) -> Result<()> {
        // Multiple-instance resources are replaced, not merged
        let mut replaced: BTreeSet<Rid> = BTreeSet::new();
        for entry in entries {
            // Entries naming just the instance carry nothing to write
            let Some(rid) = entry.path.rid() else {
                continue;
            };
            let mut outcome = Ok(());
            if entry.path.riid().is_some() && replaced.insert(rid) {
                outcome = self.dm.resource_reset(target, iid, rid);
            }
            if outcome.is_ok() {
                outcome = self.dm.resource_write(&entry.path, &entry.value);
            }
            match outcome {
                Err(err @ (Error::NotFound | Error::NotImplemented)) if skip_optional => {
                    warn!(path = %entry.path, %err, "ignoring error during Bootstrap Write");
                }
                other => other?,
            }
        }
        Ok(())
    }

    fn has_multiple_bootstrap_accounts(&mut self) -> bool {
        let Ok(iids) = self.dm.list_instances(oid::SECURITY) else {
            return true;
        };
        iids.into_iter()
            .filter(|&iid| self.dm.is_bootstrap_security_instance(iid))
            .count()
            > 1
    }

    /// Stamp Last Bootstrapped of the Server instance tied to a written
    /// Security or Server instance
    ///
    /// A missing Server object, SSID or Server instance is not an error;
    /// those may be written later in the same session.
    fn update_last_bootstrapped(&mut self, target: Oid, iid: Iid) -> Result<()> {
        if !self.config.lwm2m11() {
            return Ok(());
        }
        let server_iid = if target == oid::SECURITY {
            if !self.dm.has_object(oid::SERVER) {
                return Ok(());
            }
            let Ok(ssid) = self.dm.ssid_from_security_iid(iid) else {
                return Ok(());
            };
            let Ok(server_iid) = self.dm.find_server_iid(ssid) else {
                return Ok(());
            };
            server_iid
        } else {
            iid
        };
        let timestamp = self.sched.clock().real_now().timestamp();
        let path = UriPath::resource(oid::SERVER, server_iid, server::LAST_BOOTSTRAPPED);
        self.dm.resource_write(&path, &Value::Int(timestamp))
    }
}
