// src/bootstrap/delete.rs

//! Bootstrap Delete

use crate::client::ClientState;
use crate::dm::oid;
use crate::error::{Error, Result, keep_first};
use crate::path::{IdType, Iid, Oid, UriPath};
use crate::servers::Connection;
use tracing::{debug, warn};

impl ClientState {
    /// Bootstrap Delete of the root, an Object or an Object Instance
    ///
    /// The Bootstrap Server's own Security instance survives a root or
    /// Security object delete.
    pub(crate) fn bootstrap_delete(
        &mut self,
        conn: &Connection,
        uri: &UriPath,
        is_bs_uri: bool,
    ) -> Result<()> {
        debug!(%uri, "Bootstrap Delete");
        self.cancel_client_initiated_bootstrap();
        self.start_bootstrap(Some(conn), true)
            .map_err(|err| Error::internal(format!("cannot start bootstrap: {}", err)))?;
        if is_bs_uri || uri.has(IdType::Rid) {
            return Err(Error::bad_request(format!("cannot Bootstrap Delete {}", uri)));
        }

        let Some(target) = uri.oid() else {
            return self.delete_all_objects(true);
        };
        if !self.dm.has_object(target) {
            warn!(oid = target, "object not found, nothing to delete");
            return Ok(());
        }
        match uri.iid() {
            Some(iid) => {
                if self.dm.instance_present(target, iid)? {
                    self.delete_instance(target, iid)
                } else {
                    Ok(())
                }
            }
            None => self.delete_object(target, true),
        }
    }

    /// Delete every instance of every object, the Bootstrap Server account
    /// included
    pub(crate) fn delete_everything(&mut self) -> Result<()> {
        self.cancel_client_initiated_bootstrap();
        self.start_bootstrap(None, true)?;
        self.delete_all_objects(false)
    }

    fn delete_all_objects(&mut self, skip_bootstrap: bool) -> Result<()> {
        let mut result = Ok(());
        for target in self.dm.registry().oids() {
            keep_first(&mut result, self.delete_object(target, skip_bootstrap));
        }
        result
    }

    /// Remove every instance of `target`
    ///
    /// Objects refusing deletion with `MethodNotAllowed` are left as they
    /// are. Any other failure stops the sweep of this object.
    fn delete_object(&mut self, target: Oid, skip_bootstrap: bool) -> Result<()> {
        let iids = self.dm.list_instances(target)?;
        for iid in iids {
            if skip_bootstrap
                && target == oid::SECURITY
                && self.dm.is_bootstrap_security_instance(iid)
            {
                // don't remove self
                continue;
            }
            match self.delete_instance(target, iid) {
                Ok(()) => {}
                Err(Error::MethodNotAllowed) => {
                    debug!(oid = target, iid, "object refuses deletion, skipping");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn delete_instance(&mut self, target: Oid, iid: Iid) -> Result<()> {
        self.dm.instance_remove(target, iid).inspect_err(|err| {
            warn!(oid = target, iid, %err, "cannot delete instance");
        })
    }
}
