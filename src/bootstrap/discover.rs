// src/bootstrap/discover.rs

//! Bootstrap Discover and Bootstrap Read

use crate::bootstrap::ResponseContent;
use crate::client::ClientState;
use crate::config::Lwm2mVersion;
use crate::dm::{oid, security, server, valid_ssid};
use crate::error::{Error, Result};
use crate::path::{IdType, Iid, Oid, UriPath};
use crate::servers::{Connection, Ssid};
use std::fmt;
use tracing::debug;

/// One CoRE Link Format entry of a Bootstrap Discover response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub path: UriPath,
    /// Enabler version, on the root entry only
    pub lwm2m: Option<Lwm2mVersion>,
    /// Object version
    pub version: Option<String>,
    pub ssid: Option<Ssid>,
    /// Server URI of a Security instance
    pub uri: Option<String>,
}

impl Link {
    pub fn new(path: UriPath) -> Self {
        Self {
            path,
            lwm2m: None,
            version: None,
            ssid: None,
            uri: None,
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.path)?;
        if let Some(lwm2m) = self.lwm2m {
            write!(f, ";lwm2m={}", lwm2m)?;
        }
        if let Some(version) = &self.version {
            write!(f, ";ver={}", version)?;
        }
        if let Some(ssid) = self.ssid {
            write!(f, ";ssid={}", ssid)?;
        }
        if let Some(uri) = &self.uri {
            write!(f, ";uri=\"{}\"", uri)?;
        }
        Ok(())
    }
}

/// Render links as an `application/link-format` payload
pub fn format_links(links: &[Link]) -> String {
    links
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

impl ClientState {
    /// Bootstrap Discover of the root or of one Object
    pub(crate) fn bootstrap_discover(
        &mut self,
        conn: &Connection,
        uri: &UriPath,
    ) -> Result<ResponseContent> {
        debug!(%uri, "Bootstrap Discover");
        if uri.has(IdType::Iid) {
            return Err(Error::bad_request("Bootstrap Discover with an Instance ID"));
        }
        self.cancel_client_initiated_bootstrap();
        self.start_bootstrap(Some(conn), true)
            .map_err(|err| Error::internal(format!("cannot start bootstrap: {}", err)))?;

        let version = conn.lwm2m_version;
        let oids = match uri.oid() {
            Some(target) if self.dm.has_object(target) => vec![target],
            Some(_) => return Err(Error::NotFound),
            None => self.dm.registry().oids(),
        };
        let mut links = vec![Link {
            lwm2m: Some(version),
            ..Link::new(UriPath::root())
        }];
        for target in oids {
            links.push(Link {
                version: self
                    .dm
                    .registry()
                    .find(target)
                    .and_then(|object| object.version())
                    .map(str::to_string),
                ..Link::new(UriPath::object(target))
            });
            for iid in self.dm.list_instances(target)? {
                links.push(self.instance_link(target, iid, version));
            }
        }
        Ok(ResponseContent::Links(links))
    }

    fn instance_link(&mut self, target: Oid, iid: Iid, version: Lwm2mVersion) -> Link {
        let mut link = Link::new(UriPath::instance(target, iid));
        match target {
            oid::SECURITY => {
                if !self.dm.is_bootstrap_security_instance(iid) {
                    let path = UriPath::resource(target, iid, security::SSID);
                    link.ssid = self.dm.read_resource_i64(&path).ok().and_then(valid_ssid);
                }
                if version >= Lwm2mVersion::V1_1 {
                    let path = UriPath::resource(target, iid, security::SERVER_URI);
                    link.uri = self.dm.read_resource_string(&path).ok();
                }
            }
            oid::SERVER => {
                let path = UriPath::resource(target, iid, server::SSID);
                link.ssid = self.dm.read_resource_i64(&path).ok().and_then(valid_ssid);
            }
            _ => {}
        }
        link
    }

    /// Bootstrap Read of a Server or Access Control Object or Instance
    pub(crate) fn bootstrap_read(
        &mut self,
        conn: &Connection,
        uri: &UriPath,
    ) -> Result<ResponseContent> {
        debug!(%uri, "Bootstrap Read");
        if !self.config.lwm2m11() {
            return Err(Error::MethodNotAllowed);
        }
        self.cancel_client_initiated_bootstrap();
        self.start_bootstrap(Some(conn), true)
            .map_err(|err| Error::internal(format!("cannot start bootstrap: {}", err)))?;

        let leaf_ok = uri.leaf_is(IdType::Oid) || uri.leaf_is(IdType::Iid);
        let Some(target) = uri.oid().filter(|&o| o == oid::SERVER || o == oid::ACCESS_CONTROL)
        else {
            debug!("Bootstrap Read only targets Server and Access Control objects");
            return Err(Error::MethodNotAllowed);
        };
        if !leaf_ok {
            debug!("Bootstrap Read only targets objects and instances");
            return Err(Error::MethodNotAllowed);
        }
        if !self.dm.has_object(target) {
            debug!(oid = target, "object not found");
            return Err(Error::NotFound);
        }
        let entries = self.dm.read_tree(uri, true)?;
        Ok(ResponseContent::Entries(entries))
    }
}
