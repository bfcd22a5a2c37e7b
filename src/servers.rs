// src/servers.rs

//! Server and connection collaborator interface
//!
//! The engine does not own sockets or registration state. It asks the
//! server layer for connection snapshots and schedules work on it through
//! [`ServerManager`].
//!
//! Connections are returned by value. A snapshot is never held across a
//! call that may reconnect or remove servers: the engine looks the
//! connection up again by SSID afterwards.

use crate::config::{Lwm2mVersion, Transport};
use crate::error::{Error, Result};
use crate::path::Iid;
use std::time::Duration;
use uuid::Uuid;

/// Short Server ID
pub type Ssid = u16;

/// Wildcard SSID
pub const SSID_ANY: Ssid = 0;

/// SSID reserved for the Bootstrap Server; also used as the origin of
/// changes that did not come from a regular server
pub const SSID_BOOTSTRAP: Ssid = u16::MAX;

/// Identity of one transport session
///
/// A new token is generated whenever the underlying connection is
/// re-established, so a bootstrap started on an older session can be told
/// apart from a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(Uuid);

impl SessionToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection slot of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Primary,
    /// No usable connection slot
    Unset,
}

/// Snapshot of a server's primary connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub ssid: Ssid,
    pub conn_type: ConnectionType,
    pub session_token: SessionToken,
    pub online: bool,
    pub transport: Transport,
    /// Version negotiated (or attempted) on this connection
    pub lwm2m_version: Lwm2mVersion,
    /// Path segments of the server URI
    pub uri_path: Vec<String>,
    /// Query segments of the server URI
    pub uri_query: Vec<String>,
}

impl Connection {
    /// An online primary connection with a fresh session token
    pub fn new(ssid: Ssid, transport: Transport) -> Self {
        Self {
            ssid,
            conn_type: ConnectionType::Primary,
            session_token: SessionToken::new(),
            online: true,
            transport,
            lwm2m_version: Lwm2mVersion::V1_0,
            uri_path: Vec::new(),
            uri_query: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: Lwm2mVersion) -> Self {
        self.lwm2m_version = version;
        self
    }

    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    pub fn with_uri_path<S: Into<String>>(mut self, segments: impl IntoIterator<Item = S>) -> Self {
        self.uri_path = segments.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_uri_query<S: Into<String>>(mut self, segments: impl IntoIterator<Item = S>) -> Self {
        self.uri_query = segments.into_iter().map(Into::into).collect();
        self
    }
}

/// Server layer operations the engine depends on
///
/// Implementations are called with the client lock held and must not call
/// back into [`crate::Client`]; anything that needs the engine again should
/// be deferred.
pub trait ServerManager: Send {
    /// Primary connection of an active server
    fn find_active(&self, ssid: Ssid) -> Option<Connection>;

    /// Rebuild the server list from the Security and Server objects
    fn schedule_reload_servers(&mut self) -> Result<()>;

    /// Send a Registration Update to `ssid`
    fn schedule_registration_update(&mut self, ssid: Ssid) -> Result<()>;

    /// Reconnect the socket bound to a Security instance
    fn schedule_socket_update(&mut self, security_iid: Iid) -> Result<()>;

    /// Disable a server, re-enabling it after `reenable_after` if given
    fn schedule_disable_server(&mut self, ssid: Ssid, reenable_after: Option<Duration>)
        -> Result<()>;

    /// Retry deferred Send requests for one server, or all when `None`
    fn send_retry_deferred(&mut self, ssid: Option<Ssid>) -> Result<()>;

    /// Enable a server so it gets a connection
    fn enable_server(&mut self, ssid: Ssid) -> Result<()>;

    /// Drop inactive non-bootstrap servers so they stop retrying
    fn cleanup_inactive_nonbootstrap(&mut self);

    /// Suspend connections of every active non-bootstrap server
    fn suspend_nonbootstrap(&mut self);

    /// Record the version used when talking to `ssid`
    fn update_registration_version(&mut self, ssid: Ssid, version: Lwm2mVersion);

    /// Communication with `ssid` failed
    fn on_communication_error(&mut self, ssid: Ssid, err: &Error);

    /// Communication with `ssid` timed out
    fn on_communication_timeout(&mut self, ssid: Ssid);

    /// Server `ssid` is considered failed
    fn on_failure(&mut self, ssid: Ssid, reason: &str);
}
