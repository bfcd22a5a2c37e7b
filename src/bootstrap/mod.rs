// src/bootstrap/mod.rs

//! LwM2M Bootstrap Interface
//!
//! A bootstrap session is one long data model transaction: the first
//! Bootstrap Write, Delete, Read or Discover (or a successful Request
//! Bootstrap) opens it, and Bootstrap Finish validates and commits it.
//!
//! ```text
//!  Idle ──schedule──▶ AwaitingClientInitiated ──job──▶ RequestSent
//!   ▲                                                     │ 2.04
//!   │ commit ok                                           ▼
//!   └──────────── Finish ◀── AwaitingFinishTimeout ◀── InProgress
//!                   │ failed                           ▲  Write/Delete/
//!                   └──────────── re-open ─────────────┘  Read/Discover
//! ```
//!
//! While a session is open every non-bootstrap server is suspended. After a
//! successful Finish the Bootstrap Server account is disabled (unless
//! legacy Server-Initiated Bootstrap is allowed), optionally purged after
//! its Bootstrap-Server Account Timeout, and the server list is reloaded.

pub mod backoff;
mod delete;
mod discover;
mod request;
mod write;

pub use backoff::BackoffState;
pub use discover::{Link, format_links};
pub use request::{BootstrapAction, request_bootstrap_message};

use crate::client::ClientState;
use crate::coap::{CoapCode, ExchangeId};
use crate::config::Transport;
use crate::dm::{ReadEntry, WriteEntry, oid, security};
use crate::error::{Error, Result};
use crate::notify;
use crate::path::UriPath;
use crate::sched::{Job, JobHandle};
use crate::servers::{Connection, SSID_BOOTSTRAP, SessionToken};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where the bootstrap procedure currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// Nothing scheduled, no session open
    Idle,
    /// Request Bootstrap armed, waiting for its holdoff to elapse
    AwaitingClientInitiated,
    /// Request Bootstrap exchange outstanding
    RequestSent,
    /// Session open, accepting bootstrap operations
    InProgress,
    /// Session open, Bootstrap Finish timeout armed
    AwaitingFinishTimeout,
}

/// Bootstrap Interface operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Delete,
    Discover,
    Finish,
    /// Not part of the Bootstrap Interface
    Execute,
    /// Not part of the Bootstrap Interface
    Create,
}

impl Action {
    /// Response code sent when the action succeeds
    pub fn success_code(&self) -> Option<CoapCode> {
        match self {
            Self::Read | Self::Discover => Some(CoapCode::CONTENT),
            Self::Write | Self::Finish => Some(CoapCode::CHANGED),
            Self::Delete => Some(CoapCode::DELETED),
            Self::Execute | Self::Create => None,
        }
    }
}

/// Bootstrap request as decoded by the request layer
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapRequest {
    pub action: Action,
    pub uri: UriPath,
    /// Request targeted the `/bs` URI
    pub is_bs_uri: bool,
    /// Decoded Write payload
    pub payload: Vec<WriteEntry>,
}

impl BootstrapRequest {
    pub fn new(action: Action, uri: UriPath) -> Self {
        Self {
            action,
            uri,
            is_bs_uri: false,
            payload: Vec::new(),
        }
    }

    /// Bootstrap Write of `payload` to `uri`
    pub fn write(uri: UriPath, payload: Vec<WriteEntry>) -> Self {
        Self {
            payload,
            ..Self::new(Action::Write, uri)
        }
    }

    /// Bootstrap Finish (POST /bs)
    pub fn finish() -> Self {
        Self {
            is_bs_uri: true,
            ..Self::new(Action::Finish, UriPath::root())
        }
    }
}

/// Payload of a successful bootstrap response
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResponseContent {
    #[default]
    Empty,
    /// Bootstrap Read result
    Entries(Vec<ReadEntry>),
    /// Bootstrap Discover result
    Links(Vec<Link>),
}

/// Successful bootstrap response
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapResponse {
    pub code: CoapCode,
    pub content: ResponseContent,
}

impl BootstrapResponse {
    fn new(code: CoapCode, content: ResponseContent) -> Self {
        Self { code, content }
    }
}

/// Outstanding Request Bootstrap exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum RequestState {
    #[default]
    Idle,
    Outstanding(ExchangeId),
    /// Cancellation in progress; completions are ignored
    Cancelling(ExchangeId),
}

/// Steps of Bootstrap Finish that depend on how it was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FinishFlags {
    /// Arm the Bootstrap-Server account purge timer
    pub perform_timeout: bool,
    /// Disable the Bootstrap Server account
    pub disable_server: bool,
}

impl FinishFlags {
    /// Bootstrap Finish received from the server
    pub const FULL: Self = Self {
        perform_timeout: true,
        disable_server: true,
    };
    /// A regular server connection became available mid-bootstrap
    pub const DISABLE_SERVER: Self = Self {
        perform_timeout: false,
        disable_server: true,
    };
    /// Internal finish, e.g. after factory provisioning
    pub const NONE: Self = Self {
        perform_timeout: false,
        disable_server: false,
    };
}

/// Bootstrap state of one client
#[derive(Debug, Default)]
pub struct BootstrapSession {
    pub(crate) in_progress: bool,
    /// Session on which the current bootstrap was started
    pub(crate) session_token: Option<SessionToken>,
    pub(crate) request: RequestState,
    /// A client-initiated bootstrap was requested and not yet resolved
    pub(crate) triggered: bool,
    pub(crate) client_initiated_job: Option<JobHandle>,
    pub(crate) purge_job: Option<JobHandle>,
    pub(crate) finish_timeout_job: Option<JobHandle>,
    pub(crate) backoff: BackoffState,
}

impl BootstrapSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a bootstrap transaction is open
    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    /// True if a client-initiated bootstrap is pending in any form
    pub fn scheduled(&self) -> bool {
        self.triggered || self.exchange_outstanding() || self.client_initiated_job.is_some()
    }

    pub fn state(&self) -> BootstrapState {
        if self.exchange_outstanding() {
            BootstrapState::RequestSent
        } else if self.in_progress && self.finish_timeout_job.is_some() {
            BootstrapState::AwaitingFinishTimeout
        } else if self.in_progress {
            BootstrapState::InProgress
        } else if self.client_initiated_job.is_some() {
            BootstrapState::AwaitingClientInitiated
        } else {
            BootstrapState::Idle
        }
    }

    pub fn backoff(&self) -> &BackoffState {
        &self.backoff
    }

    pub fn session_token(&self) -> Option<SessionToken> {
        self.session_token
    }

    pub(crate) fn exchange_outstanding(&self) -> bool {
        !matches!(self.request, RequestState::Idle)
    }
}

impl ClientState {
    pub(crate) fn cancel_client_initiated_bootstrap(&mut self) {
        self.sched.cancel_slot(&mut self.bootstrap.client_initiated_job);
    }

    /// Cancel the outstanding Request Bootstrap, if any
    pub(crate) fn cancel_request_exchange(&mut self) {
        let RequestState::Outstanding(id) = self.bootstrap.request else {
            return;
        };
        self.bootstrap.request = RequestState::Cancelling(id);
        debug!(exchange = id.0, "cancelling Request Bootstrap");
        self.coap.cancel_exchange(SSID_BOOTSTRAP, id);
        self.bootstrap.request = RequestState::Idle;
    }

    /// Open the bootstrap transaction unless it is open already
    ///
    /// With `conn`, the session token of that connection is recorded and,
    /// with `cancel_ongoing`, an outstanding Request Bootstrap is cancelled.
    pub(crate) fn start_bootstrap(
        &mut self,
        conn: Option<&Connection>,
        cancel_ongoing: bool,
    ) -> Result<()> {
        if !self.bootstrap.in_progress {
            self.dm.begin()?;
        }
        if let Some(conn) = conn {
            self.bootstrap.session_token = Some(conn.session_token);
            if cancel_ongoing {
                self.cancel_request_exchange();
            }
        }
        if !self.bootstrap.in_progress {
            info!("bootstrap session started");
            // Inactive servers would keep retrying; they are recreated by the
            // server reload after Finish
            self.servers.cleanup_inactive_nonbootstrap();
            self.servers.suspend_nonbootstrap();
            self.sched.cancel_slot(&mut self.bootstrap.purge_job);
        }
        self.bootstrap.in_progress = true;
        Ok(())
    }

    /// Roll back the open bootstrap session
    pub(crate) fn abort_bootstrap(&mut self) {
        if !self.bootstrap.in_progress {
            return;
        }
        warn!("aborting bootstrap session");
        if let Err(err) = self.dm.rollback() {
            warn!(%err, "bootstrap rollback failed");
        }
        self.bootstrap.in_progress = false;
        self.bootstrap.session_token = None;
        if let Err(err) = self.servers.schedule_reload_servers() {
            warn!(%err, "could not schedule server reload");
        }
    }

    /// Validate the whole bootstrap transaction without closing it
    pub(crate) fn validate_bootstrap_configuration(
        &mut self,
        conn: Option<&Connection>,
    ) -> Result<()> {
        self.cancel_client_initiated_bootstrap();
        self.start_bootstrap(conn, true)
            .map_err(|err| Error::internal(format!("cannot start bootstrap: {}", err)))?;
        if let Err(err) = self.dm.validate() {
            warn!(%err, "bootstrap configuration is invalid, rejecting");
            return Err(Error::NotAcceptable);
        }
        Ok(())
    }

    /// Arm the purge of the Bootstrap Server account if it carries a
    /// positive Bootstrap-Server Account Timeout
    pub(crate) fn schedule_bootstrap_timeout(&mut self) -> Result<()> {
        if !self.dm.has_object(oid::SECURITY) {
            debug!("no Security object, nothing to purge");
            return Ok(());
        }
        let Some(iid) = self.dm.find_bootstrap_security_iid() else {
            debug!("no Bootstrap Server account to purge");
            return Ok(());
        };
        let path = UriPath::resource(oid::SECURITY, iid, security::BOOTSTRAP_TIMEOUT);
        let timeout = match self.dm.read_resource_i64(&path) {
            Ok(secs) if secs > 0 => Duration::from_secs(secs.unsigned_abs()),
            _ => return Ok(()),
        };
        // Every Finish re-arms the purge
        self.sched.cancel_slot(&mut self.bootstrap.purge_job);
        match self.sched.schedule_delayed(timeout, Job::PurgeBootstrap) {
            Ok(handle) => {
                info!(iid, secs = timeout.as_secs(), "Bootstrap Server account purge armed");
                self.bootstrap.purge_job = Some(handle);
                Ok(())
            }
            Err(err) => {
                error!(iid, %err, "could not schedule purge of Bootstrap Server account");
                Err(err)
            }
        }
    }

    /// Commit the bootstrap session and hand control back to regular servers
    ///
    /// On failure the session is re-opened so the server can correct the
    /// configuration.
    pub(crate) fn bootstrap_finish_impl(
        &mut self,
        conn: Option<&Connection>,
        flags: FinishFlags,
    ) -> Result<()> {
        info!("bootstrap sequence finished");
        self.sched.cancel_slot(&mut self.bootstrap.finish_timeout_job);
        self.bootstrap.in_progress = false;
        self.bootstrap.session_token = None;
        let queue = match self.dm.finish_without_validation(Ok(())) {
            Ok(queue) => queue.unwrap_or_default(),
            Err(err) => {
                warn!(%err, "bootstrap configuration could not be committed, rejecting");
                return Err(err);
            }
        };

        let mut result = {
            let mut ctx = self.notify_context();
            notify::perform_without_servers(&mut ctx, SSID_BOOTSTRAP, &queue)
        };
        if let Err(err) = &result {
            warn!(%err, "could not post-process data model after bootstrap");
        } else if flags.perform_timeout {
            result = self.schedule_bootstrap_timeout();
        }
        if result.is_ok()
            && flags.disable_server
            && !self.config.allow_legacy_server_initiated_bootstrap
        {
            result = self.servers.schedule_disable_server(SSID_BOOTSTRAP, None);
        }

        // The calls above may have reconnected or removed the server
        let server_still_active =
            conn.is_some() && self.servers.find_active(SSID_BOOTSTRAP).is_some();
        match &result {
            Err(err) => {
                warn!(%err, "bootstrap finish failed, re-entering bootstrap phase");
                if let Err(start_err) = self.start_bootstrap(conn, true)
                    && server_still_active
                {
                    self.servers.on_communication_error(SSID_BOOTSTRAP, &start_err);
                }
            }
            Ok(()) => {
                if let Err(err) = self.servers.schedule_reload_servers() {
                    warn!(%err, "could not schedule server reload");
                }
            }
        }
        result
    }

    /// Bootstrap Finish received from the server
    fn bootstrap_finish(&mut self, conn: &Connection) -> Result<()> {
        self.validate_bootstrap_configuration(Some(conn))?;
        self.bootstrap_finish_impl(Some(conn), FinishFlags::FULL)
    }

    /// Finish an open bootstrap session without a server
    pub(crate) fn bootstrap_finish_internal(&mut self) -> Result<()> {
        if !self.bootstrap.in_progress {
            return Ok(());
        }
        self.validate_bootstrap_configuration(None)?;
        self.bootstrap_finish_impl(None, FinishFlags::NONE)
    }

    /// Handle one Bootstrap Interface request from `conn`
    pub(crate) fn perform_bootstrap_action(
        &mut self,
        conn: &Connection,
        request: &BootstrapRequest,
    ) -> Result<BootstrapResponse> {
        // A successful Finish followed by a failure to re-arm the timeout must
        // not leave the old job behind
        self.sched.cancel_slot(&mut self.bootstrap.finish_timeout_job);

        let mut result = match request.action {
            Action::Read => self.bootstrap_read(conn, &request.uri),
            Action::Write => self
                .bootstrap_write(Some(conn), &request.uri, &request.payload)
                .map(|()| ResponseContent::Empty),
            Action::Delete => self
                .bootstrap_delete(conn, &request.uri, request.is_bs_uri)
                .map(|()| ResponseContent::Empty),
            Action::Discover => self.bootstrap_discover(conn, &request.uri),
            Action::Finish => self.bootstrap_finish(conn).map(|()| ResponseContent::Empty),
            Action::Execute | Action::Create => {
                debug!(action = ?request.action, "invalid action for Bootstrap Interface");
                Err(Error::MethodNotAllowed)
            }
        };

        let rearm_on = match request.action {
            Action::Finish if result.is_ok() => None,
            Action::Finish => self.servers.find_active(SSID_BOOTSTRAP),
            _ => Some(conn.clone()),
        };
        if let Some(conn) = rearm_on
            && let Err(err) = self.schedule_finish_timeout(conn.transport)
        {
            result = Err(err);
        }

        let content = result?;
        let code = request.action.success_code().ok_or(Error::MethodNotAllowed)?;
        Ok(BootstrapResponse::new(code, content))
    }

    pub(crate) fn schedule_finish_timeout(&mut self, transport: Transport) -> Result<()> {
        self.sched.cancel_slot(&mut self.bootstrap.finish_timeout_job);
        let lifetime = self.config.exchange_lifetime(transport);
        match self.sched.schedule_delayed(lifetime, Job::FinishTimeout) {
            Ok(handle) => {
                self.bootstrap.finish_timeout_job = Some(handle);
                Ok(())
            }
            Err(err) => {
                error!(%err, "could not schedule finish timeout");
                Err(err)
            }
        }
    }

    /// Bootstrap Finish was not received within EXCHANGE_LIFETIME
    pub(crate) fn finish_timeout_job(&mut self) {
        self.bootstrap.finish_timeout_job = None;
        warn!("Bootstrap Finish not received in time, aborting");
        if self.servers.find_active(SSID_BOOTSTRAP).is_some() {
            self.servers.on_failure(SSID_BOOTSTRAP, "not reachable");
        }
    }

    /// Remove the Bootstrap Server account after its timeout elapsed
    pub(crate) fn purge_bootstrap_job(&mut self) {
        self.bootstrap.purge_job = None;
        let iid = if self.dm.has_object(oid::SECURITY) {
            self.dm.find_bootstrap_security_iid()
        } else {
            None
        };
        let Some(iid) = iid else {
            warn!("could not find Bootstrap Server account to purge");
            return;
        };
        let result = self
            .dm
            .with_transaction(|dm| dm.instance_remove(oid::SECURITY, iid))
            .and_then(|queue| match queue {
                Some(mut queue) => {
                    let mut ctx = self.notify_context();
                    notify::flush(&mut ctx, SSID_BOOTSTRAP, &mut queue)
                }
                None => Ok(()),
            });
        match result {
            Ok(()) => info!(iid, "Bootstrap Server account purged"),
            Err(err) => warn!(iid, %err, "could not purge Bootstrap Server account"),
        }
    }

    /// A regular server connection is ready
    ///
    /// An open bootstrap session is finished; otherwise a pending
    /// client-initiated bootstrap is dropped.
    pub(crate) fn notify_regular_connection_available(&mut self) -> Result<()> {
        if self.bootstrap.exchange_outstanding() {
            // The response will start bootstrap and suspend this connection
            return Ok(());
        }
        let conn = self.servers.find_active(SSID_BOOTSTRAP);
        let result = if self.bootstrap.in_progress {
            self.validate_bootstrap_configuration(conn.as_ref())
                .and_then(|()| {
                    self.bootstrap_finish_impl(conn.as_ref(), FinishFlags::DISABLE_SERVER)
                })
        } else {
            self.cancel_client_initiated_bootstrap();
            Ok(())
        };
        if result.is_ok() {
            self.bootstrap.backoff.reset();
        }
        result
    }

    /// Drop every bootstrap timer, exchange and open session
    pub(crate) fn bootstrap_cleanup(&mut self) {
        self.cancel_request_exchange();
        self.cancel_client_initiated_bootstrap();
        self.bootstrap.backoff.reset();
        self.abort_bootstrap();
        self.sched.cancel_slot(&mut self.bootstrap.purge_job);
        self.sched.cancel_slot(&mut self.bootstrap.finish_timeout_job);
        self.bootstrap.triggered = false;
    }
}
