// src/bootstrap/request.rs

//! Client-initiated bootstrap
//!
//! Request Bootstrap is sent from a scheduler job after the current
//! backoff. Only one exchange is outstanding at any time; its completion
//! arrives through [`ClientState::on_bootstrap_response`].

use crate::bootstrap::RequestState;
use crate::client::ClientState;
use crate::coap::{
    CoapCode, ExchangeId, ExchangeOutcome, FORMAT_SENML_CBOR, RequestBootstrapMessage,
};
use crate::config::Lwm2mVersion;
use crate::dm::{oid, security};
use crate::error::{Error, Result};
use crate::path::UriPath;
use crate::sched::Job;
use crate::servers::{Connection, ConnectionType, SSID_BOOTSTRAP};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the server layer wants done about bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapAction {
    None,
    /// Send Request Bootstrap once the holdoff has elapsed
    Request,
}

/// Build the Request Bootstrap message for `conn`
pub fn request_bootstrap_message(conn: &Connection, endpoint_name: &str) -> RequestBootstrapMessage {
    let mut uri_path = conn.uri_path.clone();
    uri_path.push("bs".to_string());
    let mut uri_query = conn.uri_query.clone();
    uri_query.push(format!("ep={}", endpoint_name));
    if conn.lwm2m_version >= Lwm2mVersion::V1_1 {
        uri_query.push(format!("pct={}", FORMAT_SENML_CBOR));
    }
    RequestBootstrapMessage {
        code: CoapCode::POST,
        uri_path,
        uri_query,
    }
}

impl ClientState {
    /// Arm the Request Bootstrap job after the current holdoff and grow it
    pub(crate) fn schedule_request_bootstrap(&mut self) -> Result<()> {
        let now = self.sched.now();
        let delay = self.bootstrap.backoff.next_delay(now);
        debug!(delay_secs = delay.as_secs(), "scheduling bootstrap");
        self.sched.cancel_slot(&mut self.bootstrap.client_initiated_job);
        match self.sched.schedule_delayed(delay, Job::RequestBootstrap) {
            Ok(handle) => self.bootstrap.client_initiated_job = Some(handle),
            Err(err) => {
                warn!(%err, "could not schedule client-initiated bootstrap");
                return Err(err);
            }
        }
        self.bootstrap.backoff.advance(now);
        Ok(())
    }

    /// Request Bootstrap job body
    pub(crate) fn request_bootstrap_job(&mut self) {
        self.bootstrap.client_initiated_job = None;
        let Some(conn) = self.servers.find_active(SSID_BOOTSTRAP) else {
            debug!("no Bootstrap Server connection to send Request Bootstrap through");
            self.bootstrap.triggered = false;
            return;
        };
        let refusal = if conn.conn_type == ConnectionType::Unset {
            Some("no usable Bootstrap Server connection")
        } else if self.bootstrap.session_token == Some(conn.session_token) {
            Some("bootstrap already started on the same connection")
        } else if !conn.online {
            Some("Bootstrap Server connection is not online")
        } else {
            None
        };
        if let Some(reason) = refusal {
            debug!(reason, "not sending Request Bootstrap");
            self.bootstrap.triggered = false;
            let err = Error::NetworkOther(reason.to_string());
            self.servers.on_communication_error(SSID_BOOTSTRAP, &err);
            return;
        }

        // The version attempted here decides whether Preferred Content
        // Format is sent, and whether a 1.0 fallback is possible later
        let version = self.config.lwm2m_version.maximum.min(Lwm2mVersion::V1_1);
        self.servers.update_registration_version(SSID_BOOTSTRAP, version);
        self.send_request_bootstrap();
    }

    fn send_request_bootstrap(&mut self) {
        debug_assert!(!self.bootstrap.exchange_outstanding());
        // Fresh snapshot: the registration version was just updated
        let Some(conn) = self.servers.find_active(SSID_BOOTSTRAP) else {
            warn!("Bootstrap Server vanished before Request Bootstrap was sent");
            self.bootstrap.triggered = false;
            return;
        };
        let message = request_bootstrap_message(&conn, &self.config.endpoint_name);
        match self.coap.send_async_request(SSID_BOOTSTRAP, &message) {
            Ok(id) => {
                info!(exchange = id.0, version = %conn.lwm2m_version, "Request Bootstrap sent");
                self.bootstrap.request = RequestState::Outstanding(id);
            }
            Err(err) => {
                warn!(%err, "could not send Request Bootstrap");
                self.bootstrap.triggered = false;
                self.servers.on_communication_error(SSID_BOOTSTRAP, &err);
            }
        }
    }

    /// Completion of the Request Bootstrap exchange `id`
    pub(crate) fn on_bootstrap_response(&mut self, id: ExchangeId, outcome: ExchangeOutcome) {
        match self.bootstrap.request {
            RequestState::Outstanding(current) if current == id => {}
            _ => {
                debug!(exchange = id.0, "ignoring completion of a stale exchange");
                return;
            }
        }
        if !matches!(outcome, ExchangeOutcome::PartialContent(_)) {
            self.bootstrap.request = RequestState::Idle;
        }
        if !matches!(outcome, ExchangeOutcome::Cancelled) {
            self.bootstrap.triggered = false;
        }

        let code = match outcome {
            ExchangeOutcome::Cancelled => return,
            ExchangeOutcome::PartialContent(code) => {
                // Nothing past the first block matters
                self.cancel_request_exchange();
                code
            }
            ExchangeOutcome::Response(code) => code,
            ExchangeOutcome::Failed(Error::NetworkTimeout) => {
                warn!("could not request bootstrap: timeout");
                self.servers.on_communication_timeout(SSID_BOOTSTRAP);
                return;
            }
            ExchangeOutcome::Failed(err) => {
                warn!(%err, "could not send Request Bootstrap");
                self.servers.on_communication_error(SSID_BOOTSTRAP, &err);
                return;
            }
        };

        let Some(conn) = self.servers.find_active(SSID_BOOTSTRAP) else {
            warn!(%code, "Bootstrap Server gone before its response was handled");
            return;
        };
        if code != CoapCode::CHANGED {
            if code.is_client_error()
                && conn.lwm2m_version >= Lwm2mVersion::V1_1
                && self.config.lwm2m_version.minimum <= Lwm2mVersion::V1_0
            {
                warn!(%code, "attempting to fall back to LwM2M version 1.0");
                self.servers.update_registration_version(SSID_BOOTSTRAP, Lwm2mVersion::V1_0);
                self.send_request_bootstrap();
                return;
            }
            warn!(%code, expected = %CoapCode::CHANGED, "unexpected Request Bootstrap response");
            let err = Error::NetworkOther(format!("Request Bootstrap answered with {}", code));
            self.servers.on_communication_error(SSID_BOOTSTRAP, &err);
            return;
        }

        info!("client-initiated bootstrap successfully started");
        let started = self
            .start_bootstrap(Some(&conn), true)
            .and_then(|()| self.schedule_finish_timeout(conn.transport));
        if let Err(err) = started {
            self.servers.on_communication_error(SSID_BOOTSTRAP, &err);
        }
    }

    /// Client Hold Off Time of the Bootstrap Server account
    fn client_hold_off_time(&mut self) -> Option<Duration> {
        let Some(iid) = self.dm.find_bootstrap_security_iid() else {
            warn!("could not find Security instance of the Bootstrap Server");
            return None;
        };
        let path = UriPath::resource(oid::SECURITY, iid, security::CLIENT_HOLD_OFF_TIME);
        let secs = self.dm.read_resource_i64(&path).ok()?;
        u64::try_from(secs).ok().map(Duration::from_secs)
    }

    /// Act on the server layer's view of the Bootstrap Server
    pub(crate) fn request_bootstrap_if_appropriate(&mut self, action: BootstrapAction) -> Result<()> {
        if action == BootstrapAction::None {
            return Ok(());
        }
        if self.servers.find_active(SSID_BOOTSTRAP).is_none() {
            return self.servers.enable_server(SSID_BOOTSTRAP);
        }
        // An ongoing backoff keeps its holdoff
        if !self.bootstrap.backoff.is_started() {
            let Some(holdoff) = self.client_hold_off_time() else {
                info!("Client Hold Off Time not set or invalid, not scheduling client-initiated bootstrap");
                return Ok(());
            };
            debug!(holdoff_secs = holdoff.as_secs(), "scheduling client-initiated bootstrap");
            self.bootstrap.backoff.seed(holdoff);
        }
        self.schedule_request_bootstrap()
    }

    /// Request bootstrap now, regardless of earlier attempts
    pub(crate) fn schedule_bootstrap_request(&mut self) -> Result<()> {
        if self.bootstrap.exchange_outstanding() {
            debug!("bootstrap already requested, not requesting again");
            return Ok(());
        }
        if !self.dm.bootstrap_server_exists() {
            warn!("Bootstrap Server account does not exist, cannot schedule Request Bootstrap");
            return Err(Error::NotFound);
        }
        self.cancel_client_initiated_bootstrap();
        self.bootstrap.triggered = true;
        self.bootstrap.backoff.restart(self.sched.now());
        if self.servers.find_active(SSID_BOOTSTRAP).is_some() {
            self.schedule_request_bootstrap()
        } else {
            self.servers.enable_server(SSID_BOOTSTRAP)
        }
    }
}
