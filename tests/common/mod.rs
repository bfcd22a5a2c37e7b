// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! Every collaborator records into state shared through an `Arc`, so a test
//! keeps a clone of the recorder while the client owns the boxed original.

#![allow(dead_code)]

use lwm2m_client::coap::{CoapClient, ExchangeId, RequestBootstrapMessage};
use lwm2m_client::config::{Lwm2mVersion, Transport};
use lwm2m_client::dm::memory::{access_control_object, security_object, server_object};
use lwm2m_client::dm::{security, server};
use lwm2m_client::path::{Iid, UriPath};
use lwm2m_client::{
    Client, ClientBuilder, ClientConfig, Connection, DataModel, Error, MemoryObject,
    ObservationSink, Result, SSID_BOOTSTRAP, ServerManager, Ssid, Value,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub use lwm2m_client::MockClock;

/// One call made on the server layer
#[derive(Debug, Clone, PartialEq)]
pub enum ServerCall {
    ReloadServers,
    RegistrationUpdate(Ssid),
    SocketUpdate(Iid),
    DisableServer(Ssid, Option<Duration>),
    SendRetryDeferred(Option<Ssid>),
    EnableServer(Ssid),
    CleanupInactive,
    SuspendNonBootstrap,
    UpdateVersion(Ssid, Lwm2mVersion),
    CommunicationError(Ssid, Error),
    CommunicationTimeout(Ssid),
    Failure(Ssid, String),
}

#[derive(Debug, Default)]
pub struct ServersState {
    pub connections: BTreeMap<Ssid, Connection>,
    pub calls: Vec<ServerCall>,
    /// Error returned by `schedule_disable_server`
    pub fail_disable: Option<Error>,
}

/// Server layer that records every call
#[derive(Debug, Clone, Default)]
pub struct RecordingServers(pub Arc<Mutex<ServersState>>);

impl RecordingServers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `conn` the active connection of its server
    pub fn set_connection(&self, conn: Connection) {
        self.0.lock().connections.insert(conn.ssid, conn);
    }

    pub fn remove_connection(&self, ssid: Ssid) {
        self.0.lock().connections.remove(&ssid);
    }

    pub fn connection(&self, ssid: Ssid) -> Option<Connection> {
        self.0.lock().connections.get(&ssid).cloned()
    }

    pub fn calls(&self) -> Vec<ServerCall> {
        self.0.lock().calls.clone()
    }

    pub fn count(&self, call: &ServerCall) -> usize {
        self.0.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Communication errors reported for `ssid`
    pub fn communication_errors(&self, ssid: Ssid) -> Vec<Error> {
        self.0
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ServerCall::CommunicationError(s, err) if *s == ssid => Some(err.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.0.lock().calls.clear();
    }

    pub fn fail_disable(&self, err: Error) {
        self.0.lock().fail_disable = Some(err);
    }

    fn record(&self, call: ServerCall) {
        self.0.lock().calls.push(call);
    }
}

impl ServerManager for RecordingServers {
    fn find_active(&self, ssid: Ssid) -> Option<Connection> {
        self.connection(ssid)
    }

    fn schedule_reload_servers(&mut self) -> Result<()> {
        self.record(ServerCall::ReloadServers);
        Ok(())
    }

    fn schedule_registration_update(&mut self, ssid: Ssid) -> Result<()> {
        self.record(ServerCall::RegistrationUpdate(ssid));
        Ok(())
    }

    fn schedule_socket_update(&mut self, security_iid: Iid) -> Result<()> {
        self.record(ServerCall::SocketUpdate(security_iid));
        Ok(())
    }

    fn schedule_disable_server(
        &mut self,
        ssid: Ssid,
        reenable_after: Option<Duration>,
    ) -> Result<()> {
        self.record(ServerCall::DisableServer(ssid, reenable_after));
        match self.0.lock().fail_disable.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn send_retry_deferred(&mut self, ssid: Option<Ssid>) -> Result<()> {
        self.record(ServerCall::SendRetryDeferred(ssid));
        Ok(())
    }

    fn enable_server(&mut self, ssid: Ssid) -> Result<()> {
        self.record(ServerCall::EnableServer(ssid));
        Ok(())
    }

    fn cleanup_inactive_nonbootstrap(&mut self) {
        self.record(ServerCall::CleanupInactive);
    }

    fn suspend_nonbootstrap(&mut self) {
        self.record(ServerCall::SuspendNonBootstrap);
    }

    fn update_registration_version(&mut self, ssid: Ssid, version: Lwm2mVersion) {
        let mut state = self.0.lock();
        if let Some(conn) = state.connections.get_mut(&ssid) {
            conn.lwm2m_version = version;
        }
        state.calls.push(ServerCall::UpdateVersion(ssid, version));
    }

    fn on_communication_error(&mut self, ssid: Ssid, err: &Error) {
        self.record(ServerCall::CommunicationError(ssid, err.clone()));
    }

    fn on_communication_timeout(&mut self, ssid: Ssid) {
        self.record(ServerCall::CommunicationTimeout(ssid));
    }

    fn on_failure(&mut self, ssid: Ssid, reason: &str) {
        self.record(ServerCall::Failure(ssid, reason.to_string()));
    }
}

#[derive(Debug, Default)]
pub struct CoapState {
    pub sent: Vec<(ExchangeId, RequestBootstrapMessage)>,
    pub cancelled: Vec<ExchangeId>,
    pub next_id: u64,
    /// Error returned by the next `send_async_request`
    pub fail_next: Option<Error>,
}

/// CoAP layer that records submitted requests
#[derive(Debug, Clone, Default)]
pub struct MockCoap(pub Arc<Mutex<CoapState>>);

impl MockCoap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(ExchangeId, RequestBootstrapMessage)> {
        self.0.lock().sent.clone()
    }

    pub fn last_sent(&self) -> Option<(ExchangeId, RequestBootstrapMessage)> {
        self.0.lock().sent.last().cloned()
    }

    pub fn cancelled(&self) -> Vec<ExchangeId> {
        self.0.lock().cancelled.clone()
    }

    pub fn fail_next(&self, err: Error) {
        self.0.lock().fail_next = Some(err);
    }
}

impl CoapClient for MockCoap {
    fn send_async_request(
        &mut self,
        _ssid: Ssid,
        request: &RequestBootstrapMessage,
    ) -> Result<ExchangeId> {
        let mut state = self.0.lock();
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        state.next_id += 1;
        let id = ExchangeId(state.next_id);
        state.sent.push((id, request.clone()));
        Ok(id)
    }

    fn cancel_exchange(&mut self, _ssid: Ssid, id: ExchangeId) {
        self.0.lock().cancelled.push(id);
    }
}

/// Observation layer that records every notify call
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver(pub Arc<Mutex<Vec<(UriPath, Ssid, bool)>>>);

impl RecordingObserver {
    pub fn calls(&self) -> Vec<(UriPath, Ssid, bool)> {
        self.0.lock().clone()
    }
}

impl ObservationSink for RecordingObserver {
    fn notify(&mut self, path: &UriPath, origin: Ssid, invert_match: bool) -> Result<()> {
        self.0.lock().push((*path, origin, invert_match));
        Ok(())
    }
}

/// Security object holding the Bootstrap Server account at instance 0
pub fn security_with_bootstrap_account(hold_off_secs: i64, timeout_secs: i64) -> MemoryObject {
    security_object().with_instance(
        0,
        [
            (security::SERVER_URI, Value::String("coap://bs.example".into())),
            (security::BOOTSTRAP, Value::Bool(true)),
            (security::CLIENT_HOLD_OFF_TIME, Value::Int(hold_off_secs)),
            (security::BOOTSTRAP_TIMEOUT, Value::Int(timeout_secs)),
        ],
    )
}

/// Data model with Security, Server and Access Control objects installed
pub fn data_model(security: MemoryObject) -> DataModel {
    data_model_with(security, server_object())
}

pub fn data_model_with(security: MemoryObject, server: MemoryObject) -> DataModel {
    let mut dm = DataModel::new();
    dm.register(Box::new(security)).unwrap();
    dm.register(Box::new(server)).unwrap();
    dm.register(Box::new(access_control_object())).unwrap();
    dm
}

/// Bootstrap Server account at Security 0 plus a regular server with
/// `ssid` at Security 1 and Server 0
pub fn provisioned_data_model(ssid: Ssid) -> DataModel {
    let (security_values, server_values) = server_account(ssid);
    data_model_with(
        security_with_bootstrap_account(5, 0).with_instance(1, security_values),
        server_object().with_instance(0, server_values),
    )
}

/// Resource values of a regular server account (Security and Server parts)
pub fn server_account(ssid: Ssid) -> (Vec<(u16, Value)>, Vec<(u16, Value)>) {
    let security_values = vec![
        (security::SERVER_URI, Value::String(format!("coap://dm{}.example", ssid))),
        (security::BOOTSTRAP, Value::Bool(false)),
        (security::SSID, Value::Int(i64::from(ssid))),
    ];
    let server_values = vec![
        (server::SSID, Value::Int(i64::from(ssid))),
        (server::LIFETIME, Value::Int(86400)),
    ];
    (security_values, server_values)
}

/// Client under test with its recorders
pub struct Harness {
    pub client: Client,
    pub servers: RecordingServers,
    pub coap: MockCoap,
    pub observer: RecordingObserver,
    pub clock: Arc<MockClock>,
}

impl Harness {
    pub fn new(config: ClientConfig, dm: DataModel) -> Self {
        let servers = RecordingServers::new();
        let coap = MockCoap::new();
        let observer = RecordingObserver::default();
        let clock = Arc::new(MockClock::new());
        let client = ClientBuilder::new(config, Box::new(servers.clone()), Box::new(coap.clone()))
            .with_clock(clock.clone())
            .with_data_model(dm)
            .with_observer(Box::new(observer.clone()))
            .build();
        Self {
            client,
            servers,
            coap,
            observer,
            clock,
        }
    }

    /// LwM2M 1.1 client whose Bootstrap Server account is already provisioned
    pub fn with_bootstrap_account() -> Self {
        Self::new(
            ClientConfig::default(),
            data_model(security_with_bootstrap_account(5, 0)),
        )
    }

    /// Register an online Bootstrap Server connection and return it
    pub fn connect_bootstrap(&self, version: Lwm2mVersion) -> Connection {
        let conn = Connection::new(SSID_BOOTSTRAP, Transport::Udp).with_version(version);
        self.servers.set_connection(conn.clone());
        conn
    }

    /// Advance the clock and run whatever became due
    pub fn advance(&self, by: Duration) -> usize {
        self.clock.advance(by);
        self.client.run_pending()
    }

    pub fn read(&self, path: UriPath) -> Result<Value> {
        self.client.with_data_model(|dm| dm.read_resource(&path))
    }

    pub fn instances(&self, oid: u16) -> Vec<Iid> {
        self.client
            .with_data_model(|dm| dm.list_instances(oid))
            .unwrap()
    }
}
