// tests/bootstrap.rs

//! Bootstrap Interface integration tests
//!
//! Server-initiated operations, Finish, the purge and finish timers, and the
//! client-initiated Request Bootstrap flow.

mod common;

use common::{
    Harness, ServerCall, data_model, provisioned_data_model, security_with_bootstrap_account,
    server_account,
};
use lwm2m_client::dm::memory::security_object;
use lwm2m_client::dm::{HandlerSet, MemoryObject, ResourceKind, oid, security, server};
use lwm2m_client::{
    Action, BootstrapAction, BootstrapRequest, BootstrapState, ClientConfig, CoapCode, Error,
    ExchangeOutcome, Lwm2mVersion, ResponseContent, SSID_BOOTSTRAP, UriPath, Value, WriteEntry,
    bootstrap::format_links,
};
use std::time::Duration;

const EXCHANGE_LIFETIME: Duration = Duration::from_secs(247);

fn entry(path: UriPath, value: Value) -> WriteEntry {
    WriteEntry::new(path, value)
}

fn regular_security_entries(iid: u16, ssid: u16) -> Vec<WriteEntry> {
    vec![
        entry(
            UriPath::resource(oid::SECURITY, iid, security::SERVER_URI),
            Value::String("coap://dm.example".into()),
        ),
        entry(
            UriPath::resource(oid::SECURITY, iid, security::BOOTSTRAP),
            Value::Bool(false),
        ),
        entry(
            UriPath::resource(oid::SECURITY, iid, security::SSID),
            Value::Int(i64::from(ssid)),
        ),
    ]
}

fn server_entries(iid: u16, ssid: u16) -> Vec<WriteEntry> {
    vec![
        entry(
            UriPath::resource(oid::SERVER, iid, server::SSID),
            Value::Int(i64::from(ssid)),
        ),
        entry(
            UriPath::resource(oid::SERVER, iid, server::LIFETIME),
            Value::Int(3600),
        ),
    ]
}

fn queued_added_instances(h: &Harness, target: u16) -> Vec<u16> {
    h.client.with_data_model(|dm| {
        dm.transaction()
            .queue()
            .and_then(|queue| queue.added_instances(target))
            .map(|added| added.iter().copied().collect())
            .unwrap_or_default()
    })
}

// =============================================================================
// Bootstrap Write
// =============================================================================

#[test]
fn test_write_resource_creates_instance_on_demand() {
    let h = Harness::new(ClientConfig::default(), data_model(security_object()));
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    let uri = UriPath::resource(oid::SECURITY, 0, security::SERVER_URI);
    let request = BootstrapRequest::write(
        uri,
        vec![entry(uri, Value::String("coap://bs.example".into()))],
    );

    let response = h.client.perform_bootstrap_action(&conn, &request).unwrap();
    assert_eq!(response.code, CoapCode::CHANGED);
    assert_eq!(response.content, ResponseContent::Empty);

    assert_eq!(h.instances(oid::SECURITY), vec![0]);
    assert_eq!(h.read(uri), Ok(Value::String("coap://bs.example".into())));
    assert_eq!(queued_added_instances(&h, oid::SECURITY), vec![0]);
    let resource_recorded = h.client.with_data_model(|dm| {
        dm.transaction()
            .queue()
            .and_then(|queue| queue.get(oid::SECURITY))
            .is_some_and(|changes| changes.resources.contains(&(0, security::SERVER_URI)))
    });
    assert!(resource_recorded);

    assert!(h.client.bootstrap_in_progress());
    assert_eq!(h.client.bootstrap_state(), BootstrapState::AwaitingFinishTimeout);
    assert_eq!(h.servers.count(&ServerCall::SuspendNonBootstrap), 1);
}

#[test]
fn test_write_rejects_second_bootstrap_account() {
    let h = Harness::with_bootstrap_account();
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    let request = BootstrapRequest::write(
        UriPath::instance(oid::SECURITY, 1),
        vec![
            entry(
                UriPath::resource(oid::SECURITY, 1, security::SERVER_URI),
                Value::String("coap://other-bs.example".into()),
            ),
            entry(
                UriPath::resource(oid::SECURITY, 1, security::BOOTSTRAP),
                Value::Bool(true),
            ),
        ],
    );

    let err = h.client.perform_bootstrap_action(&conn, &request).unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)));
    // The instance created by the rejected write is gone again
    assert_eq!(h.instances(oid::SECURITY), vec![0]);
    assert!(queued_added_instances(&h, oid::SECURITY).is_empty());
    assert!(h.client.bootstrap_in_progress());
}

#[test]
fn test_write_target_validation() {
    let h = Harness::with_bootstrap_account();
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);

    let root = BootstrapRequest::write(UriPath::root(), Vec::new());
    assert_eq!(
        h.client.perform_bootstrap_action(&conn, &root),
        Err(Error::MethodNotAllowed)
    );

    let riid = BootstrapRequest::write(UriPath::resource_instance(2, 0, 2, 1), Vec::new());
    assert_eq!(
        h.client.perform_bootstrap_action(&conn, &riid),
        Err(Error::MethodNotAllowed)
    );

    let missing = BootstrapRequest::write(UriPath::instance(42, 0), Vec::new());
    assert_eq!(
        h.client.perform_bootstrap_action(&conn, &missing),
        Err(Error::NotFound)
    );

    let outside = BootstrapRequest::write(
        UriPath::instance(oid::SERVER, 0),
        server_entries(1, 2),
    );
    let err = h.client.perform_bootstrap_action(&conn, &outside).unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)));
}

#[test]
fn test_object_write_requires_instance_ids() {
    let h = Harness::with_bootstrap_account();
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    let request = BootstrapRequest::write(
        UriPath::object(oid::SERVER),
        vec![entry(UriPath::object(oid::SERVER), Value::Int(1))],
    );
    let err = h.client.perform_bootstrap_action(&conn, &request).unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)));
}

#[test]
fn test_object_write_skips_unsupported_resources() {
    let h = Harness::with_bootstrap_account();
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    let mut payload = server_entries(0, 1);
    payload.extend(server_entries(3, 4));
    // Resource 99 is not part of the Server object
    payload.insert(1, entry(UriPath::resource(oid::SERVER, 0, 99), Value::Int(1)));
    let request = BootstrapRequest::write(UriPath::object(oid::SERVER), payload);

    h.client.perform_bootstrap_action(&conn, &request).unwrap();
    assert_eq!(h.instances(oid::SERVER), vec![0, 3]);
    assert_eq!(
        h.read(UriPath::resource(oid::SERVER, 3, server::SSID)),
        Ok(Value::Int(4))
    );
}

#[test]
fn test_write_replaces_multiple_instance_resource() {
    let h = Harness::with_bootstrap_account();
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);

    let first = BootstrapRequest::write(
        UriPath::instance(oid::ACCESS_CONTROL, 0),
        vec![
            entry(UriPath::resource_instance(oid::ACCESS_CONTROL, 0, 2, 1), Value::Int(7)),
            entry(UriPath::resource_instance(oid::ACCESS_CONTROL, 0, 2, 2), Value::Int(7)),
        ],
    );
    h.client.perform_bootstrap_action(&conn, &first).unwrap();

    let second = BootstrapRequest::write(
        UriPath::instance(oid::ACCESS_CONTROL, 0),
        vec![entry(
            UriPath::resource_instance(oid::ACCESS_CONTROL, 0, 2, 5),
            Value::Int(15),
        )],
    );
    h.client.perform_bootstrap_action(&conn, &second).unwrap();

    let riids = h.client.with_data_model(|dm| {
        dm.registry_mut()
            .get_mut(oid::ACCESS_CONTROL)
            .and_then(|object| object.list_resource_instances(0, 2))
    });
    assert_eq!(riids, Ok(vec![5]));
}

#[test]
fn test_write_stamps_last_bootstrapped() {
    let h = Harness::with_bootstrap_account();
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    let request = BootstrapRequest::write(UriPath::instance(oid::SERVER, 0), server_entries(0, 1));
    h.client.perform_bootstrap_action(&conn, &request).unwrap();

    let stamped = h.read(UriPath::resource(oid::SERVER, 0, server::LAST_BOOTSTRAPPED));
    assert!(matches!(stamped, Ok(Value::Int(ts)) if ts > 0));
}

#[test]
fn test_last_bootstrapped_not_stamped_on_1_0() {
    let config = ClientConfig::default().with_versions(Lwm2mVersion::V1_0, Lwm2mVersion::V1_0);
    let h = Harness::new(config, data_model(security_with_bootstrap_account(5, 0)));
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_0);
    let request = BootstrapRequest::write(UriPath::instance(oid::SERVER, 0), server_entries(0, 1));
    h.client.perform_bootstrap_action(&conn, &request).unwrap();

    assert_eq!(
        h.read(UriPath::resource(oid::SERVER, 0, server::LAST_BOOTSTRAPPED)),
        Err(Error::NotFound)
    );
}

// =============================================================================
// Bootstrap Delete
// =============================================================================

#[test]
fn test_root_delete_keeps_bootstrap_account() {
    let h = Harness::new(ClientConfig::default(), provisioned_data_model(1));
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    let request = BootstrapRequest::new(Action::Delete, UriPath::root());

    let response = h.client.perform_bootstrap_action(&conn, &request).unwrap();
    assert_eq!(response.code, CoapCode::DELETED);
    assert_eq!(h.instances(oid::SECURITY), vec![0]);
    assert!(h.instances(oid::SERVER).is_empty());
}

#[test]
fn test_root_delete_skips_objects_refusing_deletion() {
    let mut dm = provisioned_data_model(1);
    let locked = MemoryObject::new(3)
        .with_resource(0, ResourceKind::R)
        .with_instance(0, [(0, Value::String("vendor".into()))])
        .with_handlers(HandlerSet::read_only().union(HandlerSet::transactional()));
    dm.register(Box::new(locked)).unwrap();
    let h = Harness::new(ClientConfig::default(), dm);
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);

    let request = BootstrapRequest::new(Action::Delete, UriPath::root());
    h.client.perform_bootstrap_action(&conn, &request).unwrap();
    assert_eq!(h.instances(3), vec![0]);
    assert!(h.instances(oid::SERVER).is_empty());
}

#[test]
fn test_delete_target_validation() {
    let h = Harness::new(ClientConfig::default(), provisioned_data_model(1));
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);

    let resource = BootstrapRequest::new(
        Action::Delete,
        UriPath::resource(oid::SERVER, 0, server::LIFETIME),
    );
    let err = h.client.perform_bootstrap_action(&conn, &resource).unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)));

    let bs_uri = BootstrapRequest {
        is_bs_uri: true,
        ..BootstrapRequest::new(Action::Delete, UriPath::root())
    };
    let err = h.client.perform_bootstrap_action(&conn, &bs_uri).unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)));

    // Absent objects and instances are nothing to delete
    let absent_object = BootstrapRequest::new(Action::Delete, UriPath::object(42));
    assert!(h.client.perform_bootstrap_action(&conn, &absent_object).is_ok());
    let absent_instance = BootstrapRequest::new(Action::Delete, UriPath::instance(oid::SERVER, 9));
    assert!(h.client.perform_bootstrap_action(&conn, &absent_instance).is_ok());
    assert_eq!(h.instances(oid::SERVER), vec![0]);
}

#[test]
fn test_delete_everything_removes_bootstrap_account() {
    let h = Harness::new(ClientConfig::default(), provisioned_data_model(1));
    h.client.delete_everything().unwrap();
    assert!(h.instances(oid::SECURITY).is_empty());
    assert!(h.instances(oid::SERVER).is_empty());
    assert!(h.client.bootstrap_in_progress());
}

// =============================================================================
// Bootstrap Discover and Read
// =============================================================================

#[test]
fn test_discover_root() {
    let h = Harness::new(ClientConfig::default(), provisioned_data_model(1));
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    let request = BootstrapRequest::new(Action::Discover, UriPath::root());

    let response = h.client.perform_bootstrap_action(&conn, &request).unwrap();
    assert_eq!(response.code, CoapCode::CONTENT);
    let ResponseContent::Links(links) = response.content else {
        panic!("expected links");
    };
    assert_eq!(
        format_links(&links),
        "</>;lwm2m=1.1,</0>,</0/0>;uri=\"coap://bs.example\",\
         </0/1>;ssid=1;uri=\"coap://dm1.example\",</1>,</1/0>;ssid=1,</2>"
    );
    assert!(h.client.bootstrap_in_progress());
}

#[test]
fn test_discover_on_1_0_omits_uri() {
    let h = Harness::new(ClientConfig::default(), provisioned_data_model(1));
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_0);
    let request = BootstrapRequest::new(Action::Discover, UriPath::object(oid::SECURITY));

    let response = h.client.perform_bootstrap_action(&conn, &request).unwrap();
    let ResponseContent::Links(links) = response.content else {
        panic!("expected links");
    };
    assert_eq!(format_links(&links), "</>;lwm2m=1.0,</0>,</0/0>,</0/1>;ssid=1");
}

#[test]
fn test_discover_rejects_instance_path() {
    let h = Harness::new(ClientConfig::default(), provisioned_data_model(1));
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    let request = BootstrapRequest::new(Action::Discover, UriPath::instance(oid::SERVER, 0));
    let err = h.client.perform_bootstrap_action(&conn, &request).unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)));
}

#[test]
fn test_read_server_instance() {
    let h = Harness::new(ClientConfig::default(), provisioned_data_model(1));
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    let request = BootstrapRequest::new(Action::Read, UriPath::instance(oid::SERVER, 0));

    let response = h.client.perform_bootstrap_action(&conn, &request).unwrap();
    assert_eq!(response.code, CoapCode::CONTENT);
    let ResponseContent::Entries(entries) = response.content else {
        panic!("expected entries");
    };
    let paths: Vec<UriPath> = entries.iter().map(|e| e.path).collect();
    assert_eq!(
        paths,
        vec![
            UriPath::resource(oid::SERVER, 0, server::SSID),
            UriPath::resource(oid::SERVER, 0, server::LIFETIME),
        ]
    );
}

#[test]
fn test_read_restrictions() {
    let h = Harness::new(ClientConfig::default(), provisioned_data_model(1));
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    for uri in [
        UriPath::object(oid::SECURITY),
        UriPath::resource(oid::SERVER, 0, server::LIFETIME),
        UriPath::root(),
    ] {
        let request = BootstrapRequest::new(Action::Read, uri);
        assert_eq!(
            h.client.perform_bootstrap_action(&conn, &request),
            Err(Error::MethodNotAllowed),
            "read of {}",
            uri
        );
    }

    let config = ClientConfig::default().with_versions(Lwm2mVersion::V1_0, Lwm2mVersion::V1_0);
    let h = Harness::new(config, provisioned_data_model(1));
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_0);
    let request = BootstrapRequest::new(Action::Read, UriPath::object(oid::SERVER));
    assert_eq!(
        h.client.perform_bootstrap_action(&conn, &request),
        Err(Error::MethodNotAllowed)
    );
}

#[test]
fn test_non_bootstrap_actions_rejected() {
    let h = Harness::with_bootstrap_account();
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    for action in [Action::Execute, Action::Create] {
        let request = BootstrapRequest::new(action, UriPath::instance(oid::SERVER, 0));
        assert_eq!(
            h.client.perform_bootstrap_action(&conn, &request),
            Err(Error::MethodNotAllowed)
        );
    }
}

// =============================================================================
// Bootstrap Finish
// =============================================================================

#[test]
fn test_finish_commits_and_hands_over() {
    let h = Harness::with_bootstrap_account();
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    let write = BootstrapRequest::write(
        UriPath::instance(oid::SECURITY, 1),
        regular_security_entries(1, 1),
    );
    h.client.perform_bootstrap_action(&conn, &write).unwrap();
    h.servers.clear_calls();

    let response = h
        .client
        .perform_bootstrap_action(&conn, &BootstrapRequest::finish())
        .unwrap();
    assert_eq!(response.code, CoapCode::CHANGED);

    assert!(!h.client.bootstrap_in_progress());
    assert_eq!(h.client.bootstrap_state(), BootstrapState::Idle);
    assert_eq!(h.instances(oid::SECURITY), vec![0, 1]);
    assert_eq!(h.servers.count(&ServerCall::SocketUpdate(1)), 1);
    assert_eq!(h.servers.count(&ServerCall::DisableServer(SSID_BOOTSTRAP, None)), 1);
    assert_eq!(h.servers.calls().last(), Some(&ServerCall::ReloadServers));
    assert!(h.observer.calls().contains(&(UriPath::object(oid::SECURITY), SSID_BOOTSTRAP, true)));
    // No purge timeout configured, finish timeout cancelled
    assert_eq!(h.client.pending_jobs(), 0);
}

#[test]
fn test_finish_keeps_server_with_legacy_bootstrap() {
    let config = ClientConfig::default().with_legacy_server_initiated_bootstrap(true);
    let h = Harness::new(config, data_model(security_with_bootstrap_account(5, 0)));
    assert!(h.client.legacy_server_initiated_allowed());
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    let write = BootstrapRequest::write(UriPath::instance(oid::SERVER, 0), server_entries(0, 1));
    h.client.perform_bootstrap_action(&conn, &write).unwrap();
    h.client
        .perform_bootstrap_action(&conn, &BootstrapRequest::finish())
        .unwrap();
    assert_eq!(h.servers.count(&ServerCall::DisableServer(SSID_BOOTSTRAP, None)), 0);
}

#[test]
fn test_finish_rejects_invalid_configuration() {
    let h = Harness::with_bootstrap_account();
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    // A regular Security instance without SSID
    let write = BootstrapRequest::write(
        UriPath::instance(oid::SECURITY, 1),
        regular_security_entries(1, 1).into_iter().take(2).collect(),
    );
    h.client.perform_bootstrap_action(&conn, &write).unwrap();

    assert_eq!(
        h.client.perform_bootstrap_action(&conn, &BootstrapRequest::finish()),
        Err(Error::NotAcceptable)
    );
    assert!(h.client.bootstrap_in_progress());
    assert_eq!(h.client.bootstrap_state(), BootstrapState::AwaitingFinishTimeout);
    assert_eq!(h.servers.count(&ServerCall::DisableServer(SSID_BOOTSTRAP, None)), 0);
}

#[test]
fn test_failed_finish_reopens_session() {
    let h = Harness::with_bootstrap_account();
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    let write = BootstrapRequest::write(UriPath::instance(oid::SERVER, 0), server_entries(0, 1));
    h.client.perform_bootstrap_action(&conn, &write).unwrap();
    h.servers.fail_disable(Error::NetworkOther("link down".into()));

    let err = h
        .client
        .perform_bootstrap_action(&conn, &BootstrapRequest::finish())
        .unwrap_err();
    assert_eq!(err, Error::NetworkOther("link down".into()));
    assert!(h.client.bootstrap_in_progress());
    assert_eq!(h.client.bootstrap_state(), BootstrapState::AwaitingFinishTimeout);
    // The committed configuration stays
    assert_eq!(h.instances(oid::SERVER), vec![0]);
    assert!(h.client.with_data_model(|dm| dm.in_transaction()));
}

#[test]
fn test_purge_timer_removes_bootstrap_account() {
    let h = Harness::new(
        ClientConfig::default(),
        data_model(security_with_bootstrap_account(5, 30)),
    );
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    let write = BootstrapRequest::write(UriPath::instance(oid::SERVER, 0), server_entries(0, 1));
    h.client.perform_bootstrap_action(&conn, &write).unwrap();
    h.client
        .perform_bootstrap_action(&conn, &BootstrapRequest::finish())
        .unwrap();
    assert_eq!(h.client.pending_jobs(), 1);
    h.servers.clear_calls();

    assert_eq!(h.advance(Duration::from_secs(29)), 0);
    assert_eq!(h.instances(oid::SECURITY), vec![0]);

    assert_eq!(h.advance(Duration::from_secs(1)), 1);
    assert!(h.instances(oid::SECURITY).is_empty());
    assert!(h.servers.calls().contains(&ServerCall::ReloadServers));
    assert!(!h.client.with_data_model(|dm| dm.in_transaction()));
}

#[test]
fn test_new_session_cancels_purge() {
    let h = Harness::new(
        ClientConfig::default(),
        data_model(security_with_bootstrap_account(5, 30)),
    );
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    h.client
        .perform_bootstrap_action(&conn, &BootstrapRequest::finish())
        .unwrap();
    assert_eq!(h.client.pending_jobs(), 1);

    let discover = BootstrapRequest::new(Action::Discover, UriPath::root());
    h.client.perform_bootstrap_action(&conn, &discover).unwrap();
    h.advance(Duration::from_secs(30));
    assert_eq!(h.instances(oid::SECURITY), vec![0]);
}

#[test]
fn test_huge_account_timeout_is_clamped() {
    let h = Harness::new(
        ClientConfig::default(),
        data_model(security_with_bootstrap_account(5, i64::MAX)),
    );
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    h.client
        .perform_bootstrap_action(&conn, &BootstrapRequest::finish())
        .unwrap();
    assert_eq!(h.client.pending_jobs(), 1);

    assert_eq!(h.advance(Duration::from_secs(24 * 60 * 60)), 0);
    assert_eq!(h.instances(oid::SECURITY), vec![0]);
}

#[test]
fn test_finish_timeout_reports_failure() {
    let h = Harness::with_bootstrap_account();
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    let discover = BootstrapRequest::new(Action::Discover, UriPath::root());
    h.client.perform_bootstrap_action(&conn, &discover).unwrap();

    assert_eq!(h.advance(EXCHANGE_LIFETIME - Duration::from_secs(1)), 0);
    // Every operation re-arms the timeout
    h.client.perform_bootstrap_action(&conn, &discover).unwrap();
    assert_eq!(h.advance(Duration::from_secs(1)), 0);

    assert_eq!(h.advance(EXCHANGE_LIFETIME), 1);
    assert_eq!(
        h.servers.calls().last(),
        Some(&ServerCall::Failure(SSID_BOOTSTRAP, "not reachable".into()))
    );
}

#[test]
fn test_internal_finish_after_provisioning() {
    let h = Harness::new(ClientConfig::default(), data_model(security_object()));
    let (security_values, server_values) = server_account(1);
    let mut entries: Vec<WriteEntry> = security_values
        .into_iter()
        .map(|(rid, value)| entry(UriPath::resource(oid::SECURITY, 1, rid), value))
        .collect();
    entries.extend(
        server_values
            .into_iter()
            .map(|(rid, value)| entry(UriPath::resource(oid::SERVER, 0, rid), value)),
    );

    h.client.bootstrap_write_composite(&entries).unwrap();
    assert!(h.client.bootstrap_in_progress());
    h.client.bootstrap_finish().unwrap();

    assert!(!h.client.bootstrap_in_progress());
    assert_eq!(h.instances(oid::SECURITY), vec![1]);
    assert_eq!(h.instances(oid::SERVER), vec![0]);
    assert_eq!(h.servers.count(&ServerCall::DisableServer(SSID_BOOTSTRAP, None)), 0);
    assert!(h.servers.calls().contains(&ServerCall::ReloadServers));
    assert_eq!(h.client.pending_jobs(), 0);
}

#[test]
fn test_composite_write_rejects_non_resource_paths() {
    let h = Harness::with_bootstrap_account();
    let entries = vec![entry(UriPath::instance(oid::SERVER, 0), Value::Int(1))];
    let err = h.client.bootstrap_write_composite(&entries).unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)));
}

#[test]
fn test_regular_connection_finishes_open_session() {
    let h = Harness::with_bootstrap_account();
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    let write = BootstrapRequest::write(UriPath::instance(oid::SERVER, 0), server_entries(0, 1));
    h.client.perform_bootstrap_action(&conn, &write).unwrap();

    h.client.notify_regular_connection_available().unwrap();
    assert!(!h.client.bootstrap_in_progress());
    assert_eq!(h.servers.count(&ServerCall::DisableServer(SSID_BOOTSTRAP, None)), 1);
    assert_eq!(h.client.bootstrap_backoff(), Default::default());
    assert_eq!(h.client.pending_jobs(), 0);
}

#[test]
fn test_cleanup_aborts_session() {
    let h = Harness::with_bootstrap_account();
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    let write = BootstrapRequest::write(UriPath::instance(oid::SERVER, 0), server_entries(0, 1));
    h.client.perform_bootstrap_action(&conn, &write).unwrap();

    h.client.cleanup();
    assert!(!h.client.bootstrap_in_progress());
    assert_eq!(h.client.bootstrap_state(), BootstrapState::Idle);
    assert_eq!(h.client.pending_jobs(), 0);
    // Rolled back
    assert!(h.instances(oid::SERVER).is_empty());
}

// =============================================================================
// Client-initiated bootstrap
// =============================================================================

#[test]
fn test_request_bootstrap_after_hold_off() {
    let h = Harness::with_bootstrap_account();
    h.connect_bootstrap(Lwm2mVersion::V1_0);
    h.client
        .request_bootstrap_if_appropriate(BootstrapAction::Request)
        .unwrap();
    assert_eq!(h.client.bootstrap_state(), BootstrapState::AwaitingClientInitiated);
    assert!(h.client.bootstrap_scheduled());

    assert_eq!(h.advance(Duration::from_secs(4)), 0);
    assert_eq!(h.advance(Duration::from_secs(1)), 1);
    assert_eq!(h.client.bootstrap_state(), BootstrapState::RequestSent);

    let (id, message) = h.coap.last_sent().unwrap();
    assert_eq!(message.code, CoapCode::POST);
    assert_eq!(message.uri_path, vec!["bs".to_string()]);
    assert_eq!(message.query_value("ep"), Some("lwm2m-client"));
    assert_eq!(message.query_value("pct"), Some("112"));
    assert!(h
        .servers
        .calls()
        .contains(&ServerCall::UpdateVersion(SSID_BOOTSTRAP, Lwm2mVersion::V1_1)));

    h.client
        .on_bootstrap_response(id, ExchangeOutcome::Response(CoapCode::CHANGED));
    assert!(h.client.bootstrap_in_progress());
    assert_eq!(h.client.bootstrap_state(), BootstrapState::AwaitingFinishTimeout);
}

#[test]
fn test_request_bootstrap_falls_back_to_1_0() {
    let h = Harness::with_bootstrap_account();
    h.connect_bootstrap(Lwm2mVersion::V1_1);
    h.client.schedule_bootstrap_request().unwrap();
    assert_eq!(h.client.run_pending(), 1);
    let (first, message) = h.coap.last_sent().unwrap();
    assert_eq!(message.query_value("pct"), Some("112"));

    h.client
        .on_bootstrap_response(first, ExchangeOutcome::Response(CoapCode::NOT_FOUND));
    let sent = h.coap.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].1.query_value("pct"), None);
    assert_eq!(h.client.bootstrap_state(), BootstrapState::RequestSent);

    // A second rejection on 1.0 is final
    h.client
        .on_bootstrap_response(sent[1].0, ExchangeOutcome::Response(CoapCode::NOT_FOUND));
    assert_eq!(h.coap.sent().len(), 2);
    assert_eq!(h.servers.communication_errors(SSID_BOOTSTRAP).len(), 1);
    assert_eq!(h.client.bootstrap_state(), BootstrapState::Idle);
}

#[test]
fn test_no_fallback_when_1_0_not_allowed() {
    let config = ClientConfig::default().with_versions(Lwm2mVersion::V1_1, Lwm2mVersion::V1_1);
    let h = Harness::new(config, data_model(security_with_bootstrap_account(0, 0)));
    h.connect_bootstrap(Lwm2mVersion::V1_1);
    h.client.schedule_bootstrap_request().unwrap();
    h.client.run_pending();
    let (id, _) = h.coap.last_sent().unwrap();

    h.client
        .on_bootstrap_response(id, ExchangeOutcome::Response(CoapCode::BAD_REQUEST));
    assert_eq!(h.coap.sent().len(), 1);
    assert_eq!(h.servers.communication_errors(SSID_BOOTSTRAP).len(), 1);
}

#[test]
fn test_partial_response_cancels_exchange() {
    let h = Harness::with_bootstrap_account();
    h.connect_bootstrap(Lwm2mVersion::V1_1);
    h.client.schedule_bootstrap_request().unwrap();
    h.client.run_pending();
    let (id, _) = h.coap.last_sent().unwrap();

    h.client
        .on_bootstrap_response(id, ExchangeOutcome::PartialContent(CoapCode::CHANGED));
    assert_eq!(h.coap.cancelled(), vec![id]);
    assert!(h.client.bootstrap_in_progress());

    // The cancellation's own completion arrives late and is ignored
    h.client.on_bootstrap_response(id, ExchangeOutcome::Cancelled);
    assert!(h.client.bootstrap_in_progress());
    assert!(h.servers.communication_errors(SSID_BOOTSTRAP).is_empty());
}

#[test]
fn test_request_timeout_reported() {
    let h = Harness::with_bootstrap_account();
    h.connect_bootstrap(Lwm2mVersion::V1_1);
    h.client.schedule_bootstrap_request().unwrap();
    h.client.run_pending();
    let (id, _) = h.coap.last_sent().unwrap();

    h.client
        .on_bootstrap_response(id, ExchangeOutcome::Failed(Error::NetworkTimeout));
    assert_eq!(
        h.servers.calls().last(),
        Some(&ServerCall::CommunicationTimeout(SSID_BOOTSTRAP))
    );
    assert!(!h.client.bootstrap_scheduled());
    assert!(!h.client.bootstrap_in_progress());
}

#[test]
fn test_stale_exchange_ignored() {
    let h = Harness::with_bootstrap_account();
    h.connect_bootstrap(Lwm2mVersion::V1_1);
    h.client.schedule_bootstrap_request().unwrap();
    h.client.run_pending();
    let (id, _) = h.coap.last_sent().unwrap();

    h.client.on_bootstrap_response(
        lwm2m_client::ExchangeId(id.0 + 100),
        ExchangeOutcome::Response(CoapCode::CHANGED),
    );
    assert!(!h.client.bootstrap_in_progress());
    assert_eq!(h.client.bootstrap_state(), BootstrapState::RequestSent);
}

#[test]
fn test_request_refused_on_same_session() {
    let h = Harness::with_bootstrap_account();
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1);
    // Server-initiated bootstrap already runs on this connection
    let discover = BootstrapRequest::new(Action::Discover, UriPath::root());
    h.client.perform_bootstrap_action(&conn, &discover).unwrap();

    h.client.schedule_bootstrap_request().unwrap();
    h.client.run_pending();
    assert!(h.coap.sent().is_empty());
    assert_eq!(h.servers.communication_errors(SSID_BOOTSTRAP).len(), 1);
    assert!(!h.client.bootstrap_scheduled());
}

#[test]
fn test_request_refused_when_offline() {
    let h = Harness::with_bootstrap_account();
    let conn = h.connect_bootstrap(Lwm2mVersion::V1_1).with_online(false);
    h.servers.set_connection(conn);
    h.client.schedule_bootstrap_request().unwrap();
    h.client.run_pending();
    assert!(h.coap.sent().is_empty());
    assert_eq!(h.servers.communication_errors(SSID_BOOTSTRAP).len(), 1);
}

#[test]
fn test_send_failure_reported() {
    let h = Harness::with_bootstrap_account();
    h.connect_bootstrap(Lwm2mVersion::V1_1);
    h.coap.fail_next(Error::NetworkOther("no route".into()));
    h.client.schedule_bootstrap_request().unwrap();
    h.client.run_pending();
    assert_eq!(
        h.servers.communication_errors(SSID_BOOTSTRAP),
        vec![Error::NetworkOther("no route".into())]
    );
    assert!(!h.client.bootstrap_scheduled());
}

#[test]
fn test_backoff_grows_between_attempts() {
    let h = Harness::with_bootstrap_account();
    h.connect_bootstrap(Lwm2mVersion::V1_1);
    h.coap.fail_next(Error::NetworkOther("no route".into()));

    h.client
        .request_bootstrap_if_appropriate(BootstrapAction::Request)
        .unwrap();
    assert_eq!(h.client.bootstrap_backoff().holdoff, Some(Duration::from_secs(10)));
    assert_eq!(h.advance(Duration::from_secs(5)), 1);
    assert!(h.coap.sent().is_empty());

    // The next attempt keeps the grown holdoff
    h.client
        .request_bootstrap_if_appropriate(BootstrapAction::Request)
        .unwrap();
    assert_eq!(h.advance(Duration::from_secs(9)), 0);
    assert_eq!(h.advance(Duration::from_secs(1)), 1);
    assert_eq!(h.coap.sent().len(), 1);
    assert_eq!(h.client.bootstrap_backoff().holdoff, Some(Duration::from_secs(20)));
}

#[test]
fn test_huge_hold_off_time_is_clamped() {
    let h = Harness::new(
        ClientConfig::default(),
        data_model(security_with_bootstrap_account(i64::MAX, 0)),
    );
    h.connect_bootstrap(Lwm2mVersion::V1_1);

    h.client
        .request_bootstrap_if_appropriate(BootstrapAction::Request)
        .unwrap();
    assert_eq!(h.client.pending_jobs(), 1);
    assert_eq!(h.advance(Duration::from_secs(60 * 60)), 0);
    assert!(h.coap.sent().is_empty());
}

#[test]
fn test_request_enables_missing_server() {
    let h = Harness::with_bootstrap_account();
    h.client
        .request_bootstrap_if_appropriate(BootstrapAction::Request)
        .unwrap();
    assert_eq!(h.servers.calls(), vec![ServerCall::EnableServer(SSID_BOOTSTRAP)]);
    assert_eq!(h.client.pending_jobs(), 0);

    h.client
        .request_bootstrap_if_appropriate(BootstrapAction::None)
        .unwrap();
    assert_eq!(h.servers.calls().len(), 1);
}

#[test]
fn test_schedule_request_without_account() {
    let h = Harness::new(ClientConfig::default(), data_model(security_object()));
    h.connect_bootstrap(Lwm2mVersion::V1_1);
    assert_eq!(h.client.schedule_bootstrap_request(), Err(Error::NotFound));
}

#[test]
fn test_regular_connection_cancels_pending_request() {
    let h = Harness::with_bootstrap_account();
    h.connect_bootstrap(Lwm2mVersion::V1_1);
    h.client
        .request_bootstrap_if_appropriate(BootstrapAction::Request)
        .unwrap();
    assert_eq!(h.client.pending_jobs(), 1);

    h.client.notify_regular_connection_available().unwrap();
    assert_eq!(h.client.pending_jobs(), 0);
    assert!(!h.client.bootstrap_backoff().is_started());
}

#[test]
fn test_regular_connection_ignored_while_request_outstanding() {
    let h = Harness::with_bootstrap_account();
    h.connect_bootstrap(Lwm2mVersion::V1_1);
    h.client.schedule_bootstrap_request().unwrap();
    h.client.run_pending();

    h.client.notify_regular_connection_available().unwrap();
    assert_eq!(h.client.bootstrap_state(), BootstrapState::RequestSent);
    assert!(h.client.bootstrap_backoff().is_started());
}
