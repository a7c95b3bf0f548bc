//! Session lifecycle driven against the simulated stack

mod common;

use std::net::SocketAddr;

use common::{addr, Recorder, SimStack, TlsOutcome};
use embassy_time::Duration;
use sysnet_core::{
    ConfigParam, Control, Error, Event, Handle, IpProtocol, NetService, ServiceConfig,
    SessionConfig, SessionStatus,
};
use sysnet_hal::{DnsError, QueryStatus, SocketError, SocketFlags, SocketInfo};

type Service<'a> = NetService<'a, SimStack>;

fn status(service: &Service<'_>, handle: Handle) -> SessionStatus {
    service.status(handle).unwrap()
}

fn client(host: &str, port: u16) -> SessionConfig {
    SessionConfig::client(IpProtocol::Tcp, host, port).unwrap()
}

/// Open a plain client to 10.0.0.5:1883 and drive it to `Connected`
fn connected_client<'a>(
    service: &Service<'a>,
    recorder: &'a Recorder,
    config: &SessionConfig,
) -> Handle {
    let handle = service.open(Some(config), Some(recorder)).unwrap();
    service.task(handle);
    let socket = service.stack().last_socket();
    service.stack().connect(socket, None);
    service.task(handle);
    assert_eq!(status(service, handle), SessionStatus::Connected);
    handle
}

#[test]
fn test_literal_client_skips_dns() {
    let recorder = Recorder::default();
    let service = Service::new(SimStack::new());
    let config = client("10.0.0.5", 1883);

    let handle = service.open(Some(&config), Some(&recorder)).unwrap();
    assert_eq!(status(&service, handle), SessionStatus::DnsResolved);
    assert!(service.stack().sim().started_queries.is_empty());

    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::ClientConnecting);
    let socket = service.stack().last_socket();
    let request = service.stack().with_socket(socket, |s| s.request);
    assert_eq!(request.remote, Some(addr("10.0.0.5")));
    assert_eq!(request.port, 1883);
    assert_eq!(
        request.flags,
        SocketFlags::CLIENT | SocketFlags::STREAM | SocketFlags::UNENCRYPTED
    );

    // still connecting
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::ClientConnecting);
    assert_eq!(recorder.count(), 0);

    service.stack().connect(socket, None);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::Connected);
    assert_eq!(
        recorder.events(),
        vec![Event::Connected(Some(SocketInfo {
            local_port: 49152,
            remote: Some(SocketAddr::new(addr("10.0.0.5"), 1883)),
            interface: 0,
        }))]
    );

    // nothing more to report while idle
    service.task(handle);
    assert_eq!(recorder.count(), 1);
}

#[test]
fn test_udp_server_waits_for_peer() {
    let recorder = Recorder::default();
    let service = Service::new(SimStack::new());
    let config = SessionConfig::server(IpProtocol::Udp, 5000);

    let handle = service.open(Some(&config), Some(&recorder)).unwrap();
    assert_eq!(
        status(&service, handle),
        SessionStatus::ServerAwaitingConnection
    );
    let socket = service.stack().last_socket();
    let request = service.stack().with_socket(socket, |s| s.request);
    assert_eq!(request.remote, None);
    assert_eq!(request.port, 5000);
    assert_eq!(
        request.flags,
        SocketFlags::SERVER | SocketFlags::DATAGRAM | SocketFlags::UNENCRYPTED
    );

    for _ in 0..3 {
        service.task(handle);
    }
    assert_eq!(
        status(&service, handle),
        SessionStatus::ServerAwaitingConnection
    );
    assert_eq!(recorder.count(), 0);

    let peer: SocketAddr = "192.168.1.20:40000".parse().unwrap();
    service.stack().connect(socket, Some(peer));
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::Connected);
    assert_eq!(
        recorder.events(),
        vec![Event::Connected(Some(SocketInfo {
            local_port: 5000,
            remote: Some(peer),
            interface: 0,
        }))]
    );
}

#[test]
fn test_tls_timeout_without_reconnect() {
    let recorder = Recorder::default();
    let stack = SimStack::new();
    stack.sync_time();
    stack.sim().tls_outcome = TlsOutcome::Hang;
    let service = Service::new(stack);
    let config = client("10.0.0.5", 8883)
        .with_tls(true)
        .with_auto_reconnect(false);

    let handle = service.open(Some(&config), Some(&recorder)).unwrap();
    service.task(handle);
    let socket = service.stack().last_socket();
    service.stack().connect(socket, None);

    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::WaitForTimeSync);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::TlsNegotiating);

    service.stack().advance(Duration::from_secs(5));
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::TlsNegotiating);

    service.stack().advance(Duration::from_secs(6));
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::TlsNegotiationFailed);
    assert_eq!(recorder.count(), 0);

    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::Disconnected);
    assert_eq!(recorder.events(), vec![Event::TlsNegotiationFailed]);
    assert!(!service.stack().is_open(socket));

    for _ in 0..5 {
        service.task(handle);
    }
    assert_eq!(status(&service, handle), SessionStatus::Disconnected);
    assert_eq!(recorder.count(), 1);
}

#[test]
fn test_tls_waits_for_time_sync() {
    let recorder = Recorder::default();
    let service = Service::new(SimStack::new());
    let config = client("10.0.0.5", 8883).with_tls(true);

    let handle = service.open(Some(&config), Some(&recorder)).unwrap();
    service.task(handle);
    let socket = service.stack().last_socket();
    service.stack().connect(socket, None);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::WaitForTimeSync);

    // the handshake timer does not run while waiting for the clock
    service.stack().advance(Duration::from_secs(60));
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::WaitForTimeSync);

    service.stack().sync_time();
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::TlsNegotiating);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::Connected);
    assert_eq!(recorder.events().len(), 1);
    assert_eq!(recorder.events()[0].code(), 0);
}

#[test]
fn test_tls_rejected_handshake() {
    let recorder = Recorder::default();
    let stack = SimStack::new();
    stack.sync_time();
    stack.sim().tls_outcome = TlsOutcome::Reject;
    let service = Service::new(stack);
    let config = client("10.0.0.5", 8883)
        .with_tls(true)
        .with_auto_reconnect(false);

    let handle = service.open(Some(&config), Some(&recorder)).unwrap();
    service.task(handle);
    service.stack().connect(service.stack().last_socket(), None);
    service.task(handle);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::TlsNegotiating);

    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::TlsNegotiationFailed);
    service.task(handle);
    assert_eq!(recorder.events(), vec![Event::TlsNegotiationFailed]);
}

#[test]
fn test_tls_start_failure() {
    let recorder = Recorder::default();
    let stack = SimStack::new();
    stack.sync_time();
    stack.sim().encryption_error = Some(SocketError::Encryption);
    let service = Service::new(stack);
    let config = client("10.0.0.5", 8883)
        .with_tls(true)
        .with_auto_reconnect(false);

    let handle = service.open(Some(&config), Some(&recorder)).unwrap();
    service.task(handle);
    service.stack().connect(service.stack().last_socket(), None);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::WaitForTimeSync);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::TlsNegotiationFailed);
    service.task(handle);
    assert_eq!(recorder.events(), vec![Event::TlsNegotiationFailed]);
}

#[test]
fn test_lost_secure_channel() {
    let recorder = Recorder::default();
    let stack = SimStack::new();
    stack.sync_time();
    let service = Service::new(stack);
    let config = client("10.0.0.5", 8883)
        .with_tls(true)
        .with_auto_reconnect(false);

    let handle = service.open(Some(&config), Some(&recorder)).unwrap();
    service.task(handle);
    let socket = service.stack().last_socket();
    service.stack().connect(socket, None);
    for _ in 0..3 {
        service.task(handle);
    }
    assert_eq!(status(&service, handle), SessionStatus::Connected);

    service.stack().with_socket(socket, |s| s.secure = false);
    service.stack().push_rx(socket, b"data");
    service.task(handle);
    // checked before pending data
    assert_eq!(status(&service, handle), SessionStatus::TlsNegotiationFailed);
    service.task(handle);
    assert_eq!(
        recorder.events().last(),
        Some(&Event::TlsNegotiationFailed)
    );
}

#[test]
fn test_link_drop_reconnects() {
    let recorder = Recorder::default();
    let service = Service::new(SimStack::new());
    let config = client("broker.local", 1883);

    let handle = service.open(Some(&config), Some(&recorder)).unwrap();
    assert_eq!(status(&service, handle), SessionStatus::ResolvingDns);
    assert_eq!(service.stack().sim().started_queries, vec!["broker.local"]);

    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::ResolvingDns);

    service
        .stack()
        .answer("broker.local", QueryStatus::Resolved(addr("10.1.1.1")));
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::DnsResolved);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::ClientConnecting);
    let socket = service.stack().last_socket();
    assert_eq!(
        service.stack().with_socket(socket, |s| s.request.remote),
        Some(addr("10.1.1.1"))
    );
    service.stack().connect(socket, None);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::Connected);

    service.stack().set_link(false);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::LowerLayerDown);
    assert!(!service.stack().is_open(socket));

    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::LowerLayerDown);

    service.stack().set_link(true);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::ResolvingDns);
    assert_eq!(service.stack().sim().started_queries.len(), 2);
    service.task(handle);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::ClientConnecting);
    service.stack().connect(service.stack().last_socket(), None);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::Connected);

    let codes: Vec<u8> = recorder.events().iter().map(Event::code).collect();
    assert_eq!(codes, vec![0, 1, 0]);
}

#[test]
fn test_peer_reset_reuses_cached_address() {
    let recorder = Recorder::default();
    let stack = SimStack::new();
    stack.answer("broker.local", QueryStatus::Resolved(addr("10.1.1.1")));
    let service = Service::new(stack);
    let config = client("broker.local", 1883);

    let handle = service.open(Some(&config), Some(&recorder)).unwrap();
    service.task(handle);
    service.task(handle);
    let socket = service.stack().last_socket();
    service.stack().connect(socket, None);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::Connected);

    service.stack().reset(socket);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::LowerLayerDown);
    assert_eq!(recorder.events().last(), Some(&Event::Disconnected));

    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::DnsResolved);
    assert_eq!(service.stack().sim().started_queries.len(), 1);
}

#[test]
fn test_cached_address_expires() {
    let recorder = Recorder::default();
    let stack = SimStack::new();
    stack.answer("broker.local", QueryStatus::Resolved(addr("10.1.1.1")));
    let service: Service<'_> = NetService::with_config(
        stack,
        ServiceConfig {
            dns_cache_lifetime: Duration::from_secs(60),
            ..ServiceConfig::default()
        },
    );
    let config = client("broker.local", 1883);

    let handle = service.open(Some(&config), Some(&recorder)).unwrap();
    service.task(handle);
    service.task(handle);
    let socket = service.stack().last_socket();
    service.stack().connect(socket, None);
    service.task(handle);

    service.stack().advance(Duration::from_secs(120));
    service.stack().reset(socket);
    service.task(handle);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::ResolvingDns);
    assert_eq!(service.stack().sim().started_queries.len(), 2);
}

#[test]
fn test_pool_exhaustion_and_reuse() {
    let service: NetService<'_, SimStack, 1> = NetService::new(SimStack::new());
    assert_eq!(service.capacity(), 1);

    let first = service.open(None, None).unwrap();
    assert_eq!(service.open(None, None), Err(Error::Exhausted));

    service.task(first);
    let socket = service.stack().last_socket();
    service.close(first).unwrap();
    assert!(!service.stack().is_open(socket));
    assert_eq!(service.sessions_in_use(), 0);

    let second = service.open(None, None).unwrap();
    assert_eq!(second.index(), first.index());
    assert_eq!(service.status(first), Err(Error::InvalidHandle));
    assert_eq!(service.close(first), Err(Error::InvalidHandle));
    assert_eq!(service.send_msg(first, b"x"), Err(Error::InvalidHandle));
    assert!(service.status(second).is_ok());
}

#[test]
fn test_default_capacity() {
    let service = Service::new(SimStack::new());
    let a = service.open(None, None).unwrap();
    let b = service.open(None, None).unwrap();
    assert_eq!(service.open(None, None), Err(Error::Exhausted));
    assert_eq!(service.sessions().as_slice(), &[a, b]);
}

#[test]
fn test_default_config_when_none_given() {
    let service = Service::new(SimStack::new());
    let handle = service.open(None, None).unwrap();
    let info = service.info(handle).unwrap();
    assert_eq!(info.host_name.as_str(), "192.168.1.1");
    assert_eq!(info.ip_protocol, IpProtocol::Tcp);
    assert!(info.auto_reconnect);
    assert_eq!(info.status, SessionStatus::DnsResolved);
}

#[test]
fn test_io_requires_connection() {
    let recorder = Recorder::default();
    let service = Service::new(SimStack::new());
    let handle = service
        .open(Some(&client("10.0.0.5", 1883)), Some(&recorder))
        .unwrap();
    let mut buf = [0u8; 8];

    assert_eq!(service.send_msg(handle, b"ping"), Err(Error::ServiceDown));
    assert_eq!(service.recv_msg(handle, &mut buf), Err(Error::ServiceDown));
    assert_eq!(service.stack().sockets_opened(), 0);

    service.task(handle);
    let socket = service.stack().last_socket();
    assert_eq!(service.send_msg(handle, b"ping"), Err(Error::ServiceDown));
    assert!(service.stack().tx(socket).is_empty());
}

#[test]
fn test_send_and_receive() {
    let recorder = Recorder::default();
    let service = Service::new(SimStack::new());
    let handle = connected_client(&service, &recorder, &client("10.0.0.5", 1883));
    let socket = service.stack().last_socket();

    assert_eq!(service.send_msg(handle, b"ping"), Ok(4));
    assert_eq!(service.stack().tx(socket), b"ping");
    assert_eq!(service.send_msg(handle, b""), Ok(0));

    let mut buf = [0u8; 2];
    assert_eq!(service.recv_msg(handle, &mut buf), Err(Error::ReceiveNotReady));

    service.stack().push_rx(socket, b"pong");
    service.task(handle);
    assert_eq!(
        recorder.events().last(),
        Some(&Event::ReceivedData { available: 4 })
    );
    assert_eq!(service.recv_msg(handle, &mut buf), Ok(2));
    assert_eq!(&buf, b"po");
    assert_eq!(service.recv_msg(handle, &mut buf), Ok(2));
    assert_eq!(&buf, b"ng");
    assert_eq!(service.recv_msg(handle, &mut buf), Err(Error::ReceiveNotReady));

    service.stack().with_socket(socket, |s| s.tx_space = 2);
    assert_eq!(
        service.send_msg(handle, b"long"),
        Err(Error::TransmitNotReady)
    );
}

#[test]
fn test_io_fails_when_link_drops() {
    let recorder = Recorder::default();
    let service = Service::new(SimStack::new());
    let handle = connected_client(&service, &recorder, &client("10.0.0.5", 1883));

    service.stack().set_link(false);
    assert_eq!(service.send_msg(handle, b"ping"), Err(Error::ServiceDown));
}

#[test]
fn test_dns_failure_without_reconnect() {
    let recorder = Recorder::default();
    let stack = SimStack::new();
    stack.answer(
        "nowhere.invalid",
        QueryStatus::Failed(DnsError::NoRecord),
    );
    let service = Service::new(stack);
    let config = client("nowhere.invalid", 1883).with_auto_reconnect(false);

    let handle = service.open(Some(&config), Some(&recorder)).unwrap();
    assert_eq!(status(&service, handle), SessionStatus::ResolvingDns);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::DnsResolveFailed);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::Disconnected);
    assert_eq!(recorder.events(), vec![Event::DnsResolveFailed]);

    for _ in 0..5 {
        service.task(handle);
    }
    assert_eq!(status(&service, handle), SessionStatus::Disconnected);
    assert_eq!(recorder.count(), 1);

    service
        .ctrl_msg(handle, Control::Reconnect(None))
        .unwrap();
    assert_eq!(status(&service, handle), SessionStatus::LowerLayerDown);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::ResolvingDns);
    assert_eq!(service.stack().sim().started_queries.len(), 2);
}

#[test]
fn test_dns_server_timeout() {
    let stack = SimStack::new();
    stack.answer("slow.example", QueryStatus::ServerTimeout);
    let service = Service::new(stack);

    // with reconnect the query restarts
    let retrying = service
        .open(Some(&client("slow.example", 80)), None)
        .unwrap();
    service.task(retrying);
    assert_eq!(status(&service, retrying), SessionStatus::ResolvingDns);
    assert_eq!(service.stack().sim().started_queries.len(), 2);

    let giving_up = service
        .open(
            Some(&client("slow.example", 80).with_auto_reconnect(false)),
            None,
        )
        .unwrap();
    service.task(giving_up);
    assert_eq!(status(&service, giving_up), SessionStatus::DnsResolveFailed);
}

#[test]
fn test_dns_start_failure() {
    let stack = SimStack::new();
    stack.sim().dns_start_error = Some(DnsError::Busy);
    let service = Service::new(stack);

    let retrying = service.open(Some(&client("a.example", 80)), None).unwrap();
    assert_eq!(status(&service, retrying), SessionStatus::LowerLayerDown);

    let giving_up = service
        .open(
            Some(&client("a.example", 80).with_auto_reconnect(false)),
            None,
        )
        .unwrap();
    assert_eq!(status(&service, giving_up), SessionStatus::DnsResolveFailed);

    service.stack().sim().dns_start_error = None;
    service.task(retrying);
    assert_eq!(status(&service, retrying), SessionStatus::ResolvingDns);
}

#[test]
fn test_socket_open_failure_with_reconnect() {
    let recorder = Recorder::default();
    let stack = SimStack::new();
    stack.sim().open_error = Some(SocketError::NoSocket);
    let service = Service::new(stack);

    let handle = service
        .open(Some(&client("10.0.0.5", 1883)), Some(&recorder))
        .unwrap();
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::SockOpenFailed);
    service.task(handle);
    assert_eq!(recorder.events(), vec![Event::SocketOpenFailed]);
    assert_eq!(status(&service, handle), SessionStatus::LowerLayerDown);

    service.stack().sim().open_error = None;
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::DnsResolved);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::ClientConnecting);
}

#[test]
fn test_connection_refused() {
    let recorder = Recorder::default();
    let service = Service::new(SimStack::new());
    let config = client("10.0.0.5", 1883).with_auto_reconnect(false);

    let handle = service.open(Some(&config), Some(&recorder)).unwrap();
    service.task(handle);
    let socket = service.stack().last_socket();
    service.stack().reset(socket);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::SockOpenFailed);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::Disconnected);
    assert_eq!(recorder.events(), vec![Event::SocketOpenFailed]);
}

#[test]
fn test_server_listens_again_after_peer_leaves() {
    let recorder = Recorder::default();
    let service = Service::new(SimStack::new());
    let config = SessionConfig::server(IpProtocol::Tcp, 8080);

    let handle = service.open(Some(&config), Some(&recorder)).unwrap();
    let socket = service.stack().last_socket();
    service.stack().connect(socket, None);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::Connected);

    service.stack().reset(socket);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::LowerLayerDown);
    service.task(handle);
    assert_eq!(
        status(&service, handle),
        SessionStatus::ServerAwaitingConnection
    );
    assert_eq!(service.stack().sockets_opened(), 2);
}

#[test]
fn test_open_while_link_down() {
    let stack = SimStack::new();
    stack.set_link(false);
    let service = Service::new(stack);

    let handle = service.open(Some(&client("10.0.0.5", 1883)), None).unwrap();
    assert_eq!(status(&service, handle), SessionStatus::LowerLayerDown);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::LowerLayerDown);

    service.stack().set_link(true);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::DnsResolved);
}

#[test]
fn test_peer_fin_drains_data() {
    let recorder = Recorder::default();
    let service = Service::new(SimStack::new());
    let config = client("10.0.0.5", 1883).with_auto_reconnect(false);
    let handle = connected_client(&service, &recorder, &config);
    let socket = service.stack().last_socket();

    service.stack().push_rx(socket, b"bye");
    service.stack().peer_close(socket);
    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::PeerSentFin);

    service.task(handle);
    assert_eq!(
        recorder.events().last(),
        Some(&Event::ReceivedData { available: 3 })
    );
    let mut buf = [0u8; 8];
    assert_eq!(service.recv_msg(handle, &mut buf), Ok(3));
    assert_eq!(&buf[..3], b"bye");

    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::Disconnected);
    assert_eq!(recorder.events().last(), Some(&Event::Disconnected));
    assert!(!service.stack().is_open(socket));
}

#[test]
fn test_disconnect_is_idempotent() {
    let recorder = Recorder::default();
    let service = Service::new(SimStack::new());
    let config = client("10.0.0.5", 1883).with_auto_reconnect(false);
    let handle = connected_client(&service, &recorder, &config);
    let socket = service.stack().last_socket();

    service.ctrl_msg(handle, Control::Disconnect).unwrap();
    assert_eq!(status(&service, handle), SessionStatus::Disconnected);
    assert!(!service.stack().is_open(socket));
    assert_eq!(recorder.count(), 2);

    service.ctrl_msg(handle, Control::Disconnect).unwrap();
    assert_eq!(recorder.count(), 2);
}

#[test]
fn test_disconnect_with_reconnect_rearms() {
    let recorder = Recorder::default();
    let service = Service::new(SimStack::new());
    let handle = connected_client(&service, &recorder, &client("10.0.0.5", 1883));

    service.ctrl_msg(handle, Control::Disconnect).unwrap();
    assert_eq!(recorder.events().last(), Some(&Event::Disconnected));
    assert_eq!(status(&service, handle), SessionStatus::LowerLayerDown);
}

#[test]
fn test_reconnect_with_new_config() {
    let recorder = Recorder::default();
    let service = Service::new(SimStack::new());
    let handle = connected_client(&service, &recorder, &client("10.0.0.5", 1883));
    let socket = service.stack().last_socket();

    let next = client("broker.local", 8883);
    service
        .ctrl_msg(handle, Control::Reconnect(Some(&next)))
        .unwrap();
    assert_eq!(status(&service, handle), SessionStatus::LowerLayerDown);
    assert!(!service.stack().is_open(socket));
    // no event for an application-requested reconnect
    assert_eq!(recorder.count(), 1);

    service.task(handle);
    assert_eq!(status(&service, handle), SessionStatus::ResolvingDns);
    assert_eq!(service.stack().sim().started_queries, vec!["broker.local"]);

    let info = service.info(handle).unwrap();
    assert_eq!(info.host_name.as_str(), "broker.local");
    assert_eq!(info.port, 8883);
    assert_eq!(info.socket, None);
}

#[test]
fn test_set_auto_reconnect() {
    let recorder = Recorder::default();
    let service = Service::new(SimStack::new());
    let handle = connected_client(&service, &recorder, &client("10.0.0.5", 1883));

    service
        .set_config_param(handle, ConfigParam::AutoReconnect(false))
        .unwrap();
    assert!(!service.info(handle).unwrap().auto_reconnect);

    service.stack().reset(service.stack().last_socket());
    service.task(handle);
    for _ in 0..3 {
        service.task(handle);
    }
    assert_eq!(status(&service, handle), SessionStatus::Disconnected);
    assert_eq!(recorder.events().last(), Some(&Event::Disconnected));
}

#[test]
fn test_info_reports_endpoints() {
    let recorder = Recorder::default();
    let service = Service::new(SimStack::new());
    let handle = connected_client(&service, &recorder, &client("10.0.0.5", 1883));

    let info = service.info(handle).unwrap();
    assert_eq!(info.status, SessionStatus::Connected);
    let socket = info.socket.unwrap();
    assert_eq!(
        socket.remote,
        Some(SocketAddr::new(addr("10.0.0.5"), 1883))
    );
    assert_eq!(socket.local_port, 49152);
}

#[test]
fn test_socket_open_only_in_socket_states() {
    let recorder = Recorder::default();
    let stack = SimStack::new();
    stack.sync_time();
    stack.sim().tls_outcome = TlsOutcome::Hang;
    let service = Service::new(stack);
    let config = client("10.0.0.5", 8883).with_tls(true);
    let handle = service.open(Some(&config), Some(&recorder)).unwrap();

    let check = |service: &Service<'_>| {
        let status = status(service, handle);
        let open = service.stack().sockets_opened() > 0
            && service.stack().is_open(service.stack().last_socket());
        let may_hold = status.holds_socket() || status == SessionStatus::TlsNegotiationFailed;
        assert!(may_hold || !open, "socket still open in {status:?}");
    };

    check(&service);
    service.task(handle);
    check(&service);
    service.stack().connect(service.stack().last_socket(), None);
    for _ in 0..3 {
        service.task(handle);
        check(&service);
    }
    service.stack().advance(Duration::from_secs(11));
    for _ in 0..6 {
        service.task(handle);
        check(&service);
    }
    assert!(recorder.events().contains(&Event::TlsNegotiationFailed));
    assert!(service.stack().sockets_opened() >= 2);
}
