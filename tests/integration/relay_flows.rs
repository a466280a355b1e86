//! Relay handler integration tests
//!
//! Drives `TcpRelayHandler` and `UdpRelayHandler` with in-memory virtual
//! flows and a recording dialer.
//!
//! # Test Categories
//!
//! - `tcp_*`: destination selection, half-close and interruption
//! - `udp_*`: DNS interception, forwarding, expiry and teardown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::rr::RecordType;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use flowbridge::config::{FakeDnsConfig, TcpConfig, UdpConfig};
use flowbridge::error::{DialError, FlowError};
use flowbridge::fakedns::FakeDnsEngine;
use flowbridge::proc::NoopProcessResolver;
use flowbridge::relay::{TargetAddr, TcpRelayHandler, UdpRelayHandler, VirtualUdpConn};
use flowbridge::session::{FlowKey, Network, SessionRegistry};

use super::mocks::{answer_ip, dns_query, MockDialer, MockTcpConn, MockUdpConn};

const WAIT: Duration = Duration::from_secs(5);

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn engine() -> Arc<FakeDnsEngine> {
    let config = FakeDnsConfig::new()
        .with_range("172.30.0.0".parse().unwrap(), "172.30.0.255".parse().unwrap())
        .enabled(true);
    Arc::new(FakeDnsEngine::new(&config).unwrap())
}

// ============================================================================
// TCP
// ============================================================================

mod tcp {
    use super::*;

    fn handler(dialer: Arc<MockDialer>) -> TcpRelayHandler {
        TcpRelayHandler::new(dialer).with_process_resolver(Arc::new(NoopProcessResolver))
    }

    #[tokio::test]
    async fn test_tcp_unbound_fake_ip_dials_literal() {
        let (dialer, _handles) = MockDialer::new();
        let handler = handler(Arc::clone(&dialer)).with_fake_dns(engine());

        let (conn, _app) = MockTcpConn::pair(addr("10.1.0.2:40000"), true);
        let target = addr("172.30.0.9:443");
        handler.handle(conn, target).await.unwrap();

        assert_eq!(dialer.dialed(), vec![TargetAddr::Ip(target)]);
    }

    #[tokio::test]
    async fn test_tcp_bound_fake_ip_dials_domain() {
        let (dialer, _handles) = MockDialer::new();
        let engine = engine();
        let response = engine
            .generate_fake_response(&dns_query("example.com.", RecordType::A, 1))
            .unwrap();
        let fake = answer_ip(&response);
        let handler = handler(Arc::clone(&dialer)).with_fake_dns(engine);

        let (conn, _app) = MockTcpConn::pair(addr("10.1.0.2:40001"), true);
        handler
            .handle(conn, SocketAddr::new(fake, 443))
            .await
            .unwrap();

        assert_eq!(
            dialer.dialed(),
            vec![TargetAddr::Domain("example.com".into(), 443)]
        );
    }

    #[tokio::test]
    async fn test_tcp_real_ip_passes_through() {
        let (dialer, _handles) = MockDialer::new();
        let handler = handler(Arc::clone(&dialer)).with_fake_dns(engine());

        let (conn, _app) = MockTcpConn::pair(addr("10.1.0.2:40002"), true);
        let target = addr("93.184.216.34:80");
        handler.handle(conn, target).await.unwrap();

        assert_eq!(dialer.dialed(), vec![TargetAddr::Ip(target)]);
    }

    #[tokio::test]
    async fn test_tcp_dial_failure_records_nothing() {
        let (dialer, _handles) = MockDialer::failing();
        let registry = Arc::new(SessionRegistry::default());
        let handler = handler(dialer).with_sessions(Arc::clone(&registry));

        let (conn, _app) = MockTcpConn::pair(addr("10.1.0.2:40003"), true);
        let result = handler.handle(conn, addr("1.1.1.1:443")).await;

        assert!(matches!(result, Err(DialError::ConnectionFailed { .. })));
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.completed_count(), 0);
    }

    #[tokio::test]
    async fn test_tcp_half_close_both_directions() {
        let (dialer, mut handles) = MockDialer::new();
        let registry = Arc::new(SessionRegistry::default());
        let handler = handler(dialer)
            .with_sessions(Arc::clone(&registry))
            .with_config(&TcpConfig::default());

        let local = addr("10.1.0.2:40004");
        let (conn, mut app) = MockTcpConn::pair(local, true);
        let done = handler.handle(conn, addr("1.1.1.1:443")).await.unwrap();
        let mut backend = handles.tcp_peers.recv().await.unwrap();

        assert!(registry.get_session(&FlowKey::tcp(local)).is_some());

        // The app finishes sending; the backend still answers afterwards
        app.write_all(b"request").await.unwrap();
        app.shutdown().await.unwrap();

        let mut received = Vec::new();
        timeout(WAIT, backend.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, b"request");

        backend.write_all(b"reply!").await.unwrap();
        backend.shutdown().await.unwrap();

        let mut reply = Vec::new();
        timeout(WAIT, app.read_to_end(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, b"reply!");

        timeout(WAIT, done).await.unwrap().unwrap();

        assert_eq!(registry.active_count(), 0);
        let report = registry.report();
        assert_eq!(report.completed_sessions.len(), 1);
        let snapshot = &report.completed_sessions[0];
        assert_eq!(snapshot.network, Network::Tcp);
        assert_eq!(snapshot.upload_bytes, 7);
        assert_eq!(snapshot.download_bytes, 6);
        assert!(snapshot.end_ms.is_some());
        assert!(snapshot.first_response_ms.is_some());
    }

    #[tokio::test]
    async fn test_tcp_upstream_reset_closes_both_ends() {
        let (dialer, mut handles) = MockDialer::resetting();
        let registry = Arc::new(SessionRegistry::default());
        let handler = handler(dialer).with_sessions(Arc::clone(&registry));

        let (conn, mut app) = MockTcpConn::pair(addr("10.1.0.2:40006"), true);
        let done = handler.handle(conn, addr("1.1.1.1:443")).await.unwrap();
        let mut backend = handles.tcp_peers.recv().await.unwrap();

        // The app never closes its side; the reset alone must end the flow
        let mut reply = Vec::new();
        timeout(WAIT, app.read_to_end(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert!(reply.is_empty());

        timeout(WAIT, done).await.unwrap().unwrap();

        // The uplink was interrupted and shut its writer
        let mut received = Vec::new();
        timeout(WAIT, backend.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.completed_count(), 1);
        assert!(registry.report().completed_sessions[0].end_ms.is_some());
    }

    #[tokio::test]
    async fn test_tcp_without_half_close_interrupts_flow() {
        let (dialer, mut handles) = MockDialer::new();
        let handler = handler(dialer);

        let (conn, mut app) = MockTcpConn::pair(addr("10.1.0.2:40005"), false);
        let done = handler.handle(conn, addr("1.1.1.1:443")).await.unwrap();
        let _backend = handles.tcp_peers.recv().await.unwrap();

        // The backend never closes; ending the uplink must end the flow
        app.shutdown().await.unwrap();
        timeout(WAIT, done).await.unwrap().unwrap();
    }
}

// ============================================================================
// UDP
// ============================================================================

mod udp {
    use super::*;

    fn builder(dialer: Arc<MockDialer>) -> flowbridge::relay::UdpRelayHandlerBuilder {
        UdpRelayHandler::builder(dialer).process_resolver(Arc::new(NoopProcessResolver))
    }

    fn as_dyn(conn: &Arc<MockUdpConn>) -> Arc<dyn VirtualUdpConn> {
        Arc::clone(conn) as Arc<dyn VirtualUdpConn>
    }

    #[tokio::test]
    async fn test_udp_dns_short_circuit() {
        let (dialer, mut handles) = MockDialer::new();
        let engine = engine();
        let handler = builder(dialer).fake_dns(Arc::clone(&engine)).build();

        let (conn, mut delivered) = MockUdpConn::new(addr("10.1.0.2:50000"));
        let dns = addr("10.1.0.1:53");
        handler.connect(as_dyn(&conn), dns).await.unwrap();
        let mut peer = handles.udp_peers.recv().await.unwrap();

        handler
            .receive_to(&as_dyn(&conn), &dns_query("example.com.", RecordType::A, 42), dns)
            .await
            .unwrap();

        let (answer, from) = delivered.recv().await.unwrap();
        assert_eq!(from, dns);
        let fake = answer_ip(&answer);
        assert_eq!(engine.query_domain(fake).as_deref(), Some("example.com"));

        // Answered locally; the flow is gone and nothing went upstream
        assert!(conn.is_closed());
        assert_eq!(handler.flow_count(), 0);
        assert!(peer.closed.is_cancelled());
        assert!(peer.sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_udp_dns_forwarded_without_fake_dns() {
        let (dialer, mut handles) = MockDialer::new();
        let registry = Arc::new(SessionRegistry::default());
        let handler = builder(dialer).sessions(Arc::clone(&registry)).build();

        let local = addr("10.1.0.2:50001");
        let (conn, _delivered) = MockUdpConn::new(local);
        let dns = addr("10.1.0.1:53");
        handler.connect(as_dyn(&conn), dns).await.unwrap();
        let mut peer = handles.udp_peers.recv().await.unwrap();

        let query = dns_query("example.com.", RecordType::A, 43);
        handler.receive_to(&as_dyn(&conn), &query, dns).await.unwrap();

        let (sent, to) = peer.sent.recv().await.unwrap();
        assert_eq!(sent, query);
        assert_eq!(to, TargetAddr::Ip(dns));
        assert!(!conn.is_closed());

        let session = registry.get_session(&FlowKey::udp(local)).unwrap();
        assert_eq!(session.extra(), "dns:example.com");
        assert_eq!(session.upload_bytes(), query.len() as u64);
    }

    #[tokio::test]
    async fn test_udp_non_query_to_port_53_is_forwarded() {
        let (dialer, mut handles) = MockDialer::new();
        let handler = builder(dialer).fake_dns(engine()).build();

        let (conn, _delivered) = MockUdpConn::new(addr("10.1.0.2:50002"));
        let dns = addr("10.1.0.1:53");
        handler.connect(as_dyn(&conn), dns).await.unwrap();
        let mut peer = handles.udp_peers.recv().await.unwrap();

        handler
            .receive_to(&as_dyn(&conn), b"not dns at all", dns)
            .await
            .unwrap();
        let (sent, _) = peer.sent.recv().await.unwrap();
        assert_eq!(sent, b"not dns at all");
        assert_eq!(handler.flow_count(), 1);
    }

    #[tokio::test]
    async fn test_udp_fake_destination_dialed_by_domain() {
        let (dialer, mut handles) = MockDialer::new();
        let engine = engine();
        let fake = answer_ip(
            &engine
                .generate_fake_response(&dns_query("quic.example.", RecordType::A, 1))
                .unwrap(),
        );
        let handler = builder(dialer).fake_dns(engine).build();

        let (conn, _delivered) = MockUdpConn::new(addr("10.1.0.2:50003"));
        let target = SocketAddr::new(fake, 443);
        handler.connect(as_dyn(&conn), target).await.unwrap();
        let mut peer = handles.udp_peers.recv().await.unwrap();

        handler.receive_to(&as_dyn(&conn), b"hello", target).await.unwrap();
        let (_, to) = peer.sent.recv().await.unwrap();
        assert_eq!(to, TargetAddr::Domain("quic.example".into(), 443));
    }

    #[tokio::test]
    async fn test_udp_replies_attributed_to_target() {
        let (dialer, mut handles) = MockDialer::new();
        let registry = Arc::new(SessionRegistry::default());
        let handler = builder(dialer).sessions(Arc::clone(&registry)).build();

        let local = addr("10.1.0.2:50004");
        let (conn, mut delivered) = MockUdpConn::new(local);
        let target = addr("8.8.8.8:443");
        handler.connect(as_dyn(&conn), target).await.unwrap();
        let peer = handles.udp_peers.recv().await.unwrap();

        // The upstream reports some other source; the app must see the target
        peer.inject
            .send((b"pong".to_vec(), addr("203.0.113.7:9999")))
            .unwrap();
        let (data, from) = timeout(WAIT, delivered.recv()).await.unwrap().unwrap();
        assert_eq!(data, b"pong");
        assert_eq!(from, target);

        let session = registry.get_session(&FlowKey::udp(local)).unwrap();
        assert_eq!(session.download_bytes(), 4);
    }

    #[tokio::test]
    async fn test_udp_idle_flow_expires() {
        let (dialer, mut handles) = MockDialer::new();
        let registry = Arc::new(SessionRegistry::default());
        let handler = builder(dialer)
            .sessions(Arc::clone(&registry))
            .timeout(Duration::from_millis(100))
            .build();

        let (conn, _delivered) = MockUdpConn::new(addr("10.1.0.2:50005"));
        handler
            .connect(as_dyn(&conn), addr("8.8.8.8:443"))
            .await
            .unwrap();
        let peer = handles.udp_peers.recv().await.unwrap();
        assert_eq!(handler.flow_count(), 1);

        timeout(WAIT, peer.closed.cancelled()).await.unwrap();
        // Teardown finishes right after the upstream is closed
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(handler.flow_count(), 0);
        assert!(conn.is_closed());
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.completed_count(), 1);
    }

    #[tokio::test]
    async fn test_udp_replies_keep_flow_alive() {
        let (dialer, mut handles) = MockDialer::new();
        let handler = builder(dialer)
            .timeout(Duration::from_millis(300))
            .build();

        let (conn, mut delivered) = MockUdpConn::new(addr("10.1.0.2:50009"));
        let target = addr("8.8.8.8:443");
        handler.connect(as_dyn(&conn), target).await.unwrap();
        let peer = handles.udp_peers.recv().await.unwrap();

        // Downlink traffic alone, well past the idle window
        for _ in 0..8 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            peer.inject.send((b"tick".to_vec(), target)).unwrap();
            timeout(WAIT, delivered.recv()).await.unwrap().unwrap();
        }
        assert_eq!(handler.flow_count(), 1);
        assert!(!peer.closed.is_cancelled());

        timeout(WAIT, peer.closed.cancelled()).await.unwrap();
    }

    #[tokio::test]
    async fn test_udp_dns_flow_uses_short_window() {
        let (dialer, mut handles) = MockDialer::new();
        let config = UdpConfig {
            timeout_secs: 600,
            dns_timeout_secs: 1,
        };
        let handler = builder(dialer).config(&config).build();

        let (conn, _delivered) = MockUdpConn::new(addr("10.1.0.2:50008"));
        let dns = addr("10.1.0.1:53");
        handler.connect(as_dyn(&conn), dns).await.unwrap();
        let mut peer = handles.udp_peers.recv().await.unwrap();

        handler
            .receive_to(&as_dyn(&conn), &dns_query("example.org.", RecordType::AAAA, 9), dns)
            .await
            .unwrap();
        let _ = peer.sent.recv().await.unwrap();

        // Far shorter than the ten minute baseline
        timeout(WAIT, peer.closed.cancelled()).await.unwrap();
    }

    #[tokio::test]
    async fn test_udp_unknown_flow_is_not_found() {
        let (dialer, _handles) = MockDialer::new();
        let handler = builder(dialer).build();

        let (conn, _delivered) = MockUdpConn::new(addr("10.1.0.2:50006"));
        let result = handler
            .receive_to(&as_dyn(&conn), b"orphan", addr("8.8.8.8:443"))
            .await;

        assert!(matches!(result, Err(FlowError::NotFound { .. })));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_udp_dial_failure_creates_no_flow() {
        let (dialer, _handles) = MockDialer::failing();
        let registry = Arc::new(SessionRegistry::default());
        let handler = builder(dialer).sessions(Arc::clone(&registry)).build();

        let (conn, _delivered) = MockUdpConn::new(addr("10.1.0.2:50007"));
        let result = handler.connect(as_dyn(&conn), addr("8.8.8.8:443")).await;

        assert!(matches!(result, Err(FlowError::Dial(_))));
        assert_eq!(handler.flow_count(), 0);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_udp_close_retires_session_once() {
        let (dialer, mut handles) = MockDialer::new();
        let registry = Arc::new(SessionRegistry::new(2));
        let handler = builder(dialer).sessions(Arc::clone(&registry)).build();

        let mut conns = Vec::new();
        let mut peers = Vec::new();
        for port in 50010..50013 {
            let (conn, _delivered) = MockUdpConn::new(SocketAddr::from(([10, 1, 0, 2], port)));
            handler
                .connect(as_dyn(&conn), addr("8.8.8.8:443"))
                .await
                .unwrap();
            peers.push(handles.udp_peers.recv().await.unwrap());
            conns.push(conn);
        }
        assert_eq!(registry.active_count(), 3);

        for conn in &conns {
            handler.close(conn.as_ref());
            handler.close_nolog(conn.as_ref());
        }

        assert_eq!(handler.flow_count(), 0);
        assert_eq!(registry.active_count(), 0);
        // Bounded history keeps only the newest
        assert_eq!(registry.completed_count(), 2);
    }
}
