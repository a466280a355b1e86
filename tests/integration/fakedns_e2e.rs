//! End-to-end Fake-DNS tests
//!
//! Resolution through the relays, ring recycling seen from the dial side,
//! persistence across engine restarts, and the standalone UDP responder.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::RecordType;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use flowbridge::config::FakeDnsConfig;
use flowbridge::fakedns::{FakeDnsEngine, FakeDnsUdpServer, CACHE_FILE_NAME, FAKE_RESPONSE_TTL};
use flowbridge::proc::NoopProcessResolver;
use flowbridge::relay::{TargetAddr, TcpRelayHandler, UdpRelayHandler, VirtualUdpConn};

use super::mocks::{answer_ip, dns_query, MockDialer, MockTcpConn, MockUdpConn};

const WAIT: Duration = Duration::from_secs(5);

fn small_pool() -> FakeDnsConfig {
    FakeDnsConfig::new()
        .with_range(Ipv4Addr::new(172, 30, 0, 0), Ipv4Addr::new(172, 30, 0, 2))
        .enabled(true)
}

/// Resolve `domain` the way an app would: a fresh UDP flow to port 53
async fn resolve_via_relay(handler: &UdpRelayHandler, port: u16, domain: &str) -> IpAddr {
    let (conn, mut delivered) = MockUdpConn::new(SocketAddr::from(([10, 1, 0, 2], port)));
    let conn: Arc<dyn VirtualUdpConn> = conn;
    let dns = SocketAddr::from(([10, 1, 0, 1], 53));
    handler.connect(Arc::clone(&conn), dns).await.unwrap();
    handler
        .receive_to(&conn, &dns_query(domain, RecordType::A, port), dns)
        .await
        .unwrap();
    let (answer, _) = timeout(WAIT, delivered.recv()).await.unwrap().unwrap();
    answer_ip(&answer)
}

#[tokio::test]
async fn test_ring_recycling_seen_by_relays() {
    let engine = Arc::new(FakeDnsEngine::new(&small_pool()).unwrap());
    let (dialer, _handles) = MockDialer::new();
    let udp = UdpRelayHandler::builder(Arc::clone(&dialer) as _)
        .fake_dns(Arc::clone(&engine))
        .process_resolver(Arc::new(NoopProcessResolver))
        .build();
    let tcp = TcpRelayHandler::new(Arc::clone(&dialer) as _)
        .with_fake_dns(Arc::clone(&engine))
        .with_process_resolver(Arc::new(NoopProcessResolver));

    let a = resolve_via_relay(&udp, 51000, "a.com.").await;
    let b = resolve_via_relay(&udp, 51001, "b.com.").await;
    let c = resolve_via_relay(&udp, 51002, "c.com.").await;
    let d = resolve_via_relay(&udp, 51003, "d.com.").await;

    assert_eq!(a, IpAddr::V4(Ipv4Addr::new(172, 30, 0, 0)));
    assert_eq!(b, IpAddr::V4(Ipv4Addr::new(172, 30, 0, 1)));
    assert_eq!(c, IpAddr::V4(Ipv4Addr::new(172, 30, 0, 2)));
    // Fourth allocation wraps onto the first slot
    assert_eq!(d, a);
    assert_eq!(udp.flow_count(), 0);

    // A connection to the recycled address now reaches d.com
    let (conn, _app) = MockTcpConn::pair(SocketAddr::from(([10, 1, 0, 2], 41000)), true);
    tcp.handle(conn, SocketAddr::new(a, 443)).await.unwrap();
    let (conn, _app2) = MockTcpConn::pair(SocketAddr::from(([10, 1, 0, 2], 41001)), true);
    tcp.handle(conn, SocketAddr::new(b, 443)).await.unwrap();

    assert_eq!(
        dialer.dialed(),
        vec![
            TargetAddr::Domain("d.com".into(), 443),
            TargetAddr::Domain("b.com".into(), 443),
        ]
    );
}

#[test]
fn test_persistence_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_pool().with_cache_dir(dir.path());

    let first = FakeDnsEngine::new(&config).unwrap();
    first.start().unwrap();
    let a = answer_ip(
        &first
            .generate_fake_response(&dns_query("a.com.", RecordType::A, 1))
            .unwrap(),
    );
    let b = answer_ip(
        &first
            .generate_fake_response(&dns_query("b.com.", RecordType::AAAA, 2))
            .unwrap(),
    );
    first.stop().unwrap();
    assert!(dir.path().join(CACHE_FILE_NAME).exists());

    let second = FakeDnsEngine::new(&config).unwrap();
    second.start().unwrap();
    assert_eq!(second.bound(), 2);
    assert_eq!(second.query_domain(a).as_deref(), Some("a.com"));
    assert_eq!(second.query_domain(b).as_deref(), Some("b.com"));

    // Allocation resumes at the restored cursor
    let c = answer_ip(
        &second
            .generate_fake_response(&dns_query("c.com.", RecordType::A, 3))
            .unwrap(),
    );
    assert_eq!(c, IpAddr::V4(Ipv4Addr::new(172, 30, 0, 2)));
}

#[test]
fn test_corrupt_cache_leaves_engine_usable() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(CACHE_FILE_NAME), "not-a-number\n").unwrap();
    let engine = FakeDnsEngine::new(&small_pool().with_cache_dir(dir.path())).unwrap();

    assert!(engine.start().is_err());
    assert_eq!(engine.bound(), 0);
    assert!(engine
        .generate_fake_response(&dns_query("a.com.", RecordType::A, 1))
        .is_ok());
}

#[tokio::test]
async fn test_udp_responder_answers_and_refuses() {
    let engine = Arc::new(FakeDnsEngine::new(&small_pool()).unwrap());
    let server = FakeDnsUdpServer::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&engine))
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();
    let task = tokio::spawn(server.run());

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut buf = [0u8; 512];

    client
        .send_to(&dns_query("example.com.", RecordType::A, 77), server_addr)
        .await
        .unwrap();
    let (n, _) = timeout(WAIT, client.recv_from(&mut buf)).await.unwrap().unwrap();
    let response = Message::from_vec(&buf[..n]).unwrap();
    assert_eq!(response.id(), 77);
    assert_eq!(response.answers()[0].ttl(), FAKE_RESPONSE_TTL);
    assert_eq!(
        engine.query_domain(answer_ip(&buf[..n])).as_deref(),
        Some("example.com")
    );

    // Not synthesizable and no resolver configured
    client
        .send_to(&dns_query("example.com.", RecordType::MX, 78), server_addr)
        .await
        .unwrap();
    let (n, _) = timeout(WAIT, client.recv_from(&mut buf)).await.unwrap().unwrap();
    let response = Message::from_vec(&buf[..n]).unwrap();
    assert_eq!(response.id(), 78);
    assert_eq!(response.response_code(), ResponseCode::ServFail);

    task.abort();
}
