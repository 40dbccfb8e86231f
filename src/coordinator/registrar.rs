//! Worker registration
//!
//! Turns registration datagrams into live, monitored workers: validates
//! the advertised endpoint, connects the stream, inserts the membership
//! record, and spawns the collector/monitor pair. A failed connection
//! attempt creates nothing.

use std::sync::Arc;

use tokio::net::{TcpStream, UdpSocket};
use tracing::{info, warn};

use super::collector;
use super::liveness::{self, HeartbeatConfig};
use super::membership::MembershipTable;
use super::requests::RequestTable;
use crate::error::Result;
use crate::protocol::Endpoint;

/// Accept worker registrations until a fatal socket error
pub async fn run(
    membership: Arc<MembershipTable>,
    requests: Arc<RequestTable>,
    socket: UdpSocket,
    heartbeat: HeartbeatConfig,
) -> Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        // A recv failure here is process-fatal: without registration the
        // coordinator cannot grow its pool
        let (n, peer) = socket.recv_from(&mut buf).await?;
        let payload = String::from_utf8_lossy(&buf[..n]);
        let payload = payload.trim_end_matches('\0').trim();

        let endpoint: Endpoint = match payload.parse() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!("Dropping malformed registration from {}: {}", peer, e);
                continue;
            }
        };
        let heartbeat_port = match endpoint.port.checked_add(1) {
            Some(port) => port,
            None => {
                warn!(
                    "Dropping registration from {}: no heartbeat port above {}",
                    peer, endpoint.port
                );
                continue;
            }
        };

        let worker_id = membership.next_worker_id();
        info!("Worker {} registering from {} as {}", worker_id, peer, endpoint);

        tokio::spawn(connect_worker(
            membership.clone(),
            requests.clone(),
            worker_id,
            endpoint,
            heartbeat_port,
            heartbeat.clone(),
        ));
    }
}

/// Connect one registered worker and start its collector/monitor pair
async fn connect_worker(
    membership: Arc<MembershipTable>,
    requests: Arc<RequestTable>,
    worker_id: u64,
    endpoint: Endpoint,
    heartbeat_port: u16,
    heartbeat: HeartbeatConfig,
) {
    let stream = match TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Worker {} at {} unreachable, not registered: {}", worker_id, endpoint, e);
            return;
        }
    };
    let addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Worker {} connection lost before registration: {}", worker_id, e);
            return;
        }
    };

    let (read, write) = stream.into_split();
    membership.insert(worker_id, addr, write).await;

    let collector = tokio::spawn(collector::run(
        membership.clone(),
        requests.clone(),
        worker_id,
        read,
    ));
    let monitor = tokio::spawn(liveness::run(
        membership.clone(),
        worker_id,
        endpoint.host.clone(),
        heartbeat_port,
        heartbeat,
    ));
    membership
        .attach_tasks(worker_id, vec![collector.abort_handle(), monitor.abort_handle()])
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::{sleep, Duration};

    struct Harness {
        membership: Arc<MembershipTable>,
        registration_addr: std::net::SocketAddr,
        sender: UdpSocket,
    }

    async fn start_registrar() -> Harness {
        let membership = Arc::new(MembershipTable::new());
        let requests = Arc::new(RequestTable::new());
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let registration_addr = socket.local_addr().unwrap();

        tokio::spawn(run(
            membership.clone(),
            requests,
            socket,
            HeartbeatConfig {
                probe_interval: Duration::from_millis(50),
                reply_window: Duration::from_millis(30),
                miss_threshold: 1000,
            },
        ));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Harness {
            membership,
            registration_addr,
            sender,
        }
    }

    async fn wait_for_members(membership: &MembershipTable, expected: usize) -> bool {
        for _ in 0..100 {
            if membership.len().await == expected {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_registration_inserts_worker() {
        let harness = start_registrar().await;

        let worker_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = worker_listener.local_addr().unwrap().port();

        harness
            .sender
            .send_to(format!("127.0.0.1:{}", port).as_bytes(), harness.registration_addr)
            .await
            .unwrap();

        assert!(wait_for_members(&harness.membership, 1).await);
        let (_stream, _) = worker_listener.accept().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_registration_is_dropped() {
        let harness = start_registrar().await;

        for payload in ["nonsense", "1:2:3", "host:not-a-port", ""] {
            harness
                .sender
                .send_to(payload.as_bytes(), harness.registration_addr)
                .await
                .unwrap();
        }

        sleep(Duration::from_millis(100)).await;
        assert_eq!(harness.membership.len().await, 0);
    }

    #[tokio::test]
    async fn test_unreachable_worker_is_not_registered() {
        let harness = start_registrar().await;

        // Grab a port with no listener behind it
        let throwaway = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = throwaway.local_addr().unwrap().port();
        drop(throwaway);

        harness
            .sender
            .send_to(format!("127.0.0.1:{}", port).as_bytes(), harness.registration_addr)
            .await
            .unwrap();

        sleep(Duration::from_millis(200)).await;
        assert_eq!(harness.membership.len().await, 0);
    }

    #[tokio::test]
    async fn test_same_address_registers_twice() {
        let harness = start_registrar().await;

        let worker_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = worker_listener.local_addr().unwrap().port();
        let payload = format!("127.0.0.1:{}", port);

        harness
            .sender
            .send_to(payload.as_bytes(), harness.registration_addr)
            .await
            .unwrap();
        harness
            .sender
            .send_to(payload.as_bytes(), harness.registration_addr)
            .await
            .unwrap();

        // No deduplication by address: two independent worker ids
        assert!(wait_for_members(&harness.membership, 2).await);
        let snapshot = harness.membership.snapshot().await;
        assert_ne!(snapshot[0].worker_id, snapshot[1].worker_id);
    }
}
