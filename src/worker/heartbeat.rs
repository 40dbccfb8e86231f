//! Heartbeat responder
//!
//! Answers every liveness probe with an empty datagram to the probe's
//! sender. A configurable percentage of replies is deliberately dropped
//! to simulate network loss when exercising the eviction protocol.

use rand::Rng;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Reply to heartbeat probes forever
pub async fn respond(socket: UdpSocket, drop_percent: u8) {
    let mut buf = [0u8; 64];
    loop {
        let (_, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("Heartbeat receive failed: {}", e);
                continue;
            }
        };
        debug!("Probe from {}", from);

        if rand::thread_rng().gen_range(0..100) < drop_percent as u32 {
            debug!("Simulating loss: dropping heartbeat reply to {}", from);
            continue;
        }
        if let Err(e) = socket.send_to(&[], from).await {
            warn!("Heartbeat reply to {} failed: {}", from, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn responder(drop_percent: u8) -> std::net::SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(respond(socket, drop_percent));
        addr
    }

    #[tokio::test]
    async fn test_every_probe_is_answered_without_drop() {
        let addr = responder(0).await;
        let prober = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut buf = [0u8; 64];
        for _ in 0..5 {
            prober.send_to(&[], addr).await.unwrap();
            let (n, from) = timeout(Duration::from_secs(1), prober.recv_from(&mut buf))
                .await
                .expect("probe should be answered")
                .unwrap();
            assert_eq!(n, 0);
            assert_eq!(from, addr);
        }
    }

    #[tokio::test]
    async fn test_full_drop_rate_never_replies() {
        let addr = responder(100).await;
        let prober = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut buf = [0u8; 64];
        for _ in 0..5 {
            prober.send_to(&[], addr).await.unwrap();
        }
        let reply = timeout(Duration::from_millis(200), prober.recv_from(&mut buf)).await;
        assert!(reply.is_err(), "all replies should be dropped");
    }
}
