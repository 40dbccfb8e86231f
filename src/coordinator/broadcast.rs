//! Coordinator address broadcasting
//!
//! Periodically advertises the registration endpoint on the network's
//! broadcast address so workers can discover the coordinator without
//! prior configuration. No acknowledgment is expected; a failed send is
//! retried on the next tick.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::Endpoint;
use crate::{DEFAULT_BROADCAST_INTERVAL_SECS, DEFAULT_BROADCAST_PORT};

/// Configuration for the address broadcaster
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Registration endpoint advertised to workers
    pub advertised: Endpoint,
    /// Interval between advertisements
    pub interval: Duration,
    /// Where advertisements are sent
    pub target: SocketAddr,
}

impl BroadcastConfig {
    /// Advertise the given endpoint on the IPv4 broadcast address
    pub fn new(advertised: Endpoint) -> Self {
        Self {
            advertised,
            interval: Duration::from_secs(DEFAULT_BROADCAST_INTERVAL_SECS),
            target: SocketAddr::from((Ipv4Addr::BROADCAST, DEFAULT_BROADCAST_PORT)),
        }
    }
}

/// Advertise the coordinator forever
///
/// Returns only on a fatal local socket failure.
pub async fn run(config: BroadcastConfig) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;

    let payload = config.advertised.to_string();
    let mut ticker = interval(config.interval);
    loop {
        ticker.tick().await;
        match socket.send_to(payload.as_bytes(), config.target).await {
            Ok(_) => debug!("Advertised {} to {}", payload, config.target),
            Err(e) => warn!("Broadcast failed, retrying next tick: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_broadcaster_advertises_registration_endpoint() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();

        let config = BroadcastConfig {
            advertised: Endpoint::new("10.1.2.3", 33334),
            interval: Duration::from_millis(10),
            target,
        };
        let broadcaster = tokio::spawn(run(config));

        let mut buf = [0u8; 256];
        // Two ticks prove it repeats
        for _ in 0..2 {
            let (n, _) = timeout(Duration::from_secs(1), receiver.recv_from(&mut buf))
                .await
                .expect("advertisement should arrive")
                .unwrap();
            assert_eq!(&buf[..n], b"10.1.2.3:33334");
        }

        broadcaster.abort();
    }
}
