//! Worker agent
//!
//! Discovers the coordinator over its address broadcast, registers its
//! own stream endpoint, and serves unit computations over the
//! coordinator's persistent stream connection. Drops back to discovery
//! whenever the connection goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::{compute, heartbeat};
use crate::error::{QuadraError, Result};
use crate::protocol::{self, Endpoint, UnitDispatch, UnitResult};
use crate::{DEFAULT_BROADCAST_PORT, DEFAULT_WORKER_STREAM_PORT};

/// Configuration for a worker agent
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Address the worker binds and advertises
    pub bind_host: String,
    /// Port the worker serves unit dispatches on
    pub stream_port: u16,
    /// Port the coordinator's discovery broadcast arrives on
    pub broadcast_port: u16,
    /// Percentage of heartbeat replies to drop, 0-100
    pub drop_percent: u8,
    /// Simulated per-unit work time
    pub work_delay: Duration,
    /// Pause between discovery attempts while unconnected
    pub discovery_retry: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".into(),
            stream_port: DEFAULT_WORKER_STREAM_PORT,
            broadcast_port: DEFAULT_BROADCAST_PORT,
            drop_percent: 0,
            work_delay: Duration::ZERO,
            discovery_retry: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    /// Heartbeat port convention: one above the stream port
    ///
    /// `None` when the stream port sits at the top of the range.
    pub fn heartbeat_port(&self) -> Option<u16> {
        self.stream_port.checked_add(1)
    }
}

/// A worker node
pub struct WorkerAgent {
    config: WorkerConfig,
    connected: AtomicBool,
}

impl WorkerAgent {
    /// Create a new worker agent
    pub fn new(config: WorkerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            connected: AtomicBool::new(false),
        })
    }

    /// Run the agent: heartbeat responder, dispatch server, discovery
    ///
    /// Binds the stream listener and heartbeat socket eagerly; a bind
    /// failure is fatal for the worker process.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let heartbeat_port = match self.config.heartbeat_port() {
            Some(port) => port,
            None => {
                return Err(QuadraError::InvalidConfig {
                    reason: format!(
                        "stream port {} leaves no heartbeat port above it",
                        self.config.stream_port
                    ),
                })
            }
        };
        let listener = TcpListener::bind((self.config.bind_host.as_str(), self.config.stream_port)).await?;
        let heartbeat_socket =
            UdpSocket::bind((self.config.bind_host.as_str(), heartbeat_port)).await?;

        info!(
            "Worker up at {}:{} (heartbeats on {})",
            self.config.bind_host, self.config.stream_port, heartbeat_port,
        );

        tokio::spawn(heartbeat::respond(heartbeat_socket, self.config.drop_percent));

        let agent = self.clone();
        tokio::spawn(async move { agent.accept_loop(listener).await });

        self.discovery_loop().await
    }

    /// Accept coordinator stream connections
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    info!("Coordinator connected from {}", peer);
                    self.connected.store(true, Ordering::SeqCst);

                    let agent = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = agent.serve(stream).await {
                            warn!("Coordinator connection failed: {}", e);
                        }
                        agent.connected.store(false, Ordering::SeqCst);
                        info!("Coordinator connection closed, resuming discovery");
                    });
                }
                Err(e) => warn!("Accept failed: {}", e),
            }
        }
    }

    /// Answer framed unit dispatches until the connection closes
    async fn serve(&self, mut stream: TcpStream) -> Result<()> {
        loop {
            let payload = match protocol::read_frame(&mut stream).await? {
                Some(payload) => payload,
                None => return Ok(()),
            };
            let dispatch: UnitDispatch = match payload.parse() {
                Ok(dispatch) => dispatch,
                Err(e) => {
                    warn!("Malformed dispatch: {}", e);
                    continue;
                }
            };

            if !self.config.work_delay.is_zero() {
                sleep(self.config.work_delay).await;
            }

            let reply = UnitResult {
                request_id: dispatch.request_id,
                unit_index: dispatch.unit_index,
                value: compute::unit_value(dispatch.unit_index),
            };
            debug!(
                "Unit {} of request {} computed: {}",
                reply.unit_index, reply.request_id, reply.value
            );
            protocol::write_frame(&mut stream, &reply.to_string()).await?;
        }
    }

    /// Search for the coordinator until a connection is observed
    async fn discovery_loop(&self) -> Result<()> {
        loop {
            if self.connected.load(Ordering::SeqCst) {
                debug!("Coordinator connected, skipping discovery");
            } else if let Err(e) = self.discover_and_register().await {
                warn!("Discovery attempt failed: {}", e);
            }
            sleep(self.config.discovery_retry).await;
        }
    }

    /// Wait for one broadcast and send the registration datagram
    async fn discover_and_register(&self) -> Result<()> {
        // Wildcard bind: broadcast datagrams are not addressed to us
        let socket = UdpSocket::bind(("0.0.0.0", self.config.broadcast_port)).await?;

        let mut buf = [0u8; 1024];
        // Bounded so the loop re-checks the connection state between cycles
        let (n, from) = match timeout(self.config.discovery_retry, socket.recv_from(&mut buf)).await
        {
            Ok(received) => received?,
            Err(_) => {
                debug!("No coordinator broadcast heard this cycle");
                return Ok(());
            }
        };

        let text = String::from_utf8_lossy(&buf[..n]);
        let text = text.trim_end_matches('\0').trim();
        let coordinator: Endpoint = text.parse()?;
        info!("Heard coordinator {} (broadcast from {})", coordinator, from);

        // The coordinator may have connected while we were listening
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let registration = Endpoint::new(self.config.bind_host.clone(), self.config.stream_port);
        let sender = UdpSocket::bind("0.0.0.0:0").await?;
        sender
            .send_to(
                registration.to_string().as_bytes(),
                (coordinator.host.as_str(), coordinator.port),
            )
            .await?;
        info!("Registered {} with coordinator {}", registration, coordinator);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    async fn free_udp_port() -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.local_addr().unwrap().port()
    }

    async fn free_tcp_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_agent_discovers_registers_and_serves() {
        let config = WorkerConfig {
            bind_host: "127.0.0.1".into(),
            stream_port: free_tcp_port().await,
            broadcast_port: free_udp_port().await,
            drop_percent: 0,
            work_delay: Duration::ZERO,
            discovery_retry: Duration::from_millis(50),
        };
        let stream_port = config.stream_port;
        let heartbeat_port = config.heartbeat_port().unwrap();
        let broadcast_port = config.broadcast_port;

        let agent = WorkerAgent::new(config);
        tokio::spawn(agent.run());

        // Act as the coordinator: advertise a registration endpoint
        // until the agent's registration datagram arrives
        let registration_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let advertisement = format!(
            "127.0.0.1:{}",
            registration_socket.local_addr().unwrap().port()
        );
        let broadcaster = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut buf = [0u8; 256];
        let mut registration = None;
        for _ in 0..100 {
            let _ = broadcaster
                .send_to(advertisement.as_bytes(), ("127.0.0.1", broadcast_port))
                .await;
            if let Ok(Ok((n, _))) = timeout(
                Duration::from_millis(50),
                registration_socket.recv_from(&mut buf),
            )
            .await
            {
                registration = Some(String::from_utf8_lossy(&buf[..n]).to_string());
                break;
            }
        }
        let registration: Endpoint = registration
            .expect("agent should register")
            .parse()
            .unwrap();
        assert_eq!(registration.port, stream_port);

        // Connect the stream and dispatch one unit
        let mut stream = TcpStream::connect((registration.host.as_str(), registration.port))
            .await
            .unwrap();
        protocol::write_frame(&mut stream, "7 2").await.unwrap();
        let reply = protocol::read_frame(&mut stream).await.unwrap().unwrap();
        let result: UnitResult = reply.parse().unwrap();
        assert_eq!(result.request_id, 7);
        assert_eq!(result.unit_index, 2);
        assert_eq!(result.value, compute::unit_value(2));

        // The heartbeat responder answers probes on stream port + 1
        let prober = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        prober
            .send_to(&[], ("127.0.0.1", heartbeat_port))
            .await
            .unwrap();
        let (n, _) = timeout(Duration::from_secs(1), prober.recv_from(&mut buf))
            .await
            .expect("heartbeat reply expected")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_top_of_port_range_is_rejected() {
        let config = WorkerConfig {
            stream_port: u16::MAX,
            ..WorkerConfig::default()
        };
        assert!(config.heartbeat_port().is_none());

        let err = WorkerAgent::new(config).run().await.unwrap_err();
        assert!(matches!(err, QuadraError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_malformed_dispatch_keeps_connection_open() {
        let config = WorkerConfig {
            bind_host: "127.0.0.1".into(),
            stream_port: free_tcp_port().await,
            broadcast_port: free_udp_port().await,
            discovery_retry: Duration::from_millis(50),
            ..WorkerConfig::default()
        };
        let stream_port = config.stream_port;
        let agent = WorkerAgent::new(config);
        tokio::spawn(agent.run());

        // Give the listener a moment to come up
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut stream = TcpStream::connect(("127.0.0.1", stream_port)).await.unwrap();

        protocol::write_frame(&mut stream, "one field").await.unwrap();
        protocol::write_frame(&mut stream, "3 0").await.unwrap();

        let reply = protocol::read_frame(&mut stream).await.unwrap().unwrap();
        let result: UnitResult = reply.parse().unwrap();
        assert_eq!((result.request_id, result.unit_index), (3, 0));
    }
}
