//! Coordinator: discovery, membership, liveness, and request dispatch

pub mod broadcast;
pub mod collector;
pub mod dispatch;
pub mod liveness;
pub mod membership;
pub mod registrar;
pub mod requests;

pub use broadcast::BroadcastConfig;
pub use dispatch::DispatchConfig;
pub use liveness::HeartbeatConfig;
pub use membership::MembershipTable;
pub use requests::RequestTable;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};
use tracing::info;

use crate::error::Result;
use crate::protocol::Endpoint;
use crate::{
    DEFAULT_BROADCAST_INTERVAL_SECS, DEFAULT_BROADCAST_PORT, DEFAULT_CLIENT_PORT,
    DEFAULT_REGISTRATION_PORT,
};

/// Configuration for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Host advertised to workers in the discovery broadcast
    pub advertise_host: String,
    /// Port advertisements are broadcast to
    pub broadcast_port: u16,
    /// Port worker registrations arrive on
    pub registration_port: u16,
    /// Port client requests arrive on
    pub client_port: u16,
    /// Interval between address broadcasts
    pub broadcast_interval: Duration,
    /// Heartbeat probing configuration
    pub heartbeat: HeartbeatConfig,
    /// Client request servicing configuration
    pub dispatch: DispatchConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            advertise_host: "127.0.0.1".into(),
            broadcast_port: DEFAULT_BROADCAST_PORT,
            registration_port: DEFAULT_REGISTRATION_PORT,
            client_port: DEFAULT_CLIENT_PORT,
            broadcast_interval: Duration::from_secs(DEFAULT_BROADCAST_INTERVAL_SECS),
            heartbeat: HeartbeatConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

/// Main coordinator
pub struct Coordinator {
    config: CoordinatorConfig,
    membership: Arc<MembershipTable>,
    requests: Arc<RequestTable>,
}

impl Coordinator {
    /// Create a new coordinator
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            membership: Arc::new(MembershipTable::new()),
            requests: Arc::new(RequestTable::new()),
        }
    }

    /// The coordinator's membership table
    pub fn membership(&self) -> &Arc<MembershipTable> {
        &self.membership
    }

    /// The coordinator's request table
    pub fn requests(&self) -> &Arc<RequestTable> {
        &self.requests
    }

    /// Run the coordinator until one of the primary listeners fails
    ///
    /// Binds all primary sockets eagerly: a bind failure, like any later
    /// fatal listener error, terminates the whole service. Failures
    /// scoped to a single worker or client never propagate here.
    pub async fn run(&self) -> Result<()> {
        let registration =
            UdpSocket::bind(("0.0.0.0", self.config.registration_port)).await?;
        let clients = TcpListener::bind(("0.0.0.0", self.config.client_port)).await?;

        info!(
            "Coordinator up: registrations on {}, clients on {}, advertising {}:{} every {:?}",
            self.config.registration_port,
            self.config.client_port,
            self.config.advertise_host,
            self.config.registration_port,
            self.config.broadcast_interval,
        );

        let broadcast_config = BroadcastConfig {
            advertised: Endpoint::new(
                self.config.advertise_host.clone(),
                self.config.registration_port,
            ),
            interval: self.config.broadcast_interval,
            target: SocketAddr::from((Ipv4Addr::BROADCAST, self.config.broadcast_port)),
        };

        tokio::select! {
            outcome = broadcast::run(broadcast_config) => outcome,
            outcome = registrar::run(
                self.membership.clone(),
                self.requests.clone(),
                registration,
                self.config.heartbeat.clone(),
            ) => outcome,
            outcome = dispatch::run(
                self.membership.clone(),
                self.requests.clone(),
                clients,
                self.config.dispatch.clone(),
            ) => outcome,
        }
    }
}
