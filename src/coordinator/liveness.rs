//! Per-worker liveness monitoring
//!
//! Periodically probes a worker's heartbeat port with an empty datagram
//! and waits a short window for a reply. Any reply resets the miss
//! counter; sustained non-response evicts the worker. One lost probe or
//! reply never evicts, bounding detection time to roughly
//! `miss_threshold * probe_interval`.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::membership::MembershipTable;
use crate::{DEFAULT_MISS_THRESHOLD, DEFAULT_PROBE_INTERVAL_SECS, DEFAULT_REPLY_WINDOW_MS};

/// Configuration for heartbeat probing
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between probes
    pub probe_interval: Duration,
    /// Window to wait for a reply after each probe
    pub reply_window: Duration,
    /// Consecutive misses before eviction
    pub miss_threshold: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECS),
            reply_window: Duration::from_millis(DEFAULT_REPLY_WINDOW_MS),
            miss_threshold: DEFAULT_MISS_THRESHOLD,
        }
    }
}

/// Probe one worker until it is evicted or removed elsewhere
pub async fn run(
    membership: Arc<MembershipTable>,
    worker_id: u64,
    host: String,
    port: u16,
    config: HeartbeatConfig,
) {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("Monitor for worker {} could not open a socket: {}", worker_id, e);
            membership.remove(worker_id).await;
            return;
        }
    };

    let mut misses = 0u32;
    let mut buf = [0u8; 64];
    loop {
        if misses >= config.miss_threshold {
            warn!(
                "Worker {} missed {} consecutive probes, evicting",
                worker_id, misses
            );
            membership.remove(worker_id).await;
            return;
        }

        sleep(config.probe_interval).await;

        // The collector may have evicted this worker on disconnect
        if !membership.contains(worker_id).await {
            debug!("Worker {} already removed, monitor stopping", worker_id);
            return;
        }

        if let Err(e) = socket.send_to(&[], (host.as_str(), port)).await {
            warn!("Probe to worker {} failed: {}", worker_id, e);
            misses += 1;
            continue;
        }

        // Accept the reply from any origin; only log where it came from
        match timeout(config.reply_window, socket.recv_from(&mut buf)).await {
            Ok(Ok((_, from))) => {
                debug!("Heartbeat reply for worker {} from {}", worker_id, from);
                misses = 0;
            }
            Ok(Err(e)) => {
                warn!("Heartbeat receive for worker {} failed: {}", worker_id, e);
                misses += 1;
            }
            Err(_) => {
                debug!("No heartbeat reply from worker {} (miss {})", worker_id, misses + 1);
                misses += 1;
            }
        }
    }
}
