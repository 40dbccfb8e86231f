//! Client request servicing
//!
//! Accepts client connections, fans the requested interval out across
//! the current membership in round-robin order, reconciles missing unit
//! results on a fixed cadence by redispatching them to random workers,
//! and replies with the aggregate once the mapping is complete.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

use super::membership::MembershipTable;
use super::requests::{RequestRecord, RequestTable};
use crate::error::{QuadraError, Result};
use crate::protocol::UnitDispatch;
use crate::{DEFAULT_MAX_INTERVAL_WIDTH, DEFAULT_RECONCILE_INTERVAL_SECS};

/// Configuration for client request servicing
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Interval between reconciliation scans
    pub reconcile_interval: Duration,
    /// How long a request may sit with an empty membership table before
    /// it is abandoned
    pub stall_timeout: Duration,
    /// Upper bound on the client request read
    pub request_buffer: usize,
    /// Largest accepted interval width, in units
    pub max_interval_width: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
            stall_timeout: Duration::from_secs(60),
            request_buffer: 1024,
            max_interval_width: DEFAULT_MAX_INTERVAL_WIDTH,
        }
    }
}

/// Accept client connections until a fatal socket error
pub async fn run(
    membership: Arc<MembershipTable>,
    requests: Arc<RequestTable>,
    listener: TcpListener,
    config: DispatchConfig,
) -> Result<()> {
    loop {
        // An accept failure is process-fatal: the coordinator cannot
        // serve without its client listener
        let (stream, peer) = listener.accept().await?;
        info!("Client connected from {}", peer);

        let membership = membership.clone();
        let requests = requests.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_client(membership, requests, config, stream, peer).await {
                // Client-visible failure is limited to a closed connection
                warn!("Client {} request failed: {}", peer, e);
            }
        });
    }
}

/// Serve one client request end-to-end
async fn serve_client(
    membership: Arc<MembershipTable>,
    requests: Arc<RequestTable>,
    config: DispatchConfig,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    let mut buf = vec![0u8; config.request_buffer];
    let n = stream.read(&mut buf).await?;
    let (lower, upper) = parse_interval(&buf[..n])?;
    // Width in i128: the bound difference can overflow i64
    if (upper as i128 - lower as i128) > config.max_interval_width as i128 {
        return Err(QuadraError::InvalidInterval { lower, upper });
    }

    let record = requests.insert(peer, lower, upper).await;
    let outcome = drive_request(&membership, &config, &record).await;
    requests.remove(record.request_id).await;
    outcome?;

    let sum = record.total().await;
    info!("Request {} complete, sum = {}", record.request_id, sum);
    stream.write_all(sum.to_string().as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Parse a `"<a> <b>"` integration interval
fn parse_interval(raw: &[u8]) -> Result<(i64, i64)> {
    let text = std::str::from_utf8(raw).map_err(|_| QuadraError::InvalidMessage {
        reason: "request is not valid UTF-8".into(),
    })?;
    let text = text.trim_end_matches('\0').trim();

    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() != 2 {
        return Err(QuadraError::InvalidMessage {
            reason: format!("expected 2 fields, got {:?}", text),
        });
    }
    let lower: i64 = fields[0].parse().map_err(|_| QuadraError::InvalidMessage {
        reason: format!("lower bound {:?} is not a valid number", fields[0]),
    })?;
    let upper: i64 = fields[1].parse().map_err(|_| QuadraError::InvalidMessage {
        reason: format!("upper bound {:?} is not a valid number", fields[1]),
    })?;
    if lower > upper {
        return Err(QuadraError::InvalidInterval { lower, upper });
    }
    Ok((lower, upper))
}

/// Dispatch and reconcile until the request's mapping is complete
async fn drive_request(
    membership: &MembershipTable,
    config: &DispatchConfig,
    record: &RequestRecord,
) -> Result<()> {
    fan_out(membership, record).await;

    let mut ticker = interval(config.reconcile_interval);
    ticker.tick().await;
    let mut stalled_since: Option<Instant> = None;

    loop {
        if record.is_complete().await {
            return Ok(());
        }
        ticker.tick().await;

        let missing = record.missing_units().await;
        if missing.is_empty() {
            return Ok(());
        }
        debug!(
            "Request {}: {} units outstanding",
            record.request_id,
            missing.len()
        );

        if membership.is_empty().await {
            // The reconcile tick is the backoff; give up once the table
            // has been empty for the whole stall window
            let since = *stalled_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= config.stall_timeout {
                error!(
                    "Request {} stalled for {:?} with no workers, abandoning",
                    record.request_id, config.stall_timeout
                );
                return Err(QuadraError::NoWorkersAvailable {
                    request_id: record.request_id,
                });
            }
            continue;
        }
        stalled_since = None;

        for unit_index in missing {
            let worker = match membership.pick_random().await {
                Some(worker) => worker,
                None => break,
            };
            let dispatch = UnitDispatch {
                request_id: record.request_id,
                unit_index,
            };
            debug!(
                "Redispatching unit {} of request {} to worker {}",
                unit_index, record.request_id, worker.worker_id
            );
            if let Err(e) = worker.send(&dispatch.to_string()).await {
                warn!(
                    "Redispatch of unit {} to worker {} failed: {}",
                    unit_index, worker.worker_id, e
                );
            }
        }
    }
}

/// Round-robin the full interval across the current membership snapshot
async fn fan_out(membership: &MembershipTable, record: &RequestRecord) {
    let snapshot = membership.snapshot().await;
    if snapshot.is_empty() {
        warn!(
            "No workers for initial fan-out of request {}, deferring to reconciliation",
            record.request_id
        );
        return;
    }

    for (offset, unit_index) in (record.lower..record.upper).enumerate() {
        let worker = &snapshot[offset % snapshot.len()];
        let dispatch = UnitDispatch {
            request_id: record.request_id,
            unit_index,
        };
        // An undelivered unit is caught by the reconciliation loop
        if let Err(e) = worker.send(&dispatch.to_string()).await {
            warn!(
                "Dispatch of unit {} to worker {} failed: {}",
                unit_index, worker.worker_id, e
            );
        }
    }
}
