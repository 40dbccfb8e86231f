//! Per-worker result collection
//!
//! Owns the read half of one worker's stream connection and continuously
//! ingests framed unit results into the owning request's mapping. A
//! disconnect removes the worker from membership, the same idempotent
//! path the liveness monitor uses.

use std::sync::Arc;

use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, info, warn};

use super::membership::MembershipTable;
use super::requests::RequestTable;
use crate::error::QuadraError;
use crate::protocol::{self, UnitResult};

/// Ingest results from one worker until its connection goes away
pub async fn run(
    membership: Arc<MembershipTable>,
    requests: Arc<RequestTable>,
    worker_id: u64,
    mut reader: OwnedReadHalf,
) {
    loop {
        match protocol::read_frame(&mut reader).await {
            Ok(Some(payload)) => {
                let result: UnitResult = match payload.parse() {
                    Ok(result) => result,
                    Err(e) => {
                        // A malformed message skips the frame, not the connection
                        warn!("Malformed result from worker {}: {}", worker_id, e);
                        continue;
                    }
                };
                debug!(
                    "Worker {} computed unit {} of request {}: {}",
                    worker_id, result.unit_index, result.request_id, result.value
                );
                match requests
                    .record_unit(result.request_id, result.unit_index, result.value)
                    .await
                {
                    Ok(()) => {}
                    Err(QuadraError::RequestNotFound { request_id }) => {
                        debug!(
                            "Dropping late result from worker {} for purged request {}",
                            worker_id, request_id
                        );
                    }
                    Err(e) => warn!("Failed to record result from worker {}: {}", worker_id, e),
                }
            }
            Ok(None) => {
                info!("Worker {} disconnected", worker_id);
                break;
            }
            Err(e) => {
                warn!("Read failure on worker {} connection: {}", worker_id, e);
                break;
            }
        }
    }

    membership.remove(worker_id).await;
}
