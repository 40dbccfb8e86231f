//! Quadra Core - distributed parallel numerical integration
//!
//! A coordinator splits an integration interval into unit-sized work
//! items, fans them out across dynamically discovered workers, recovers
//! from worker failure, and returns the aggregated sum to the client:
//! - Worker discovery over a periodic address broadcast
//! - Heartbeat-based liveness and eviction
//! - Fault-tolerant dispatch with periodic reconciliation

pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod worker;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use error::QuadraError;
pub use worker::{WorkerAgent, WorkerConfig};

/// Port the coordinator advertises itself on
pub const DEFAULT_BROADCAST_PORT: u16 = 33333;

/// Port the coordinator accepts worker registrations on
pub const DEFAULT_REGISTRATION_PORT: u16 = 33334;

/// Port the coordinator accepts client requests on
pub const DEFAULT_CLIENT_PORT: u16 = 32000;

/// Default port a worker serves unit dispatches on.
/// Its heartbeat responder listens on this port + 1 by convention.
pub const DEFAULT_WORKER_STREAM_PORT: u16 = 33000;

/// Default interval between coordinator address broadcasts in seconds
pub const DEFAULT_BROADCAST_INTERVAL_SECS: u64 = 5;

/// Default interval between heartbeat probes in seconds
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 2;

/// Default window to wait for a heartbeat reply in milliseconds
pub const DEFAULT_REPLY_WINDOW_MS: u64 = 500;

/// Consecutive missed heartbeats before a worker is evicted
pub const DEFAULT_MISS_THRESHOLD: u32 = 5;

/// Default interval between reconciliation scans in seconds
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 10;

/// Largest interval width, in units, a client request may cover
pub const DEFAULT_MAX_INTERVAL_WIDTH: i64 = 1_000_000;
