//! Worker membership management
//!
//! The authoritative table of currently known, live workers. Each entry
//! owns the write half of the worker's stream connection and the abort
//! handles of its collector/monitor pair, so eviction deterministically
//! tears all three down.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::Rng;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::error::Result;
use crate::protocol;

/// A registered worker
///
/// Created on successful registration, removed when the stream
/// connection fails or the liveness monitor exceeds its miss threshold.
pub struct WorkerRecord {
    /// Coordinator-assigned id, unique and strictly increasing
    pub worker_id: u64,
    /// Peer address of the stream connection
    pub addr: SocketAddr,
    /// Write half of the open stream connection
    writer: Arc<Mutex<OwnedWriteHalf>>,
    /// Abort handles for the collector and liveness monitor tasks
    tasks: Vec<AbortHandle>,
}

/// Send-capable view of a worker, usable outside the table lock
#[derive(Clone)]
pub struct WorkerHandle {
    pub worker_id: u64,
    pub addr: SocketAddr,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl WorkerHandle {
    /// Send one framed message over the worker's stream connection
    pub async fn send(&self, payload: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        protocol::write_frame(&mut *writer, payload).await
    }
}

/// Tracks worker membership
pub struct MembershipTable {
    workers: RwLock<HashMap<u64, WorkerRecord>>,
    next_worker_id: AtomicU64,
}

impl MembershipTable {
    /// Create an empty membership table
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            next_worker_id: AtomicU64::new(0),
        }
    }

    /// Allocate the next worker id
    ///
    /// Ids are never reused, even if the same address registers again.
    pub fn next_worker_id(&self) -> u64 {
        self.next_worker_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert a worker whose stream connection has been established
    pub async fn insert(&self, worker_id: u64, addr: SocketAddr, writer: OwnedWriteHalf) {
        let record = WorkerRecord {
            worker_id,
            addr,
            writer: Arc::new(Mutex::new(writer)),
            tasks: Vec::new(),
        };
        self.workers.write().await.insert(worker_id, record);
        info!("Registered worker {} at {}", worker_id, addr);
    }

    /// Attach the collector/monitor abort handles to a worker
    ///
    /// If the worker was already evicted the tasks are aborted instead.
    pub async fn attach_tasks(&self, worker_id: u64, tasks: Vec<AbortHandle>) {
        let mut workers = self.workers.write().await;
        match workers.get_mut(&worker_id) {
            Some(record) => record.tasks.extend(tasks),
            None => {
                drop(workers);
                for task in &tasks {
                    task.abort();
                }
                debug!("Worker {} gone before task attach, tasks aborted", worker_id);
            }
        }
    }

    /// Remove a worker, closing its connection and stopping its tasks
    ///
    /// Idempotent: eviction by heartbeat timeout and eviction by stream
    /// disconnect may race, removing an absent id is a no-op.
    pub async fn remove(&self, worker_id: u64) -> bool {
        let record = self.workers.write().await.remove(&worker_id);
        match record {
            Some(record) => {
                // Dropping the record drops the write half; aborting the
                // collector drops the read half, closing the connection.
                for task in &record.tasks {
                    task.abort();
                }
                info!("Removed worker {} at {}", worker_id, record.addr);
                true
            }
            None => false,
        }
    }

    /// Whether a worker is currently a member
    pub async fn contains(&self, worker_id: u64) -> bool {
        self.workers.read().await.contains_key(&worker_id)
    }

    /// Current membership size
    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Whether the table has no members
    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    /// Snapshot of send handles for every current member
    ///
    /// Taken under the lock; sends happen outside it.
    pub async fn snapshot(&self) -> Vec<WorkerHandle> {
        self.workers
            .read()
            .await
            .values()
            .map(|record| WorkerHandle {
                worker_id: record.worker_id,
                addr: record.addr,
                writer: record.writer.clone(),
            })
            .collect()
    }

    /// Pick one worker uniformly at random from a snapshot
    pub async fn pick_random(&self) -> Option<WorkerHandle> {
        let snapshot = self.snapshot().await;
        if snapshot.is_empty() {
            return None;
        }
        let choice = rand::thread_rng().gen_range(0..snapshot.len());
        Some(snapshot[choice].clone())
    }
}

impl Default for MembershipTable {
    fn default() -> Self {
        Self::new()
    }
}
