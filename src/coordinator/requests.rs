//! Client request tracking
//!
//! One record per in-flight client request: the integration interval
//! and the unit index to computed value mapping that collectors fill in
//! concurrently. Records are purged once the response has been sent.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{QuadraError, Result};

/// A single client request over the half-open interval `[lower, upper)`
pub struct RequestRecord {
    /// Coordinator-assigned id, unique and strictly increasing
    pub request_id: u64,
    /// Address of the requesting client
    pub client_addr: SocketAddr,
    /// Inclusive lower bound of the interval
    pub lower: i64,
    /// Exclusive upper bound of the interval
    pub upper: i64,
    /// Unit index to computed value; last write wins
    results: RwLock<HashMap<i64, i64>>,
}

impl RequestRecord {
    /// Record one unit's computed value
    ///
    /// A duplicate or stale redispatch reply simply overwrites; it never
    /// accumulates.
    pub async fn record_unit(&self, unit_index: i64, value: i64) {
        self.results.write().await.insert(unit_index, value);
    }

    /// Unit indices of the interval with no recorded value yet
    pub async fn missing_units(&self) -> Vec<i64> {
        let results = self.results.read().await;
        (self.lower..self.upper)
            .filter(|i| !results.contains_key(i))
            .collect()
    }

    /// Whether every unit of the interval has a recorded value
    pub async fn is_complete(&self) -> bool {
        let results = self.results.read().await;
        (self.lower..self.upper).all(|i| results.contains_key(&i))
    }

    /// Number of recorded units
    pub async fn completed_units(&self) -> usize {
        self.results.read().await.len()
    }

    /// Sum of recorded values over the full interval
    ///
    /// Only meaningful once the request is complete; absent units
    /// contribute nothing.
    pub async fn total(&self) -> i64 {
        let results = self.results.read().await;
        (self.lower..self.upper)
            .filter_map(|i| results.get(&i))
            .sum()
    }
}

/// Tracks in-flight client requests
pub struct RequestTable {
    requests: RwLock<HashMap<u64, Arc<RequestRecord>>>,
    next_request_id: AtomicU64,
}

impl RequestTable {
    /// Create an empty request table
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            next_request_id: AtomicU64::new(0),
        }
    }

    /// Create a record for a newly parsed client request
    pub async fn insert(&self, client_addr: SocketAddr, lower: i64, upper: i64) -> Arc<RequestRecord> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(RequestRecord {
            request_id,
            client_addr,
            lower,
            upper,
            results: RwLock::new(HashMap::new()),
        });
        self.requests.write().await.insert(request_id, record.clone());
        info!(
            "Request {} from {}: interval [{}, {})",
            request_id, client_addr, lower, upper
        );
        record
    }

    /// Look up a request by id
    pub async fn get(&self, request_id: u64) -> Option<Arc<RequestRecord>> {
        self.requests.read().await.get(&request_id).cloned()
    }

    /// Record a unit result against its owning request
    pub async fn record_unit(&self, request_id: u64, unit_index: i64, value: i64) -> Result<()> {
        let record = self
            .get(request_id)
            .await
            .ok_or(QuadraError::RequestNotFound { request_id })?;
        record.record_unit(unit_index, value).await;
        Ok(())
    }

    /// Purge a request after its response has been sent or abandoned
    pub async fn remove(&self, request_id: u64) {
        if self.requests.write().await.remove(&request_id).is_some() {
            debug!("Purged request {}", request_id);
        }
    }

    /// Number of in-flight requests
    pub async fn len(&self) -> usize {
        self.requests.read().await.len()
    }

    /// Whether no requests are in flight
    pub async fn is_empty(&self) -> bool {
        self.requests.read().await.is_empty()
    }
}

impl Default for RequestTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_addr() -> SocketAddr {
        "127.0.0.1:54321".parse().unwrap()
    }

    #[tokio::test]
    async fn test_completeness_and_total() {
        let table = RequestTable::new();
        let record = table.insert(client_addr(), 0, 3).await;

        assert!(!record.is_complete().await);
        assert_eq!(record.missing_units().await, vec![0, 1, 2]);

        record.record_unit(0, 1).await;
        record.record_unit(2, 1).await;
        assert!(!record.is_complete().await);
        assert_eq!(record.missing_units().await, vec![1]);

        record.record_unit(1, 1).await;
        assert!(record.is_complete().await);
        assert_eq!(record.total().await, 3);
    }

    #[tokio::test]
    async fn test_duplicate_result_overwrites() {
        let table = RequestTable::new();
        let record = table.insert(client_addr(), 0, 2).await;

        record.record_unit(0, 5).await;
        record.record_unit(1, 5).await;
        // Stale redispatch reply for an already counted unit
        record.record_unit(0, 5).await;

        assert_eq!(record.total().await, 10);
    }

    #[tokio::test]
    async fn test_empty_interval_is_complete() {
        let table = RequestTable::new();
        let record = table.insert(client_addr(), 4, 4).await;
        assert!(record.is_complete().await);
        assert_eq!(record.total().await, 0);
    }

    #[tokio::test]
    async fn test_request_ids_strictly_increase() {
        let table = RequestTable::new();
        let a = table.insert(client_addr(), 0, 1).await;
        let b = table.insert(client_addr(), 0, 1).await;
        assert!(b.request_id > a.request_id);

        table.remove(a.request_id).await;
        let c = table.insert(client_addr(), 0, 1).await;
        assert!(c.request_id > b.request_id);
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_isolated() {
        let table = RequestTable::new();
        let first = table.insert(client_addr(), 0, 2).await;
        let second = table.insert(client_addr(), 5, 7).await;

        table.record_unit(first.request_id, 0, 1).await.unwrap();
        table.record_unit(first.request_id, 1, 1).await.unwrap();
        table.record_unit(second.request_id, 5, 9).await.unwrap();
        table.record_unit(second.request_id, 6, 9).await.unwrap();

        assert_eq!(first.total().await, 2);
        assert_eq!(second.total().await, 18);
    }

    #[tokio::test]
    async fn test_result_for_purged_request_is_an_error() {
        let table = RequestTable::new();
        let record = table.insert(client_addr(), 0, 1).await;
        table.remove(record.request_id).await;

        let err = table.record_unit(record.request_id, 0, 1).await.unwrap_err();
        assert!(matches!(err, QuadraError::RequestNotFound { .. }));
    }
}
