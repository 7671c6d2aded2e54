//! RPC Pool (spec §4.1)
//!
//! Ordered list of JSON-RPC endpoints with health tracking; exposes a single
//! "get a working client" operation and transparent failover. Generalized
//! from the teacher's WebSocket `RpcLoadBalancer` to plain HTTP(S)
//! JSON-RPC, since this engine only issues request/response calls and
//! raw-tx broadcasts, never log subscriptions.

use dashmap::DashMap;
use ethers::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::RpcError;

pub type HttpClient = Provider<Http>;

/// A client bound to the endpoint URL it was acquired from, so a caller
/// that observes a transport failure can report it back against the right
/// endpoint. Derefs to the underlying client so existing call sites don't
/// need to change.
#[derive(Clone)]
pub struct AcquiredClient {
    pub client: Arc<HttpClient>,
    pub url: String,
}

impl std::ops::Deref for AcquiredClient {
    type Target = HttpClient;
    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub url: String,
    pub healthy: bool,
    pub last_check_at: Instant,
    pub consecutive_failures: u32,
}

/// Ordered RPC endpoint pool with transparent failover (spec §4.1).
pub struct RpcPool {
    endpoints: Vec<String>,
    clients: DashMap<String, Arc<HttpClient>>,
    health: DashMap<String, EndpointHealth>,
    cursor: RwLock<usize>,
    health_ttl: Duration,
    acquire_retries: u32,
}

impl RpcPool {
    pub fn new(endpoints: &[String], health_ttl: Duration, acquire_retries: u32) -> eyre::Result<Self> {
        if endpoints.is_empty() {
            return Err(eyre::eyre!("RPC pool requires at least one endpoint"));
        }

        let clients = DashMap::new();
        let health = DashMap::new();
        let now = Instant::now();

        for url in endpoints {
            let client = Provider::<Http>::try_from(url.as_str())?;
            clients.insert(url.clone(), Arc::new(client));
            health.insert(
                url.clone(),
                EndpointHealth {
                    url: url.clone(),
                    // assume healthy until the first failed probe - avoids a
                    // mandatory round-trip before the first acquire()
                    healthy: true,
                    last_check_at: now,
                    consecutive_failures: 0,
                },
            );
        }

        Ok(Self {
            endpoints: endpoints.to_vec(),
            clients,
            health,
            cursor: RwLock::new(0),
            health_ttl,
            acquire_retries,
        })
    }

    /// Probe one endpoint with `chain_id` and update its health record.
    async fn probe(&self, url: &str) -> bool {
        let Some(client) = self.clients.get(url).map(|c| c.clone()) else {
            return false;
        };

        let ok = client.get_chainid().await.is_ok();
        let now = Instant::now();

        if let Some(mut entry) = self.health.get_mut(url) {
            entry.last_check_at = now;
            if ok {
                entry.healthy = true;
                entry.consecutive_failures = 0;
            } else {
                entry.consecutive_failures += 1;
                entry.healthy = false;
            }
        }

        ok
    }

    fn is_within_ttl(&self, url: &str) -> Option<bool> {
        self.health
            .get(url)
            .map(|e| e.healthy && e.last_check_at.elapsed() < self.health_ttl)
    }

    /// Returns a client bound to a currently-healthy endpoint (spec §4.1).
    ///
    /// Endpoints are tried in declared order. If none pass a fresh probe,
    /// returns the least-recently-failed endpoint in degraded mode.
    pub async fn acquire(&self) -> Result<AcquiredClient, RpcError> {
        for url in &self.endpoints {
            match self.is_within_ttl(url) {
                Some(true) => {
                    if let Some(client) = self.clients.get(url) {
                        return Ok(AcquiredClient { client: client.clone(), url: url.clone() });
                    }
                }
                _ => {
                    if self.probe(url).await {
                        if let Some(client) = self.clients.get(url) {
                            return Ok(AcquiredClient { client: client.clone(), url: url.clone() });
                        }
                    }
                }
            }
        }

        // Degraded mode: all endpoints failed probing. Pick the
        // least-recently-failed and log, per spec §4.1.
        let degraded = self
            .health
            .iter()
            .min_by_key(|e| e.consecutive_failures)
            .map(|e| e.url.clone());

        match degraded {
            Some(url) => {
                warn!("RPC pool degraded: all endpoints unhealthy, using {}", url);
                self.clients
                    .get(&url)
                    .map(|c| AcquiredClient { client: c.clone(), url: url.clone() })
                    .ok_or(RpcError::NoHealthyEndpoint)
            }
            None => Err(RpcError::NoHealthyEndpoint),
        }
    }

    /// Marks an endpoint unhealthy and advances the round-robin cursor.
    pub async fn report_failure(&self, url: &str) {
        if let Some(mut entry) = self.health.get_mut(url) {
            entry.consecutive_failures += 1;
            entry.healthy = false;
            entry.last_check_at = Instant::now();
        }
        let mut cursor = self.cursor.write().await;
        *cursor = (*cursor + 1) % self.endpoints.len().max(1);
        warn!("RPC endpoint marked unhealthy: {}", url);
    }

    /// A caller seeing a transport-layer error retries `acquire()` up to
    /// `acquire_retries` times with the same logical call before propagating.
    pub async fn acquire_with_retry(&self) -> Result<AcquiredClient, RpcError> {
        let mut last_err = RpcError::NoHealthyEndpoint;
        for attempt in 0..self.acquire_retries.max(1) {
            match self.acquire().await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    last_err = e;
                    if attempt + 1 < self.acquire_retries {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                }
            }
        }
        Err(last_err)
    }

    pub fn health_snapshot(&self) -> Vec<EndpointHealth> {
        self.health.iter().map(|e| e.value().clone()).collect()
    }

    /// Periodic health check task, run every `health_ttl / 2` by the caller.
    pub async fn health_check_all(&self) {
        for url in &self.endpoints {
            let was_healthy = self.health.get(url).map(|e| e.healthy).unwrap_or(false);
            let healthy = self.probe(url).await;
            if healthy && !was_healthy {
                info!("RPC endpoint recovered: {}", url);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_endpoint_list() {
        let result = RpcPool::new(&[], Duration::from_secs(300), 3);
        assert!(result.is_err());
    }
}
