//! Central service registry
//!
//! Edge nodes behind NAT advertise their services here; clients query the
//! table to locate them. Two flat tables (edges, services) are linked by
//! edge id rather than back-pointers: removing an edge sweeps the service
//! table for its id under one write lock, so an edge and its services
//! always disappear atomically.

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::RwLock;

use super::wire::{ServiceAd, MAX_CAPS_LEN, MAX_ID_LEN, MAX_SVC_LEN};

/// Stable handle for a connected edge session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(u64);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for registry refusals
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// Edge table is full
    #[error("edge limit reached ({0})")]
    EdgeLimit(usize),
    /// Service table is full
    #[error("service limit reached ({0})")]
    ServiceLimit(usize),
    /// Edge handle no longer present (already removed)
    #[error("unknown edge {0}")]
    UnknownEdge(EdgeId),
}

/// Table limits
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum concurrently connected edge nodes
    pub max_edges: usize,
    /// Maximum services across all edges
    pub max_services: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_edges: 32,
            max_services: 128,
        }
    }
}

impl RegistryConfig {
    /// Set the edge cap
    pub fn max_edges(mut self, max: usize) -> Self {
        self.max_edges = max;
        self
    }

    /// Set the service cap
    pub fn max_services(mut self, max: usize) -> Self {
        self.max_services = max;
        self
    }
}

#[derive(Debug)]
struct EdgeEntry {
    id: EdgeId,
    addr: SocketAddr,
    connected_at: Instant,
    last_seen: Instant,
}

#[derive(Debug)]
struct ServiceRecord {
    id: String,
    service: String,
    /// Observed address of the owning edge at registration time
    ip: String,
    ctrl_port: i32,
    data_port: i32,
    caps: String,
    owner: EdgeId,
    registered_at: Instant,
}

#[derive(Debug, Default)]
struct Tables {
    edges: Vec<EdgeEntry>,
    services: Vec<ServiceRecord>,
}

/// Shared registry state, owned behind `Arc` by the discovery accept loop
/// and every edge session task.
#[derive(Debug)]
pub struct DiscoveryRegistry {
    tables: RwLock<Tables>,
    next_edge_id: std::sync::atomic::AtomicU64,
    config: RegistryConfig,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_edge_id: std::sync::atomic::AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Admit a newly accepted edge connection, refusing at the cap.
    pub async fn add_edge(&self, addr: SocketAddr) -> Result<EdgeId, RegistryError> {
        let mut tables = self.tables.write().await;
        if tables.edges.len() >= self.config.max_edges {
            return Err(RegistryError::EdgeLimit(self.config.max_edges));
        }

        let id = EdgeId(
            self.next_edge_id
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
        );
        let now = Instant::now();
        tables.edges.push(EdgeEntry {
            id,
            addr,
            connected_at: now,
            last_seen: now,
        });

        tracing::info!(edge = %id, peer = %addr, edges = tables.edges.len(), "Edge connected");
        Ok(id)
    }

    /// Drop an edge and every service it owns, atomically.
    pub async fn remove_edge(&self, id: EdgeId) {
        let mut tables = self.tables.write().await;
        let Some(pos) = tables.edges.iter().position(|e| e.id == id) else {
            return;
        };
        let edge = tables.edges.remove(pos);

        let before = tables.services.len();
        tables.services.retain(|s| {
            if s.owner == id {
                tracing::info!(
                    service = %s.service,
                    id = %s.id,
                    age_secs = s.registered_at.elapsed().as_secs(),
                    "Service withdrawn with edge"
                );
                false
            } else {
                true
            }
        });

        tracing::info!(
            edge = %id,
            peer = %edge.addr,
            services_dropped = before - tables.services.len(),
            edges = tables.edges.len(),
            uptime_secs = edge.connected_at.elapsed().as_secs(),
            idle_secs = edge.last_seen.elapsed().as_secs(),
            "Edge disconnected"
        );
    }

    /// Refresh an edge's liveness timestamp.
    pub async fn touch(&self, id: EdgeId) {
        let mut tables = self.tables.write().await;
        if let Some(edge) = tables.edges.iter_mut().find(|e| e.id == id) {
            edge.last_seen = Instant::now();
        }
    }

    /// Upsert the service `(svc, id)` as owned by `edge`. The advertised
    /// address is always the edge's observed remote address; edges are not
    /// trusted to name their own IP. A repeat HELO updates the existing
    /// record in place, even at the service cap.
    pub async fn register(
        &self,
        edge: EdgeId,
        id: &str,
        svc: &str,
        ctrl_port: i32,
        data_port: i32,
        caps: &str,
    ) -> Result<(), RegistryError> {
        let mut tables = self.tables.write().await;
        let now = Instant::now();

        let ip = {
            let Some(entry) = tables.edges.iter_mut().find(|e| e.id == edge) else {
                return Err(RegistryError::UnknownEdge(edge));
            };
            entry.last_seen = now;
            entry.addr.ip().to_string()
        };

        let id = bounded(id, MAX_ID_LEN);
        let svc = bounded(svc, MAX_SVC_LEN);
        let caps = bounded(caps, MAX_CAPS_LEN);

        if let Some(record) = tables
            .services
            .iter_mut()
            .find(|s| s.id == id && s.service == svc)
        {
            record.ip = ip;
            record.ctrl_port = ctrl_port;
            record.data_port = data_port;
            record.caps = caps;
            record.owner = edge;
            record.registered_at = now;
            tracing::debug!(service = %svc, id = %id, edge = %edge, "Service refreshed");
            return Ok(());
        }

        if tables.services.len() >= self.config.max_services {
            return Err(RegistryError::ServiceLimit(self.config.max_services));
        }

        tracing::info!(
            service = %svc,
            id = %id,
            ip = %ip,
            ctrl = ctrl_port,
            data = data_port,
            caps = %caps,
            edge = %edge,
            "Service registered"
        );
        tables.services.push(ServiceRecord {
            id,
            service: svc,
            ip,
            ctrl_port,
            data_port,
            caps,
            owner: edge,
            registered_at: now,
        });
        Ok(())
    }

    /// Withdraw services owned by `edge`: the exact `(svc, id)` pair when
    /// `svc` is given, otherwise every service with that id.
    pub async fn unregister(&self, edge: EdgeId, id: &str, svc: Option<&str>) {
        let mut tables = self.tables.write().await;
        tables.services.retain(|s| {
            let matches =
                s.owner == edge && s.id == id && svc.map_or(true, |svc| s.service == svc);
            if matches {
                tracing::info!(
                    service = %s.service,
                    id = %s.id,
                    edge = %edge,
                    age_secs = s.registered_at.elapsed().as_secs(),
                    "Service withdrawn"
                );
            }
            !matches
        });
    }

    /// Snapshot the service table, optionally filtered by service type.
    /// The snapshot is consistent: concurrent registrations on other edges
    /// never show through an in-flight response.
    pub async fn list(&self, filter: Option<&str>) -> Vec<ServiceAd> {
        let tables = self.tables.read().await;
        tables
            .services
            .iter()
            .filter(|s| filter.map_or(true, |f| s.service == f))
            .map(|s| ServiceAd {
                id: s.id.clone(),
                svc: s.service.clone(),
                ip: s.ip.clone(),
                port: s.ctrl_port,
                data: s.data_port,
                caps: s.caps.clone(),
            })
            .collect()
    }

    /// Current (edge, service) counts, for the status report.
    pub async fn counts(&self) -> (usize, usize) {
        let tables = self.tables.read().await;
        (tables.edges.len(), tables.services.len())
    }
}

impl Default for DiscoveryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Clamp an edge-supplied string to `max` bytes on a char boundary.
fn bounded(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip: &str) -> SocketAddr {
        format!("{ip}:4000").parse().unwrap()
    }

    #[tokio::test]
    async fn test_helo_then_list_roundtrip() {
        let registry = DiscoveryRegistry::new();
        let edge = registry.add_edge(addr("203.0.113.9")).await.unwrap();

        registry
            .register(edge, "A", "sdr_server", 4535, 4536, "rx")
            .await
            .unwrap();

        let services = registry.list(None).await;
        assert_eq!(services.len(), 1);
        let ad = &services[0];
        assert_eq!(ad.id, "A");
        assert_eq!(ad.svc, "sdr_server");
        assert_eq!(ad.port, 4535);
        assert_eq!(ad.data, 4536);
        assert_eq!(ad.caps, "rx");
        // The advertised address is what we observed, not what the edge said.
        assert_eq!(ad.ip, "203.0.113.9");
    }

    #[tokio::test]
    async fn test_bye_removes_exact_pair() {
        let registry = DiscoveryRegistry::new();
        let edge = registry.add_edge(addr("10.0.0.1")).await.unwrap();
        registry
            .register(edge, "A", "sdr_server", 1, 2, "")
            .await
            .unwrap();
        registry
            .register(edge, "A", "splitter", 3, 4, "")
            .await
            .unwrap();

        registry.unregister(edge, "A", Some("sdr_server")).await;

        let services = registry.list(None).await;
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].svc, "splitter");
    }

    #[tokio::test]
    async fn test_bye_without_svc_removes_all_with_id() {
        let registry = DiscoveryRegistry::new();
        let edge = registry.add_edge(addr("10.0.0.1")).await.unwrap();
        registry
            .register(edge, "A", "sdr_server", 1, 2, "")
            .await
            .unwrap();
        registry
            .register(edge, "A", "splitter", 3, 4, "")
            .await
            .unwrap();
        registry
            .register(edge, "B", "splitter", 5, 6, "")
            .await
            .unwrap();

        registry.unregister(edge, "A", None).await;

        let services = registry.list(None).await;
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].id, "B");
    }

    #[tokio::test]
    async fn test_bye_scoped_to_owning_edge() {
        let registry = DiscoveryRegistry::new();
        let owner = registry.add_edge(addr("10.0.0.1")).await.unwrap();
        let other = registry.add_edge(addr("10.0.0.2")).await.unwrap();
        registry
            .register(owner, "A", "sdr_server", 1, 2, "")
            .await
            .unwrap();

        registry.unregister(other, "A", None).await;

        assert_eq!(registry.list(None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_repeat_helo_updates_in_place() {
        let registry = DiscoveryRegistry::new();
        let edge = registry.add_edge(addr("10.0.0.1")).await.unwrap();
        registry
            .register(edge, "A", "sdr_server", 1, 2, "rx")
            .await
            .unwrap();
        registry
            .register(edge, "A", "sdr_server", 7, 8, "rx tx")
            .await
            .unwrap();

        let services = registry.list(None).await;
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].port, 7);
        assert_eq!(services[0].data, 8);
        assert_eq!(services[0].caps, "rx tx");
    }

    #[tokio::test]
    async fn test_remove_edge_drops_its_services_atomically() {
        let registry = DiscoveryRegistry::new();
        let doomed = registry.add_edge(addr("10.0.0.1")).await.unwrap();
        let survivor = registry.add_edge(addr("10.0.0.2")).await.unwrap();
        registry
            .register(doomed, "A", "sdr_server", 1, 2, "")
            .await
            .unwrap();
        registry
            .register(doomed, "B", "splitter", 3, 4, "")
            .await
            .unwrap();
        registry
            .register(survivor, "C", "sdr_server", 5, 6, "")
            .await
            .unwrap();

        registry.remove_edge(doomed).await;

        let services = registry.list(None).await;
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].id, "C");
        assert_eq!(registry.counts().await, (1, 1));
    }

    #[tokio::test]
    async fn test_find_filters_by_service_type() {
        let registry = DiscoveryRegistry::new();
        let edge = registry.add_edge(addr("10.0.0.1")).await.unwrap();
        registry
            .register(edge, "A", "sdr_server", 1, 2, "")
            .await
            .unwrap();
        registry
            .register(edge, "B", "splitter", 3, 4, "")
            .await
            .unwrap();

        let found = registry.list(Some("splitter")).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "B");

        assert!(registry.list(Some("telem_logger")).await.is_empty());
    }

    #[tokio::test]
    async fn test_edge_cap_enforced() {
        let registry = DiscoveryRegistry::with_config(RegistryConfig::default().max_edges(2));
        registry.add_edge(addr("10.0.0.1")).await.unwrap();
        registry.add_edge(addr("10.0.0.2")).await.unwrap();

        let err = registry.add_edge(addr("10.0.0.3")).await.unwrap_err();
        assert!(matches!(err, RegistryError::EdgeLimit(2)));
    }

    #[tokio::test]
    async fn test_service_cap_rejects_new_but_allows_updates() {
        let registry = DiscoveryRegistry::with_config(RegistryConfig::default().max_services(1));
        let edge = registry.add_edge(addr("10.0.0.1")).await.unwrap();
        registry
            .register(edge, "A", "sdr_server", 1, 2, "")
            .await
            .unwrap();

        let err = registry
            .register(edge, "B", "sdr_server", 3, 4, "")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::ServiceLimit(1)));

        // Refreshing the existing record is always allowed.
        registry
            .register(edge, "A", "sdr_server", 9, 10, "")
            .await
            .unwrap();
        assert_eq!(registry.list(None).await[0].port, 9);
    }

    #[tokio::test]
    async fn test_oversize_strings_truncated() {
        let registry = DiscoveryRegistry::new();
        let edge = registry.add_edge(addr("10.0.0.1")).await.unwrap();
        let long_id = "x".repeat(200);
        registry
            .register(edge, &long_id, "sdr_server", 1, 2, "")
            .await
            .unwrap();

        let services = registry.list(None).await;
        assert_eq!(services[0].id.len(), MAX_ID_LEN);
    }

    #[test]
    fn test_bounded_respects_char_boundaries() {
        // Each 'é' is two bytes; cutting at 3 must back off to 2.
        assert_eq!(bounded("ééé", 3), "é");
        assert_eq!(bounded("abc", 3), "abc");
    }
}
