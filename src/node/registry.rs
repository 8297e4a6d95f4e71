//! Registry of managed gateway nodes

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Derived serving status of a gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Degraded,
    Offline,
}

impl std::str::FromStr for NodeStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "degraded" => Ok(Self::Degraded),
            "offline" => Ok(Self::Offline),
            other => Err(AppError::InvalidRequest(format!("Unknown gateway status '{}'", other))),
        }
    }
}

/// Latest metrics of a gateway as seen by the health monitor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub active_connections: u64,
    /// Rolling average over the latency window
    pub avg_latency_ms: f64,
    pub consecutive_failures: u32,
    /// Composite score in [0, 100]
    pub health_score: f64,
}

/// Registration request for a gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayDescriptor {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub region: String,
    pub endpoint: String,
}

/// Point-in-time view of a registered gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayNode {
    pub id: String,
    pub region: String,
    pub endpoint: String,
    pub status: NodeStatus,
    pub health: HealthSnapshot,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    /// Registration order, used for deterministic tie-breaks
    pub sequence: u64,
}

/// Mutable health state of a node, written only by the health monitor
#[derive(Debug, Clone)]
pub(crate) struct NodeHealth {
    pub status: NodeStatus,
    pub snapshot: HealthSnapshot,
    pub latency_samples: VecDeque<f64>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Default for NodeHealth {
    fn default() -> Self {
        Self {
            // Unverified until the first successful poll
            status: NodeStatus::Offline,
            snapshot: HealthSnapshot::default(),
            latency_samples: VecDeque::new(),
            last_heartbeat: None,
        }
    }
}

struct NodeEntry {
    id: String,
    region: String,
    endpoint: String,
    registered_at: DateTime<Utc>,
    sequence: u64,
    health: RwLock<NodeHealth>,
}

impl NodeEntry {
    fn view(&self) -> GatewayNode {
        let health = self.health.read();
        GatewayNode {
            id: self.id.clone(),
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            status: health.status,
            health: health.snapshot.clone(),
            last_heartbeat: health.last_heartbeat,
            registered_at: self.registered_at,
            sequence: self.sequence,
        }
    }
}

/// Authoritative store of gateway nodes.
///
/// Nodes are kept in registration order. Readers always see the live set;
/// every accessor returns owned views so no lock outlives the call.
pub struct GatewayRegistry {
    nodes: RwLock<Vec<Arc<NodeEntry>>>,
    next_sequence: AtomicU64,
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Register a gateway and return its id.
    ///
    /// Registering the same id again with identical region and endpoint is a
    /// no-op; any other re-use of an id fails with `DuplicateId`.
    pub fn register(&self, descriptor: GatewayDescriptor) -> Result<String> {
        if descriptor.endpoint.trim().is_empty() {
            return Err(AppError::InvalidRequest("Gateway endpoint cannot be empty".to_string()));
        }

        let id = match descriptor.id {
            Some(id) if id.trim().is_empty() => {
                return Err(AppError::InvalidRequest("Gateway id cannot be empty".to_string()));
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };

        let mut nodes = self.nodes.write();
        if let Some(existing) = nodes.iter().find(|n| n.id == id) {
            if existing.region == descriptor.region && existing.endpoint == descriptor.endpoint {
                return Ok(id);
            }
            return Err(AppError::DuplicateId(id));
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        nodes.push(Arc::new(NodeEntry {
            id: id.clone(),
            region: descriptor.region,
            endpoint: descriptor.endpoint,
            registered_at: Utc::now(),
            sequence,
            health: RwLock::new(NodeHealth::default()),
        }));

        info!(gateway = %id, total = nodes.len(), "Registered gateway");
        Ok(id)
    }

    /// Remove a gateway, returning its last known state
    pub fn deregister(&self, id: &str) -> Result<GatewayNode> {
        let mut nodes = self.nodes.write();
        let index = nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| AppError::NotFound(format!("gateway {}", id)))?;
        let entry = nodes.remove(index);

        info!(gateway = %id, total = nodes.len(), "Deregistered gateway");
        Ok(entry.view())
    }

    /// List gateways in registration order, optionally filtered
    pub fn list(&self, region: Option<&str>, status: Option<NodeStatus>) -> Vec<GatewayNode> {
        self.entries()
            .iter()
            .filter(|n| region.map_or(true, |r| n.region.eq_ignore_ascii_case(r)))
            .map(|n| n.view())
            .filter(|n| status.map_or(true, |s| n.status == s))
            .collect()
    }

    /// Get a single gateway
    pub fn get(&self, id: &str) -> Result<GatewayNode> {
        self.entry(id)
            .map(|n| n.view())
            .ok_or_else(|| AppError::NotFound(format!("gateway {}", id)))
    }

    /// Whether a gateway is currently registered
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.read().iter().any(|n| n.id == id)
    }

    /// Number of registered gateways
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of all registered gateways in registration order
    pub fn ids(&self) -> Vec<String> {
        self.nodes.read().iter().map(|n| n.id.clone()).collect()
    }

    /// Run `f` against a node's health state under its own write lock
    pub(crate) fn update_health<R>(&self, id: &str, f: impl FnOnce(&mut NodeHealth) -> R) -> Option<R> {
        let entry = self.entry(id)?;
        let mut health = entry.health.write();
        Some(f(&mut health))
    }

    fn entry(&self, id: &str) -> Option<Arc<NodeEntry>> {
        self.nodes.read().iter().find(|n| n.id == id).cloned()
    }

    fn entries(&self) -> Vec<Arc<NodeEntry>> {
        self.nodes.read().clone()
    }
}
