//! Load balancer implementation with multiple strategies

use parking_lot::{Mutex, RwLock};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::node::registry::{GatewayNode, GatewayRegistry, NodeStatus};

/// Load balancing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Cursor over online gateways in registration order
    #[default]
    #[serde(alias = "RoundRobin")]
    RoundRobin,
    /// Fewest active connections, earliest registration wins ties
    #[serde(alias = "LeastConnections")]
    LeastConnections,
    /// Random draw weighted by health score
    #[serde(alias = "WeightedRandom")]
    WeightedRandom,
    /// Lowest rolling-average latency, higher health score wins ties
    #[serde(alias = "LatencyBased")]
    LatencyBased,
    /// Prefer gateways in the requested region
    #[serde(alias = "RegionAware")]
    RegionAware,
}

impl LoadBalancingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastConnections => "least_connections",
            Self::WeightedRandom => "weighted_random",
            Self::LatencyBased => "latency_based",
            Self::RegionAware => "region_aware",
        }
    }
}

impl fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadBalancingStrategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "roundrobin" => Ok(Self::RoundRobin),
            "leastconnections" => Ok(Self::LeastConnections),
            "weightedrandom" => Ok(Self::WeightedRandom),
            "latencybased" => Ok(Self::LatencyBased),
            "regionaware" => Ok(Self::RegionAware),
            _ => Err(AppError::InvalidRequest(format!("Unknown load balancing strategy '{}'", s))),
        }
    }
}

/// Runtime load-balancing policy. Replaced as a whole on update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancingConfig {
    pub strategy: LoadBalancingStrategy,
    pub health_threshold_percent: f64,
    /// Strategy used inside a matched region and when no region matches
    #[serde(default = "default_region_fallback")]
    pub region_fallback_strategy: LoadBalancingStrategy,
}

fn default_region_fallback() -> LoadBalancingStrategy {
    LoadBalancingStrategy::WeightedRandom
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::default(),
            health_threshold_percent: 70.0,
            region_fallback_strategy: default_region_fallback(),
        }
    }
}

impl LoadBalancingConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.health_threshold_percent.is_finite()
            || !(0.0..=100.0).contains(&self.health_threshold_percent)
        {
            return Err(AppError::InvalidRequest(format!(
                "health_threshold_percent must be within 0-100, got {}",
                self.health_threshold_percent
            )));
        }
        if self.region_fallback_strategy == LoadBalancingStrategy::RegionAware {
            return Err(AppError::InvalidRequest(
                "region_fallback_strategy cannot be region_aware".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shared handle to the live load-balancing policy
pub type SharedLoadBalancingConfig = Arc<RwLock<LoadBalancingConfig>>;

/// Result of a gateway selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub gateway_id: String,
    /// Strategy that made the final pick
    pub strategy: LoadBalancingStrategy,
    /// Set when region-aware selection found no gateway in the requested region
    pub fallback_used: bool,
}

/// Load balancer selecting one gateway per request
pub struct LoadBalancer {
    registry: Arc<GatewayRegistry>,
    config: SharedLoadBalancingConfig,
    round_robin_cursor: Mutex<usize>,
}

impl LoadBalancer {
    /// Create a new load balancer
    pub fn new(registry: Arc<GatewayRegistry>, config: SharedLoadBalancingConfig) -> Self {
        Self {
            registry,
            config,
            round_robin_cursor: Mutex::new(0),
        }
    }

    /// Current policy
    pub fn config(&self) -> LoadBalancingConfig {
        *self.config.read()
    }

    /// Modify the policy in one step; readers see either the old or the new value
    pub fn update_config(
        &self,
        f: impl FnOnce(&mut LoadBalancingConfig),
    ) -> Result<LoadBalancingConfig> {
        let mut current = self.config.write();
        let mut next = *current;
        f(&mut next);
        next.validate()?;
        *current = next;
        drop(current);

        info!(
            strategy = %next.strategy,
            threshold = next.health_threshold_percent,
            fallback = %next.region_fallback_strategy,
            "Updated load balancing config"
        );
        Ok(next)
    }

    /// Select a gateway for a new client or session
    pub fn select(&self, region_hint: Option<&str>) -> Result<Selection> {
        let config = self.config();
        let pool = eligible(
            &self.registry.list(None, Some(NodeStatus::Online)),
            config.health_threshold_percent,
        );

        if pool.is_empty() {
            return Err(AppError::NotAvailable("no online gateway above threshold".to_string()));
        }

        let selection = match config.strategy {
            LoadBalancingStrategy::RegionAware => {
                let fallback = config.region_fallback_strategy;
                let regional = region_hint
                    .map(|region| in_region(&pool, region))
                    .unwrap_or_default();

                if regional.is_empty() {
                    info!(
                        region = region_hint.unwrap_or("<none>"),
                        fallback = %fallback,
                        "No online gateway in requested region, using fallback strategy"
                    );
                    self.pick(fallback, &pool, &config).map(|id| Selection {
                        gateway_id: id,
                        strategy: fallback,
                        fallback_used: true,
                    })
                } else {
                    self.pick(fallback, &regional, &config).map(|id| Selection {
                        gateway_id: id,
                        strategy: LoadBalancingStrategy::RegionAware,
                        fallback_used: false,
                    })
                }
            }
            strategy => self.pick(strategy, &pool, &config).map(|id| Selection {
                gateway_id: id,
                strategy,
                fallback_used: false,
            }),
        };

        let selection = selection
            .ok_or_else(|| AppError::NotAvailable("no gateway eligible for selection".to_string()))?;

        debug!(
            gateway = %selection.gateway_id,
            strategy = %selection.strategy,
            fallback = selection.fallback_used,
            "Selected gateway"
        );

        Ok(selection)
    }

    fn pick(
        &self,
        strategy: LoadBalancingStrategy,
        nodes: &[GatewayNode],
        config: &LoadBalancingConfig,
    ) -> Option<String> {
        match strategy {
            LoadBalancingStrategy::RoundRobin => {
                let mut cursor = self.round_robin_cursor.lock();
                let (index, next) = round_robin(nodes.len(), *cursor)?;
                *cursor = next;
                Some(nodes[index].id.clone())
            }
            LoadBalancingStrategy::LeastConnections => least_connections(nodes).map(|n| n.id.clone()),
            LoadBalancingStrategy::WeightedRandom => {
                weighted_random(nodes, config.health_threshold_percent, &mut rand::thread_rng())
                    .map(|n| n.id.clone())
            }
            LoadBalancingStrategy::LatencyBased => latency_based(nodes).map(|n| n.id.clone()),
            // Never configured as its own fallback; treat as the default secondary
            LoadBalancingStrategy::RegionAware => {
                weighted_random(nodes, config.health_threshold_percent, &mut rand::thread_rng())
                    .map(|n| n.id.clone())
            }
        }
    }
}

/// Nodes whose last known score meets the threshold
pub fn eligible(nodes: &[GatewayNode], threshold: f64) -> Vec<GatewayNode> {
    nodes
        .iter()
        .filter(|n| n.health.health_score >= threshold)
        .cloned()
        .collect()
}

/// Nodes in `region`, compared case-insensitively
pub fn in_region(nodes: &[GatewayNode], region: &str) -> Vec<GatewayNode> {
    nodes
        .iter()
        .filter(|n| n.region.eq_ignore_ascii_case(region))
        .cloned()
        .collect()
}

/// Round-robin step: returns the index to use and the next cursor.
///
/// A cursor left beyond the end by a shrinking pool is clamped to the last
/// node rather than reset.
pub fn round_robin(len: usize, cursor: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let index = cursor.min(len - 1);
    Some((index, (index + 1) % len))
}

/// Node with the fewest active connections; earliest registration wins ties
pub fn least_connections(nodes: &[GatewayNode]) -> Option<&GatewayNode> {
    nodes
        .iter()
        .min_by_key(|n| (n.health.active_connections, n.sequence))
}

/// Random draw weighted by health score; nodes below `threshold` weigh zero
pub fn weighted_random<'a, R: Rng + ?Sized>(
    nodes: &'a [GatewayNode],
    threshold: f64,
    rng: &mut R,
) -> Option<&'a GatewayNode> {
    let weights: Vec<f64> = nodes
        .iter()
        .map(|n| {
            let score = n.health.health_score;
            if score >= threshold && score.is_finite() {
                score.max(0.0)
            } else {
                0.0
            }
        })
        .collect();

    // Errors only when empty or every weight is zero
    let index = WeightedIndex::new(&weights).ok()?;
    Some(&nodes[index.sample(rng)])
}

/// Node with the lowest rolling-average latency; higher score wins ties
pub fn latency_based(nodes: &[GatewayNode]) -> Option<&GatewayNode> {
    nodes.iter().min_by(|a, b| {
        a.health
            .avg_latency_ms
            .total_cmp(&b.health.avg_latency_ms)
            .then(b.health.health_score.total_cmp(&a.health.health_score))
            .then(a.sequence.cmp(&b.sequence))
    })
}
