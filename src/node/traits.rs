//! Collaborator interface exposed by every managed gateway

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::node::registry::GatewayNode;

/// Metrics returned by a gateway's health-report endpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// CPU utilisation, 0-100
    pub cpu_pct: f64,

    /// Memory utilisation, 0-100
    pub mem_pct: f64,

    /// Connections currently open on the gateway
    pub active_connections: u64,

    /// Latency observed by the gateway for its most recent requests
    pub latency_ms: f64,
}

/// Body sent to a gateway's configuration-apply endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigApplyRequest {
    pub config_type: String,
    pub payload: serde_json::Value,
}

/// Client used to talk to managed gateways.
///
/// One client serves the whole fleet; implementations address the node
/// through its endpoint. Errors are classified with
/// [`AppError::is_retryable`](crate::error::AppError::is_retryable):
/// return `AppError::Rejected` when the gateway refuses a payload outright.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Fetch the current metrics of a gateway
    async fn fetch_health(&self, node: &GatewayNode) -> Result<HealthReport>;

    /// Push a configuration change to a gateway
    async fn apply_config(&self, node: &GatewayNode, request: &ConfigApplyRequest) -> Result<()>;
}
