//! In-memory gateway fleet shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gateway_orchestrator::config::Settings;
use gateway_orchestrator::error::{AppError, Result};
use gateway_orchestrator::gateway::load_balancer::LoadBalancingStrategy;
use gateway_orchestrator::node::registry::{GatewayDescriptor, GatewayNode};
use gateway_orchestrator::node::traits::{ConfigApplyRequest, GatewayClient, HealthReport};
use gateway_orchestrator::Orchestrator;

/// How a fake gateway answers configuration pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyBehavior {
    Fail,
    Reject,
    Hang,
}

#[derive(Default)]
pub struct FakeFleet {
    pub reports: DashMap<String, HealthReport>,
    pub apply_behavior: DashMap<String, ApplyBehavior>,
    pub apply_calls: DashMap<String, usize>,
    pub health_calls: AtomicUsize,
    pub apply_delay_ms: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeFleet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self, id: &str) -> usize {
        self.apply_calls.get(id).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl GatewayClient for FakeFleet {
    async fn fetch_health(&self, node: &GatewayNode) -> Result<HealthReport> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        self.reports
            .get(&node.id)
            .map(|r| *r)
            .ok_or_else(|| AppError::Transport(format!("{} unreachable", node.id)))
    }

    async fn apply_config(&self, node: &GatewayNode, _request: &ConfigApplyRequest) -> Result<()> {
        *self.apply_calls.entry(node.id.clone()).or_insert(0) += 1;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = self.apply_delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let behavior = self.apply_behavior.get(&node.id).map(|b| *b);
        let result = match behavior {
            None => Ok(()),
            Some(ApplyBehavior::Fail) => Err(AppError::Transport("apply failed".to_string())),
            Some(ApplyBehavior::Reject) => Err(AppError::Rejected("unknown listener".to_string())),
            Some(ApplyBehavior::Hang) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return std::future::pending().await;
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Scores about 90 with the default health settings
pub fn healthy_report() -> HealthReport {
    HealthReport {
        cpu_pct: 10.0,
        mem_pct: 20.0,
        active_connections: 50,
        latency_ms: 20.0,
    }
}

/// Scores about 10 with the default health settings
pub fn unhealthy_report() -> HealthReport {
    HealthReport {
        cpu_pct: 95.0,
        mem_pct: 90.0,
        active_connections: 900,
        latency_ms: 800.0,
    }
}

pub fn settings(strategy: LoadBalancingStrategy) -> Settings {
    let mut settings = Settings::default();
    settings.orchestration.load_balancing_strategy = strategy;
    settings.orchestration.health_threshold_percent = 70.0;
    settings.distribution.batch_size = 2;
    settings.distribution.retry_count = 3;
    settings.distribution.retry_delay_ms = 10;
    settings.distribution.apply_timeout_ms = 60_000;
    settings
}

pub fn orchestrator(settings: &Settings, fleet: &Arc<FakeFleet>) -> Orchestrator {
    Orchestrator::new(settings, fleet.clone()).expect("valid settings")
}

/// Register a gateway that reports `report`, polled once on registration
pub async fn add_gateway(
    orchestrator: &Orchestrator,
    fleet: &FakeFleet,
    id: &str,
    region: &str,
    report: HealthReport,
) -> GatewayNode {
    fleet.reports.insert(id.to_string(), report);
    orchestrator
        .register_gateway(GatewayDescriptor {
            id: Some(id.to_string()),
            region: region.to_string(),
            endpoint: format!("http://{}.edge.internal:9000", id),
        })
        .await
        .expect("registration succeeds")
}
