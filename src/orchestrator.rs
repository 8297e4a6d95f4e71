//! Orchestrator facade composing the registry, health monitor, load balancer
//! and configuration distributor

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::distribution::{
    ConfigDistributor, ConfigurationDistribution, DistributionReceipt, DistributionTargets,
};
use crate::error::{AppError, Result};
use crate::gateway::health_check::{HealthMonitor, HealthSummary};
use crate::gateway::load_balancer::{
    LoadBalancer, LoadBalancingConfig, LoadBalancingStrategy, Selection,
};
use crate::node::registry::{GatewayDescriptor, GatewayNode, GatewayRegistry, NodeStatus};
use crate::node::traits::GatewayClient;

/// Feature flags reported by the status endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrchestrationFeatures {
    pub load_balancing: bool,
    pub configuration_distribution: bool,
    pub health_monitoring: bool,
}

/// Aggregate orchestration status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestrationStatus {
    pub enabled: bool,
    pub ha_enabled: bool,
    pub features: OrchestrationFeatures,
    pub active_distributions: usize,
    pub succeeded_distributions: usize,
    pub failed_distributions: usize,
    pub gateways_managed: usize,
    pub gateways: HealthSummary,
    pub load_balancing_strategy: LoadBalancingStrategy,
    pub health_check_threshold: f64,
}

/// Single entry point for everything the management surface can do
pub struct Orchestrator {
    enabled: bool,
    ha_enabled: bool,
    /// Set by `shutdown`; no node is contacted afterwards
    stopped: AtomicBool,
    registry: Arc<GatewayRegistry>,
    load_balancer: LoadBalancer,
    health_monitor: HealthMonitor,
    distributor: ConfigDistributor,
}

impl Orchestrator {
    /// Build the orchestrator from static settings and a gateway client
    pub fn new(settings: &Settings, client: Arc<dyn GatewayClient>) -> Result<Self> {
        Self::with_registry(settings, client, Arc::new(GatewayRegistry::new()))
    }

    /// Build the orchestrator around an existing registry
    pub fn with_registry(
        settings: &Settings,
        client: Arc<dyn GatewayClient>,
        registry: Arc<GatewayRegistry>,
    ) -> Result<Self> {
        let lb_config = settings.orchestration.load_balancing();
        lb_config.validate()?;
        let lb_config = Arc::new(RwLock::new(lb_config));

        let load_balancer = LoadBalancer::new(registry.clone(), lb_config.clone());
        let health_monitor = HealthMonitor::new(
            registry.clone(),
            client.clone(),
            lb_config,
            settings.health.clone(),
        );
        let distributor =
            ConfigDistributor::new(registry.clone(), client, settings.distribution.clone());

        Ok(Self {
            enabled: settings.orchestration.enabled,
            ha_enabled: settings.orchestration.ha_enabled,
            stopped: AtomicBool::new(false),
            registry,
            load_balancer,
            health_monitor,
            distributor,
        })
    }

    /// Start background health monitoring
    pub async fn start(&self) {
        if !self.enabled {
            warn!("Orchestration disabled; health monitor not started");
            return;
        }
        if self.stopped.load(Ordering::SeqCst) {
            warn!("Orchestrator already shut down; health monitor not restarted");
            return;
        }
        self.health_monitor.start().await;
        info!(gateways = self.registry.len(), "Orchestrator started");
    }

    /// Stop health monitoring and abandon unresolved distributions
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.health_monitor.stop().await;
        self.distributor.shutdown();
        info!("Orchestrator stopped");
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(AppError::Disabled)
        }
    }

    pub fn registry(&self) -> &Arc<GatewayRegistry> {
        &self.registry
    }

    pub fn health_monitor(&self) -> &HealthMonitor {
        &self.health_monitor
    }

    /// Register a gateway and poll it once so it can serve straight away
    pub async fn register_gateway(&self, descriptor: GatewayDescriptor) -> Result<GatewayNode> {
        let id = self.registry.register(descriptor)?;
        if self.enabled && !self.stopped.load(Ordering::SeqCst) {
            return self.health_monitor.check_now(&id).await;
        }
        self.registry.get(&id)
    }

    /// Remove a gateway; its unresolved distribution targets become Failed
    pub fn deregister_gateway(&self, id: &str) -> Result<GatewayNode> {
        let node = self.registry.deregister(id)?;
        let failed = self.distributor.handle_deregistration(id);
        if failed > 0 {
            info!(gateway = %id, targets = failed, "Failed in-flight distribution targets of removed gateway");
        }
        Ok(node)
    }

    pub fn list_gateways(&self, region: Option<&str>, status: Option<NodeStatus>) -> Vec<GatewayNode> {
        self.registry.list(region, status)
    }

    pub fn get_gateway(&self, id: &str) -> Result<GatewayNode> {
        self.registry.get(id)
    }

    /// Pick a gateway for a new client or session
    pub fn select_optimal_gateway(&self, region_hint: Option<&str>) -> Result<Selection> {
        self.ensure_enabled()?;
        self.load_balancer.select(region_hint)
    }

    /// Submit a configuration change; processing continues in the background
    pub fn distribute_configuration(
        &self,
        config_type: &str,
        payload: serde_json::Value,
        targets: DistributionTargets,
    ) -> Result<String> {
        self.ensure_enabled()?;
        self.distributor.distribute(config_type, payload, targets)
    }

    /// Submit a configuration change, returning its id and the status it
    /// was recorded with
    pub fn submit_configuration(
        &self,
        config_type: &str,
        payload: serde_json::Value,
        targets: DistributionTargets,
    ) -> Result<DistributionReceipt> {
        self.ensure_enabled()?;
        self.distributor.submit(config_type, payload, targets)
    }

    pub fn get_distribution_status(&self, id: &str) -> Result<ConfigurationDistribution> {
        self.distributor.get_status(id)
    }

    pub fn list_distributions(&self, include_completed: bool) -> Vec<ConfigurationDistribution> {
        self.distributor.list(include_completed)
    }

    /// Wait for a distribution to finish
    pub async fn wait_for_distribution(&self, id: &str) -> Result<ConfigurationDistribution> {
        self.distributor.wait(id).await
    }

    pub fn get_load_balancing_config(&self) -> LoadBalancingConfig {
        self.load_balancer.config()
    }

    /// Set strategy and threshold together, then re-derive node status
    pub fn update_load_balancing_config(
        &self,
        strategy: LoadBalancingStrategy,
        health_threshold_percent: f64,
    ) -> Result<LoadBalancingConfig> {
        self.apply_load_balancing_config(|config| {
            config.strategy = strategy;
            config.health_threshold_percent = health_threshold_percent;
        })
    }

    /// Replace the whole policy, including the region fallback
    pub fn replace_load_balancing_config(&self, next: LoadBalancingConfig) -> Result<LoadBalancingConfig> {
        self.apply_load_balancing_config(|config| *config = next)
    }

    fn apply_load_balancing_config(
        &self,
        f: impl FnOnce(&mut LoadBalancingConfig),
    ) -> Result<LoadBalancingConfig> {
        let config = self.load_balancer.update_config(f)?;
        self.health_monitor.reclassify();
        Ok(config)
    }

    pub fn health_summary(&self) -> HealthSummary {
        self.health_monitor.health_summary()
    }

    /// Aggregate counts and the current policy
    pub async fn get_orchestration_status(&self) -> OrchestrationStatus {
        let stats = self.distributor.stats();
        let lb_config = self.load_balancer.config();
        let gateways = self.health_monitor.health_summary();

        OrchestrationStatus {
            enabled: self.enabled,
            ha_enabled: self.ha_enabled,
            features: OrchestrationFeatures {
                load_balancing: self.enabled,
                configuration_distribution: self.enabled,
                health_monitoring: self.health_monitor.is_running().await,
            },
            active_distributions: stats.active,
            succeeded_distributions: stats.succeeded,
            failed_distributions: stats.failed,
            gateways_managed: gateways.total,
            gateways,
            load_balancing_strategy: lb_config.strategy,
            health_check_threshold: lb_config.health_threshold_percent,
        }
    }
}
