//! Request handlers for the orchestration API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::distribution::{ConfigurationDistribution, DistributionReceipt, DistributionTargets};
use crate::error::Result;
use crate::gateway::load_balancer::{LoadBalancingConfig, LoadBalancingStrategy, Selection};
use crate::node::registry::{GatewayDescriptor, GatewayNode, NodeStatus};
use crate::orchestrator::OrchestrationStatus;
use crate::AppState;

/// Load-balancing update body; the fallback strategy is optional
#[derive(Debug, Deserialize)]
pub struct LoadBalancingUpdate {
    pub strategy: LoadBalancingStrategy,
    pub health_threshold_percent: f64,
    #[serde(default)]
    pub region_fallback_strategy: Option<LoadBalancingStrategy>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SelectGatewayRequest {
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DistributeRequest {
    pub config_type: String,
    pub config_data: serde_json::Value,
    /// Omitted means every gateway Online right now
    #[serde(default)]
    pub target_gateways: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ListDistributionsQuery {
    #[serde(default)]
    pub include_completed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListGatewaysQuery {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub status: Option<NodeStatus>,
}

/// Liveness check
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn orchestration_status(State(state): State<Arc<AppState>>) -> Json<OrchestrationStatus> {
    Json(state.orchestrator.get_orchestration_status().await)
}

pub async fn get_load_balancing(State(state): State<Arc<AppState>>) -> Json<LoadBalancingConfig> {
    Json(state.orchestrator.get_load_balancing_config())
}

pub async fn update_load_balancing(
    State(state): State<Arc<AppState>>,
    Json(update): Json<LoadBalancingUpdate>,
) -> Result<Json<LoadBalancingConfig>> {
    let orchestrator = &state.orchestrator;
    let config = match update.region_fallback_strategy {
        Some(fallback) => orchestrator.replace_load_balancing_config(LoadBalancingConfig {
            strategy: update.strategy,
            health_threshold_percent: update.health_threshold_percent,
            region_fallback_strategy: fallback,
        })?,
        None => orchestrator
            .update_load_balancing_config(update.strategy, update.health_threshold_percent)?,
    };
    Ok(Json(config))
}

pub async fn select_gateway(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SelectGatewayRequest>,
) -> Result<Json<Selection>> {
    let selection = state
        .orchestrator
        .select_optimal_gateway(request.region.as_deref())?;
    Ok(Json(selection))
}

pub async fn distribute(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DistributeRequest>,
) -> Result<(StatusCode, Json<DistributionReceipt>)> {
    let receipt = state.orchestrator.submit_configuration(
        &request.config_type,
        request.config_data,
        DistributionTargets::from(request.target_gateways),
    )?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

pub async fn get_distribution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConfigurationDistribution>> {
    Ok(Json(state.orchestrator.get_distribution_status(&id)?))
}

pub async fn list_distributions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListDistributionsQuery>,
) -> Json<Vec<ConfigurationDistribution>> {
    Json(state.orchestrator.list_distributions(query.include_completed))
}

pub async fn list_gateways(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListGatewaysQuery>,
) -> Json<Vec<GatewayNode>> {
    Json(
        state
            .orchestrator
            .list_gateways(query.region.as_deref(), query.status),
    )
}

pub async fn register_gateway(
    State(state): State<Arc<AppState>>,
    Json(descriptor): Json<GatewayDescriptor>,
) -> Result<(StatusCode, Json<GatewayNode>)> {
    let node = state.orchestrator.register_gateway(descriptor).await?;
    info!(gateway = %node.id, status = ?node.status, "Gateway registered via API");
    Ok((StatusCode::CREATED, Json(node)))
}

pub async fn get_gateway(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<GatewayNode>> {
    Ok(Json(state.orchestrator.get_gateway(&id)?))
}

pub async fn deregister_gateway(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<GatewayNode>> {
    Ok(Json(state.orchestrator.deregister_gateway(&id)?))
}
