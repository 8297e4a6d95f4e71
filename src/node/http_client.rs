//! HTTP client for the gateway health-report and configuration-apply endpoints

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::node::registry::GatewayNode;
use crate::node::traits::{ConfigApplyRequest, GatewayClient, HealthReport};

/// Reqwest-backed [`GatewayClient`]
pub struct HttpGatewayClient {
    client: Client,
    health_path: String,
    config_path: String,
}

/// Acknowledgement body some gateways return from the apply endpoint
#[derive(Debug, Deserialize)]
struct ApplyAck {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

fn default_success() -> bool {
    true
}

impl HttpGatewayClient {
    /// Create a new client; `timeout_ms` bounds every request at the transport level
    pub fn new(timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            health_path: "/health".to_string(),
            config_path: "/config".to_string(),
        })
    }

    /// Override the endpoint paths
    pub fn with_paths(mut self, health_path: impl Into<String>, config_path: impl Into<String>) -> Self {
        self.health_path = health_path.into();
        self.config_path = config_path.into();
        self
    }

    fn url(node: &GatewayNode, path: &str) -> String {
        format!("{}{}", node.endpoint.trim_end_matches('/'), path)
    }
}

fn transport_error(node: &GatewayNode, e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(format!("Request to gateway {} timed out", node.id))
    } else {
        AppError::Transport(format!("Gateway {} unreachable: {}", node.id, e))
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    async fn fetch_health(&self, node: &GatewayNode) -> Result<HealthReport> {
        let url = Self::url(node, &self.health_path);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(node, e))?;

        if !response.status().is_success() {
            return Err(AppError::Transport(format!(
                "Gateway {} health endpoint returned {}",
                node.id,
                response.status()
            )));
        }

        let report = response
            .json::<HealthReport>()
            .await
            .map_err(|e| AppError::Transport(format!("Invalid health report from {}: {}", node.id, e)))?;

        debug!(gateway = %node.id, cpu = report.cpu_pct, mem = report.mem_pct, "Fetched health report");
        Ok(report)
    }

    async fn apply_config(&self, node: &GatewayNode, request: &ConfigApplyRequest) -> Result<()> {
        let url = Self::url(node, &self.config_path);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error(node, e))?;

        let status = response.status();
        if status.is_client_error() && status != StatusCode::REQUEST_TIMEOUT && status != StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Rejected(format!(
                "Gateway {} rejected {} config ({}): {}",
                node.id, request.config_type, status, body
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Transport(format!(
                "Gateway {} returned {}: {}",
                node.id, status, body
            )));
        }

        // An empty body is an acknowledgement; a JSON body may still report failure
        let body = response.text().await.map_err(|e| transport_error(node, e))?;
        if body.trim().is_empty() {
            return Ok(());
        }
        match serde_json::from_str::<ApplyAck>(&body) {
            Ok(ack) if !ack.success => Err(AppError::Transport(format!(
                "Gateway {} failed to apply {}: {}",
                node.id,
                request.config_type,
                ack.message.unwrap_or_else(|| "no reason given".to_string())
            ))),
            _ => Ok(()),
        }
    }
}
