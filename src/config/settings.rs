//! Application settings and configuration management

use crate::error::{AppError, Result};
use crate::gateway::load_balancer::{LoadBalancingConfig, LoadBalancingStrategy};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub distribution: DistributionConfig,
    #[serde(default)]
    pub gateways: Vec<GatewayConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Process-wide orchestration switches and the initial balancing policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestrationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub ha_enabled: bool,
    #[serde(default)]
    pub load_balancing_strategy: LoadBalancingStrategy,
    #[serde(default = "default_health_threshold")]
    pub health_threshold_percent: f64,
    #[serde(default = "default_fallback_strategy")]
    pub region_fallback_strategy: LoadBalancingStrategy,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ha_enabled: false,
            load_balancing_strategy: LoadBalancingStrategy::default(),
            health_threshold_percent: default_health_threshold(),
            region_fallback_strategy: default_fallback_strategy(),
        }
    }
}

impl OrchestrationConfig {
    /// Initial load-balancing configuration derived from the static settings
    pub fn load_balancing(&self) -> LoadBalancingConfig {
        LoadBalancingConfig {
            strategy: self.load_balancing_strategy,
            health_threshold_percent: self.health_threshold_percent,
            region_fallback_strategy: self.region_fallback_strategy,
        }
    }
}

fn default_health_threshold() -> f64 {
    70.0
}

fn default_fallback_strategy() -> LoadBalancingStrategy {
    LoadBalancingStrategy::WeightedRandom
}

/// Health monitor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_health_timeout")]
    pub timeout_ms: u64,
    /// Consecutive failed polls after which a node is Offline
    #[serde(default = "default_eviction_limit")]
    pub eviction_limit: u32,
    /// Connection count treated as a fully loaded node
    #[serde(default = "default_connection_capacity")]
    pub connection_capacity: u64,
    /// Latency at or above which the latency component scores zero
    #[serde(default = "default_latency_ceiling")]
    pub latency_ceiling_ms: f64,
    /// Number of latency samples kept for the rolling average
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
            timeout_ms: default_health_timeout(),
            eviction_limit: default_eviction_limit(),
            connection_capacity: default_connection_capacity(),
            latency_ceiling_ms: default_latency_ceiling(),
            latency_window: default_latency_window(),
        }
    }
}

fn default_health_interval() -> u64 {
    30
}

fn default_health_timeout() -> u64 {
    5000
}

fn default_eviction_limit() -> u32 {
    3
}

fn default_connection_capacity() -> u64 {
    1000
}

fn default_latency_ceiling() -> f64 {
    1000.0
}

fn default_latency_window() -> usize {
    10
}

/// Longest accepted pause between retries of one target (one hour)
pub const MAX_RETRY_DELAY_MS: u64 = 60 * 60 * 1000;

/// Configuration distribution settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DistributionConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_apply_timeout")]
    pub apply_timeout_ms: u64,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay(),
            apply_timeout_ms: default_apply_timeout(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_batch_size() -> usize {
    5
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_apply_timeout() -> u64 {
    10000
}

fn default_max_payload_bytes() -> usize {
    1024 * 1024
}

/// Gateway registered at startup
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    pub id: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub endpoint: String,
}

fn default_region() -> String {
    "default".to_string()
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("orchestration.enabled", true)?
            .set_default("distribution.batch_size", 5)?
            .set_default("distribution.retry_count", 3)?
            .set_default("distribution.retry_delay_ms", 1000)?
            // Load from configuration file
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables (prefixed with GW_ORCH__)
            .add_source(
                Environment::with_prefix("GW_ORCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0".to_string()));
        }

        let orchestration = &self.orchestration;
        if !(0.0..=100.0).contains(&orchestration.health_threshold_percent) {
            return Err(invalid(format!(
                "health_threshold_percent must be within 0-100, got {}",
                orchestration.health_threshold_percent
            )));
        }
        if orchestration.region_fallback_strategy == LoadBalancingStrategy::RegionAware {
            return Err(invalid(
                "region_fallback_strategy cannot be region_aware".to_string(),
            ));
        }

        if self.distribution.batch_size == 0 {
            return Err(invalid("distribution.batch_size must be at least 1".to_string()));
        }
        if self.distribution.retry_delay_ms > MAX_RETRY_DELAY_MS {
            return Err(invalid(format!(
                "distribution.retry_delay_ms must be at most {}, got {}",
                MAX_RETRY_DELAY_MS, self.distribution.retry_delay_ms
            )));
        }

        let health = &self.health;
        if health.interval_secs == 0 {
            return Err(invalid("health.interval_secs must be at least 1".to_string()));
        }
        if health.eviction_limit == 0 {
            return Err(invalid("health.eviction_limit must be at least 1".to_string()));
        }
        if health.connection_capacity == 0 || health.latency_ceiling_ms <= 0.0 {
            return Err(invalid(
                "health.connection_capacity and health.latency_ceiling_ms must be positive".to_string(),
            ));
        }
        if health.latency_window == 0 {
            return Err(invalid("health.latency_window must be at least 1".to_string()));
        }

        for gateway in &self.gateways {
            if gateway.id.is_empty() {
                return Err(invalid("Gateway id cannot be empty".to_string()));
            }
            if gateway.endpoint.is_empty() {
                return Err(invalid(format!(
                    "Gateway '{}' must have an endpoint",
                    gateway.id
                )));
            }
        }

        Ok(())
    }
}

fn invalid(message: String) -> AppError {
    AppError::Config(config::ConfigError::Message(message))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            orchestration: OrchestrationConfig::default(),
            health: HealthConfig::default(),
            distribution: DistributionConfig::default(),
            gateways: vec![],
        }
    }
}
