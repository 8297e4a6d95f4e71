//! Configuration module

mod settings;

pub use settings::{
    DistributionConfig, GatewayConfig, HealthConfig, LoggingConfig, OrchestrationConfig,
    ServerConfig, Settings, MAX_RETRY_DELAY_MS,
};
