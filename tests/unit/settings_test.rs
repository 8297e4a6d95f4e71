//! Settings loading from files and the environment

use std::io::Write;

use gateway_orchestrator::config::Settings;
use gateway_orchestrator::error::AppError;
use gateway_orchestrator::gateway::load_balancer::LoadBalancingStrategy;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load_from_path(dir.path().join("absent.toml")).unwrap();

    assert_eq!(settings.server.port, 8080);
    assert!(settings.orchestration.enabled);
    assert_eq!(settings.orchestration.load_balancing_strategy, LoadBalancingStrategy::RoundRobin);
    assert_eq!(settings.orchestration.health_threshold_percent, 70.0);
    assert_eq!(settings.distribution.batch_size, 5);
    assert_eq!(settings.distribution.retry_count, 3);
    assert_eq!(settings.health.eviction_limit, 3);
    assert!(settings.gateways.is_empty());
}

#[test]
fn test_load_from_file() {
    let file = write_config(
        r#"
[server]
port = 9090

[orchestration]
load_balancing_strategy = "least_connections"
health_threshold_percent = 60.0

[distribution]
batch_size = 10
retry_delay_ms = 250

[health]
interval_secs = 5

[[gateways]]
id = "edge-eu-1"
region = "eu-west"
endpoint = "http://10.0.0.11:9000"

[[gateways]]
id = "edge-us-1"
endpoint = "http://10.0.1.11:9000"
"#,
    );

    let settings = Settings::load_from_path(file.path()).unwrap();
    assert_eq!(settings.server.port, 9090);
    assert_eq!(
        settings.orchestration.load_balancing_strategy,
        LoadBalancingStrategy::LeastConnections
    );

    let lb = settings.orchestration.load_balancing();
    assert_eq!(lb.health_threshold_percent, 60.0);
    assert_eq!(lb.region_fallback_strategy, LoadBalancingStrategy::WeightedRandom);

    assert_eq!(settings.distribution.batch_size, 10);
    assert_eq!(settings.distribution.retry_delay_ms, 250);
    assert_eq!(settings.health.interval_secs, 5);
    assert_eq!(settings.gateways.len(), 2);
    assert_eq!(settings.gateways[1].region, "default");
}

#[test]
fn test_invalid_file_is_rejected() {
    let file = write_config(
        r#"
[orchestration]
health_threshold_percent = 140.0
"#,
    );
    assert!(matches!(Settings::load_from_path(file.path()), Err(AppError::Config(_))));

    let file = write_config(
        r#"
[orchestration]
region_fallback_strategy = "region_aware"
"#,
    );
    assert!(Settings::load_from_path(file.path()).is_err());

    let file = write_config(
        r#"
[distribution]
batch_size = 0
"#,
    );
    assert!(Settings::load_from_path(file.path()).is_err());
}

#[test]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
[health]
latency_window = 5
"#,
    );

    std::env::set_var("GW_ORCH__HEALTH__LATENCY_WINDOW", "25");
    let settings = Settings::load_from_path(file.path());
    std::env::remove_var("GW_ORCH__HEALTH__LATENCY_WINDOW");

    assert_eq!(settings.unwrap().health.latency_window, 25);
}

#[test]
fn test_default_settings_validate() {
    assert!(Settings::default().validate().is_ok());

    let mut settings = Settings::default();
    settings.health.latency_ceiling_ms = 0.0;
    assert!(settings.validate().is_err());
}
