//! HTTP gateway client against mock gateways

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gateway_orchestrator::config::Settings;
use gateway_orchestrator::distribution::{DistributionStatus, DistributionTargets, TargetPhase};
use gateway_orchestrator::error::AppError;
use gateway_orchestrator::node::http_client::HttpGatewayClient;
use gateway_orchestrator::node::registry::{GatewayDescriptor, GatewayNode, GatewayRegistry, NodeStatus};
use gateway_orchestrator::node::traits::{ConfigApplyRequest, GatewayClient};
use gateway_orchestrator::Orchestrator;

fn node_for(server: &MockServer) -> GatewayNode {
    let registry = GatewayRegistry::new();
    let id = registry
        .register(GatewayDescriptor {
            id: Some("gw-mock".to_string()),
            region: "eu-west".to_string(),
            endpoint: server.uri(),
        })
        .unwrap();
    registry.get(&id).unwrap()
}

fn routes_request() -> ConfigApplyRequest {
    ConfigApplyRequest {
        config_type: "routes".to_string(),
        payload: json!({"routes": [{"path": "/api"}]}),
    }
}

#[tokio::test]
async fn test_fetch_health_report() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cpu_pct": 12.5,
            "mem_pct": 40.0,
            "active_connections": 17,
            "latency_ms": 8.0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpGatewayClient::new(1000).unwrap();
    let report = client.fetch_health(&node_for(&server)).await.unwrap();
    assert_eq!(report.cpu_pct, 12.5);
    assert_eq!(report.active_connections, 17);
}

#[tokio::test]
async fn test_fetch_health_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = HttpGatewayClient::new(1000).unwrap();
    let result = client.fetch_health(&node_for(&server)).await;
    assert!(matches!(result, Err(AppError::Transport(_))));
}

#[tokio::test]
async fn test_fetch_health_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let client = HttpGatewayClient::new(50).unwrap();
    let result = client.fetch_health(&node_for(&server)).await;
    assert!(matches!(result, Err(AppError::Timeout(_))));
}

#[tokio::test]
async fn test_apply_config_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/config"))
        .and(body_partial_json(json!({"config_type": "routes"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpGatewayClient::new(1000).unwrap();
    client
        .apply_config(&node_for(&server), &routes_request())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_apply_config_client_error_is_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/config"))
        .respond_with(ResponseTemplate::new(400).set_body_string("unknown upstream"))
        .mount(&server)
        .await;

    let client = HttpGatewayClient::new(1000).unwrap();
    let error = client
        .apply_config(&node_for(&server), &routes_request())
        .await
        .unwrap_err();
    assert!(matches!(error, AppError::Rejected(_)));
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn test_apply_config_negative_ack() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/config"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": false, "message": "reload failed"})),
        )
        .mount(&server)
        .await;

    let client = HttpGatewayClient::new(1000).unwrap();
    let error = client
        .apply_config(&node_for(&server), &routes_request())
        .await
        .unwrap_err();
    assert!(matches!(error, AppError::Transport(_)));
    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_custom_paths() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/apply"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpGatewayClient::new(1000)
        .unwrap()
        .with_paths("/admin/health", "/admin/apply");
    client
        .apply_config(&node_for(&server), &routes_request())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_orchestrator_end_to_end_with_retries() {
    let healthy = MockServer::start().await;
    let flaky = MockServer::start().await;
    for server in [&healthy, &flaky] {
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cpu_pct": 10.0,
                "mem_pct": 20.0,
                "active_connections": 5,
                "latency_ms": 10.0
            })))
            .mount(server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/config"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&healthy)
        .await;
    Mock::given(method("POST"))
        .and(path("/config"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&flaky)
        .await;

    let mut settings = Settings::default();
    settings.distribution.retry_count = 2;
    settings.distribution.retry_delay_ms = 10;
    let client = Arc::new(HttpGatewayClient::new(1000).unwrap());
    let orchestrator = Orchestrator::new(&settings, client).unwrap();

    for (id, server) in [("healthy", &healthy), ("flaky", &flaky)] {
        let node = orchestrator
            .register_gateway(GatewayDescriptor {
                id: Some(id.to_string()),
                region: "eu-west".to_string(),
                endpoint: server.uri(),
            })
            .await
            .unwrap();
        assert_eq!(node.status, NodeStatus::Online);
    }

    let id = orchestrator
        .distribute_configuration("routes", json!({"routes": []}), DistributionTargets::All)
        .unwrap();
    let record = tokio::time::timeout(Duration::from_secs(10), orchestrator.wait_for_distribution(&id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(record.status, DistributionStatus::PartiallyFailed);
    assert_eq!(record.per_gateway_status["healthy"].phase, TargetPhase::Success);
    assert_eq!(record.per_gateway_status["flaky"].phase, TargetPhase::Failed);
    assert_eq!(record.per_gateway_status["flaky"].retry_count, 2);
}
