//! Main entry point for the gateway orchestrator

use gateway_orchestrator::{
    api,
    config::Settings,
    node::{http_client::HttpGatewayClient, registry::GatewayDescriptor},
    AppState, Orchestrator,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration before logging so the configured level applies
    let settings = Settings::load()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    if settings.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }

    info!(
        "Starting gateway orchestrator: server={}:{}",
        settings.server.host, settings.server.port
    );

    let settings = Arc::new(settings);

    // Health polls and config pushes share one HTTP client
    let client = Arc::new(HttpGatewayClient::new(
        settings.health.timeout_ms.max(settings.distribution.apply_timeout_ms),
    )?);
    let orchestrator = Arc::new(Orchestrator::new(&settings, client)?);

    // Register gateways from configuration
    for gateway in &settings.gateways {
        let descriptor = GatewayDescriptor {
            id: Some(gateway.id.clone()),
            region: gateway.region.clone(),
            endpoint: gateway.endpoint.clone(),
        };
        if let Err(e) = orchestrator.registry().register(descriptor) {
            warn!(gateway = %gateway.id, error = %e, "Skipping configured gateway");
        }
    }

    orchestrator.start().await;

    let app_state = Arc::new(AppState {
        settings: settings.clone(),
        orchestrator: orchestrator.clone(),
    });

    let app = api::routes::create_router(app_state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.shutdown().await;
    info!("Gateway orchestrator stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
