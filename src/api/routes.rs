//! Route table for the orchestration API

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::api::handlers;
use crate::AppState;

/// Build the router with all endpoints and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    let request_timeout = Duration::from_secs(state.settings.server.request_timeout_secs.max(1));

    Router::new()
        .route("/health", get(handlers::health))
        // Orchestration control surface
        .route("/api/v1/orchestration/status", get(handlers::orchestration_status))
        .route(
            "/api/v1/orchestration/load-balancing",
            get(handlers::get_load_balancing).post(handlers::update_load_balancing),
        )
        .route("/api/v1/orchestration/select-gateway", post(handlers::select_gateway))
        .route("/api/v1/orchestration/distribute", post(handlers::distribute))
        .route("/api/v1/orchestration/distributions", get(handlers::list_distributions))
        .route("/api/v1/orchestration/distributions/:id", get(handlers::get_distribution))
        // Fleet membership
        .route(
            "/api/v1/gateways",
            get(handlers::list_gateways).post(handlers::register_gateway),
        )
        .route(
            "/api/v1/gateways/:id",
            get(handlers::get_gateway).delete(handlers::deregister_gateway),
        )
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
