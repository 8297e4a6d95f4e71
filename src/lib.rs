//! Gateway Orchestrator
//!
//! Fleet management for independently operating edge proxy gateways:
//! picks the gateway that should serve a new client, pushes configuration
//! changes to the fleet in bounded batches with retries, and keeps each
//! gateway's health fresh so failing nodes drop out of service.

pub mod api;
pub mod config;
pub mod distribution;
pub mod error;
pub mod gateway;
pub mod node;
pub mod orchestrator;

pub use error::{AppError, Result};
pub use orchestrator::Orchestrator;

use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<config::Settings>,
    pub orchestrator: Arc<Orchestrator>,
}
