//! Node module - Gateway collaborator traits, HTTP client, and registry

pub mod http_client;
pub mod registry;
pub mod traits;
