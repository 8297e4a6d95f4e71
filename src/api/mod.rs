//! HTTP management surface

pub mod handlers;
pub mod routes;
