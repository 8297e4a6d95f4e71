//! Gateway module - Health monitoring and load balancing

pub mod health_check;
pub mod load_balancer;
