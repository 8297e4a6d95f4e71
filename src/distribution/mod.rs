//! Distribution module - Configuration pushes to the gateway fleet

pub mod distributor;
pub mod record;

pub use distributor::{ConfigDistributor, DistributionReceipt, DistributionStats};
pub use record::{
    ConfigurationDistribution, DistributionStatus, DistributionTargets, TargetPhase, TargetStatus,
};
