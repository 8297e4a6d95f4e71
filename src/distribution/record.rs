//! Distribution records and the per-target state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AppError, Result};

/// Which gateways a distribution targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributionTargets {
    /// Every gateway Online at submission time
    All,
    /// An explicit set of gateway ids
    Explicit(Vec<String>),
}

impl From<Option<Vec<String>>> for DistributionTargets {
    fn from(ids: Option<Vec<String>>) -> Self {
        match ids {
            Some(ids) => Self::Explicit(ids),
            None => Self::All,
        }
    }
}

/// Aggregate status of a distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStatus {
    Pending,
    InProgress,
    Completed,
    PartiallyFailed,
}

impl DistributionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyFailed)
    }
}

/// State of one target within a distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPhase {
    Pending,
    Attempting,
    RetryWait { until: DateTime<Utc> },
    Success,
    Failed,
}

impl TargetPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// Outcome tracking for one target gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub phase: TargetPhase,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TargetStatus {
    fn pending() -> Self {
        Self {
            phase: TargetPhase::Pending,
            retry_count: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Target counts of a distribution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TargetCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub in_flight: usize,
}

/// One configuration push tracked to completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationDistribution {
    pub id: String,
    pub config_type: String,
    pub payload: serde_json::Value,
    /// Resolved targets in dispatch order
    pub target_gateway_ids: Vec<String>,
    /// Whether the targets were the Online set captured at submission
    pub targets_all: bool,
    pub status: DistributionStatus,
    pub per_gateway_status: BTreeMap<String, TargetStatus>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ConfigurationDistribution {
    pub(crate) fn new(
        id: String,
        config_type: String,
        payload: serde_json::Value,
        target_gateway_ids: Vec<String>,
        targets_all: bool,
    ) -> Self {
        let per_gateway_status = target_gateway_ids
            .iter()
            .map(|id| (id.clone(), TargetStatus::pending()))
            .collect();

        Self {
            id,
            config_type,
            payload,
            target_gateway_ids,
            targets_all,
            status: DistributionStatus::Pending,
            per_gateway_status,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `Err(PartialFailure)` once the distribution ended with failed targets
    pub fn outcome(&self) -> Result<()> {
        match self.status {
            DistributionStatus::PartiallyFailed => Err(AppError::PartialFailure(self.id.clone())),
            _ => Ok(()),
        }
    }

    pub fn counts(&self) -> TargetCounts {
        self.per_gateway_status
            .values()
            .fold(TargetCounts::default(), |mut counts, target| {
                match target.phase {
                    TargetPhase::Success => counts.succeeded += 1,
                    TargetPhase::Failed => counts.failed += 1,
                    _ => counts.in_flight += 1,
                }
                counts
            })
    }

    /// Targets not yet resolved, in dispatch order
    pub(crate) fn unresolved_targets(&self) -> Vec<String> {
        self.target_gateway_ids
            .iter()
            .filter(|id| {
                self.per_gateway_status
                    .get(*id)
                    .map_or(false, |t| !t.phase.is_terminal())
            })
            .cloned()
            .collect()
    }

    /// Apply `f` to a non-terminal target and refresh the aggregate status.
    ///
    /// Returns false, changing nothing, when the distribution or the target
    /// is already terminal.
    pub(crate) fn update_target(&mut self, gateway_id: &str, f: impl FnOnce(&mut TargetStatus)) -> bool {
        if self.is_terminal() {
            return false;
        }
        let Some(target) = self.per_gateway_status.get_mut(gateway_id) else {
            return false;
        };
        if target.phase.is_terminal() {
            return false;
        }

        f(target);
        target.updated_at = Utc::now();
        self.refresh_status();
        true
    }

    /// Mark a target permanently failed
    pub(crate) fn fail_target(&mut self, gateway_id: &str, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.update_target(gateway_id, |target| {
            target.phase = TargetPhase::Failed;
            target.last_error = Some(reason);
        })
    }

    fn refresh_status(&mut self) {
        let targets = self.per_gateway_status.values();
        let all_success = targets.clone().all(|t| t.phase == TargetPhase::Success);
        let any_open = targets.clone().any(|t| !t.phase.is_terminal());
        let any_failed = targets.clone().any(|t| t.phase == TargetPhase::Failed);
        let any_started = targets.clone().any(|t| t.phase != TargetPhase::Pending);

        self.status = if all_success {
            DistributionStatus::Completed
        } else if !any_open && any_failed {
            DistributionStatus::PartiallyFailed
        } else if any_started {
            DistributionStatus::InProgress
        } else {
            DistributionStatus::Pending
        };

        if self.status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }
}
