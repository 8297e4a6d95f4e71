//! Batched configuration distribution with bounded retries

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{DistributionConfig, MAX_RETRY_DELAY_MS};
use crate::distribution::record::{
    ConfigurationDistribution, DistributionStatus, DistributionTargets, TargetPhase, TargetStatus,
};
use crate::error::{AppError, Result};
use crate::node::registry::{GatewayRegistry, NodeStatus};
use crate::node::traits::{ConfigApplyRequest, GatewayClient};

/// Distribution counts by aggregate status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributionStats {
    pub active: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Id and submission-time status of a newly accepted distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionReceipt {
    pub distribution_id: String,
    pub status: DistributionStatus,
}

/// Structural checks run before any attempt.
///
/// Payload semantics are the gateway's business; this only refuses input
/// that cannot be a configuration change at all.
pub fn validate_payload(
    config_type: &str,
    payload: &serde_json::Value,
    max_payload_bytes: usize,
) -> Result<()> {
    if config_type.is_empty() {
        return Err(AppError::Rejected("config_type cannot be empty".to_string()));
    }
    if !config_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(AppError::Rejected(format!(
            "config_type '{}' contains invalid characters",
            config_type
        )));
    }
    if !payload.is_object() {
        return Err(AppError::Rejected("payload must be a JSON object".to_string()));
    }

    let size = serde_json::to_vec(payload)?.len();
    if size > max_payload_bytes {
        return Err(AppError::Rejected(format!(
            "payload is {} bytes, limit is {}",
            size, max_payload_bytes
        )));
    }

    Ok(())
}

/// When a target waiting `delay_ms` becomes due; saturates instead of overflowing
fn retry_deadline(delay_ms: u64) -> DateTime<Utc> {
    i64::try_from(delay_ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|delay| Utc::now().checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Worker state shared with spawned distribution tasks
#[derive(Clone)]
struct Dispatcher {
    registry: Arc<GatewayRegistry>,
    client: Arc<dyn GatewayClient>,
    config: DistributionConfig,
    distributions: Arc<DashMap<String, ConfigurationDistribution>>,
    finished: Arc<Notify>,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Apply `f` to one target, waking waiters if the distribution finished
    fn update(&self, distribution_id: &str, gateway_id: &str, f: impl FnOnce(&mut TargetStatus)) -> bool {
        let Some(mut record) = self.distributions.get_mut(distribution_id) else {
            return false;
        };
        let applied = record.update_target(gateway_id, f);
        let finished = applied && record.is_terminal();
        let status = record.status;
        drop(record);

        if finished {
            info!(distribution = %distribution_id, status = ?status, "Distribution finished");
            self.finished.notify_waiters();
        }
        applied
    }

    fn fail(&self, distribution_id: &str, gateway_id: &str, reason: String) -> bool {
        warn!(distribution = %distribution_id, gateway = %gateway_id, reason = %reason, "Target failed");
        self.update(distribution_id, gateway_id, |target| {
            target.phase = TargetPhase::Failed;
            target.last_error = Some(reason);
        })
    }

    /// Dispatch batches in order; a batch starts once every initial attempt
    /// of the previous one has resolved. Retries run on in the background.
    async fn run(self, distribution_id: String, targets: Vec<String>, request: Arc<ConfigApplyRequest>) {
        let batch_size = self.config.batch_size.max(1);

        for (index, batch) in targets.chunks(batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            debug!(distribution = %distribution_id, batch = index, size = batch.len(), "Dispatching batch");

            let mut initial_attempts = Vec::with_capacity(batch.len());
            for gateway_id in batch {
                let (tx, rx) = oneshot::channel();
                tokio::spawn(self.clone().drive_target(
                    distribution_id.clone(),
                    gateway_id.clone(),
                    request.clone(),
                    tx,
                ));
                initial_attempts.push(rx);
            }

            // A dropped sender also counts as resolved
            join_all(initial_attempts).await;
        }
    }

    /// Per-target state machine: Pending -> Attempting -> (RetryWait -> Attempting)* -> Success | Failed
    async fn drive_target(
        self,
        distribution_id: String,
        gateway_id: String,
        request: Arc<ConfigApplyRequest>,
        initial_attempt: oneshot::Sender<()>,
    ) {
        let mut initial_attempt = Some(initial_attempt);
        let timeout = Duration::from_millis(self.config.apply_timeout_ms);
        let retry_delay_ms = self.config.retry_delay_ms.min(MAX_RETRY_DELAY_MS);
        let retry_delay = Duration::from_millis(retry_delay_ms);

        loop {
            let node = match self.registry.get(&gateway_id) {
                Ok(node) => node,
                Err(_) => {
                    self.fail(&distribution_id, &gateway_id, "gateway deregistered".to_string());
                    return;
                }
            };

            if !self.update(&distribution_id, &gateway_id, |t| t.phase = TargetPhase::Attempting) {
                // Resolved elsewhere, e.g. by deregistration
                return;
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.fail(&distribution_id, &gateway_id, "distributor shut down".to_string());
                    return;
                }
                result = tokio::time::timeout(timeout, self.client.apply_config(&node, &request)) => {
                    result.unwrap_or_else(|_| Err(AppError::Timeout(format!(
                        "apply to {} exceeded {}ms",
                        gateway_id, self.config.apply_timeout_ms
                    ))))
                }
            };

            if let Some(tx) = initial_attempt.take() {
                let _ = tx.send(());
            }

            let error = match result {
                Ok(()) => {
                    debug!(distribution = %distribution_id, gateway = %gateway_id, "Configuration applied");
                    self.update(&distribution_id, &gateway_id, |t| {
                        t.phase = TargetPhase::Success;
                        t.last_error = None;
                    });
                    return;
                }
                Err(e) if !e.is_retryable() => {
                    warn!(distribution = %distribution_id, gateway = %gateway_id, error = %e, "Gateway rejected configuration");
                    self.update(&distribution_id, &gateway_id, |t| {
                        t.retry_count += 1;
                        t.phase = TargetPhase::Failed;
                        t.last_error = Some(e.to_string());
                    });
                    return;
                }
                Err(e) => e,
            };

            let retry_limit = self.config.retry_count;
            let mut give_up = false;
            let until = retry_deadline(retry_delay_ms);
            let applied = self.update(&distribution_id, &gateway_id, |t| {
                t.retry_count += 1;
                t.last_error = Some(error.to_string());
                if t.retry_count < retry_limit {
                    t.phase = TargetPhase::RetryWait { until };
                } else {
                    t.phase = TargetPhase::Failed;
                    give_up = true;
                }
            });

            if !applied {
                return;
            }
            if give_up {
                warn!(
                    distribution = %distribution_id,
                    gateway = %gateway_id,
                    error = %error,
                    "Target failed after exhausting retries"
                );
                return;
            }

            debug!(distribution = %distribution_id, gateway = %gateway_id, error = %error, "Retrying after delay");
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.fail(&distribution_id, &gateway_id, "distributor shut down".to_string());
                    return;
                }
                _ = tokio::time::sleep(retry_delay) => {}
            }
        }
    }
}

/// Pushes configuration changes to gateways and tracks per-target outcomes
pub struct ConfigDistributor {
    dispatcher: Dispatcher,
}

impl ConfigDistributor {
    /// Create a new distributor
    pub fn new(
        registry: Arc<GatewayRegistry>,
        client: Arc<dyn GatewayClient>,
        config: DistributionConfig,
    ) -> Self {
        Self {
            dispatcher: Dispatcher {
                registry,
                client,
                config,
                distributions: Arc::new(DashMap::new()),
                finished: Arc::new(Notify::new()),
                cancel: CancellationToken::new(),
            },
        }
    }

    /// Submit a distribution and return its id without waiting for any push.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn distribute(
        &self,
        config_type: &str,
        payload: serde_json::Value,
        targets: DistributionTargets,
    ) -> Result<String> {
        self.submit(config_type, payload, targets)
            .map(|receipt| receipt.distribution_id)
    }

    /// Like [`distribute`](Self::distribute), also returning the status the
    /// record had when it was stored, before any dispatch began
    pub fn submit(
        &self,
        config_type: &str,
        payload: serde_json::Value,
        targets: DistributionTargets,
    ) -> Result<DistributionReceipt> {
        let dispatcher = &self.dispatcher;
        if dispatcher.cancel.is_cancelled() {
            return Err(AppError::Internal("distributor is shut down".to_string()));
        }

        let (target_ids, targets_all) = match targets {
            DistributionTargets::All => {
                let online: Vec<String> = dispatcher
                    .registry
                    .list(None, Some(NodeStatus::Online))
                    .into_iter()
                    .map(|n| n.id)
                    .collect();
                if online.is_empty() {
                    return Err(AppError::NotAvailable("no online gateways to target".to_string()));
                }
                (online, true)
            }
            DistributionTargets::Explicit(ids) => {
                let mut seen = HashSet::new();
                let ids: Vec<String> = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
                if ids.is_empty() {
                    return Err(AppError::InvalidRequest("target_gateways cannot be empty".to_string()));
                }
                (ids, false)
            }
        };

        let id = Uuid::new_v4().to_string();
        let mut record = ConfigurationDistribution::new(
            id.clone(),
            config_type.to_string(),
            payload,
            target_ids,
            targets_all,
        );

        if let Err(e) = validate_payload(config_type, &record.payload, dispatcher.config.max_payload_bytes) {
            warn!(distribution = %id, error = %e, "Rejected configuration before dispatch");
            for gateway_id in record.target_gateway_ids.clone() {
                record.fail_target(&gateway_id, e.to_string());
            }
        } else {
            for gateway_id in record.target_gateway_ids.clone() {
                if !dispatcher.registry.contains(&gateway_id) {
                    record.fail_target(&gateway_id, format!("gateway {} is not registered", gateway_id));
                }
            }
        }

        let pending = record.unresolved_targets();
        let request = Arc::new(ConfigApplyRequest {
            config_type: record.config_type.clone(),
            payload: record.payload.clone(),
        });
        info!(
            distribution = %id,
            config_type = %config_type,
            targets = record.target_gateway_ids.len(),
            dispatching = pending.len(),
            "Submitted configuration distribution"
        );
        let status = record.status;
        dispatcher.distributions.insert(id.clone(), record);

        if pending.is_empty() {
            dispatcher.finished.notify_waiters();
        } else {
            tokio::spawn(dispatcher.clone().run(id.clone(), pending, request));
        }

        Ok(DistributionReceipt {
            distribution_id: id,
            status,
        })
    }

    /// Best-known state of a distribution
    pub fn get_status(&self, id: &str) -> Result<ConfigurationDistribution> {
        self.dispatcher
            .distributions
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("distribution {}", id)))
    }

    /// All distributions, oldest first; finished ones only when requested
    pub fn list(&self, include_completed: bool) -> Vec<ConfigurationDistribution> {
        let mut records: Vec<ConfigurationDistribution> = self
            .dispatcher
            .distributions
            .iter()
            .filter(|r| include_completed || !r.is_terminal())
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Wait until a distribution reaches a terminal status
    pub async fn wait(&self, id: &str) -> Result<ConfigurationDistribution> {
        loop {
            let notified = self.dispatcher.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let record = self.get_status(id)?;
            if record.is_terminal() {
                return Ok(record);
            }
            notified.await;
        }
    }

    /// Fail every unresolved target aimed at a gateway that just left the fleet
    pub fn handle_deregistration(&self, gateway_id: &str) -> usize {
        let affected: Vec<String> = self
            .dispatcher
            .distributions
            .iter()
            .filter(|r| {
                !r.is_terminal()
                    && r.per_gateway_status
                        .get(gateway_id)
                        .map_or(false, |t| !t.phase.is_terminal())
            })
            .map(|r| r.id.clone())
            .collect();

        affected
            .iter()
            .filter(|id| {
                self.dispatcher
                    .fail(id, gateway_id, "gateway deregistered".to_string())
            })
            .count()
    }

    /// Counts of active, completed and partially failed distributions
    pub fn stats(&self) -> DistributionStats {
        self.dispatcher
            .distributions
            .iter()
            .fold(DistributionStats::default(), |mut stats, r| {
                match r.status {
                    DistributionStatus::Pending | DistributionStatus::InProgress => stats.active += 1,
                    DistributionStatus::Completed => stats.succeeded += 1,
                    DistributionStatus::PartiallyFailed => stats.failed += 1,
                }
                stats
            })
    }

    /// Stop all dispatching; unresolved targets become Failed
    pub fn shutdown(&self) {
        let dispatcher = &self.dispatcher;
        dispatcher.cancel.cancel();

        let open: Vec<(String, Vec<String>)> = dispatcher
            .distributions
            .iter()
            .filter(|r| !r.is_terminal())
            .map(|r| (r.id.clone(), r.unresolved_targets()))
            .collect();

        for (distribution_id, targets) in open {
            for gateway_id in targets {
                dispatcher.update(&distribution_id, &gateway_id, |t| {
                    t.phase = TargetPhase::Failed;
                    t.last_error = Some("distributor shut down".to_string());
                });
            }
        }
        info!("Configuration distributor shut down");
    }
}
