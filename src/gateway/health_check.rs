//! Health monitor keeping gateway metrics fresh and deriving their status

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HealthConfig;
use crate::error::{AppError, Result};
use crate::gateway::load_balancer::SharedLoadBalancingConfig;
use crate::node::registry::{GatewayNode, GatewayRegistry, HealthSnapshot, NodeHealth, NodeStatus};
use crate::node::traits::{GatewayClient, HealthReport};

const CPU_WEIGHT: f64 = 0.30;
const MEMORY_WEIGHT: f64 = 0.25;
const CONNECTION_WEIGHT: f64 = 0.25;
const LATENCY_WEIGHT: f64 = 0.20;

/// Composite health score in [0, 100].
///
/// Each metric is inverted onto a 0-100 scale (idle CPU, free memory,
/// spare connection capacity, latency headroom below the ceiling) and
/// combined as 30% CPU, 25% memory, 25% connections, 20% latency.
pub fn health_score(
    cpu_pct: f64,
    mem_pct: f64,
    active_connections: u64,
    avg_latency_ms: f64,
    config: &HealthConfig,
) -> f64 {
    let cpu = 100.0 - cpu_pct.clamp(0.0, 100.0);
    let memory = 100.0 - mem_pct.clamp(0.0, 100.0);
    let load = active_connections as f64 / config.connection_capacity.max(1) as f64;
    let connections = 100.0 * (1.0 - load.min(1.0));
    let latency = 100.0 * (1.0 - (avg_latency_ms.max(0.0) / config.latency_ceiling_ms).min(1.0));

    let score = CPU_WEIGHT * cpu
        + MEMORY_WEIGHT * memory
        + CONNECTION_WEIGHT * connections
        + LATENCY_WEIGHT * latency;
    score.clamp(0.0, 100.0)
}

/// Status derived from the latest snapshot.
///
/// A node that has never reported is Offline.
pub fn derive_status(
    snapshot: &HealthSnapshot,
    has_reported: bool,
    threshold: f64,
    eviction_limit: u32,
) -> NodeStatus {
    if snapshot.consecutive_failures >= eviction_limit || !has_reported {
        NodeStatus::Offline
    } else if snapshot.health_score < threshold {
        NodeStatus::Degraded
    } else {
        NodeStatus::Online
    }
}

/// Per-status gateway counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub online: usize,
    pub degraded: usize,
    pub offline: usize,
}

/// Polling state shared with the background task
#[derive(Clone)]
struct Poller {
    registry: Arc<GatewayRegistry>,
    client: Arc<dyn GatewayClient>,
    lb_config: SharedLoadBalancingConfig,
    config: HealthConfig,
}

impl Poller {
    /// Poll every registered node concurrently
    async fn poll_all(&self) {
        let nodes = self.registry.list(None, None);
        let mut polls = JoinSet::new();

        for node in nodes {
            let poller = self.clone();
            polls.spawn(async move {
                poller.poll_node(&node).await;
            });
        }

        while let Some(joined) = polls.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Health poll task failed");
            }
        }
    }

    async fn poll_node(&self, node: &GatewayNode) -> Option<NodeStatus> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let result = match tokio::time::timeout(timeout, self.client.fetch_health(node)).await {
            Ok(Ok(report)) => validate_report(report),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::Timeout(format!(
                "health poll of {} exceeded {}ms",
                node.id, self.config.timeout_ms
            ))),
        };

        match result {
            Ok(report) => self.record_success(&node.id, report),
            Err(e) => {
                debug!(gateway = %node.id, error = %e, "Health poll failed");
                self.record_failure(&node.id)
            }
        }
    }

    fn record_success(&self, id: &str, report: HealthReport) -> Option<NodeStatus> {
        let threshold = self.lb_config.read().health_threshold_percent;
        let config = &self.config;

        self.registry.update_health(id, |health| {
            health.latency_samples.push_back(report.latency_ms);
            while health.latency_samples.len() > config.latency_window {
                health.latency_samples.pop_front();
            }
            let avg_latency_ms =
                health.latency_samples.iter().sum::<f64>() / health.latency_samples.len() as f64;

            health.snapshot = HealthSnapshot {
                cpu_pct: report.cpu_pct,
                mem_pct: report.mem_pct,
                active_connections: report.active_connections,
                avg_latency_ms,
                consecutive_failures: 0,
                health_score: health_score(
                    report.cpu_pct,
                    report.mem_pct,
                    report.active_connections,
                    avg_latency_ms,
                    config,
                ),
            };
            health.last_heartbeat = Some(Utc::now());
            transition(id, health, threshold, config.eviction_limit)
        })
    }

    fn record_failure(&self, id: &str) -> Option<NodeStatus> {
        let threshold = self.lb_config.read().health_threshold_percent;
        let eviction_limit = self.config.eviction_limit;

        self.registry.update_health(id, |health| {
            health.snapshot.consecutive_failures = health.snapshot.consecutive_failures.saturating_add(1);
            transition(id, health, threshold, eviction_limit)
        })
    }
}

fn validate_report(report: HealthReport) -> Result<HealthReport> {
    let finite = [report.cpu_pct, report.mem_pct, report.latency_ms]
        .iter()
        .all(|v| v.is_finite());
    if finite {
        Ok(report)
    } else {
        Err(AppError::Transport("health report contains non-finite metrics".to_string()))
    }
}

/// Re-derive status and log any change
fn transition(id: &str, health: &mut NodeHealth, threshold: f64, eviction_limit: u32) -> NodeStatus {
    let previous = health.status;
    let next = derive_status(
        &health.snapshot,
        health.last_heartbeat.is_some(),
        threshold,
        eviction_limit,
    );
    health.status = next;

    if previous != next {
        match next {
            NodeStatus::Online => info!(gateway = %id, from = ?previous, "Gateway online"),
            NodeStatus::Degraded => warn!(
                gateway = %id,
                score = health.snapshot.health_score,
                threshold = threshold,
                "Gateway degraded below health threshold"
            ),
            NodeStatus::Offline => warn!(
                gateway = %id,
                failures = health.snapshot.consecutive_failures,
                "Gateway marked offline"
            ),
        }
    }

    next
}

struct MonitorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Health monitor; the only writer of node health and status
pub struct HealthMonitor {
    poller: Poller,
    task: Mutex<Option<MonitorTask>>,
}

impl HealthMonitor {
    /// Create a new health monitor
    pub fn new(
        registry: Arc<GatewayRegistry>,
        client: Arc<dyn GatewayClient>,
        lb_config: SharedLoadBalancingConfig,
        config: HealthConfig,
    ) -> Self {
        Self {
            poller: Poller {
                registry,
                client,
                lb_config,
                config,
            },
            task: Mutex::new(None),
        }
    }

    /// Start the polling loop; a no-op if it is already running
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let poller = self.poller.clone();
        let token = cancel.clone();
        let interval_secs = poller.config.interval_secs.max(1);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                // Dropping an in-flight cycle aborts its polls
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = poller.poll_all() => {}
                }
            }

            debug!("Health monitor loop exited");
        });

        *task = Some(MonitorTask { cancel, handle });
        info!(interval_secs = interval_secs, "Started health monitor");
    }

    /// Stop the polling loop and wait for it to exit
    pub async fn stop(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Health monitor task ended abnormally");
            }
            info!("Stopped health monitor");
        }
    }

    /// Whether the polling loop is running
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    /// Run one full polling cycle
    pub async fn poll_once(&self) {
        self.poller.poll_all().await;
    }

    /// Poll a single gateway immediately
    pub async fn check_now(&self, id: &str) -> Result<GatewayNode> {
        let node = self.poller.registry.get(id)?;
        self.poller.poll_node(&node).await;
        self.poller.registry.get(id)
    }

    /// Re-derive every node's status from its last snapshot, e.g. after a
    /// threshold change. Makes no network calls.
    pub fn reclassify(&self) {
        let threshold = self.poller.lb_config.read().health_threshold_percent;
        let eviction_limit = self.poller.config.eviction_limit;

        for id in self.poller.registry.ids() {
            self.poller
                .registry
                .update_health(&id, |health| transition(&id, health, threshold, eviction_limit));
        }
    }

    /// Gateway counts per status
    pub fn health_summary(&self) -> HealthSummary {
        self.poller
            .registry
            .list(None, None)
            .iter()
            .fold(HealthSummary::default(), |mut summary, node| {
                summary.total += 1;
                match node.status {
                    NodeStatus::Online => summary.online += 1,
                    NodeStatus::Degraded => summary.degraded += 1,
                    NodeStatus::Offline => summary.offline += 1,
                }
                summary
            })
    }
}
