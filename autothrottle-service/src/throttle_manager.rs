use crate::broker_writer::{BrokerThrottleRates, ThrottleWriter};
use crate::events::{EventSink, ThrottleEvent};
use crate::limits::{Limits, ReplicaRole};
use crate::metrics_provider::MetricsProvider;
use crate::reassignments::{ReassignmentDiscovery, ReassignmentState};
use crate::throttle_override::{OverrideGovernor, ThrottleOverrideConfig};

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ThrottleManagerConfig {
    /// Tick interval.
    pub interval: Duration,
    /// Window over which broker metrics are queried.
    pub metrics_window: Duration,
    /// Minimum relative rate change (percent) required to rewrite a
    /// broker's throttle configuration.
    pub change_threshold: f64,
    /// Consecutive metrics failures after which a broker falls back to the
    /// minimum rate.
    pub failure_threshold: u32,
    /// Idle tick count between safety-net sweeps of stale throttle config.
    pub cleanup_after: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Throttling,
}

/// Working memory for one broker. Built fresh at process start; a restart
/// loses one iteration of compensation history, which is accepted.
#[derive(Debug, Default, Clone)]
struct BrokerThrottleState {
    failures: u32,
    last_source_rate: Option<f64>,
    last_destination_rate: Option<f64>,
}

impl BrokerThrottleState {
    fn last_rate(&self, role: ReplicaRole) -> Option<f64> {
        match role {
            ReplicaRole::Source => self.last_source_rate,
            ReplicaRole::Destination => self.last_destination_rate,
        }
    }

    fn set_last_rate(&mut self, role: ReplicaRole, rate: f64) {
        match role {
            ReplicaRole::Source => self.last_source_rate = Some(rate),
            ReplicaRole::Destination => self.last_destination_rate = Some(rate),
        }
    }
}

/// The throttle decision engine's control loop: discovers active
/// reassignments each tick, classifies brokers by role, decides between
/// override and metrics-derived rates, applies hysteresis and failure
/// fallback, writes throttle configuration, and converges to zero
/// throttling when the cluster is idle.
///
/// One instance runs per cluster; ticks are strictly sequential so the
/// hysteresis and failure-counter state is never read stale.
pub struct ThrottleManager {
    config: ThrottleManagerConfig,
    limits: Limits,
    governor: OverrideGovernor,
    discovery: ReassignmentDiscovery,
    writer: ThrottleWriter,
    metrics: Arc<dyn MetricsProvider>,
    events: Arc<dyn EventSink>,

    state: HashMap<u64, BrokerThrottleState>,
    loop_state: LoopState,
    idle_ticks: u64,
}

impl ThrottleManager {
    pub fn new(
        config: ThrottleManagerConfig,
        limits: Limits,
        governor: OverrideGovernor,
        discovery: ReassignmentDiscovery,
        writer: ThrottleWriter,
        metrics: Arc<dyn MetricsProvider>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        ThrottleManager {
            config,
            limits,
            governor,
            discovery,
            writer,
            metrics,
            events,
            state: HashMap::new(),
            loop_state: LoopState::Idle,
            idle_ticks: 0,
        }
    }

    /// Drive the loop forever. A tick that overruns the interval causes
    /// subsequent due ticks to be skipped, never run concurrently.
    pub async fn run(mut self) {
        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.config.interval.as_secs(),
            "throttle manager started"
        );

        loop {
            interval.tick().await;
            if let Err(e) = self.evaluate().await {
                error!(error = %e, "throttle evaluation failed, retrying next tick");
            }
        }
    }

    /// One tick of the control loop.
    pub(crate) async fn evaluate(&mut self) -> Result<()> {
        let reassignments = self.discovery.fetch().await?;

        if reassignments.is_empty() {
            self.handle_idle().await;
        } else {
            self.handle_throttling(&reassignments).await;
        }
        Ok(())
    }

    async fn handle_idle(&mut self) {
        let transitioned = self.loop_state == LoopState::Throttling;
        self.loop_state = LoopState::Idle;
        self.idle_ticks += 1;

        let periodic_sweep =
            self.config.cleanup_after > 0 && self.idle_ticks % self.config.cleanup_after == 0;

        if transitioned || periodic_sweep {
            self.clear_all_throttles().await;
        }

        // The auto-remove override is cleared only on a real
        // Throttling -> Idle transition, not on periodic sweeps.
        if transitioned {
            self.maybe_auto_remove_override().await;
        }
    }

    /// Remove throttle configuration from every broker carrying one,
    /// including configs written by a previous process run.
    async fn clear_all_throttles(&mut self) {
        let brokers = match self.writer.throttled_brokers().await {
            Ok(brokers) => brokers,
            Err(e) => {
                warn!(error = %e, "failed to enumerate throttled brokers for cleanup");
                return;
            }
        };

        self.state.clear();

        if brokers.is_empty() {
            return;
        }

        let mut cleared = Vec::with_capacity(brokers.len());
        for broker_id in brokers {
            match self.writer.clear(broker_id).await {
                Ok(()) => {
                    info!(broker_id, "removed replication throttle configuration");
                    cleared.push(broker_id.to_string());
                    self.events
                        .emit(ThrottleEvent::new(
                            "throttle removed",
                            format!("replication throttle removed from broker {}", broker_id),
                        ))
                        .await;
                }
                Err(e) => {
                    warn!(broker_id, error = %e, "failed to remove throttle configuration")
                }
            }
        }

        self.events
            .emit(ThrottleEvent::new(
                "no topics undergoing reassignment",
                format!("removed throttles from brokers [{}]", cleared.join(", ")),
            ))
            .await;
    }

    async fn maybe_auto_remove_override(&mut self) {
        let config = match self.governor.get().await {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "failed to read throttle override during idle transition");
                return;
            }
        };

        if !config.auto_remove {
            return;
        }

        match self.governor.remove().await {
            Ok(()) => {
                info!(rate = config.rate, "throttle override auto-removed");
                self.events
                    .emit(ThrottleEvent::new(
                        "throttle override auto-removed",
                        format!("override of {}MB/s cleared after reassignment completion", config.rate),
                    ))
                    .await;
            }
            Err(e) => warn!(error = %e, "failed to auto-remove throttle override"),
        }
    }

    async fn handle_throttling(&mut self, reassignments: &ReassignmentState) {
        self.loop_state = LoopState::Throttling;
        self.idle_ticks = 0;

        let roles = reassignments.broker_roles();

        let override_config = match self.governor.get().await {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "failed to read throttle override, proceeding without");
                ThrottleOverrideConfig::default()
            }
        };
        let overridden = override_config.rate > 0;
        if overridden {
            info!(
                rate = override_config.rate,
                "throttle override active, skipping metrics evaluation"
            );
        }

        // Metrics are only consulted when no override is in force.
        let metrics = if overridden {
            None
        } else {
            match self.metrics.broker_metrics(self.config.metrics_window).await {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!(error = %e, "broker metrics fetch failed");
                    Some(HashMap::new())
                }
            }
        };

        let mut summary: Vec<String> = Vec::new();

        for (&broker_id, broker_roles) in &roles {
            let fresh = metrics.as_ref().and_then(|m| m.get(&broker_id)).cloned();

            let failures = if overridden {
                0
            } else {
                let entry = self.state.entry(broker_id).or_default();
                if fresh.is_some() {
                    entry.failures = 0;
                } else {
                    entry.failures += 1;
                }
                entry.failures
            };

            // (role, effective rate, changed past hysteresis)
            let mut applied: Vec<(ReplicaRole, f64, bool)> = Vec::new();

            for &role in broker_roles {
                let prev = self.state.get(&broker_id).and_then(|s| s.last_rate(role));
                let prev_applied = prev.unwrap_or(0.0);

                let desired = if overridden {
                    override_config.rate as f64
                } else if let Some(broker) = &fresh {
                    match self.limits.replication_headroom(broker, role, prev_applied) {
                        Ok(rate) => rate,
                        Err(e) => {
                            warn!(
                                broker_id,
                                role = %role,
                                error = %e,
                                "headroom computation failed, applying minimum rate"
                            );
                            self.limits.minimum()
                        }
                    }
                } else if failures >= self.config.failure_threshold {
                    warn!(
                        broker_id,
                        failures, "metrics failure threshold reached, falling back to minimum rate"
                    );
                    self.limits.minimum()
                } else if let Some(last) = prev {
                    debug!(
                        broker_id,
                        role = %role,
                        "metrics unavailable, reusing last computed rate"
                    );
                    last
                } else {
                    self.limits.minimum()
                };

                // Hysteresis: sub-threshold changes are discarded to limit
                // configuration churn. A role with no prior rate always
                // writes.
                let changed = match prev {
                    Some(p) => ((desired - p).abs() / p) * 100.0 >= self.config.change_threshold,
                    None => true,
                };

                applied.push((role, if changed { desired } else { prev_applied }, changed));
            }

            if !applied.iter().any(|(_, _, changed)| *changed) {
                continue;
            }

            let mut rates = BrokerThrottleRates::default();
            for (role, rate, _) in &applied {
                match role {
                    ReplicaRole::Source => rates.source_rate = Some(*rate),
                    ReplicaRole::Destination => rates.destination_rate = Some(*rate),
                }
            }

            if let Err(e) = self.writer.apply(broker_id, rates).await {
                // Best effort: prior state stands and the write is retried
                // naturally next tick.
                warn!(broker_id, error = %e, "failed to write throttle configuration");
                continue;
            }

            let entry = self.state.entry(broker_id).or_default();
            for &(role, rate, _) in &applied {
                entry.set_last_rate(role, rate);
            }

            for &(role, rate, changed) in &applied {
                if !changed {
                    continue;
                }
                info!(broker_id, role = %role, rate, "applied replication throttle");
                summary.push(format!("{}:{}={:.2}MB/s", broker_id, role, rate));

                let topics = reassignments.topics_for(broker_id, role);
                self.events
                    .emit(ThrottleEvent::new(
                        "replication throttle set",
                        format!(
                            "broker {} ({}) throttled to {:.2}MB/s for topics [{}]",
                            broker_id,
                            role,
                            rate,
                            topics.join(", ")
                        ),
                    ))
                    .await;
            }
        }

        if !summary.is_empty() {
            self.events
                .emit(ThrottleEvent::new(
                    "replication throttles updated",
                    format!(
                        "topics under reassignment [{}]; applied [{}]",
                        reassignments.topic_names().join(", "),
                        summary.join(", ")
                    ),
                ))
                .await;
        }
    }
}
