// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Power-down and power-up of a node
//!
//! Power-down only proceeds for a node with no resident instances. It puts
//! the node into monitoring downtime, marks it offline, requests a soft power
//! off and polls the BMC until the chassis reports off.
//!
//! Power-up requests power on, waits until the node answers on the network,
//! lets it settle and then returns it to the cluster as a regular node,
//! retrying the role change a bounded number of times.

use nodevac_types::{NodeInfo, NodeRole, PowerProgress, PowerState, WorkflowPhase};
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::role::transition_role;
use super::waiter::poll_ticker;
use super::{WorkflowContext, WorkflowError};
use crate::metrics;
use crate::power::{BmcEndpoint, PowerCommand};
use crate::progress::ProgressHandle;

/// Refuse to power-cycle a node that still hosts instances.
pub fn ensure_empty(node: &NodeInfo) -> Result<(), WorkflowError> {
    if node.instance_count > 0 {
        return Err(WorkflowError::PreconditionViolated(format!(
            "node {} still has {} resident instance(s)",
            node.name, node.instance_count
        )));
    }
    Ok(())
}

fn resolve_bmc(ctx: &WorkflowContext, node: &NodeInfo) -> Result<BmcEndpoint, WorkflowError> {
    BmcEndpoint::from_node_tags(&node.tags, &ctx.ipmi)
        .ok_or_else(|| WorkflowError::NotFound(format!("ipmi tag on node {}", node.name)))
}

fn timed_out(started: Instant, timeout: Option<std::time::Duration>) -> bool {
    timeout.is_some_and(|t| started.elapsed() >= t)
}

struct PowerRun<'a> {
    ctx: &'a WorkflowContext,
    node: &'a str,
    progress: &'a ProgressHandle,
    state: PowerProgress,
}

impl PowerRun<'_> {
    fn publish(&self) {
        self.progress.publish_power(&self.state);
    }

    fn fail(self, error: WorkflowError, what: &str) -> Result<PowerProgress, WorkflowError> {
        error!(
            cluster = %self.ctx.cluster_name,
            node = self.node,
            error = %error,
            "{} failed",
            what
        );
        self.publish();
        self.progress.fail(&error.to_string());
        Err(error)
    }

    fn finish(self) -> Result<PowerProgress, WorkflowError> {
        self.publish();
        self.progress.finish();
        Ok(self.state)
    }

    async fn suppress_alerts(&mut self) {
        self.progress.set_phase(WorkflowPhase::SuppressingAlerts);
        match self
            .ctx
            .monitoring
            .schedule_downtime(self.node, self.ctx.settings.downtime)
            .await
        {
            Ok(true) => info!(node = self.node, "Monitoring downtime scheduled"),
            Ok(false) => {
                warn!(node = self.node, "Monitoring did not acknowledge downtime, continuing")
            }
            Err(e) => {
                warn!(node = self.node, error = %e, "Failed to schedule downtime, continuing");
                metrics::record_transient_error("monitoring");
            }
        }
    }

    async fn offline(&mut self, current: NodeRole) -> Result<(), WorkflowError> {
        self.progress.set_phase(WorkflowPhase::Offlining);
        if current == NodeRole::Offline {
            info!(node = self.node, "Node already offline");
            return Ok(());
        }
        let outcome = transition_role(
            self.ctx.cluster.as_ref(),
            self.node,
            current,
            NodeRole::Offline,
            &self.ctx.settings.job_wait,
        )
        .await?;
        self.state.node_role = Some(outcome.role);
        self.publish();
        if !outcome.succeeded {
            return Err(WorkflowError::TransitionFailed(format!(
                "offlining {} failed (job {})",
                self.node, outcome.job.job_id
            )));
        }
        Ok(())
    }

    async fn power_off(&mut self, bmc: &BmcEndpoint) -> Result<(), WorkflowError> {
        self.progress.set_phase(WorkflowPhase::PoweringOff);
        // The status poll decides the outcome; a lost soft-off request shows
        // up as a timeout
        if let Err(e) = self.ctx.power.send_command(bmc, PowerCommand::SoftOff).await {
            warn!(node = self.node, bmc = %bmc.host, error = %e, "Soft power off request failed");
            metrics::record_transient_error("power");
        }
        self.state.power_state = PowerState::ShutdownRequested;
        self.publish();

        self.progress.set_phase(WorkflowPhase::WaitingForPowerOff);
        let started = Instant::now();
        let mut ticker = poll_ticker(self.ctx.settings.power_poll_interval);
        loop {
            ticker.tick().await;
            self.state.status_polls += 1;
            match self.ctx.power.power_state(bmc).await {
                Ok(PowerState::Off) => {
                    self.state.power_state = PowerState::Off;
                    self.publish();
                    info!(node = self.node, polls = self.state.status_polls, "Node powered off");
                    return Ok(());
                }
                Ok(state) => {
                    info!(node = self.node, state = %state, "Waiting for power off");
                }
                Err(e) => {
                    warn!(node = self.node, error = %e, "Power status query failed");
                    metrics::record_transient_error("power");
                }
            }
            self.publish();

            if timed_out(started, self.ctx.settings.power_timeout) {
                return Err(WorkflowError::Timeout {
                    what: format!("power off of {}", self.node),
                    waited: started.elapsed(),
                });
            }
        }
    }

    async fn power_on(&mut self, bmc: &BmcEndpoint) {
        self.progress.set_phase(WorkflowPhase::PoweringOn);
        if let Err(e) = self.ctx.power.send_command(bmc, PowerCommand::On).await {
            warn!(node = self.node, bmc = %bmc.host, error = %e, "Power on request failed");
            metrics::record_transient_error("power");
        }
        self.state.power_state = PowerState::PowerUpRequested;
        self.publish();
    }

    async fn wait_reachable(&mut self) -> Result<(), WorkflowError> {
        self.progress.set_phase(WorkflowPhase::WaitingForReachability);
        let started = Instant::now();
        let mut ticker = poll_ticker(self.ctx.settings.power_poll_interval);
        loop {
            ticker.tick().await;
            self.state.reachability_polls += 1;
            if self.ctx.probe.is_reachable(self.node).await {
                self.state.power_state = PowerState::On;
                self.publish();
                info!(
                    node = self.node,
                    polls = self.state.reachability_polls,
                    "Node reachable"
                );
                return Ok(());
            }
            self.publish();

            if timed_out(started, self.ctx.settings.power_timeout) {
                return Err(WorkflowError::Timeout {
                    what: format!("reachability of {}", self.node),
                    waited: started.elapsed(),
                });
            }
        }
    }

    async fn reintegrate(&mut self, mut current: NodeRole) -> Result<(), WorkflowError> {
        self.progress.set_phase(WorkflowPhase::Reintegrating);
        let policy = self.ctx.settings.reintegrate;

        for attempt in 1..=policy.max_attempts {
            self.state.reintegration_attempts = attempt;
            self.publish();

            match transition_role(
                self.ctx.cluster.as_ref(),
                self.node,
                current,
                NodeRole::Regular,
                &self.ctx.settings.job_wait,
            )
            .await
            {
                Ok(outcome) if outcome.succeeded => {
                    self.state.node_role = Some(outcome.role);
                    self.publish();
                    return Ok(());
                }
                Ok(outcome) => {
                    current = outcome.role;
                    warn!(node = self.node, attempt, job_id = %outcome.job.job_id, "Reintegration attempt failed");
                }
                Err(e @ WorkflowError::NotFound(_)) => return Err(e),
                Err(e) => {
                    warn!(node = self.node, attempt, error = %e, "Reintegration attempt failed");
                    metrics::record_transient_error("cluster");
                }
            }

            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.backoff).await;
            }
        }

        Err(WorkflowError::RetriesExhausted {
            what: format!("reintegration of {}", self.node),
            attempts: policy.max_attempts,
        })
    }
}

/// Power a node down.
///
/// Sends no power commands at all if the node still has resident instances.
pub async fn power_down(
    ctx: &WorkflowContext,
    node: &str,
    progress: &ProgressHandle,
) -> Result<PowerProgress, WorkflowError> {
    let mut run = PowerRun {
        ctx,
        node,
        progress,
        state: PowerProgress::default(),
    };

    let info = match ctx.cluster.get_node(node).await {
        Ok(info) => info,
        Err(e) => return run.fail(e.into(), "Power down"),
    };
    run.state.node_role = Some(info.role);
    if let Err(e) = ensure_empty(&info) {
        return run.fail(e, "Power down");
    }
    let bmc = match resolve_bmc(ctx, &info) {
        Ok(bmc) => bmc,
        Err(e) => return run.fail(e, "Power down"),
    };
    run.state.bmc_host = Some(bmc.host.clone());
    run.publish();
    info!(cluster = %ctx.cluster_name, node, bmc = %bmc.host, "Starting power down");

    run.suppress_alerts().await;

    if let Err(e) = run.offline(info.role).await {
        return run.fail(e, "Power down");
    }
    if let Err(e) = run.power_off(&bmc).await {
        return run.fail(e, "Power down");
    }

    info!(cluster = %ctx.cluster_name, node, "Power down complete");
    run.finish()
}

/// Power a node up and return it to the cluster.
pub async fn power_up(
    ctx: &WorkflowContext,
    node: &str,
    progress: &ProgressHandle,
) -> Result<PowerProgress, WorkflowError> {
    let mut run = PowerRun {
        ctx,
        node,
        progress,
        state: PowerProgress::default(),
    };

    let info = match ctx.cluster.get_node(node).await {
        Ok(info) => info,
        Err(e) => return run.fail(e.into(), "Power up"),
    };
    run.state.node_role = Some(info.role);
    let bmc = match resolve_bmc(ctx, &info) {
        Ok(bmc) => bmc,
        Err(e) => return run.fail(e, "Power up"),
    };
    run.state.bmc_host = Some(bmc.host.clone());
    run.publish();
    info!(cluster = %ctx.cluster_name, node, bmc = %bmc.host, "Starting power up");

    run.power_on(&bmc).await;
    if let Err(e) = run.wait_reachable().await {
        return run.fail(e, "Power up");
    }

    run.progress.set_phase(WorkflowPhase::Settling);
    tokio::time::sleep(ctx.settings.settle_delay).await;

    if let Err(e) = run.reintegrate(info.role).await {
        return run.fail(e, "Power up");
    }

    info!(
        cluster = %ctx.cluster_name,
        node,
        attempts = run.state.reintegration_attempts,
        "Node back in service"
    );
    run.finish()
}
