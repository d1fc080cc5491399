// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Node evacuation
//!
//! Takes a node out of service so it can be worked on:
//!
//! 1. Drain the node so nothing new is placed on it (skipped if it is
//!    already drained)
//! 2. Migrate or shut down each resident instance, one at a time
//! 3. Mark the node offline
//!
//! Instances are moved strictly in the order the cluster manager lists them,
//! and the node is only offlined once every instance has been moved.

use nodevac_types::{EvacuationState, InstanceTaskState, NodeRole, WorkflowPhase};
use tracing::{error, info, warn};

use super::migrate::migrate_instance;
use super::role::transition_role;
use super::{WorkflowContext, WorkflowError};
use crate::config::MigrationFailurePolicy;
use crate::progress::ProgressHandle;

/// Final phase, accumulated state and, for failed runs, the cause
#[derive(Debug, Clone, PartialEq)]
pub struct EvacuationOutcome {
    pub phase: WorkflowPhase,
    pub state: EvacuationState,
    pub error: Option<WorkflowError>,
}

impl EvacuationOutcome {
    pub fn is_done(&self) -> bool {
        self.phase == WorkflowPhase::Done
    }
}

struct Evacuation<'a> {
    ctx: &'a WorkflowContext,
    node: &'a str,
    progress: &'a ProgressHandle,
    state: EvacuationState,
}

impl Evacuation<'_> {
    fn publish(&self) {
        self.progress.publish_evacuation(&self.state);
    }

    fn fail(self, error: WorkflowError) -> EvacuationOutcome {
        error!(
            cluster = %self.ctx.cluster_name,
            node = self.node,
            completed = self.state.completed_instances,
            total = self.state.total_instances,
            error = %error,
            "Evacuation failed"
        );
        self.publish();
        self.progress.fail(&error.to_string());
        EvacuationOutcome {
            phase: WorkflowPhase::Failed,
            state: self.state,
            error: Some(error),
        }
    }

    async fn drain(&mut self, current: NodeRole) -> Result<(), WorkflowError> {
        self.progress.set_phase(WorkflowPhase::Draining);
        let outcome = transition_role(
            self.ctx.cluster.as_ref(),
            self.node,
            current,
            NodeRole::Drained,
            &self.ctx.settings.job_wait,
        )
        .await?;

        self.state.node_role = Some(outcome.role);
        self.publish();
        if !outcome.succeeded {
            return Err(WorkflowError::TransitionFailed(format!(
                "drain of {} failed (job {})",
                self.node, outcome.job.job_id
            )));
        }
        self.progress.set_phase(WorkflowPhase::Drained);
        Ok(())
    }

    async fn migrate_all(&mut self, instances: &[String]) -> Result<(), WorkflowError> {
        self.progress.set_phase(WorkflowPhase::Migrating);
        let mut failed = Vec::new();

        for instance in instances {
            let state = &mut self.state;
            let progress = self.progress;
            let record = migrate_instance(
                self.ctx.cluster.as_ref(),
                instance,
                &self.ctx.settings.job_wait,
                |action, job_id| {
                    state.begin_instance(instance, action, job_id);
                    progress.publish_evacuation(state);
                },
            )
            .await?;

            let succeeded = record.state == InstanceTaskState::Success;
            let job_id = record.job_id.clone().unwrap_or_default();
            self.state.record_instance(record);
            self.publish();
            info!(
                node = self.node,
                instance = %instance,
                completed = self.state.completed_instances,
                total = self.state.total_instances,
                "Instance evacuated"
            );

            if !succeeded {
                match self.ctx.settings.failure_policy {
                    MigrationFailurePolicy::FailFast => {
                        return Err(WorkflowError::TransitionFailed(format!(
                            "evacuation of {} from {} failed (job {})",
                            instance, self.node, job_id
                        )));
                    }
                    MigrationFailurePolicy::SkipAndContinue => {
                        warn!(
                            node = self.node,
                            instance = %instance,
                            "Instance failed to move, continuing with the rest"
                        );
                        failed.push(instance.clone());
                    }
                }
            }
        }

        if !failed.is_empty() {
            return Err(WorkflowError::TransitionFailed(format!(
                "{} of {} instances failed to leave {}: {}",
                failed.len(),
                self.state.total_instances,
                self.node,
                failed.join(", ")
            )));
        }
        if !self.state.all_terminal() {
            return Err(WorkflowError::TransitionFailed(format!(
                "instances on {} did not all finish",
                self.node
            )));
        }
        Ok(())
    }

    async fn offline(&mut self) -> Result<(), WorkflowError> {
        self.progress.set_phase(WorkflowPhase::Offlining);
        let current = self.state.node_role.unwrap_or(NodeRole::Drained);
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
}

/// Evacuate a node.
///
/// Progress is published through `progress` as the workflow runs; the same
/// final state is returned.
pub async fn evacuate_node(
    ctx: &WorkflowContext,
    node: &str,
    progress: &ProgressHandle,
) -> EvacuationOutcome {
    let mut run = Evacuation {
        ctx,
        node,
        progress,
        state: EvacuationState::default(),
    };

    let info = match ctx.cluster.get_node(node).await {
        Ok(info) => info,
        Err(e) => return run.fail(e.into()),
    };

    run.state = EvacuationState::new(info.role, &info.instances);
    run.publish();
    info!(
        cluster = %ctx.cluster_name,
        node,
        role = %info.role,
        instances = run.state.total_instances,
        "Starting evacuation"
    );

    if info.role == NodeRole::Drained {
        info!(node, "Node already drained, skipping drain");
    } else if let Err(e) = run.drain(info.role).await {
        return run.fail(e);
    }

    if info.instances.is_empty() {
        info!(node, "No resident instances");
    } else if let Err(e) = run.migrate_all(&info.instances).await {
        return run.fail(e);
    }

    if let Err(e) = run.offline().await {
        return run.fail(e);
    }

    info!(
        cluster = %ctx.cluster_name,
        node,
        instances = run.state.total_instances,
        "Evacuation complete"
    );
    run.publish();
    progress.finish();
    EvacuationOutcome {
        phase: WorkflowPhase::Done,
        state: run.state,
        error: None,
    }
}
