// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Workflow progress publication
//!
//! Each workflow owns a [`ProgressHandle`], the only writer of its status.
//! Everyone else reads snapshots through the [`ProgressRegistry`].

use std::collections::HashMap;

use chrono::Utc;
use nodevac_types::{
    EvacuationState, InstanceProgress, PowerProgress, WorkflowDetail, WorkflowId, WorkflowKind,
    WorkflowPhase, WorkflowStatus, WorkflowSummary,
};
use tokio::sync::{RwLock, watch};

/// Write side of one workflow's status.
pub struct ProgressHandle {
    tx: watch::Sender<WorkflowStatus>,
}

impl ProgressHandle {
    /// A handle that is not registered anywhere. Useful when a workflow is
    /// driven directly rather than through the service.
    pub fn detached(
        id: impl Into<WorkflowId>,
        kind: WorkflowKind,
        cluster: &str,
        target: &str,
        detail: WorkflowDetail,
    ) -> Self {
        let (tx, _rx) = watch::channel(initial_status(id.into(), kind, cluster, target, detail));
        Self { tx }
    }

    pub fn id(&self) -> WorkflowId {
        self.tx.borrow().id.clone()
    }

    pub fn snapshot(&self) -> WorkflowStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowStatus> {
        self.tx.subscribe()
    }

    fn update(&self, f: impl FnOnce(&mut WorkflowStatus)) {
        self.tx.send_modify(|status| {
            f(status);
            status.updated_at = Utc::now();
        });
    }

    /// Enter a new phase. Terminal phases are final; later calls are
    /// ignored.
    pub fn set_phase(&self, phase: WorkflowPhase) {
        self.update(|status| {
            if status.phase.is_terminal() {
                return;
            }
            status.phase = phase;
            status.history.push(phase);
        });
    }

    pub fn publish_evacuation(&self, state: &EvacuationState) {
        self.update(|status| status.detail = WorkflowDetail::Evacuation(state.clone()));
    }

    pub fn publish_migration(&self, progress: &InstanceProgress) {
        self.update(|status| status.detail = WorkflowDetail::Migration(progress.clone()));
    }

    pub fn publish_power(&self, progress: &PowerProgress) {
        self.update(|status| status.detail = WorkflowDetail::Power(progress.clone()));
    }

    /// Record the cause and move to `Failed`.
    pub fn fail(&self, error: &str) {
        self.update(|status| {
            if status.phase.is_terminal() {
                return;
            }
            status.error = Some(error.to_string());
            status.phase = WorkflowPhase::Failed;
            status.history.push(WorkflowPhase::Failed);
        });
    }

    pub fn finish(&self) {
        self.set_phase(WorkflowPhase::Done);
    }
}

fn initial_status(
    id: WorkflowId,
    kind: WorkflowKind,
    cluster: &str,
    target: &str,
    detail: WorkflowDetail,
) -> WorkflowStatus {
    let now = Utc::now();
    WorkflowStatus {
        id,
        kind,
        cluster: cluster.to_string(),
        target: target.to_string(),
        phase: WorkflowPhase::Started,
        history: vec![WorkflowPhase::Started],
        error: None,
        started_at: now,
        updated_at: now,
        detail,
    }
}

/// Read side of every workflow the service has started.
#[derive(Default)]
pub struct ProgressRegistry {
    workflows: RwLock<HashMap<WorkflowId, watch::Receiver<WorkflowStatus>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the status for a new workflow and hand back its writer.
    pub async fn register(
        &self,
        id: impl Into<WorkflowId>,
        kind: WorkflowKind,
        cluster: &str,
        target: &str,
        detail: WorkflowDetail,
    ) -> ProgressHandle {
        let id = id.into();
        let (tx, rx) = watch::channel(initial_status(id.clone(), kind, cluster, target, detail));
        self.workflows.write().await.insert(id, rx);
        ProgressHandle { tx }
    }

    /// Drop a workflow that never ran.
    pub async fn remove(&self, id: &str) {
        self.workflows.write().await.remove(id);
    }

    /// Latest status of a workflow
    pub async fn get(&self, id: &str) -> Option<WorkflowStatus> {
        self.workflows
            .read()
            .await
            .get(id)
            .map(|rx| rx.borrow().clone())
    }

    /// All workflows, oldest first
    pub async fn list(&self) -> Vec<WorkflowSummary> {
        let workflows = self.workflows.read().await;
        let mut statuses: Vec<WorkflowStatus> =
            workflows.values().map(|rx| rx.borrow().clone()).collect();
        statuses.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        statuses.iter().map(WorkflowStatus::summary).collect()
    }
}
