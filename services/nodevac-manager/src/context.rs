// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! API context for the nodevac manager

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use nodevac_types::{
    ClusterInfo, EvacuationState, InstanceProgress, NodeInfo, PowerProgress, WorkflowCreated,
    WorkflowDetail, WorkflowKind, WorkflowPhase, WorkflowStatus, WorkflowSummary,
};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::ganeti::{ClusterConnector, ClusterError, RapiConnector};
use crate::idempotency::{IdempotencyStore, InMemoryIdempotencyStore, Reservation, workflow_key};
use crate::jobs::{self, WorkflowContext};
use crate::metrics;
use crate::monitoring::{LivestatusClient, MonitoringSuppressor, NoMonitoring};
use crate::power::{IpmitoolPower, PowerInterface, ReachabilityProbe, TcpProbe};
use crate::progress::{ProgressHandle, ProgressRegistry};

/// Errors surfaced to API handlers
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    /// The request conflicts with the target's current state
    #[error("{0}")]
    Conflict(String),

    /// The cluster manager could not answer
    #[error("{0}")]
    Upstream(String),
}

impl From<ClusterError> for ContextError {
    fn from(e: ClusterError) -> Self {
        if e.is_not_found() {
            ContextError::NotFound(e.to_string())
        } else {
            ContextError::Upstream(e.to_string())
        }
    }
}

/// External systems the manager drives
#[derive(Clone)]
pub struct Collaborators {
    pub clusters: Arc<dyn ClusterConnector>,
    pub power: Arc<dyn PowerInterface>,
    pub probe: Arc<dyn ReachabilityProbe>,
    pub monitoring: Arc<dyn MonitoringSuppressor>,
    pub idempotency: Arc<dyn IdempotencyStore>,
}

impl Collaborators {
    /// Production collaborators built from configuration
    pub fn from_config(config: &ManagerConfig) -> Result<Self> {
        let http_timeout = Duration::from_secs(config.http_timeout_secs);

        let monitoring: Arc<dyn MonitoringSuppressor> = match &config.monitoring_url {
            Some(url) => Arc::new(LivestatusClient::new(url, http_timeout)?),
            None => Arc::new(NoMonitoring),
        };

        Ok(Self {
            clusters: Arc::new(RapiConnector::new(config.clusters.clone(), http_timeout)),
            power: Arc::new(IpmitoolPower::new(config.ipmi.tool_path.clone())),
            probe: Arc::new(TcpProbe::new(
                config.reachability_port,
                Duration::from_secs(config.reachability_timeout_secs),
            )),
            monitoring,
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
        })
    }
}

/// API context shared across all request handlers
pub struct ApiContext {
    config: watch::Receiver<ManagerConfig>,
    collaborators: Collaborators,
    registry: Arc<ProgressRegistry>,
}

impl ApiContext {
    /// Create a new API context
    ///
    /// Workflows pick up the configuration current at the time they start.
    pub fn new(config: watch::Receiver<ManagerConfig>, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            registry: Arc::new(ProgressRegistry::new()),
        }
    }

    pub fn list_clusters(&self) -> Vec<String> {
        self.collaborators.clusters.clusters()
    }

    pub async fn cluster_info(&self, cluster: &str) -> Result<ClusterInfo, ContextError> {
        let client = self.collaborators.clusters.connect(cluster)?;
        Ok(client.cluster_info().await?)
    }

    pub async fn node_info(&self, cluster: &str, node: &str) -> Result<NodeInfo, ContextError> {
        let client = self.collaborators.clusters.connect(cluster)?;
        Ok(client.get_node(node).await?)
    }

    /// Start evacuating a node
    pub async fn start_evacuation(
        &self,
        cluster: &str,
        node: &str,
    ) -> Result<WorkflowCreated, ContextError> {
        let target = node.to_string();
        self.spawn_workflow(
            WorkflowKind::Evacuate,
            cluster,
            node,
            WorkflowDetail::Evacuation(EvacuationState::default()),
            move |ctx, progress| async move {
                jobs::evacuate::evacuate_node(&ctx, &target, &progress)
                    .await
                    .phase
            },
        )
        .await
    }

    /// Start a single-instance migration
    pub async fn start_migration(
        &self,
        cluster: &str,
        instance: &str,
    ) -> Result<WorkflowCreated, ContextError> {
        let target = instance.to_string();
        self.spawn_workflow(
            WorkflowKind::Migrate,
            cluster,
            instance,
            WorkflowDetail::Migration(InstanceProgress::pending(instance)),
            move |ctx, progress| async move {
                finished(jobs::migrate::run_migration(&ctx, &target, &progress).await)
            },
        )
        .await
    }

    /// Start powering a node down
    ///
    /// Refuses up front if the node still hosts instances.
    pub async fn start_power_down(
        &self,
        cluster: &str,
        node: &str,
    ) -> Result<WorkflowCreated, ContextError> {
        let info = self.node_info(cluster, node).await?;
        jobs::power::ensure_empty(&info).map_err(|e| ContextError::Conflict(e.to_string()))?;

        let target = node.to_string();
        self.spawn_workflow(
            WorkflowKind::PowerDown,
            cluster,
            node,
            WorkflowDetail::Power(PowerProgress::default()),
            move |ctx, progress| async move {
                finished(jobs::power::power_down(&ctx, &target, &progress).await)
            },
        )
        .await
    }

    /// Start powering a node up
    pub async fn start_power_up(
        &self,
        cluster: &str,
        node: &str,
    ) -> Result<WorkflowCreated, ContextError> {
        let target = node.to_string();
        self.spawn_workflow(
            WorkflowKind::PowerUp,
            cluster,
            node,
            WorkflowDetail::Power(PowerProgress::default()),
            move |ctx, progress| async move {
                finished(jobs::power::power_up(&ctx, &target, &progress).await)
            },
        )
        .await
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowSummary> {
        self.registry.list().await
    }

    pub async fn get_workflow(&self, id: &str) -> Result<WorkflowStatus, ContextError> {
        Uuid::parse_str(id)
            .map_err(|_| ContextError::BadRequest(format!("Invalid UUID format: {}", id)))?;
        self.registry
            .get(id)
            .await
            .ok_or_else(|| ContextError::NotFound(format!("Workflow {} not found", id)))
    }

    fn workflow_context(&self, cluster: &str) -> Result<WorkflowContext, ContextError> {
        let client = self.collaborators.clusters.connect(cluster)?;
        let config = self.config.borrow();
        Ok(WorkflowContext {
            cluster_name: cluster.to_string(),
            cluster: client,
            power: self.collaborators.power.clone(),
            probe: self.collaborators.probe.clone(),
            monitoring: self.collaborators.monitoring.clone(),
            ipmi: config.ipmi.clone(),
            settings: config.workflow_settings(),
        })
    }

    /// Reserve the workflow's key and run the workflow in the background.
    ///
    /// A duplicate trigger gets the running workflow back. A node held by a
    /// workflow of another kind is a conflict.
    async fn spawn_workflow<F, Fut>(
        &self,
        kind: WorkflowKind,
        cluster: &str,
        target: &str,
        detail: WorkflowDetail,
        run: F,
    ) -> Result<WorkflowCreated, ContextError>
    where
        F: FnOnce(WorkflowContext, ProgressHandle) -> Fut + Send + 'static,
        Fut: Future<Output = WorkflowPhase> + Send + 'static,
    {
        let ctx = self.workflow_context(cluster)?;
        let key = workflow_key(kind, cluster, target);
        let id = Uuid::new_v4().to_string();

        // Registered first so an id handed out as `existing` is always
        // readable
        let progress = self.registry.register(id.clone(), kind, cluster, target, detail).await;

        let idempotency = self.collaborators.idempotency.clone();
        if let Reservation::Existing(existing) = idempotency.reserve_if_absent(&key, &id).await {
            self.registry.remove(&id).await;
            return self.existing_workflow(kind, cluster, target, existing).await;
        }

        metrics::record_workflow_started(&kind.to_string());
        tracing::info!(workflow_id = %id, kind = %kind, cluster, target, "Workflow started");

        let workflow_id = id.clone();
        tokio::spawn(async move {
            let phase = run(ctx, progress).await;
            idempotency.release(&key, &workflow_id).await;
            metrics::record_workflow_finished(&kind.to_string(), &phase.to_string());
            tracing::info!(workflow_id = %workflow_id, kind = %kind, phase = %phase, "Workflow finished");
        });

        Ok(WorkflowCreated { id, existing: false })
    }

    /// Answer a trigger whose key is already held by `existing`
    async fn existing_workflow(
        &self,
        kind: WorkflowKind,
        cluster: &str,
        target: &str,
        existing: String,
    ) -> Result<WorkflowCreated, ContextError> {
        let holder = self.registry.get(&existing).await.map(|status| status.kind);
        if holder != Some(kind) {
            tracing::info!(
                workflow_id = %existing,
                kind = %kind,
                cluster,
                target,
                "Target busy with another workflow"
            );
            let holder = holder.map_or_else(|| "another".to_string(), |k| k.to_string());
            return Err(ContextError::Conflict(format!(
                "{} is busy with {} workflow {}",
                target, holder, existing
            )));
        }

        tracing::info!(
            workflow_id = %existing,
            kind = %kind,
            cluster,
            target,
            "Workflow already running"
        );
        Ok(WorkflowCreated {
            id: existing,
            existing: true,
        })
    }
}

fn finished<T, E>(result: Result<T, E>) -> WorkflowPhase {
    match result {
        Ok(_) => WorkflowPhase::Done,
        Err(_) => WorkflowPhase::Failed,
    }
}
