// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Nodevac Manager Library
//!
//! Orchestrates taking cluster nodes out of service and bringing them back:
//! evacuation, single-instance migration, power-down and power-up.
//!
//! # Modules
//!
//! - [`config`] - Manager configuration (clusters, BMC credentials, tunables)
//! - [`context`] - API context for request handlers
//! - [`ganeti`] - Cluster manager client
//! - [`power`] - Out-of-band power control and reachability probing
//! - [`monitoring`] - Monitoring downtime scheduling
//! - [`jobs`] - The workflows and their building blocks
//! - [`progress`] - Per-workflow progress publication
//! - [`idempotency`] - One running workflow per target

pub mod config;
pub mod context;
pub mod ganeti;
pub mod idempotency;
pub mod jobs;
pub mod metrics;
pub mod monitoring;
pub mod power;
pub mod progress;

use dropshot::{
    Body, ClientErrorStatusCode, HttpError, HttpResponseOk, Path, RequestContext, TypedBody,
};
use http::Response;
use nodevac_api::{ClusterPath, NodePath, NodevacManagerApi, WorkflowPath};
use nodevac_types::{
    ClusterInfo, MigrateRequest, NodeInfo, NodeWorkflowRequest, WorkflowCreated, WorkflowStatus,
    WorkflowSummary,
};

use crate::context::{ApiContext, ContextError};

impl From<ContextError> for HttpError {
    fn from(e: ContextError) -> Self {
        match e {
            ContextError::NotFound(msg) => HttpError::for_not_found(None, msg),
            ContextError::BadRequest(msg) => HttpError::for_bad_request(None, msg),
            ContextError::Conflict(msg) => {
                HttpError::for_client_error(None, ClientErrorStatusCode::CONFLICT, msg)
            }
            ContextError::Upstream(msg) => HttpError::for_unavail(None, msg),
        }
    }
}

/// Nodevac Manager API implementation
///
/// All state lives in the `ApiContext`.
pub enum NodevacManagerImpl {}

impl NodevacManagerApi for NodevacManagerImpl {
    type Context = ApiContext;

    async fn list_clusters(
        rqctx: RequestContext<Self::Context>,
    ) -> Result<HttpResponseOk<Vec<String>>, HttpError> {
        Ok(HttpResponseOk(rqctx.context().list_clusters()))
    }

    async fn get_cluster(
        rqctx: RequestContext<Self::Context>,
        path: Path<ClusterPath>,
    ) -> Result<HttpResponseOk<ClusterInfo>, HttpError> {
        let cluster = path.into_inner().cluster;
        let info = rqctx.context().cluster_info(&cluster).await?;
        Ok(HttpResponseOk(info))
    }

    async fn get_node(
        rqctx: RequestContext<Self::Context>,
        path: Path<NodePath>,
    ) -> Result<HttpResponseOk<NodeInfo>, HttpError> {
        let NodePath { cluster, node } = path.into_inner();
        let info = rqctx.context().node_info(&cluster, &node).await?;
        Ok(HttpResponseOk(info))
    }

    async fn evacuate_node(
        rqctx: RequestContext<Self::Context>,
        body: TypedBody<NodeWorkflowRequest>,
    ) -> Result<HttpResponseOk<WorkflowCreated>, HttpError> {
        let req = body.into_inner();
        tracing::info!(cluster = %req.cluster, node = %req.node, "Received evacuation request");
        let created = rqctx
            .context()
            .start_evacuation(&req.cluster, &req.node)
            .await?;
        Ok(HttpResponseOk(created))
    }

    async fn migrate_instance(
        rqctx: RequestContext<Self::Context>,
        body: TypedBody<MigrateRequest>,
    ) -> Result<HttpResponseOk<WorkflowCreated>, HttpError> {
        let req = body.into_inner();
        tracing::info!(
            cluster = %req.cluster,
            instance = %req.instance,
            "Received migration request"
        );
        let created = rqctx
            .context()
            .start_migration(&req.cluster, &req.instance)
            .await?;
        Ok(HttpResponseOk(created))
    }

    async fn power_down_node(
        rqctx: RequestContext<Self::Context>,
        body: TypedBody<NodeWorkflowRequest>,
    ) -> Result<HttpResponseOk<WorkflowCreated>, HttpError> {
        let req = body.into_inner();
        tracing::info!(cluster = %req.cluster, node = %req.node, "Received power down request");
        let created = rqctx
            .context()
            .start_power_down(&req.cluster, &req.node)
            .await?;
        Ok(HttpResponseOk(created))
    }

    async fn power_up_node(
        rqctx: RequestContext<Self::Context>,
        body: TypedBody<NodeWorkflowRequest>,
    ) -> Result<HttpResponseOk<WorkflowCreated>, HttpError> {
        let req = body.into_inner();
        tracing::info!(cluster = %req.cluster, node = %req.node, "Received power up request");
        let created = rqctx
            .context()
            .start_power_up(&req.cluster, &req.node)
            .await?;
        Ok(HttpResponseOk(created))
    }

    async fn list_workflows(
        rqctx: RequestContext<Self::Context>,
    ) -> Result<HttpResponseOk<Vec<WorkflowSummary>>, HttpError> {
        Ok(HttpResponseOk(rqctx.context().list_workflows().await))
    }

    async fn get_workflow(
        rqctx: RequestContext<Self::Context>,
        path: Path<WorkflowPath>,
    ) -> Result<HttpResponseOk<WorkflowStatus>, HttpError> {
        let id = path.into_inner().id;
        let status = rqctx.context().get_workflow(&id).await?;
        Ok(HttpResponseOk(status))
    }

    async fn get_metrics(
        _rqctx: RequestContext<Self::Context>,
    ) -> Result<Response<Body>, HttpError> {
        Response::builder()
            .status(200)
            .header("Content-Type", "text/plain; version=0.0.4")
            .body(metrics::gather_metrics().into())
            .map_err(|e| HttpError::for_internal_error(format!("Failed to build response: {}", e)))
    }
}
