// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Dropshot API trait for the nodevac manager service.
//!
//! The manager retires cluster nodes from service and brings them back:
//!
//! - Evacuating a node (drain, move every instance away, mark it offline)
//! - Migrating a single instance
//! - Powering a node down through its BMC
//! - Powering a node up and returning it to the cluster
//!
//! ## Endpoints
//!
//! - `GET /clusters` - List configured clusters
//! - `GET /clusters/{cluster}` - Cluster overview
//! - `GET /clusters/{cluster}/nodes/{node}` - Node details
//! - `POST /evacuate` - Start an evacuation
//! - `POST /migrate` - Start a single-instance migration
//! - `POST /power-down` - Start a power-down
//! - `POST /power-up` - Start a power-up
//! - `GET /workflows` - List workflows
//! - `GET /workflows/{id}` - Get workflow status
//! - `GET /metrics` - Prometheus metrics
//!
//! A node runs at most one of evacuate, power-down and power-up at a time.
//! Repeating the running workflow's trigger returns it with `existing` set;
//! a trigger of another kind for the same node is refused with 409.

use dropshot::{Body, HttpError, HttpResponseOk, Path, RequestContext, TypedBody};
use http::Response;
use nodevac_types::{
    ClusterInfo, MigrateRequest, NodeInfo, NodeWorkflowRequest, WorkflowCreated, WorkflowStatus,
    WorkflowSummary,
};
use schemars::JsonSchema;
use serde::Deserialize;

/// Path parameters for cluster endpoints.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClusterPath {
    /// Cluster name, as configured
    pub cluster: String,
}

/// Path parameters for node endpoints.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct NodePath {
    /// Cluster name, as configured
    pub cluster: String,
    /// Node name
    pub node: String,
}

/// Path parameters for workflow endpoints.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WorkflowPath {
    /// The workflow UUID
    pub id: String,
}

/// Nodevac Manager API
///
/// Workflows run asynchronously. Every trigger returns a workflow id that can
/// be polled with `GET /workflows/{id}`. Triggering a workflow that is already
/// running for the same target returns the running workflow's id.
#[dropshot::api_description]
pub trait NodevacManagerApi {
    /// Context type for request handlers
    type Context: Send + Sync + 'static;

    /// List configured clusters
    #[endpoint {
        method = GET,
        path = "/clusters",
        tags = ["clusters"],
    }]
    async fn list_clusters(
        rqctx: RequestContext<Self::Context>,
    ) -> Result<HttpResponseOk<Vec<String>>, HttpError>;

    /// Get cluster overview
    ///
    /// Returns 404 if the cluster is not configured.
    #[endpoint {
        method = GET,
        path = "/clusters/{cluster}",
        tags = ["clusters"],
    }]
    async fn get_cluster(
        rqctx: RequestContext<Self::Context>,
        path: Path<ClusterPath>,
    ) -> Result<HttpResponseOk<ClusterInfo>, HttpError>;

    /// Get node details
    ///
    /// Returns 404 if the cluster or node is unknown.
    #[endpoint {
        method = GET,
        path = "/clusters/{cluster}/nodes/{node}",
        tags = ["clusters"],
    }]
    async fn get_node(
        rqctx: RequestContext<Self::Context>,
        path: Path<NodePath>,
    ) -> Result<HttpResponseOk<NodeInfo>, HttpError>;

    /// Evacuate a node
    ///
    /// Drains the node, migrates (or shuts down) every resident instance in
    /// turn, then marks the node offline.
    #[endpoint {
        method = POST,
        path = "/evacuate",
        tags = ["workflows"],
    }]
    async fn evacuate_node(
        rqctx: RequestContext<Self::Context>,
        body: TypedBody<NodeWorkflowRequest>,
    ) -> Result<HttpResponseOk<WorkflowCreated>, HttpError>;

    /// Migrate a single instance
    #[endpoint {
        method = POST,
        path = "/migrate",
        tags = ["workflows"],
    }]
    async fn migrate_instance(
        rqctx: RequestContext<Self::Context>,
        body: TypedBody<MigrateRequest>,
    ) -> Result<HttpResponseOk<WorkflowCreated>, HttpError>;

    /// Power a node down
    ///
    /// Returns 409 if the node still has resident instances. The node must be
    /// evacuated first.
    #[endpoint {
        method = POST,
        path = "/power-down",
        tags = ["workflows"],
    }]
    async fn power_down_node(
        rqctx: RequestContext<Self::Context>,
        body: TypedBody<NodeWorkflowRequest>,
    ) -> Result<HttpResponseOk<WorkflowCreated>, HttpError>;

    /// Power a node up and return it to the cluster
    #[endpoint {
        method = POST,
        path = "/power-up",
        tags = ["workflows"],
    }]
    async fn power_up_node(
        rqctx: RequestContext<Self::Context>,
        body: TypedBody<NodeWorkflowRequest>,
    ) -> Result<HttpResponseOk<WorkflowCreated>, HttpError>;

    /// List workflows
    #[endpoint {
        method = GET,
        path = "/workflows",
        tags = ["workflows"],
    }]
    async fn list_workflows(
        rqctx: RequestContext<Self::Context>,
    ) -> Result<HttpResponseOk<Vec<WorkflowSummary>>, HttpError>;

    /// Get workflow status
    ///
    /// Returns the latest progress snapshot: phase, instance counts,
    /// per-instance job state and, for failed workflows, the error.
    ///
    /// Returns 400 if the id is not a UUID, 404 if it is unknown.
    #[endpoint {
        method = GET,
        path = "/workflows/{id}",
        tags = ["workflows"],
    }]
    async fn get_workflow(
        rqctx: RequestContext<Self::Context>,
        path: Path<WorkflowPath>,
    ) -> Result<HttpResponseOk<WorkflowStatus>, HttpError>;

    /// Prometheus metrics in text exposition format
    #[endpoint {
        method = GET,
        path = "/metrics",
        tags = ["system"],
    }]
    async fn get_metrics(
        rqctx: RequestContext<Self::Context>,
    ) -> Result<Response<Body>, HttpError>;
}
