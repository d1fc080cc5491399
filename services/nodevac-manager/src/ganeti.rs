// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Cluster manager client
//!
//! Workflows talk to the cluster manager only through the [`ClusterManager`]
//! trait. [`GanetiRapiClient`] implements it against the Ganeti remote API
//! (RAPI, version 2); tests substitute scripted fakes.

use std::time::Duration;

use async_trait::async_trait;
use nodevac_types::{ClusterInfo, JobId, NodeInfo, NodeRole};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::config::{ClusterEndpoint, ClusterRegistry};

/// Errors returned by the cluster manager
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The named object does not exist
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cluster manager returned {status} for {path}: {body}")]
    Status {
        status: u16,
        path: String,
        body: String,
    },

    /// The response could not be understood
    #[error("unexpected response from cluster manager: {0}")]
    Protocol(String),

    #[error("invalid cluster URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ClusterError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Whether an instance's disks can follow it to another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBacking {
    /// Replicated or shared storage; the instance can be live migrated
    Migratable,
    /// Node-local storage; the instance must be shut down instead
    NodeLocal,
}

impl StorageBacking {
    /// Classify a disk template. Unknown templates are treated as
    /// node-local.
    pub fn from_disk_template(template: &str) -> Self {
        match template {
            "drbd" | "sharedfile" | "blockdev" | "rbd" | "ext" | "gluster" => Self::Migratable,
            _ => Self::NodeLocal,
        }
    }
}

/// Instance details needed to decide between migration and shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub name: String,
    pub primary_node: String,
    pub disk_template: String,
    pub storage: StorageBacking,
}

/// One observation of a cluster job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    /// Raw status string, e.g. `running` or `success`
    pub status: String,
    pub terminal: bool,
    /// Meaningful only when `terminal` is true
    pub success: bool,
    /// Job detail payload as returned by the cluster manager
    pub detail: serde_json::Value,
}

impl JobStatus {
    /// Interpret a job status string.
    ///
    /// `success` is terminal success; `error` and `canceled` are terminal
    /// failure. Everything else is still in flight.
    pub fn from_status(status: &str, detail: serde_json::Value) -> Self {
        let (terminal, success) = match status {
            "success" => (true, true),
            "error" | "canceled" => (true, false),
            _ => (false, false),
        };
        Self {
            status: status.to_string(),
            terminal,
            success,
            detail,
        }
    }
}

/// Operations the workflows need from a cluster manager.
#[async_trait]
pub trait ClusterManager: Send + Sync {
    /// Cluster name, master, version and every node
    async fn cluster_info(&self) -> Result<ClusterInfo, ClusterError>;

    async fn get_node(&self, node: &str) -> Result<NodeInfo, ClusterError>;

    async fn get_instance(&self, instance: &str) -> Result<InstanceInfo, ClusterError>;

    /// Submit a role change. Returns the id of the job carrying it out.
    async fn set_node_role(&self, node: &str, role: NodeRole) -> Result<JobId, ClusterError>;

    /// Submit a live migration to the instance's secondary node.
    async fn migrate_instance(
        &self,
        instance: &str,
        allow_failover: bool,
    ) -> Result<JobId, ClusterError>;

    async fn shutdown_instance(&self, instance: &str) -> Result<JobId, ClusterError>;

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, ClusterError>;
}

/// Resolves a configured cluster name to a client.
pub trait ClusterConnector: Send + Sync {
    /// Configured cluster names, sorted
    fn clusters(&self) -> Vec<String>;

    /// Fails with [`ClusterError::NotFound`] for an unknown cluster.
    fn connect(&self, cluster: &str) -> Result<std::sync::Arc<dyn ClusterManager>, ClusterError>;
}

/// Connector that builds a [`GanetiRapiClient`] from the cluster registry.
pub struct RapiConnector {
    registry: ClusterRegistry,
    timeout: Duration,
}

impl RapiConnector {
    pub fn new(registry: ClusterRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }
}

impl ClusterConnector for RapiConnector {
    fn clusters(&self) -> Vec<String> {
        self.registry.names()
    }

    fn connect(&self, cluster: &str) -> Result<std::sync::Arc<dyn ClusterManager>, ClusterError> {
        let endpoint = self
            .registry
            .get(cluster)
            .ok_or_else(|| ClusterError::not_found("cluster", cluster))?;
        let client = GanetiRapiClient::new(endpoint, self.timeout)?;
        Ok(std::sync::Arc::new(client))
    }
}

/// Install the process-wide rustls crypto provider.
///
/// reqwest is built without a default provider. Installing twice is harmless:
/// the second attempt is rejected and ignored.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Build an HTTP client for a management endpoint.
pub(crate) fn http_client(
    timeout: Duration,
    verify_tls: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    install_crypto_provider();
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("nodevac-manager/", env!("CARGO_PKG_VERSION")))
        .danger_accept_invalid_certs(!verify_tls)
        .build()
}

// RAPI wire shapes

#[derive(Debug, Deserialize)]
struct RapiNode {
    name: String,
    role: String,
    #[serde(default)]
    pinst_list: Vec<String>,
    #[serde(default)]
    pinst_cnt: Option<u32>,
    #[serde(default)]
    tags: Vec<String>,
}

impl RapiNode {
    fn into_node_info(self) -> Result<NodeInfo, ClusterError> {
        let role = NodeRole::from_code(&self.role).ok_or_else(|| {
            ClusterError::Protocol(format!("unknown role '{}' for node {}", self.role, self.name))
        })?;
        let instance_count = self
            .pinst_cnt
            .unwrap_or_else(|| u32::try_from(self.pinst_list.len()).unwrap_or(u32::MAX));
        Ok(NodeInfo {
            name: self.name,
            role,
            instances: self.pinst_list,
            instance_count,
            tags: self.tags,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RapiInfo {
    name: String,
    master: String,
    software_version: String,
}

#[derive(Debug, Deserialize)]
struct RapiInstance {
    name: String,
    pnode: String,
    disk_template: String,
}

/// Client for the Ganeti remote API.
#[derive(Clone)]
pub struct GanetiRapiClient {
    client: reqwest::Client,
    base_url: Url,
    username: String,
    password: String,
}

impl GanetiRapiClient {
    pub fn new(endpoint: &ClusterEndpoint, timeout: Duration) -> Result<Self, ClusterError> {
        let base_url = Url::parse(&endpoint.url).map_err(|e| ClusterError::InvalidUrl {
            url: endpoint.url.clone(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ClusterError::InvalidUrl {
                url: endpoint.url.clone(),
                reason: "not a hierarchical URL".to_string(),
            });
        }
        Ok(Self {
            client: http_client(timeout, endpoint.verify_tls)?,
            base_url,
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
        })
    }

    /// Resource URL under the base. Each segment is percent-encoded, so a
    /// name containing `/` or `?` stays a single segment.
    fn url(&self, segments: &[&str]) -> Result<Url, ClusterError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClusterError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "not a hierarchical URL".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Map a non-success response to an error, treating 404 as "the named
    /// object does not exist".
    async fn check(
        response: reqwest::Response,
        path: &str,
        kind: &'static str,
        name: &str,
    ) -> Result<reqwest::Response, ClusterError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ClusterError::not_found(kind, name));
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClusterError::Status {
            status: status.as_u16(),
            path: path.to_string(),
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        kind: &'static str,
        name: &str,
    ) -> Result<T, ClusterError> {
        let path = url.path().to_string();
        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        let response = Self::check(response, &path, kind, name).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ClusterError::Protocol(format!("{}: {}", path, e)))
    }

    /// Submit a job-creating PUT and return the job id from the response.
    async fn put_job(
        &self,
        url: Url,
        body: serde_json::Value,
        kind: &'static str,
        name: &str,
    ) -> Result<JobId, ClusterError> {
        let path = url.path().to_string();
        let response = self
            .client
            .put(url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response, &path, kind, name).await?;
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ClusterError::Protocol(format!("{}: {}", path, e)))?;
        parse_job_id(&value)
            .ok_or_else(|| ClusterError::Protocol(format!("{}: no job id in {}", path, value)))
    }
}

/// Job ids come back as a bare JSON number or string.
fn parse_job_id(value: &serde_json::Value) -> Option<JobId> {
    match value {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

#[async_trait]
impl ClusterManager for GanetiRapiClient {
    async fn cluster_info(&self) -> Result<ClusterInfo, ClusterError> {
        let cluster = self.base_url.as_str();
        let info: RapiInfo = self
            .get_json(self.url(&["2", "info"])?, "cluster", cluster)
            .await?;
        let mut nodes_url = self.url(&["2", "nodes"])?;
        nodes_url.query_pairs_mut().append_pair("bulk", "1");
        let nodes: Vec<RapiNode> = self.get_json(nodes_url, "cluster", cluster).await?;
        let nodes = nodes
            .into_iter()
            .map(RapiNode::into_node_info)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ClusterInfo {
            name: info.name,
            master: info.master,
            software_version: info.software_version,
            nodes,
        })
    }

    async fn get_node(&self, node: &str) -> Result<NodeInfo, ClusterError> {
        let url = self.url(&["2", "nodes", node])?;
        let raw: RapiNode = self.get_json(url, "node", node).await?;
        raw.into_node_info()
    }

    async fn get_instance(&self, instance: &str) -> Result<InstanceInfo, ClusterError> {
        let url = self.url(&["2", "instances", instance])?;
        let raw: RapiInstance = self.get_json(url, "instance", instance).await?;
        Ok(InstanceInfo {
            storage: StorageBacking::from_disk_template(&raw.disk_template),
            name: raw.name,
            primary_node: raw.pnode,
            disk_template: raw.disk_template,
        })
    }

    async fn set_node_role(&self, node: &str, role: NodeRole) -> Result<JobId, ClusterError> {
        let url = self.url(&["2", "nodes", node, "role"])?;
        self.put_job(url, serde_json::json!(role.api_name()), "node", node)
            .await
    }

    async fn migrate_instance(
        &self,
        instance: &str,
        allow_failover: bool,
    ) -> Result<JobId, ClusterError> {
        let url = self.url(&["2", "instances", instance, "migrate"])?;
        self.put_job(
            url,
            serde_json::json!({ "allow_failover": allow_failover }),
            "instance",
            instance,
        )
        .await
    }

    async fn shutdown_instance(&self, instance: &str) -> Result<JobId, ClusterError> {
        let url = self.url(&["2", "instances", instance, "shutdown"])?;
        self.put_job(url, serde_json::json!({}), "instance", instance)
            .await
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, ClusterError> {
        let url = self.url(&["2", "jobs", job_id])?;
        let body: serde_json::Value = self.get_json(url, "job", job_id).await?;
        let status = body
            .get("status")
            .and_then(|s| s.as_str())
            .ok_or_else(|| ClusterError::Protocol(format!("job {}: no status field", job_id)))?
            .to_string();
        Ok(JobStatus::from_status(&status, body))
    }
}
