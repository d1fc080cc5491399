// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Shared types for the nodevac manager and its HTTP API.
//!
//! These are the records a caller sees when it triggers a node workflow
//! (evacuate, migrate, power-down, power-up) and when it polls the progress
//! of one.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, VariantNames};

// ============================================================================
// Type Aliases
// ============================================================================

/// Workflow identifier (UUID string)
pub type WorkflowId = String;

/// Cluster-manager job identifier (opaque)
pub type JobId = String;

// ============================================================================
// Cluster Types
// ============================================================================

/// Operational role of a node as assigned by the cluster manager.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
    VariantNames,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeRole {
    /// Reported by some clusters in place of `regular`
    Normal,
    Regular,
    MasterCandidate,
    Drained,
    Offline,
    Master,
}

impl NodeRole {
    /// Expand the single-letter role code used by the cluster manager.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "N" => Some(Self::Normal),
            "R" => Some(Self::Regular),
            "C" => Some(Self::MasterCandidate),
            "D" => Some(Self::Drained),
            "O" => Some(Self::Offline),
            "M" => Some(Self::Master),
            _ => None,
        }
    }

    /// Human readable form, as shown to operators.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Regular => "Regular",
            Self::MasterCandidate => "Master Candidate",
            Self::Drained => "Drained",
            Self::Offline => "Offline",
            Self::Master => "Master",
        }
    }

    /// Name accepted by the cluster manager's role-change call.
    pub fn api_name(&self) -> &'static str {
        match self {
            Self::Normal | Self::Regular => "regular",
            Self::MasterCandidate => "master-candidate",
            Self::Drained => "drained",
            Self::Offline => "offline",
            Self::Master => "master",
        }
    }
}

/// Node details as returned to API callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodeInfo {
    /// Node name (FQDN)
    pub name: String,
    /// Current role
    pub role: NodeRole,
    /// Names of the primary instances resident on this node
    pub instances: Vec<String>,
    /// Number of primary instances resident on this node
    pub instance_count: u32,
    /// Node tags (e.g. `ipmi:<bmc-fqdn>`)
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Cluster overview.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClusterInfo {
    /// Cluster name as reported by the cluster manager
    pub name: String,
    /// Name of the current master node
    pub master: String,
    /// Cluster-manager software version
    pub software_version: String,
    /// All nodes in the cluster
    pub nodes: Vec<NodeInfo>,
}

/// What the migration policy chose to do with an instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InstanceAction {
    /// Live migration, with failover allowed
    Migrate,
    /// Instance was stopped because its disks cannot leave the node
    Shutdown,
}

// ============================================================================
// Power Types
// ============================================================================

/// Host power state as observed through the out-of-band interface.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PowerState {
    #[default]
    Unknown,
    On,
    ShutdownRequested,
    Off,
    PowerUpRequested,
}

// ============================================================================
// Workflow Types
// ============================================================================

/// Kind of node workflow.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
    VariantNames,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkflowKind {
    /// Drain a node, move its instances away and mark it offline
    Evacuate,
    /// Migrate (or shut down) a single instance
    Migrate,
    /// Power a node off through its BMC
    PowerDown,
    /// Power a node on and return it to the cluster
    PowerUp,
}

/// Phase of a workflow.
///
/// Evacuations move through `Started → Draining → Drained → Migrating →
/// Offlining → Done`. Power workflows use the power phases. Any workflow can
/// end in `Failed`.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
    VariantNames,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkflowPhase {
    #[default]
    Started,
    Draining,
    Drained,
    Migrating,
    Offlining,
    SuppressingAlerts,
    PoweringOff,
    WaitingForPowerOff,
    PoweringOn,
    WaitingForReachability,
    Settling,
    Reintegrating,
    Done,
    Failed,
}

impl WorkflowPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Last observed state of the cluster job driving one instance.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InstanceTaskState {
    /// Not submitted yet
    #[default]
    Pending,
    /// Job submitted, waiting for a terminal status
    Running,
    Success,
    Failure,
}

impl InstanceTaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// Progress record for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InstanceProgress {
    /// Instance name
    pub instance: String,
    /// Chosen action, once decided
    pub action: Option<InstanceAction>,
    /// Cluster job driving the action, once submitted
    pub job_id: Option<JobId>,
    /// Last observed job state
    pub state: InstanceTaskState,
    /// Last observed job detail payload
    pub detail: Option<serde_json::Value>,
}

impl InstanceProgress {
    pub fn pending(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            action: None,
            job_id: None,
            state: InstanceTaskState::Pending,
            detail: None,
        }
    }
}

/// Accumulated state of one evacuation.
///
/// Counts only increase and per-instance states only move forward.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EvacuationState {
    /// Node role as last observed (or achieved) by the workflow; unset until
    /// the node has been read
    pub node_role: Option<NodeRole>,
    /// Number of resident instances at workflow start
    pub total_instances: u32,
    /// Instances that reached a terminal outcome
    pub completed_instances: u32,
    /// One record per resident instance, in submission order
    pub instances: Vec<InstanceProgress>,
}

impl EvacuationState {
    /// Start tracking an evacuation of a node with the given resident
    /// instances.
    pub fn new(node_role: NodeRole, instances: &[String]) -> Self {
        Self {
            node_role: Some(node_role),
            total_instances: u32::try_from(instances.len()).unwrap_or(u32::MAX),
            completed_instances: 0,
            instances: instances.iter().map(InstanceProgress::pending).collect(),
        }
    }

    /// Mark an instance's job as submitted.
    ///
    /// Returns false if the instance is unknown or already terminal.
    pub fn begin_instance(&mut self, instance: &str, action: InstanceAction, job_id: &str) -> bool {
        match self.instances.iter_mut().find(|p| p.instance == instance) {
            Some(p) if p.state == InstanceTaskState::Pending => {
                p.action = Some(action);
                p.job_id = Some(job_id.to_string());
                p.state = InstanceTaskState::Running;
                true
            }
            _ => false,
        }
    }

    /// Record a terminal outcome for an instance and bump the completed
    /// count.
    ///
    /// Returns false (and changes nothing) if the instance is unknown, is
    /// already terminal, or the count is already at the total.
    pub fn record_instance(&mut self, outcome: InstanceProgress) -> bool {
        if !outcome.state.is_terminal() || self.completed_instances >= self.total_instances {
            return false;
        }
        match self
            .instances
            .iter_mut()
            .find(|p| p.instance == outcome.instance)
        {
            Some(p) if !p.state.is_terminal() => {
                *p = outcome;
                self.completed_instances += 1;
                true
            }
            _ => false,
        }
    }

    /// True when every resident instance has a terminal outcome.
    pub fn all_terminal(&self) -> bool {
        self.instances.iter().all(|p| p.state.is_terminal())
    }

    /// Instances whose job reported failure.
    pub fn failed_instances(&self) -> Vec<&str> {
        self.instances
            .iter()
            .filter(|p| p.state == InstanceTaskState::Failure)
            .map(|p| p.instance.as_str())
            .collect()
    }
}

/// Progress of a power-down or power-up workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PowerProgress {
    /// Last observed power state
    pub power_state: PowerState,
    /// BMC host used for power commands, once resolved
    pub bmc_host: Option<String>,
    /// Number of power-status polls so far
    pub status_polls: u32,
    /// Number of reachability probes so far
    pub reachability_polls: u32,
    /// Number of role-change attempts made to rejoin the cluster
    pub reintegration_attempts: u32,
    /// Node role as last achieved by the workflow
    pub node_role: Option<NodeRole>,
}

/// Kind-specific detail of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "state", rename_all = "snake_case")]
pub enum WorkflowDetail {
    Evacuation(EvacuationState),
    Migration(InstanceProgress),
    Power(PowerProgress),
}

/// Full, externally observable status of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowStatus {
    pub id: WorkflowId,
    pub kind: WorkflowKind,
    /// Cluster the target belongs to
    pub cluster: String,
    /// Node (or instance, for migrations) the workflow acts on
    pub target: String,
    pub phase: WorkflowPhase,
    /// Every phase entered so far, in order
    pub history: Vec<WorkflowPhase>,
    /// Cause of failure, passed through from the failing collaborator
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub detail: WorkflowDetail,
}

impl WorkflowStatus {
    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            id: self.id.clone(),
            kind: self.kind,
            cluster: self.cluster.clone(),
            target: self.target.clone(),
            phase: self.phase,
        }
    }
}

/// Short form of a workflow, for listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowSummary {
    pub id: WorkflowId,
    pub kind: WorkflowKind,
    pub cluster: String,
    pub target: String,
    pub phase: WorkflowPhase,
}

// ============================================================================
// Request / Response Types
// ============================================================================

/// Body for workflows that act on a node.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NodeWorkflowRequest {
    pub cluster: String,
    pub node: String,
}

/// Body for a single-instance migration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MigrateRequest {
    pub cluster: String,
    pub instance: String,
}

/// Response to a workflow trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowCreated {
    /// Workflow to poll for status
    pub id: WorkflowId,
    /// True if an identical workflow was already running and no new one was
    /// started
    pub existing: bool,
}

// ============================================================================
// Tests
// ============================================================================
