// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Scripted stand-ins for the cluster manager, BMC, network probe and
//! monitoring system, shared by the integration tests.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nodevac_manager::config::{IpmiSettings, MigrationFailurePolicy};
use nodevac_manager::ganeti::{
    ClusterConnector, ClusterError, ClusterManager, InstanceInfo, JobStatus, StorageBacking,
};
use nodevac_manager::jobs::{JobWaitPolicy, RetryPolicy, WorkflowContext, WorkflowSettings};
use nodevac_manager::monitoring::{MonitoringError, MonitoringSuppressor};
use nodevac_manager::power::{BmcEndpoint, PowerCommand, PowerError, PowerInterface, ReachabilityProbe};
use nodevac_manager::progress::ProgressHandle;
use nodevac_types::{ClusterInfo, JobId, NodeInfo, NodeRole, WorkflowDetail, WorkflowKind};

// ============================================================================
// Cluster manager
// ============================================================================

/// What happens to the cluster when a job succeeds
#[derive(Clone)]
enum Effect {
    SetRole(String, NodeRole),
    Migrate(String),
    None,
}

struct FakeJob {
    statuses: VecDeque<&'static str>,
    effect: Effect,
}

#[derive(Default)]
struct ClusterState {
    nodes: HashMap<String, NodeInfo>,
    instances: HashMap<String, InstanceInfo>,
    /// Per-submission status scripts, keyed by e.g. `role:n1:drained`
    plans: HashMap<String, VecDeque<Vec<&'static str>>>,
    jobs: HashMap<JobId, FakeJob>,
    next_job: u64,
    calls: Vec<String>,
    status_errors: u32,
    status_polls: u32,
}

/// In-memory cluster manager. Every submitted job succeeds on its first
/// poll unless a plan says otherwise.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with a BMC tag and the given primary instances
    pub fn with_node(self, name: &str, role: NodeRole, instances: &[&str]) -> Self {
        self.with_tagged_node(
            name,
            role,
            instances,
            &[&format!("ipmi:{}-ilo.example.com", name)],
        )
    }

    pub fn with_tagged_node(
        self,
        name: &str,
        role: NodeRole,
        instances: &[&str],
        tags: &[&str],
    ) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.nodes.insert(
                name.to_string(),
                NodeInfo {
                    name: name.to_string(),
                    role,
                    instances: instances.iter().map(|s| s.to_string()).collect(),
                    instance_count: instances.len() as u32,
                    tags: tags.iter().map(|s| s.to_string()).collect(),
                },
            );
            for instance in instances {
                state
                    .instances
                    .entry(instance.to_string())
                    .or_insert_with(|| InstanceInfo {
                        name: instance.to_string(),
                        primary_node: name.to_string(),
                        disk_template: "drbd".to_string(),
                        storage: StorageBacking::Migratable,
                    });
            }
        }
        self
    }

    /// Override an instance's disk template
    pub fn with_disk_template(self, instance: &str, template: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let info = state.instances.get_mut(instance).expect("instance exists");
            info.disk_template = template.to_string();
            info.storage = StorageBacking::from_disk_template(template);
        }
        self
    }

    /// Script the statuses returned for the next job submitted under `key`.
    /// The last status repeats forever.
    pub fn plan(&self, key: &str, statuses: &[&'static str]) {
        self.state
            .lock()
            .unwrap()
            .plans
            .entry(key.to_string())
            .or_default()
            .push_back(statuses.to_vec());
    }

    /// Make the next `n` job status requests fail with a transport error
    pub fn fail_status_polls(&self, n: u32) {
        self.state.lock().unwrap().status_errors = n;
    }

    /// Submissions in order, e.g. `set_role n1 drained`, `migrate vmA`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn status_polls(&self) -> u32 {
        self.state.lock().unwrap().status_polls
    }

    pub fn node_role(&self, node: &str) -> NodeRole {
        self.state.lock().unwrap().nodes[node].role
    }

    fn submit(&self, call: String, key: String, effect: Effect) -> JobId {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state.next_job += 1;
        let id = state.next_job.to_string();
        let statuses = state
            .plans
            .get_mut(&key)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| vec!["success"]);
        state.jobs.insert(
            id.clone(),
            FakeJob {
                statuses: statuses.into(),
                effect,
            },
        );
        id
    }
}

#[async_trait]
impl ClusterManager for FakeCluster {
    async fn cluster_info(&self) -> Result<ClusterInfo, ClusterError> {
        let state = self.state.lock().unwrap();
        let mut nodes: Vec<NodeInfo> = state.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ClusterInfo {
            name: "fake".to_string(),
            master: nodes.first().map(|n| n.name.clone()).unwrap_or_default(),
            software_version: "2.16.0".to_string(),
            nodes,
        })
    }

    async fn get_node(&self, node: &str) -> Result<NodeInfo, ClusterError> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(node)
            .cloned()
            .ok_or_else(|| ClusterError::not_found("node", node))
    }

    async fn get_instance(&self, instance: &str) -> Result<InstanceInfo, ClusterError> {
        self.state
            .lock()
            .unwrap()
            .instances
            .get(instance)
            .cloned()
            .ok_or_else(|| ClusterError::not_found("instance", instance))
    }

    async fn set_node_role(&self, node: &str, role: NodeRole) -> Result<JobId, ClusterError> {
        if !self.state.lock().unwrap().nodes.contains_key(node) {
            return Err(ClusterError::not_found("node", node));
        }
        Ok(self.submit(
            format!("set_role {} {}", node, role.api_name()),
            format!("role:{}:{}", node, role.api_name()),
            Effect::SetRole(node.to_string(), role),
        ))
    }

    async fn migrate_instance(
        &self,
        instance: &str,
        allow_failover: bool,
    ) -> Result<JobId, ClusterError> {
        assert!(allow_failover, "migrations always allow failover");
        Ok(self.submit(
            format!("migrate {}", instance),
            format!("migrate:{}", instance),
            Effect::Migrate(instance.to_string()),
        ))
    }

    async fn shutdown_instance(&self, instance: &str) -> Result<JobId, ClusterError> {
        Ok(self.submit(
            format!("shutdown {}", instance),
            format!("shutdown:{}", instance),
            Effect::None,
        ))
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.status_polls += 1;
        if state.status_errors > 0 {
            state.status_errors -= 1;
            return Err(ClusterError::Protocol("connection reset".to_string()));
        }

        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| ClusterError::not_found("job", job_id))?;
        let status = if job.statuses.len() > 1 {
            job.statuses.pop_front().unwrap_or("success")
        } else {
            job.statuses.front().copied().unwrap_or("success")
        };

        if status == "success" {
            match std::mem::replace(&mut job.effect, Effect::None) {
                Effect::SetRole(node, role) => {
                    if let Some(n) = state.nodes.get_mut(&node) {
                        n.role = role;
                    }
                }
                Effect::Migrate(instance) => {
                    for n in state.nodes.values_mut() {
                        n.instances.retain(|i| i != &instance);
                        n.instance_count = n.instances.len() as u32;
                    }
                }
                Effect::None => {}
            }
        }

        Ok(JobStatus::from_status(
            status,
            serde_json::json!({ "id": job_id, "status": status }),
        ))
    }
}

/// Connector serving a fixed set of fake clusters
pub struct FakeConnector {
    clusters: HashMap<String, Arc<FakeCluster>>,
}

impl FakeConnector {
    pub fn new(clusters: &[(&str, Arc<FakeCluster>)]) -> Self {
        Self {
            clusters: clusters
                .iter()
                .map(|(name, c)| (name.to_string(), c.clone()))
                .collect(),
        }
    }
}

impl ClusterConnector for FakeConnector {
    fn clusters(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clusters.keys().cloned().collect();
        names.sort();
        names
    }

    fn connect(&self, cluster: &str) -> Result<Arc<dyn ClusterManager>, ClusterError> {
        self.clusters
            .get(cluster)
            .map(|c| c.clone() as Arc<dyn ClusterManager>)
            .ok_or_else(|| ClusterError::not_found("cluster", cluster))
    }
}

// ============================================================================
// Power, reachability, monitoring
// ============================================================================

/// BMC that reports scripted power states. The last state repeats.
pub struct FakePower {
    states: Mutex<VecDeque<&'static str>>,
    commands: Mutex<Vec<(String, PowerCommand)>>,
    fail_commands: bool,
}

impl FakePower {
    pub fn new(states: &[&'static str]) -> Self {
        Self {
            states: Mutex::new(states.iter().copied().collect()),
            commands: Mutex::new(Vec::new()),
            fail_commands: false,
        }
    }

    /// Power on/off requests fail; status queries still work
    pub fn failing_commands(states: &[&'static str]) -> Self {
        Self {
            fail_commands: true,
            ..Self::new(states)
        }
    }

    pub fn commands(&self) -> Vec<PowerCommand> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|(_, c)| *c)
            .collect()
    }

    pub fn hosts(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|(h, _)| h.clone())
            .collect()
    }
}

#[async_trait]
impl PowerInterface for FakePower {
    async fn send_command(
        &self,
        bmc: &BmcEndpoint,
        command: PowerCommand,
    ) -> Result<String, PowerError> {
        self.commands
            .lock()
            .unwrap()
            .push((bmc.host.clone(), command));
        match command {
            PowerCommand::Status => {
                let mut states = self.states.lock().unwrap();
                let state = if states.len() > 1 {
                    states.pop_front().unwrap_or("off")
                } else {
                    states.front().copied().unwrap_or("off")
                };
                Ok(format!("Chassis Power is {}\n", state))
            }
            _ if self.fail_commands => Err(PowerError::CommandFailed {
                command,
                host: bmc.host.clone(),
                status: "exit status: 1".to_string(),
                stderr: "Unable to establish IPMI v2 / RMCP+ session".to_string(),
            }),
            PowerCommand::SoftOff => Ok("Chassis Power Control: Soft\n".to_string()),
            PowerCommand::On => Ok("Chassis Power Control: Up/On\n".to_string()),
        }
    }
}

/// Probe answering from a script. The last answer repeats.
pub struct FakeProbe {
    answers: Mutex<VecDeque<bool>>,
    probes: Mutex<u32>,
}

impl FakeProbe {
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            probes: Mutex::new(0),
        }
    }

    pub fn probes(&self) -> u32 {
        *self.probes.lock().unwrap()
    }
}

#[async_trait]
impl ReachabilityProbe for FakeProbe {
    async fn is_reachable(&self, _host: &str) -> bool {
        *self.probes.lock().unwrap() += 1;
        let mut answers = self.answers.lock().unwrap();
        if answers.len() > 1 {
            answers.pop_front().unwrap_or(true)
        } else {
            answers.front().copied().unwrap_or(true)
        }
    }
}

#[derive(Clone, Copy)]
pub enum MonitoringReply {
    Acknowledged,
    Refused,
    Unreachable,
}

pub struct FakeMonitoring {
    reply: MonitoringReply,
    hosts: Mutex<Vec<String>>,
}

impl FakeMonitoring {
    pub fn new(reply: MonitoringReply) -> Self {
        Self {
            reply,
            hosts: Mutex::new(Vec::new()),
        }
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts.lock().unwrap().clone()
    }
}

#[async_trait]
impl MonitoringSuppressor for FakeMonitoring {
    async fn schedule_downtime(
        &self,
        host: &str,
        _duration: Duration,
    ) -> Result<bool, MonitoringError> {
        self.hosts.lock().unwrap().push(host.to_string());
        match self.reply {
            MonitoringReply::Acknowledged => Ok(true),
            MonitoringReply::Refused => Ok(false),
            MonitoringReply::Unreachable => Err(MonitoringError::InvalidUrl {
                url: "http://monitoring.invalid".to_string(),
                reason: "unreachable".to_string(),
            }),
        }
    }
}

// ============================================================================
// Workflow wiring
// ============================================================================

/// Millisecond timings so workflows finish quickly
pub fn fast_settings() -> WorkflowSettings {
    WorkflowSettings {
        job_wait: JobWaitPolicy {
            interval: Duration::from_millis(1),
            timeout: Some(Duration::from_secs(5)),
        },
        power_poll_interval: Duration::from_millis(1),
        power_timeout: Some(Duration::from_secs(5)),
        settle_delay: Duration::from_millis(1),
        reintegrate: RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_millis(1),
        },
        downtime: Duration::from_secs(60),
        failure_policy: MigrationFailurePolicy::FailFast,
    }
}

pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub power: Arc<FakePower>,
    pub probe: Arc<FakeProbe>,
    pub monitoring: Arc<FakeMonitoring>,
    pub settings: WorkflowSettings,
}

impl Harness {
    pub fn new(cluster: FakeCluster) -> Self {
        Self {
            cluster: Arc::new(cluster),
            power: Arc::new(FakePower::new(&["off"])),
            probe: Arc::new(FakeProbe::new(&[true])),
            monitoring: Arc::new(FakeMonitoring::new(MonitoringReply::Acknowledged)),
            settings: fast_settings(),
        }
    }

    pub fn context(&self) -> WorkflowContext {
        WorkflowContext {
            cluster_name: "c1".to_string(),
            cluster: self.cluster.clone(),
            power: self.power.clone(),
            probe: self.probe.clone(),
            monitoring: self.monitoring.clone(),
            ipmi: IpmiSettings {
                password: "bmc-pw".to_string(),
                ..Default::default()
            },
            settings: self.settings.clone(),
        }
    }
}

pub fn progress(kind: WorkflowKind, target: &str, detail: WorkflowDetail) -> ProgressHandle {
    ProgressHandle::detached(uuid::Uuid::new_v4().to_string(), kind, "c1", target, detail)
}
