// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Workflow execution for the nodevac manager
//!
//! Every workflow is a sequence of cluster-manager jobs, power commands and
//! polls. The building blocks live in [`waiter`] (poll one job to a terminal
//! state), [`role`] (change a node's role) and [`migrate`] (move or stop one
//! instance). The workflows themselves are [`evacuate`] and [`power`].

pub mod evacuate;
pub mod migrate;
pub mod power;
pub mod role;
pub mod waiter;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{IpmiSettings, MigrationFailurePolicy};
use crate::ganeti::{ClusterError, ClusterManager};
use crate::monitoring::MonitoringSuppressor;
use crate::power::{PowerInterface, ReachabilityProbe};

pub use waiter::JobWaitPolicy;

/// Workflow execution errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    /// A node, instance, job or BMC could not be found
    #[error("not found: {0}")]
    NotFound(String),

    /// A cluster job reached a terminal failure
    #[error("{0}")]
    TransitionFailed(String),

    /// The workflow refused to act
    #[error("precondition violated: {0}")]
    PreconditionViolated(String),

    #[error("{what} did not complete within {waited:?}")]
    Timeout { what: String, waited: Duration },

    #[error("{what} failed after {attempts} attempts")]
    RetriesExhausted { what: String, attempts: u32 },

    /// The cluster manager could not be talked to
    #[error("cluster manager error: {0}")]
    Cluster(String),
}

impl From<ClusterError> for WorkflowError {
    fn from(e: ClusterError) -> Self {
        if e.is_not_found() {
            WorkflowError::NotFound(e.to_string())
        } else {
            WorkflowError::Cluster(e.to_string())
        }
    }
}

/// Bounded retry with a fixed pause between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

/// Timing and policy a workflow runs with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub job_wait: JobWaitPolicy,
    pub power_poll_interval: Duration,
    /// Bound on waiting for power-off and for reachability after power-on
    pub power_timeout: Option<Duration>,
    pub settle_delay: Duration,
    pub reintegrate: RetryPolicy,
    pub downtime: Duration,
    pub failure_policy: MigrationFailurePolicy,
}

/// Collaborators a workflow drives, all for a single cluster
#[derive(Clone)]
pub struct WorkflowContext {
    pub cluster_name: String,
    pub cluster: Arc<dyn ClusterManager>,
    pub power: Arc<dyn PowerInterface>,
    pub probe: Arc<dyn ReachabilityProbe>,
    pub monitoring: Arc<dyn MonitoringSuppressor>,
    pub ipmi: IpmiSettings,
    pub settings: WorkflowSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_error_conversion() {
        let e: WorkflowError = ClusterError::not_found("node", "n9").into();
        assert_eq!(e, WorkflowError::NotFound("node not found: n9".to_string()));

        let e: WorkflowError = ClusterError::Protocol("garbage".to_string()).into();
        assert!(matches!(e, WorkflowError::Cluster(_)));
    }

    #[test]
    fn test_error_messages() {
        let e = WorkflowError::RetriesExhausted {
            what: "reintegration of n1".to_string(),
            attempts: 10,
        };
        assert_eq!(e.to_string(), "reintegration of n1 failed after 10 attempts");

        let e = WorkflowError::Timeout {
            what: "job 42".to_string(),
            waited: Duration::from_secs(5),
        };
        assert_eq!(e.to_string(), "job 42 did not complete within 5s");
    }
}
