// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Node role transitions

use nodevac_types::NodeRole;
use tracing::{info, warn};

use super::WorkflowError;
use super::waiter::{JobOutcome, JobWaitPolicy, wait_for_job};
use crate::ganeti::ClusterManager;

/// Result of one role change attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RoleOutcome {
    pub succeeded: bool,
    /// The target role on success, otherwise the role before the attempt
    pub role: NodeRole,
    pub job: JobOutcome,
}

/// Submit a role change and wait for its job.
///
/// A job that reaches terminal failure is returned as `succeeded = false`
/// with the role unchanged. Failing to submit, losing the job or timing out
/// is an error.
pub async fn transition_role(
    cluster: &dyn ClusterManager,
    node: &str,
    current: NodeRole,
    target: NodeRole,
    policy: &JobWaitPolicy,
) -> Result<RoleOutcome, WorkflowError> {
    let job_id = cluster.set_node_role(node, target).await?;
    info!(node, from = %current, to = %target, job_id = %job_id, "Role change submitted");

    let job = wait_for_job(cluster, &job_id, policy).await?;
    if job.success {
        info!(node, role = %target, job_id = %job_id, "Role change complete");
    } else {
        warn!(node, role = %target, job_id = %job_id, "Role change job failed");
    }

    Ok(RoleOutcome {
        succeeded: job.success,
        role: if job.success { target } else { current },
        job,
    })
}
