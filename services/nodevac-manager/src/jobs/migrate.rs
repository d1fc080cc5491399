// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Moving a single instance off its node
//!
//! Instances on replicated or shared storage are live migrated with
//! failover allowed. Instances whose disks live only on the node cannot
//! follow it and are shut down instead.

use nodevac_types::{InstanceAction, InstanceProgress, InstanceTaskState, WorkflowPhase};
use tracing::{info, warn};

use super::waiter::{JobWaitPolicy, wait_for_job};
use super::{WorkflowContext, WorkflowError};
use crate::ganeti::{ClusterManager, StorageBacking};
use crate::progress::ProgressHandle;

/// Decide what to do with an instance given its storage
pub fn choose_action(storage: StorageBacking) -> InstanceAction {
    match storage {
        StorageBacking::Migratable => InstanceAction::Migrate,
        StorageBacking::NodeLocal => InstanceAction::Shutdown,
    }
}

/// Move (or stop) one instance and wait for the job to finish.
///
/// `on_submit` is called once the job has been accepted, before waiting.
/// The returned progress record is always terminal; a job that never
/// finishes surfaces as an error instead.
pub async fn migrate_instance<F>(
    cluster: &dyn ClusterManager,
    instance: &str,
    policy: &JobWaitPolicy,
    on_submit: F,
) -> Result<InstanceProgress, WorkflowError>
where
    F: FnOnce(InstanceAction, &str) + Send,
{
    let info = cluster.get_instance(instance).await?;
    let action = choose_action(info.storage);

    let job_id = match action {
        InstanceAction::Migrate => cluster.migrate_instance(instance, true).await?,
        InstanceAction::Shutdown => cluster.shutdown_instance(instance).await?,
    };
    info!(
        instance,
        action = %action,
        disk_template = %info.disk_template,
        job_id = %job_id,
        "Instance job submitted"
    );
    on_submit(action, &job_id);

    let outcome = wait_for_job(cluster, &job_id, policy).await?;
    let state = if outcome.success {
        InstanceTaskState::Success
    } else {
        warn!(instance, action = %action, job_id = %job_id, "Instance job failed");
        InstanceTaskState::Failure
    };

    Ok(InstanceProgress {
        instance: instance.to_string(),
        action: Some(action),
        job_id: Some(job_id),
        state,
        detail: Some(outcome.detail),
    })
}

/// Run a standalone single-instance migration workflow.
///
/// Phases: `Started → Migrating → Done | Failed`.
pub async fn run_migration(
    ctx: &WorkflowContext,
    instance: &str,
    progress: &ProgressHandle,
) -> Result<InstanceProgress, WorkflowError> {
    let mut record = InstanceProgress::pending(instance);
    progress.publish_migration(&record);
    progress.set_phase(WorkflowPhase::Migrating);

    let result = migrate_instance(
        ctx.cluster.as_ref(),
        instance,
        &ctx.settings.job_wait,
        |action, job_id| {
            record.action = Some(action);
            record.job_id = Some(job_id.to_string());
            record.state = InstanceTaskState::Running;
            progress.publish_migration(&record);
        },
    )
    .await;

    match result {
        Ok(done) => {
            progress.publish_migration(&done);
            if done.state == InstanceTaskState::Success {
                progress.finish();
                Ok(done)
            } else {
                let err = WorkflowError::TransitionFailed(format!(
                    "{} of {} failed (job {})",
                    done.action.map(|a| a.to_string()).unwrap_or_default(),
                    instance,
                    done.job_id.as_deref().unwrap_or("?")
                ));
                progress.fail(&err.to_string());
                Err(err)
            }
        }
        Err(e) => {
            progress.fail(&e.to_string());
            Err(e)
        }
    }
}
