// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Poll a cluster job until it reaches a terminal status

use std::time::Duration;

use nodevac_types::JobId;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::WorkflowError;
use crate::ganeti::{ClusterError, ClusterManager};
use crate::metrics;

/// How often to poll and how long to wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobWaitPolicy {
    pub interval: Duration,
    /// `None` waits indefinitely
    pub timeout: Option<Duration>,
}

/// Terminal outcome of a cluster job
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub success: bool,
    pub detail: serde_json::Value,
    pub polls: u32,
}

/// Build a ticker that fires immediately, then every `period`.
///
/// A late tick is followed by a full period, never a burst.
pub(crate) fn poll_ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Wait for a job to succeed or fail.
///
/// Errors fetching the status are treated as transient and the job is polled
/// again. A job the cluster manager no longer knows is reported as
/// `NotFound`. Exceeding the policy's timeout is reported as `Timeout`.
pub async fn wait_for_job(
    cluster: &dyn ClusterManager,
    job_id: &str,
    policy: &JobWaitPolicy,
) -> Result<JobOutcome, WorkflowError> {
    let started = Instant::now();
    let mut ticker = poll_ticker(policy.interval);
    let mut polls = 0u32;

    loop {
        ticker.tick().await;
        polls += 1;
        metrics::record_job_poll();

        match cluster.job_status(job_id).await {
            Ok(status) if status.terminal => {
                debug!(job_id, status = %status.status, polls, "Job finished");
                return Ok(JobOutcome {
                    job_id: job_id.to_string(),
                    success: status.success,
                    detail: status.detail,
                    polls,
                });
            }
            Ok(status) => {
                debug!(job_id, status = %status.status, "Job still in progress");
            }
            Err(ClusterError::NotFound { .. }) => {
                return Err(WorkflowError::NotFound(format!("job {}", job_id)));
            }
            Err(e) => {
                warn!(job_id, error = %e, "Failed to fetch job status, will retry");
                metrics::record_transient_error("cluster");
            }
        }

        if let Some(timeout) = policy.timeout {
            if started.elapsed() >= timeout {
                return Err(WorkflowError::Timeout {
                    what: format!("job {}", job_id),
                    waited: timeout,
                });
            }
        }
    }
}
