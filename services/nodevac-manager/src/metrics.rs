// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Prometheus metrics for the nodevac manager
//!
//! Exports metrics for monitoring node workflows including:
//! - Workflows started and finished, by kind and outcome
//! - Cluster job polls
//! - Transient collaborator errors that were retried or ignored

use prometheus::{Counter, CounterVec, Opts, Registry, TextEncoder};

// Metric definitions are constant; a failure here is an invalid name and
// panics at startup.
#[allow(clippy::expect_used)]
mod metrics_impl {
    use super::*;
    use lazy_static::lazy_static;

    lazy_static! {
        /// Registry for all manager metrics
        pub static ref REGISTRY: Registry = Registry::new();

        /// Workflows started, by kind
        pub static ref WORKFLOWS_STARTED: CounterVec = CounterVec::new(
            Opts::new("nodevac_workflows_started_total", "Workflows started by kind"),
            &["kind"]
        ).expect("valid metric name and labels");

        /// Workflows that reached a terminal phase, by kind and outcome
        pub static ref WORKFLOWS_FINISHED: CounterVec = CounterVec::new(
            Opts::new(
                "nodevac_workflows_finished_total",
                "Workflows finished by kind and outcome"
            ),
            &["kind", "outcome"]
        ).expect("valid metric name and labels");

        /// Cluster job status polls
        pub static ref JOB_POLLS: Counter = Counter::with_opts(
            Opts::new("nodevac_job_polls_total", "Total cluster job status polls")
        ).expect("valid metric name");

        /// Transient errors from collaborators (cluster, power, monitoring)
        ///
        /// These did not fail the workflow: the call was retried or the step
        /// was best-effort.
        pub static ref TRANSIENT_ERRORS: CounterVec = CounterVec::new(
            Opts::new(
                "nodevac_transient_errors_total",
                "Transient collaborator errors by collaborator"
            ),
            &["collaborator"]
        ).expect("valid metric name and labels");
    }
}

pub use metrics_impl::{JOB_POLLS, REGISTRY, TRANSIENT_ERRORS, WORKFLOWS_FINISHED, WORKFLOWS_STARTED};

/// Register all metrics with the registry
///
/// Should be called once during application startup.
/// Panics if registration fails (indicates a programming error).
#[allow(clippy::expect_used)]
pub fn register_metrics() {
    REGISTRY
        .register(Box::new(WORKFLOWS_STARTED.clone()))
        .expect("Failed to register WORKFLOWS_STARTED");
    REGISTRY
        .register(Box::new(WORKFLOWS_FINISHED.clone()))
        .expect("Failed to register WORKFLOWS_FINISHED");
    REGISTRY
        .register(Box::new(JOB_POLLS.clone()))
        .expect("Failed to register JOB_POLLS");
    REGISTRY
        .register(Box::new(TRANSIENT_ERRORS.clone()))
        .expect("Failed to register TRANSIENT_ERRORS");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

pub fn record_workflow_started(kind: &str) {
    WORKFLOWS_STARTED.with_label_values(&[kind]).inc();
}

/// Record a workflow reaching `done` or `failed`
pub fn record_workflow_finished(kind: &str, outcome: &str) {
    WORKFLOWS_FINISHED.with_label_values(&[kind, outcome]).inc();
}

pub fn record_job_poll() {
    JOB_POLLS.inc();
}

/// Record a collaborator error that did not fail the workflow
pub fn record_transient_error(collaborator: &str) {
    TRANSIENT_ERRORS.with_label_values(&[collaborator]).inc();
}
