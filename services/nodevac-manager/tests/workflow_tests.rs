// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

// Allow expect/unwrap in tests - they provide clear panic messages on failure
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Workflow tests against scripted collaborators.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeCluster, FakePower, FakeProbe, FakeMonitoring, Harness, MonitoringReply, progress};
use nodevac_manager::config::MigrationFailurePolicy;
use nodevac_manager::jobs::evacuate::evacuate_node;
use nodevac_manager::jobs::migrate::run_migration;
use nodevac_manager::jobs::power::{power_down, power_up};
use nodevac_manager::jobs::role::transition_role;
use nodevac_manager::jobs::waiter::wait_for_job;
use nodevac_manager::jobs::{JobWaitPolicy, WorkflowError};
use nodevac_manager::ganeti::ClusterManager;
use nodevac_manager::power::PowerCommand;
use nodevac_types::{
    EvacuationState, InstanceAction, InstanceProgress, InstanceTaskState, NodeRole, PowerProgress,
    PowerState, WorkflowDetail, WorkflowKind, WorkflowPhase,
};

use WorkflowPhase::*;

fn evacuation(target: &str) -> nodevac_manager::progress::ProgressHandle {
    progress(
        WorkflowKind::Evacuate,
        target,
        WorkflowDetail::Evacuation(EvacuationState::default()),
    )
}

fn power(kind: WorkflowKind, target: &str) -> nodevac_manager::progress::ProgressHandle {
    progress(kind, target, WorkflowDetail::Power(PowerProgress::default()))
}

// ============================================================================
// Job waiting and role transitions
// ============================================================================

#[tokio::test]
async fn wait_for_job_polls_until_terminal() {
    let cluster = FakeCluster::new().with_node("n1", NodeRole::Regular, &[]);
    cluster.plan("role:n1:drained", &["queued", "running", "success"]);
    let job_id = cluster.set_node_role("n1", NodeRole::Drained).await.unwrap();

    let policy = JobWaitPolicy {
        interval: Duration::from_millis(1),
        timeout: None,
    };
    let outcome = wait_for_job(&cluster, &job_id, &policy).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.polls, 3);
}

#[tokio::test]
async fn wait_for_job_tolerates_transient_errors() {
    let cluster = FakeCluster::new().with_node("n1", NodeRole::Regular, &[]);
    let job_id = cluster.set_node_role("n1", NodeRole::Drained).await.unwrap();
    cluster.fail_status_polls(2);

    let policy = JobWaitPolicy {
        interval: Duration::from_millis(1),
        timeout: None,
    };
    let outcome = wait_for_job(&cluster, &job_id, &policy).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.polls, 3);
}

#[tokio::test]
async fn wait_for_job_times_out() {
    let cluster = FakeCluster::new().with_node("n1", NodeRole::Regular, &[]);
    cluster.plan("role:n1:drained", &["running"]);
    let job_id = cluster.set_node_role("n1", NodeRole::Drained).await.unwrap();

    let policy = JobWaitPolicy {
        interval: Duration::from_millis(5),
        timeout: Some(Duration::from_millis(30)),
    };
    let err = wait_for_job(&cluster, &job_id, &policy).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Timeout { .. }), "{:?}", err);
}

#[tokio::test]
async fn wait_for_unknown_job_is_not_found() {
    let cluster = FakeCluster::new();
    let policy = JobWaitPolicy {
        interval: Duration::from_millis(1),
        timeout: None,
    };
    let err = wait_for_job(&cluster, "404", &policy).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
}

#[tokio::test]
async fn failed_role_transition_keeps_role() {
    let cluster = FakeCluster::new().with_node("n1", NodeRole::Regular, &[]);
    cluster.plan("role:n1:drained", &["running", "error"]);
    let policy = common::fast_settings().job_wait;

    let outcome = transition_role(&cluster, "n1", NodeRole::Regular, NodeRole::Drained, &policy)
        .await
        .unwrap();
    assert!(!outcome.succeeded);
    assert_eq!(outcome.role, NodeRole::Regular);
    assert_eq!(cluster.node_role("n1"), NodeRole::Regular);

    let outcome = transition_role(&cluster, "n1", NodeRole::Regular, NodeRole::Drained, &policy)
        .await
        .unwrap();
    assert!(outcome.succeeded);
    assert_eq!(outcome.role, NodeRole::Drained);
}

// ============================================================================
// Evacuation
// ============================================================================

#[tokio::test]
async fn evacuate_node_with_two_instances() {
    let h = Harness::new(
        FakeCluster::new()
            .with_node("n1", NodeRole::Regular, &["vmA", "vmB"])
            .with_disk_template("vmB", "plain"),
    );
    let progress = evacuation("n1");

    let outcome = evacuate_node(&h.context(), "n1", &progress).await;

    assert!(outcome.is_done(), "{:?}", outcome.error);
    assert_eq!(outcome.state.total_instances, 2);
    assert_eq!(outcome.state.completed_instances, 2);
    assert_eq!(outcome.state.node_role, Some(NodeRole::Offline));
    assert_eq!(outcome.state.instances[0].action, Some(InstanceAction::Migrate));
    assert_eq!(outcome.state.instances[1].action, Some(InstanceAction::Shutdown));
    assert!(outcome
        .state
        .instances
        .iter()
        .all(|i| i.state == InstanceTaskState::Success));

    assert_eq!(
        h.cluster.calls(),
        vec![
            "set_role n1 drained",
            "migrate vmA",
            "shutdown vmB",
            "set_role n1 offline"
        ]
    );
    assert_eq!(h.cluster.node_role("n1"), NodeRole::Offline);

    let status = progress.snapshot();
    assert_eq!(status.phase, Done);
    assert_eq!(status.history, vec![Started, Draining, Drained, Migrating, Offlining, Done]);
    assert_eq!(status.detail, WorkflowDetail::Evacuation(outcome.state));
}

#[tokio::test]
async fn evacuation_halts_on_first_failed_instance() {
    let h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Regular, &["vmA", "vmB"]));
    h.cluster.plan("migrate:vmA", &["running", "error"]);
    let progress = evacuation("n1");

    let outcome = evacuate_node(&h.context(), "n1", &progress).await;

    assert_eq!(outcome.phase, Failed);
    assert!(matches!(outcome.error, Some(WorkflowError::TransitionFailed(_))));
    assert_eq!(outcome.state.completed_instances, 1);
    assert_eq!(outcome.state.instances[0].state, InstanceTaskState::Failure);
    assert_eq!(outcome.state.instances[1].state, InstanceTaskState::Pending);
    assert_eq!(outcome.state.node_role, Some(NodeRole::Drained));

    // vmB never submitted, node never offlined
    assert_eq!(h.cluster.calls(), vec!["set_role n1 drained", "migrate vmA"]);

    let status = progress.snapshot();
    assert_eq!(status.phase, Failed);
    assert!(status.error.unwrap().contains("vmA"));
}

#[tokio::test]
async fn evacuation_skip_and_continue_never_offlines() {
    let mut h =
        Harness::new(FakeCluster::new().with_node("n1", NodeRole::Regular, &["vmA", "vmB"]));
    h.settings.failure_policy = MigrationFailurePolicy::SkipAndContinue;
    h.cluster.plan("migrate:vmA", &["error"]);

    let outcome = evacuate_node(&h.context(), "n1", &evacuation("n1")).await;

    assert_eq!(outcome.phase, Failed);
    assert_eq!(outcome.state.completed_instances, 2);
    assert_eq!(outcome.state.failed_instances(), vec!["vmA"]);
    assert_eq!(outcome.state.instances[1].state, InstanceTaskState::Success);
    assert_eq!(
        h.cluster.calls(),
        vec!["set_role n1 drained", "migrate vmA", "migrate vmB"]
    );
}

#[tokio::test]
async fn evacuating_drained_node_skips_drain() {
    let h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Drained, &["vmA"]));
    let progress = evacuation("n1");

    let outcome = evacuate_node(&h.context(), "n1", &progress).await;

    assert!(outcome.is_done());
    assert_eq!(h.cluster.calls(), vec!["migrate vmA", "set_role n1 offline"]);
    assert_eq!(progress.snapshot().history, vec![Started, Migrating, Offlining, Done]);
}

#[tokio::test]
async fn evacuating_empty_node_goes_straight_to_offline() {
    let h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Regular, &[]));
    let progress = evacuation("n1");

    let outcome = evacuate_node(&h.context(), "n1", &progress).await;

    assert!(outcome.is_done());
    assert_eq!(outcome.state.total_instances, 0);
    assert_eq!(outcome.state.completed_instances, 0);
    assert_eq!(
        h.cluster.calls(),
        vec!["set_role n1 drained", "set_role n1 offline"]
    );
    assert_eq!(
        progress.snapshot().history,
        vec![Started, Draining, Drained, Offlining, Done]
    );
}

#[tokio::test]
async fn failed_drain_stops_evacuation() {
    let h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Regular, &["vmA"]));
    h.cluster.plan("role:n1:drained", &["error"]);

    let outcome = evacuate_node(&h.context(), "n1", &evacuation("n1")).await;

    assert_eq!(outcome.phase, Failed);
    assert_eq!(outcome.state.node_role, Some(NodeRole::Regular));
    assert_eq!(outcome.state.instances[0].state, InstanceTaskState::Pending);
    assert_eq!(h.cluster.calls(), vec!["set_role n1 drained"]);
}

#[tokio::test]
async fn failed_offline_fails_evacuation() {
    let h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Drained, &[]));
    h.cluster.plan("role:n1:offline", &["canceled"]);

    let outcome = evacuate_node(&h.context(), "n1", &evacuation("n1")).await;

    assert_eq!(outcome.phase, Failed);
    assert_eq!(outcome.state.node_role, Some(NodeRole::Drained));
    assert_eq!(h.cluster.node_role("n1"), NodeRole::Drained);
}

#[tokio::test]
async fn evacuating_unknown_node_fails() {
    let h = Harness::new(FakeCluster::new());
    let progress = evacuation("n9");

    let outcome = evacuate_node(&h.context(), "n9", &progress).await;

    assert_eq!(outcome.phase, Failed);
    assert!(matches!(outcome.error, Some(WorkflowError::NotFound(_))));
    assert!(h.cluster.calls().is_empty());
    assert_eq!(outcome.state.node_role, None);
}

#[tokio::test]
async fn stuck_migration_leaves_instance_running() {
    let mut h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Drained, &["vmA"]));
    h.settings.job_wait.timeout = Some(Duration::from_millis(30));
    h.settings.job_wait.interval = Duration::from_millis(5);
    h.cluster.plan("migrate:vmA", &["running"]);

    let outcome = evacuate_node(&h.context(), "n1", &evacuation("n1")).await;

    assert_eq!(outcome.phase, Failed);
    assert!(matches!(outcome.error, Some(WorkflowError::Timeout { .. })));
    assert_eq!(outcome.state.completed_instances, 0);
    assert_eq!(outcome.state.instances[0].state, InstanceTaskState::Running);
    assert_eq!(outcome.state.instances[0].job_id.as_deref(), Some("1"));
}

#[tokio::test]
async fn evacuation_survives_status_errors() {
    let h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Regular, &["vmA"]));
    h.cluster.fail_status_polls(3);

    let outcome = evacuate_node(&h.context(), "n1", &evacuation("n1")).await;

    assert!(outcome.is_done());
    assert!(h.cluster.status_polls() >= 6);
}

// ============================================================================
// Single migration
// ============================================================================

#[tokio::test]
async fn single_migration_succeeds() {
    let h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Regular, &["vmA"]));
    let progress = progress(
        WorkflowKind::Migrate,
        "vmA",
        WorkflowDetail::Migration(InstanceProgress::pending("vmA")),
    );

    let record = run_migration(&h.context(), "vmA", &progress).await.unwrap();

    assert_eq!(record.state, InstanceTaskState::Success);
    assert_eq!(record.action, Some(InstanceAction::Migrate));
    let status = progress.snapshot();
    assert_eq!(status.history, vec![Started, Migrating, Done]);
    assert_eq!(status.detail, WorkflowDetail::Migration(record));
}

#[tokio::test]
async fn single_migration_failure() {
    let h = Harness::new(
        FakeCluster::new()
            .with_node("n1", NodeRole::Regular, &["vmA"])
            .with_disk_template("vmA", "file"),
    );
    h.cluster.plan("shutdown:vmA", &["error"]);
    let progress = progress(
        WorkflowKind::Migrate,
        "vmA",
        WorkflowDetail::Migration(InstanceProgress::pending("vmA")),
    );

    let err = run_migration(&h.context(), "vmA", &progress).await.unwrap_err();

    assert!(matches!(err, WorkflowError::TransitionFailed(_)));
    assert_eq!(h.cluster.calls(), vec!["shutdown vmA"]);
    let status = progress.snapshot();
    assert_eq!(status.phase, Failed);
    match status.detail {
        WorkflowDetail::Migration(p) => assert_eq!(p.state, InstanceTaskState::Failure),
        other => panic!("unexpected detail {:?}", other),
    }
}

#[tokio::test]
async fn migrating_unknown_instance_is_not_found() {
    let h = Harness::new(FakeCluster::new());
    let progress = progress(
        WorkflowKind::Migrate,
        "vmZ",
        WorkflowDetail::Migration(InstanceProgress::pending("vmZ")),
    );
    let err = run_migration(&h.context(), "vmZ", &progress).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
}

// ============================================================================
// Power-down
// ============================================================================

#[tokio::test]
async fn power_down_refuses_node_with_instances() {
    let h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Drained, &["vmA"]));
    let progress = power(WorkflowKind::PowerDown, "n1");

    let err = power_down(&h.context(), "n1", &progress).await.unwrap_err();

    assert!(matches!(err, WorkflowError::PreconditionViolated(_)));
    assert!(h.power.commands().is_empty());
    assert!(h.monitoring.hosts().is_empty());
    assert!(h.cluster.calls().is_empty());
    assert_eq!(progress.snapshot().phase, Failed);
}

#[tokio::test]
async fn power_down_empty_node() {
    let mut h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Drained, &[]));
    h.power = Arc::new(FakePower::new(&["on", "on", "off"]));
    let progress = power(WorkflowKind::PowerDown, "n1");

    let state = power_down(&h.context(), "n1", &progress).await.unwrap();

    assert_eq!(state.power_state, PowerState::Off);
    assert_eq!(state.status_polls, 3);
    assert_eq!(state.node_role, Some(NodeRole::Offline));
    assert_eq!(state.bmc_host.as_deref(), Some("n1-ilo.example.com"));
    assert_eq!(
        h.power.commands(),
        vec![
            PowerCommand::SoftOff,
            PowerCommand::Status,
            PowerCommand::Status,
            PowerCommand::Status
        ]
    );
    assert!(h.power.hosts().iter().all(|h| h == "n1-ilo.example.com"));
    assert_eq!(h.monitoring.hosts(), vec!["n1"]);
    assert_eq!(h.cluster.calls(), vec!["set_role n1 offline"]);
    assert_eq!(
        progress.snapshot().history,
        vec![
            Started,
            SuppressingAlerts,
            Offlining,
            PoweringOff,
            WaitingForPowerOff,
            Done
        ]
    );
}

#[tokio::test]
async fn power_down_continues_without_monitoring() {
    for reply in [MonitoringReply::Refused, MonitoringReply::Unreachable] {
        let mut h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Offline, &[]));
        h.monitoring = Arc::new(FakeMonitoring::new(reply));

        let state = power_down(&h.context(), "n1", &power(WorkflowKind::PowerDown, "n1"))
            .await
            .unwrap();

        assert_eq!(state.power_state, PowerState::Off);
        // Already offline: no role change submitted
        assert!(h.cluster.calls().is_empty());
    }
}

#[tokio::test]
async fn power_down_ignores_failed_soft_off_request() {
    let mut h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Drained, &[]));
    h.power = Arc::new(FakePower::failing_commands(&["on", "off"]));

    let state = power_down(&h.context(), "n1", &power(WorkflowKind::PowerDown, "n1"))
        .await
        .unwrap();

    assert_eq!(state.power_state, PowerState::Off);
    assert_eq!(state.status_polls, 2);
}

#[tokio::test]
async fn power_down_times_out() {
    let mut h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Drained, &[]));
    h.power = Arc::new(FakePower::new(&["on"]));
    h.settings.power_poll_interval = Duration::from_millis(5);
    h.settings.power_timeout = Some(Duration::from_millis(30));
    let progress = power(WorkflowKind::PowerDown, "n1");

    let err = power_down(&h.context(), "n1", &progress).await.unwrap_err();

    assert!(matches!(err, WorkflowError::Timeout { .. }));
    let status = progress.snapshot();
    assert_eq!(status.phase, Failed);
    match status.detail {
        WorkflowDetail::Power(p) => {
            assert_eq!(p.power_state, PowerState::ShutdownRequested);
            assert!(p.status_polls >= 2);
        }
        other => panic!("unexpected detail {:?}", other),
    }
}

#[tokio::test]
async fn power_down_without_bmc_tag() {
    let h = Harness::new(FakeCluster::new().with_tagged_node(
        "n1",
        NodeRole::Drained,
        &[],
        &["rack:12"],
    ));

    let err = power_down(&h.context(), "n1", &power(WorkflowKind::PowerDown, "n1"))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::NotFound(_)));
    assert!(h.power.commands().is_empty());
}

#[tokio::test]
async fn failed_offline_stops_power_down() {
    let h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Drained, &[]));
    h.cluster.plan("role:n1:offline", &["error"]);

    let err = power_down(&h.context(), "n1", &power(WorkflowKind::PowerDown, "n1"))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::TransitionFailed(_)));
    assert!(h.power.commands().is_empty());
}

// ============================================================================
// Power-up
// ============================================================================

#[tokio::test]
async fn power_up_waits_for_reachability_then_reintegrates() {
    let mut h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Offline, &[]));
    h.probe = Arc::new(FakeProbe::new(&[false, false, true]));
    h.cluster.plan("role:n1:regular", &["error"]);
    h.cluster.plan("role:n1:regular", &["running", "error"]);
    let progress = power(WorkflowKind::PowerUp, "n1");

    let state = power_up(&h.context(), "n1", &progress).await.unwrap();

    assert_eq!(h.probe.probes(), 3);
    assert_eq!(state.reachability_polls, 3);
    assert_eq!(state.reintegration_attempts, 3);
    assert_eq!(state.power_state, PowerState::On);
    assert_eq!(state.node_role, Some(NodeRole::Regular));
    assert_eq!(h.power.commands(), vec![PowerCommand::On]);
    assert_eq!(h.cluster.node_role("n1"), NodeRole::Regular);
    assert_eq!(
        h.cluster.calls(),
        vec![
            "set_role n1 regular",
            "set_role n1 regular",
            "set_role n1 regular"
        ]
    );
    assert_eq!(
        progress.snapshot().history,
        vec![
            Started,
            PoweringOn,
            WaitingForReachability,
            Settling,
            Reintegrating,
            Done
        ]
    );
}

#[tokio::test]
async fn power_up_gives_up_after_max_attempts() {
    let mut h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Offline, &[]));
    h.settings.reintegrate.max_attempts = 3;
    for _ in 0..3 {
        h.cluster.plan("role:n1:regular", &["error"]);
    }
    let progress = power(WorkflowKind::PowerUp, "n1");

    let err = power_up(&h.context(), "n1", &progress).await.unwrap_err();

    assert_eq!(
        err,
        WorkflowError::RetriesExhausted {
            what: "reintegration of n1".to_string(),
            attempts: 3
        }
    );
    assert_eq!(h.cluster.calls().len(), 3);
    assert_eq!(h.cluster.node_role("n1"), NodeRole::Offline);
    assert_eq!(progress.snapshot().phase, Failed);
}

#[tokio::test]
async fn power_up_times_out_when_never_reachable() {
    let mut h = Harness::new(FakeCluster::new().with_node("n1", NodeRole::Offline, &[]));
    h.probe = Arc::new(FakeProbe::new(&[false]));
    h.settings.power_poll_interval = Duration::from_millis(5);
    h.settings.power_timeout = Some(Duration::from_millis(30));

    let err = power_up(&h.context(), "n1", &power(WorkflowKind::PowerUp, "n1"))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::Timeout { .. }));
    assert!(h.cluster.calls().is_empty());
}
