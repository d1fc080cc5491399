// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Configuration for the nodevac manager

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::watch;

use crate::jobs::{JobWaitPolicy, RetryPolicy, WorkflowSettings};

/// Smallest polling interval we will ever sleep for.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default path of the ipmitool binary
const DEFAULT_IPMITOOL_PATH: &str = "/usr/bin/ipmitool";

/// Default BMC user for HP iLO controllers
const DEFAULT_IPMI_USER_HP: &str = "Administrator";

/// Default BMC user for Fujitsu iRMC controllers
const DEFAULT_IPMI_USER_FUJITSU: &str = "admin";

/// Connection details for one cluster's management API.
#[derive(Clone, Deserialize)]
pub struct ClusterEndpoint {
    /// Base URL, e.g. `https://cluster.example.com:5080`
    pub url: String,
    pub username: String,
    pub password: String,
    /// Cluster-manager APIs commonly run with self-signed certificates
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
}

fn default_verify_tls() -> bool {
    true
}

impl fmt::Debug for ClusterEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterEndpoint")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"****")
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

/// The set of clusters this manager may act on, keyed by cluster name.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct ClusterRegistry {
    clusters: BTreeMap<String, ClusterEndpoint>,
}

impl ClusterRegistry {
    pub fn new(clusters: BTreeMap<String, ClusterEndpoint>) -> Self {
        Self { clusters }
    }

    /// Load the registry from a JSON file of the form
    /// `{ "<cluster>": { "url": ..., "username": ..., "password": ... } }`.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read clusters file: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse clusters file: {}", path.display()))
    }

    pub fn get(&self, cluster: &str) -> Option<&ClusterEndpoint> {
        self.clusters.get(cluster)
    }

    /// Configured cluster names, sorted
    pub fn names(&self) -> Vec<String> {
        self.clusters.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

/// Credentials for the out-of-band power interface
#[derive(Clone)]
pub struct IpmiSettings {
    pub tool_path: PathBuf,
    pub user_hp: String,
    pub user_fujitsu: String,
    pub password: String,
}

impl Default for IpmiSettings {
    fn default() -> Self {
        Self {
            tool_path: PathBuf::from(DEFAULT_IPMITOOL_PATH),
            user_hp: DEFAULT_IPMI_USER_HP.to_string(),
            user_fujitsu: DEFAULT_IPMI_USER_FUJITSU.to_string(),
            password: String::new(),
        }
    }
}

impl fmt::Debug for IpmiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpmiSettings")
            .field("tool_path", &self.tool_path)
            .field("user_hp", &self.user_hp)
            .field("user_fujitsu", &self.user_fujitsu)
            .field("password", &"****")
            .finish()
    }
}

/// What an evacuation does when one instance fails to move
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationFailurePolicy {
    /// Stop at the first failed instance
    #[default]
    FailFast,
    /// Keep going with the remaining instances, then fail without offlining
    SkipAndContinue,
}

impl FromStr for MigrationFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail_fast" => Ok(Self::FailFast),
            "skip_and_continue" => Ok(Self::SkipAndContinue),
            _ => Err(format!("Unknown migration failure policy: {}", s)),
        }
    }
}

/// Manager configuration loaded from environment variables or JSON file
///
/// Configuration can be loaded from:
/// 1. Environment variables (primary method, see `from_env()`)
/// 2. JSON config file (for SIGUSR1-based reloading, see `from_file()`)
///
/// The JSON config file carries only the tunables. Cluster credentials and
/// BMC secrets are never reloaded.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Clusters this manager may act on
    /// Note: This field is NOT reloadable - changes require restart
    #[serde(skip)]
    pub clusters: ClusterRegistry,

    /// BMC credentials and ipmitool location
    /// Note: This field is NOT reloadable - changes require restart
    #[serde(skip)]
    pub ipmi: IpmiSettings,

    /// Base URL of the monitoring command endpoint; downtime is not scheduled
    /// when unset
    /// Note: This field is NOT reloadable - changes require restart
    #[serde(skip)]
    pub monitoring_url: Option<String>,

    /// Interval between cluster job status polls
    pub job_poll_interval_secs: u64,

    /// Give up waiting for a cluster job after this long (unset = wait forever)
    pub job_timeout_secs: Option<u64>,

    /// Interval between power state / reachability polls
    pub power_poll_interval_secs: u64,

    /// Give up waiting for a power transition after this long
    pub power_timeout_secs: Option<u64>,

    /// TCP port probed to decide a powered-up node is alive
    pub reachability_port: u16,

    /// Connect timeout for a single reachability probe
    pub reachability_timeout_secs: u64,

    /// Pause between a node becoming reachable and rejoining the cluster
    pub settle_delay_secs: u64,

    /// Maximum role-change attempts when returning a node to the cluster
    pub reintegrate_max_attempts: u32,

    /// Length of the monitoring downtime scheduled before power-down
    pub downtime_secs: u64,

    /// HTTP client timeout in seconds
    pub http_timeout_secs: u64,

    /// Behaviour of an evacuation when an instance fails to move
    pub migration_failure_policy: MigrationFailurePolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            clusters: ClusterRegistry::default(),
            ipmi: IpmiSettings::default(),
            monitoring_url: None,
            job_poll_interval_secs: 5,
            job_timeout_secs: None,
            power_poll_interval_secs: 10,
            power_timeout_secs: Some(900),
            reachability_port: 1811,
            reachability_timeout_secs: 3,
            settle_delay_secs: 60,
            reintegrate_max_attempts: 10,
            downtime_secs: 3600,
            http_timeout_secs: 30,
            migration_failure_policy: MigrationFailurePolicy::FailFast,
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}

fn env_parse_opt<T>(name: &str, default: Option<T>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(name) {
        // An empty value explicitly disables the bound
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => v
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}

impl ManagerConfig {
    /// Load configuration from environment variables
    pub async fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let clusters_file =
            std::env::var("CLUSTERS_FILE").context("CLUSTERS_FILE environment variable required")?;
        let clusters = ClusterRegistry::from_file(Path::new(&clusters_file)).await?;
        if clusters.is_empty() {
            anyhow::bail!("CLUSTERS_FILE {} defines no clusters", clusters_file);
        }

        let ipmi = IpmiSettings {
            tool_path: std::env::var("IPMITOOL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ipmi.tool_path),
            user_hp: std::env::var("IPMI_USER_HP").unwrap_or(defaults.ipmi.user_hp),
            user_fujitsu: std::env::var("IPMI_USER_FUJITSU")
                .unwrap_or(defaults.ipmi.user_fujitsu),
            password: std::env::var("IPMI_PASSWORD").unwrap_or_default(),
        };

        let monitoring_url = std::env::var("MONITORING_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Self {
            clusters,
            ipmi,
            monitoring_url,
            job_poll_interval_secs: env_parse(
                "JOB_POLL_INTERVAL_SECS",
                defaults.job_poll_interval_secs,
            )?,
            job_timeout_secs: env_parse_opt("JOB_TIMEOUT_SECS", defaults.job_timeout_secs)?,
            power_poll_interval_secs: env_parse(
                "POWER_POLL_INTERVAL_SECS",
                defaults.power_poll_interval_secs,
            )?,
            power_timeout_secs: env_parse_opt("POWER_TIMEOUT_SECS", defaults.power_timeout_secs)?,
            reachability_port: env_parse("REACHABILITY_PORT", defaults.reachability_port)?,
            reachability_timeout_secs: env_parse(
                "REACHABILITY_TIMEOUT_SECS",
                defaults.reachability_timeout_secs,
            )?,
            settle_delay_secs: env_parse("SETTLE_DELAY_SECS", defaults.settle_delay_secs)?,
            reintegrate_max_attempts: env_parse(
                "REINTEGRATE_MAX_ATTEMPTS",
                defaults.reintegrate_max_attempts,
            )?,
            downtime_secs: env_parse("DOWNTIME_SECS", defaults.downtime_secs)?,
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
            migration_failure_policy: env_parse(
                "MIGRATION_FAILURE_POLICY",
                defaults.migration_failure_policy,
            )?,
        })
    }

    /// Load configuration from a JSON file
    ///
    /// This is used for runtime configuration reloading via SIGUSR1.
    /// Cluster credentials and BMC secrets are not part of the file and
    /// will retain their original values after a merge.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Merge runtime-reloadable fields from another config
    ///
    /// The reachability probe and HTTP clients are built once at startup, so
    /// `reachability_port`, `reachability_timeout_secs` and
    /// `http_timeout_secs` are not merged.
    pub fn merge_reloadable(&mut self, other: &ManagerConfig) {
        self.job_poll_interval_secs = other.job_poll_interval_secs;
        self.job_timeout_secs = other.job_timeout_secs;
        self.power_poll_interval_secs = other.power_poll_interval_secs;
        self.power_timeout_secs = other.power_timeout_secs;
        self.settle_delay_secs = other.settle_delay_secs;
        self.reintegrate_max_attempts = other.reintegrate_max_attempts;
        self.downtime_secs = other.downtime_secs;
        self.migration_failure_policy = other.migration_failure_policy;
    }

    /// Timing and retry settings handed to a new workflow.
    ///
    /// A workflow keeps the settings it started with; a reload only affects
    /// workflows started afterwards.
    pub fn workflow_settings(&self) -> WorkflowSettings {
        let job_interval = Duration::from_secs(self.job_poll_interval_secs).max(MIN_POLL_INTERVAL);
        WorkflowSettings {
            job_wait: JobWaitPolicy {
                interval: job_interval,
                timeout: self.job_timeout_secs.map(Duration::from_secs),
            },
            power_poll_interval: Duration::from_secs(self.power_poll_interval_secs)
                .max(MIN_POLL_INTERVAL),
            power_timeout: self.power_timeout_secs.map(Duration::from_secs),
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            reintegrate: RetryPolicy {
                max_attempts: self.reintegrate_max_attempts.max(1),
                backoff: job_interval,
            },
            downtime: Duration::from_secs(self.downtime_secs),
            failure_policy: self.migration_failure_policy,
        }
    }

    /// Start watching for SIGUSR1 to reload config from file
    ///
    /// When SIGUSR1 is received, the config file is re-read and the new
    /// configuration is sent to subscribers via the watch channel.
    #[cfg(unix)]
    pub async fn start_config_watcher(
        config_file: PathBuf,
        current_config: Self,
        config_tx: watch::Sender<Self>,
    ) {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigusr1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to register SIGUSR1 handler");
                return;
            }
        };

        let mut config = current_config;

        loop {
            sigusr1.recv().await;
            tracing::info!(
                config_file = %config_file.display(),
                "Received SIGUSR1, reloading config"
            );

            match Self::from_file(&config_file).await {
                Ok(new_config) => {
                    config.merge_reloadable(&new_config);

                    if config_tx.send(config.clone()).is_err() {
                        tracing::warn!("No config subscribers, reload had no effect");
                    } else {
                        tracing::info!(
                            job_poll_interval_secs = config.job_poll_interval_secs,
                            reintegrate_max_attempts = config.reintegrate_max_attempts,
                            failure_policy = ?config.migration_failure_policy,
                            "Config reloaded successfully"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        config_file = %config_file.display(),
                        "Failed to reload config"
                    );
                }
            }
        }
    }
}
