// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Nodevac Manager Service
//!
//! The nodevac manager takes cluster nodes out of service and brings them
//! back. It:
//!
//! - Evacuates a node: drain, migrate every instance away, mark offline
//! - Migrates single instances
//! - Powers empty nodes down through their BMC
//! - Powers nodes up and returns them to the cluster
//! - Provides status endpoints for every running workflow

use anyhow::{Context, Result};
use dropshot::{ConfigDropshot, ConfigLogging, ConfigLoggingLevel, HttpServerStarter};
use tokio::sync::watch;
use tracing::info;

use nodevac_manager::NodevacManagerImpl;
use nodevac_manager::config::ManagerConfig;
use nodevac_manager::context::{ApiContext, Collaborators};
use nodevac_manager::{ganeti, metrics};

/// Default bind address for the HTTP server.
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8880";

/// Default maximum request body size (bytes).
const DEFAULT_BODY_MAX_BYTES: usize = 1024 * 1024;

fn print_version() {
    let version = env!("CARGO_PKG_VERSION");
    let name = env!("CARGO_PKG_NAME");
    let buildstamp = option_env!("STAMP").unwrap_or("no-STAMP");
    println!("{} {} ({})", name, version, buildstamp);
}

fn print_usage(program: &str) {
    print_version();
    println!("Usage: {} [OPTIONS]", program);
    println!();
    println!("Options:");
    println!("  -h, --help       Display this information");
    println!("  -V, --version    Display the program's version number");
    println!();
    println!("Environment variables:");
    println!(
        "  BIND_ADDRESS              Server bind address (default: {})",
        DEFAULT_BIND_ADDRESS
    );
    println!("  CLUSTERS_FILE             JSON file of cluster endpoints (required)");
    println!("  IPMI_PASSWORD             BMC password");
    println!("  IPMI_USER_HP              BMC user for iLO controllers (default: Administrator)");
    println!("  IPMI_USER_FUJITSU         BMC user for iRMC controllers (default: admin)");
    println!("  IPMITOOL_PATH             Path to ipmitool (default: /usr/bin/ipmitool)");
    println!("  MONITORING_URL            Livestatus command endpoint (optional)");
    println!("  JOB_POLL_INTERVAL_SECS    Cluster job poll interval (default: 5)");
    println!("  JOB_TIMEOUT_SECS          Cluster job wait bound (default: unbounded)");
    println!("  POWER_POLL_INTERVAL_SECS  Power/reachability poll interval (default: 10)");
    println!("  POWER_TIMEOUT_SECS        Power transition wait bound (default: 900)");
    println!("  REACHABILITY_PORT         TCP port probed after power on (default: 1811)");
    println!("  REACHABILITY_TIMEOUT_SECS Connect timeout per probe (default: 3)");
    println!("  SETTLE_DELAY_SECS         Pause before rejoining the cluster (default: 60)");
    println!("  REINTEGRATE_MAX_ATTEMPTS  Rejoin attempts (default: 10)");
    println!("  DOWNTIME_SECS             Monitoring downtime length (default: 3600)");
    println!("  HTTP_TIMEOUT_SECS         Cluster and monitoring HTTP timeout (default: 30)");
    println!("  MIGRATION_FAILURE_POLICY  fail_fast or skip_and_continue (default: fail_fast)");
    println!("  CONFIG_FILE               JSON config file for SIGUSR1 reloading (optional)");
    println!("  RUST_LOG                  Log filter (default: nodevac_manager=info,dropshot=info)");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --version and --help
    let args: Vec<String> = std::env::args().collect();
    #[allow(clippy::never_loop)] // Intentional: early return on first recognized arg
    for arg in &args[1..] {
        match arg.as_str() {
            "-V" | "--version" => {
                print_version();
                return Ok(());
            }
            "-h" | "--help" => {
                print_usage(&args[0]);
                return Ok(());
            }
            _ => {
                eprintln!("Unknown option: {}", arg);
                std::process::exit(1);
            }
        }
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "nodevac_manager=info,dropshot=info".to_string()),
        ))
        .init();

    print_version();
    ganeti::install_crypto_provider();
    metrics::register_metrics();

    // Load configuration
    let config = ManagerConfig::from_env()
        .await
        .context("Failed to load configuration")?;
    info!(clusters = ?config.clusters.names(), "Clusters configured");
    info!(ipmi = ?config.ipmi, monitoring_url = ?config.monitoring_url, "Collaborators configured");

    let (config_tx, config_rx) = watch::channel(config.clone());

    // Start config file watcher if CONFIG_FILE is set (Unix only)
    #[cfg(unix)]
    if let Ok(config_file) = std::env::var("CONFIG_FILE") {
        use std::path::PathBuf;

        let config_path = PathBuf::from(&config_file);
        if tokio::fs::try_exists(&config_path).await.unwrap_or(false) {
            tokio::spawn(ManagerConfig::start_config_watcher(
                config_path,
                config.clone(),
                config_tx,
            ));
            info!(
                config_file = %config_file,
                "Config watcher started - send SIGUSR1 to reload"
            );
        } else {
            tracing::warn!(
                config_file = %config_file,
                "CONFIG_FILE specified but file does not exist, config reloading disabled"
            );
        }
    }

    // Create API context
    let collaborators =
        Collaborators::from_config(&config).context("Failed to create collaborators")?;
    let api_context = ApiContext::new(config_rx, collaborators);

    // Get API description from the trait implementation
    let api =
        nodevac_api::nodevac_manager_api_mod::api_description::<NodevacManagerImpl>()
            .map_err(|e| anyhow::anyhow!("Failed to create API description: {}", e))?;

    // Configure the server
    let bind_address = std::env::var("BIND_ADDRESS")
        .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string())
        .parse()
        .context("Invalid BIND_ADDRESS")?;

    let config_dropshot = ConfigDropshot {
        bind_address,
        default_request_body_max_bytes: DEFAULT_BODY_MAX_BYTES,
        default_handler_task_mode: dropshot::HandlerTaskMode::Detached,
        ..Default::default()
    };

    let config_logging = ConfigLogging::StderrTerminal {
        level: ConfigLoggingLevel::Info,
    };

    let log = config_logging
        .to_logger("nodevac-manager")
        .map_err(|error| anyhow::anyhow!("failed to create logger: {}", error))?;

    // Start the server
    let server = HttpServerStarter::new(&config_dropshot, api, api_context, &log)
        .map_err(|error| anyhow::anyhow!("failed to create server: {}", error))?
        .start();

    info!("Nodevac manager running on http://{}", bind_address);

    server
        .await
        .map_err(|error| anyhow::anyhow!("server failed: {}", error))
}
