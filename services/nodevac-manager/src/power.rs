// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Out-of-band power control and reachability probing

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use nodevac_types::PowerState;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::Command;

use crate::config::IpmiSettings;

/// Node tag naming the node's BMC, e.g. `ipmi:n1-ilo.example.com`
const IPMI_TAG_PREFIX: &str = "ipmi:";

#[allow(clippy::expect_used)]
mod patterns {
    use lazy_static::lazy_static;
    use regex::Regex;

    lazy_static! {
        pub static ref CHASSIS_POWER: Regex =
            Regex::new(r"Chassis Power is (\w+)").expect("valid regex");
    }
}

#[derive(Debug, Error)]
pub enum PowerError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} against {host} exited with {status}: {stderr}")]
    CommandFailed {
        command: PowerCommand,
        host: String,
        status: String,
        stderr: String,
    },
}

/// Commands understood by the power interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerCommand {
    Status,
    /// ACPI soft shutdown; the OS gets a chance to stop cleanly
    SoftOff,
    On,
}

impl PowerCommand {
    fn ipmi_arg(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::SoftOff => "soft",
            Self::On => "on",
        }
    }
}

impl fmt::Display for PowerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "power {}", self.ipmi_arg())
    }
}

/// A node's BMC address and the credentials to use against it.
#[derive(Clone, PartialEq, Eq)]
pub struct BmcEndpoint {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BmcEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BmcEndpoint")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

impl BmcEndpoint {
    /// Find the BMC from the node's `ipmi:` tag.
    ///
    /// Fujitsu iRMC controllers (hosts starting with `irmc`) use a different
    /// default user than HP iLO controllers.
    pub fn from_node_tags(tags: &[String], ipmi: &IpmiSettings) -> Option<Self> {
        let tag = tags.iter().find(|t| t.starts_with(IPMI_TAG_PREFIX))?;
        let host = tag.rsplit(':').next().unwrap_or_default().trim();
        if host.is_empty() {
            return None;
        }

        let username = if host.to_ascii_lowercase().starts_with("irmc") {
            ipmi.user_fujitsu.clone()
        } else {
            ipmi.user_hp.clone()
        };

        Some(Self {
            host: host.to_string(),
            username,
            password: ipmi.password.clone(),
        })
    }
}

/// Interpret power-status output. Anything unrecognised is `Unknown`.
pub fn parse_power_state(output: &str) -> PowerState {
    let Some(caps) = patterns::CHASSIS_POWER.captures(output) else {
        return PowerState::Unknown;
    };
    match caps.get(1).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
        Some("on") => PowerState::On,
        Some("off") => PowerState::Off,
        _ => PowerState::Unknown,
    }
}

/// Out-of-band power control.
#[async_trait]
pub trait PowerInterface: Send + Sync {
    /// Send a command and return its raw output.
    async fn send_command(&self, bmc: &BmcEndpoint, command: PowerCommand)
    -> Result<String, PowerError>;

    /// Query and interpret the chassis power state.
    async fn power_state(&self, bmc: &BmcEndpoint) -> Result<PowerState, PowerError> {
        let output = self.send_command(bmc, PowerCommand::Status).await?;
        Ok(parse_power_state(&output))
    }
}

/// Power control by shelling out to `ipmitool` over IPMI-over-LAN.
pub struct IpmitoolPower {
    tool: PathBuf,
}

impl IpmitoolPower {
    pub fn new(tool: PathBuf) -> Self {
        Self { tool }
    }
}

#[async_trait]
impl PowerInterface for IpmitoolPower {
    async fn send_command(
        &self,
        bmc: &BmcEndpoint,
        command: PowerCommand,
    ) -> Result<String, PowerError> {
        tracing::debug!(
            bmc = %bmc.host,
            command = %command,
            "Sending power command"
        );

        let output = Command::new(&self.tool)
            .args(["-I", "lanplus", "-H", &bmc.host, "-U", &bmc.username, "-P"])
            .arg(&bmc.password)
            .args(["chassis", "power", command.ipmi_arg()])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| PowerError::Spawn {
                tool: self.tool.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(PowerError::CommandFailed {
                command,
                host: bmc.host.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Decides whether a powered-up node is back on the network.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self, host: &str) -> bool;
}

/// Reachability by TCP connect to a fixed port.
pub struct TcpProbe {
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn is_reachable(&self, host: &str) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect((host, self.port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(host, port = self.port, error = %e, "Node not reachable");
                false
            }
            Err(_) => {
                tracing::debug!(host, port = self.port, "Reachability probe timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipmi() -> IpmiSettings {
        IpmiSettings {
            password: "pw".to_string(),
            ..Default::default()
        }
    }

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_power_state() {
        assert_eq!(parse_power_state("Chassis Power is on\n"), PowerState::On);
        assert_eq!(parse_power_state("Chassis Power is off\n"), PowerState::Off);
        assert_eq!(parse_power_state("Chassis Power is Off"), PowerState::Off);
        assert_eq!(
            parse_power_state("Chassis Power Control: Soft"),
            PowerState::Unknown
        );
        assert_eq!(parse_power_state(""), PowerState::Unknown);
    }

    #[test]
    fn test_bmc_from_tags_hp() {
        let bmc =
            BmcEndpoint::from_node_tags(&tags(&["rack:12", "ipmi:n1-ilo.example.com"]), &ipmi())
                .unwrap();
        assert_eq!(bmc.host, "n1-ilo.example.com");
        assert_eq!(bmc.username, "Administrator");
        assert_eq!(bmc.password, "pw");
    }

    #[test]
    fn test_bmc_from_tags_fujitsu() {
        for host in ["iRMC-n2.example.com", "irmc-n2.example.com"] {
            let bmc =
                BmcEndpoint::from_node_tags(&tags(&[&format!("ipmi:{}", host)]), &ipmi()).unwrap();
            assert_eq!(bmc.username, "admin");
        }
    }

    #[test]
    fn test_bmc_missing_tag() {
        assert!(BmcEndpoint::from_node_tags(&tags(&["rack:12"]), &ipmi()).is_none());
        assert!(BmcEndpoint::from_node_tags(&tags(&["ipmi:"]), &ipmi()).is_none());
    }

    #[test]
    fn test_bmc_debug_masks_password() {
        let bmc = BmcEndpoint {
            host: "bmc".to_string(),
            username: "admin".to_string(),
            password: "topsecret".to_string(),
        };
        assert!(!format!("{:?}", bmc).contains("topsecret"));
    }

    #[tokio::test]
    async fn test_tcp_probe_against_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = TcpProbe::new(port, Duration::from_secs(1));
        assert!(probe.is_reachable("127.0.0.1").await);

        drop(listener);
        assert!(!probe.is_reachable("127.0.0.1").await);
    }

    #[tokio::test]
    async fn test_ipmitool_missing_binary() {
        let power = IpmitoolPower::new(PathBuf::from("/nonexistent/ipmitool"));
        let bmc = BmcEndpoint {
            host: "bmc".to_string(),
            username: "admin".to_string(),
            password: String::new(),
        };
        let err = power
            .send_command(&bmc, PowerCommand::Status)
            .await
            .unwrap_err();
        assert!(matches!(err, PowerError::Spawn { .. }));
    }
}
