// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Monitoring downtime scheduling
//!
//! Before a node is powered off its host and services are put into scheduled
//! downtime so the monitoring system does not page anyone. The command is
//! submitted to a livestatus command endpoint as `GET /cmd?q=<command>`; a
//! body of `OK` acknowledges it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use url::Url;

use crate::ganeti::http_client;

/// Author recorded against the downtime
const DOWNTIME_AUTHOR: &str = "nodevac";

#[derive(Debug, Error)]
pub enum MonitoringError {
    #[error("invalid monitoring URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("monitoring request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Suppresses alerting for a host.
#[async_trait]
pub trait MonitoringSuppressor: Send + Sync {
    /// Schedule downtime for `host` starting now. Returns whether the
    /// monitoring system acknowledged the command.
    async fn schedule_downtime(
        &self,
        host: &str,
        duration: Duration,
    ) -> Result<bool, MonitoringError>;
}

/// Build the fixed-downtime command for a host and all of its services.
pub fn downtime_command(host: &str, start: i64, duration: Duration) -> String {
    let secs = duration.as_secs();
    let end = start.saturating_add(i64::try_from(secs).unwrap_or(i64::MAX));
    // fixed=1, trigger id 0
    format!(
        "SCHEDULE_HOST_SVC_DOWNTIME;{host};{start};{end};1;0;{secs};{DOWNTIME_AUTHOR};downtime_by_script"
    )
}

/// Client for a livestatus command endpoint.
pub struct LivestatusClient {
    client: reqwest::Client,
    base_url: Url,
}

impl LivestatusClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MonitoringError> {
        let base_url = Url::parse(base_url).map_err(|e| MonitoringError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(MonitoringError::InvalidUrl {
                url: base_url.to_string(),
                reason: "not a hierarchical URL".to_string(),
            });
        }
        Ok(Self {
            client: http_client(timeout, true)?,
            base_url,
        })
    }
}

#[async_trait]
impl MonitoringSuppressor for LivestatusClient {
    async fn schedule_downtime(
        &self,
        host: &str,
        duration: Duration,
    ) -> Result<bool, MonitoringError> {
        let command = downtime_command(host, Utc::now().timestamp(), duration);
        // Appended, so a base path such as `/livestatus` is kept
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| MonitoringError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "not a hierarchical URL".to_string(),
            })?
            .pop_if_empty()
            .push("cmd");
        url.query_pairs_mut().append_pair("q", &command);

        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(body.trim_end() == "OK")
    }
}

/// Used when no monitoring endpoint is configured.
pub struct NoMonitoring;

#[async_trait]
impl MonitoringSuppressor for NoMonitoring {
    async fn schedule_downtime(
        &self,
        host: &str,
        _duration: Duration,
    ) -> Result<bool, MonitoringError> {
        tracing::info!(host, "No monitoring endpoint configured, not scheduling downtime");
        Ok(false)
    }
}
