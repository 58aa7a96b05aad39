//! Status Poller - remote dashboard version check
//!
//! Refreshes the status cache on a managed server from its
//! `/admin/dashboard.json`. Only `version_check.installed_version`,
//! `installed_sha` and `git_branch` are read; the raw body is cached as-is.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::{CredentialField, ManagedServer, ManagerConfig};
use crate::error::PollFailed;

use super::credential_gateway::build_http_client;

/// Hostnames containing this are never contacted.
pub const LOCAL_HOST_MARKER: &str = "localhost";

/// Served for local hostnames instead of a network call.
pub const CANNED_STATUS_DOCUMENT: &str = r#"{
  "updated_at": "2020-11-24T21:25:56.643Z",
  "version_check": {
    "installed_version": "2.6.0.beta6",
    "installed_sha": "1157ff8116ba5e5d11db589e1b6cb930d2c86c4d",
    "installed_describe": "v2.6.0.beta6 +1",
    "git_branch": "master",
    "updated_at": null,
    "version_check_pending": true,
    "stale_data": true
  }
}"#;

/// What a successful refresh did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Fetched and cached the remote document
    Updated,
    /// Local hostname, canned document applied
    Canned,
    /// No remote-instance key, nothing to do
    Skipped,
}

#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Refresh the status cache fields of `server` in place.
    ///
    /// On error the server is left exactly as it was.
    async fn refresh(&self, server: &mut ManagedServer) -> Result<PollOutcome, PollFailed>;
}

#[derive(Debug, Deserialize)]
struct DashboardDocument {
    version_check: Option<VersionCheck>,
}

#[derive(Debug, Deserialize)]
struct VersionCheck {
    installed_version: Option<String>,
    installed_sha: Option<String>,
    git_branch: Option<String>,
}

fn parse_document(body: &str) -> Result<VersionCheck, PollFailed> {
    let document: DashboardDocument =
        serde_json::from_str(body).map_err(|e| PollFailed::Parse(e.to_string()))?;
    document
        .version_check
        .ok_or_else(|| PollFailed::Parse("missing version_check".to_string()))
}

fn apply_document(server: &mut ManagedServer, body: &str) -> Result<(), PollFailed> {
    let check = parse_document(body)?;
    server.installed_version = check.installed_version;
    server.installed_sha = check.installed_sha;
    server.git_branch = check.git_branch;
    server.server_status_json = Some(body.to_string());
    server.server_status_updated_at = Some(Utc::now());
    Ok(())
}

pub struct HttpStatusPoller {
    client: reqwest::Client,
    config: ManagerConfig,
}

impl HttpStatusPoller {
    pub fn new(config: ManagerConfig) -> anyhow::Result<Self> {
        let client = build_http_client(&config)?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: ManagerConfig) -> Self {
        Self { client, config }
    }

    async fn fetch(&self, hostname: &str, key: &str) -> Result<String, PollFailed> {
        let response = self
            .client
            .get(self.config.dashboard_url(hostname))
            .header("api-key", key)
            .header("api-username", "system")
            .send()
            .await
            .map_err(|e| PollFailed::Network(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollFailed::Status(status.as_u16()));
        }
        response
            .text()
            .await
            .map_err(|e| PollFailed::Network(e.without_url().to_string()))
    }
}

#[async_trait]
impl StatusSource for HttpStatusPoller {
    async fn refresh(&self, server: &mut ManagedServer) -> Result<PollOutcome, PollFailed> {
        if server.hostname.contains(LOCAL_HOST_MARKER) {
            debug!(hostname = %server.hostname, "[StatusPoller] Using canned status");
            apply_document(server, CANNED_STATUS_DOCUMENT)?;
            return Ok(PollOutcome::Canned);
        }

        let Some(key) = server
            .present_credential(CredentialField::DiscourseApiKey)
            .map(str::to_string)
        else {
            debug!(hostname = %server.hostname, "[StatusPoller] No API key, skipping");
            return Ok(PollOutcome::Skipped);
        };

        let body = self.fetch(&server.hostname, &key).await?;
        apply_document(server, &body)?;
        info!(
            hostname = %server.hostname,
            version = ?server.installed_version,
            "[StatusPoller] Status refreshed"
        );
        Ok(PollOutcome::Updated)
    }
}
