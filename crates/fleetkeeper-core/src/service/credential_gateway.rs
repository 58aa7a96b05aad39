//! Credential Validation Gateway
//!
//! One network probe per credential kind, run on the mutation path before
//! anything is persisted. Probes are single-attempt with the configured
//! timeout; transport errors come back as a `ProbeFailure` carrying the
//! error text, never as a fault.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::branding::USER_AGENT;
use crate::domain::{CredentialField, ManagerConfig};
use crate::error::ProbeFailure;

/// Infra-provider keys containing this marker are accepted without a probe.
pub const TEST_KEY_MARKER: &str = "testing";

pub const ACCOUNT_NOT_ACTIVE: &str = "Account not active";

#[async_trait]
pub trait CredentialGateway: Send + Sync {
    /// Probe `value` against the service owning `field`.
    ///
    /// `hostname` is the managed instance the remote-instance key belongs to;
    /// other probes ignore it.
    async fn validate(
        &self,
        field: CredentialField,
        value: &str,
        hostname: &str,
    ) -> Result<(), ProbeFailure>;
}

/// Shared HTTP client for outbound probes.
pub fn build_http_client(config: &ManagerConfig) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.probe_timeout())
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    account: Option<Account>,
}

#[derive(Debug, Deserialize)]
struct Account {
    status: Option<String>,
}

/// Production gateway probing the real services.
pub struct HttpCredentialGateway {
    client: reqwest::Client,
    config: ManagerConfig,
}

impl HttpCredentialGateway {
    pub fn new(config: ManagerConfig) -> anyhow::Result<Self> {
        let client = build_http_client(&config)?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: ManagerConfig) -> Self {
        Self { client, config }
    }

    async fn probe_discourse(&self, key: &str, hostname: &str) -> Result<(), ProbeFailure> {
        let field = CredentialField::DiscourseApiKey;
        let response = self
            .client
            .get(self.config.dashboard_url(hostname))
            .header("api-key", key)
            .header("api-username", "system")
            .send()
            .await
            .map_err(|e| transport_failure(field, e))?;

        if response.status() == reqwest::StatusCode::OK {
            Ok(())
        } else {
            debug!(status = %response.status(), "[CredentialGateway] Dashboard refused key");
            Err(ProbeFailure::new(field, "invalid"))
        }
    }

    async fn probe_mailgun(&self, key: &str) -> Result<(), ProbeFailure> {
        let field = CredentialField::MgApiKey;
        let response = self
            .client
            .get(format!("{}/v3/domains", self.config.mailgun_api))
            .basic_auth("api", Some(key))
            .send()
            .await
            .map_err(|e| transport_failure(field, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            Ok(())
        } else {
            Err(ProbeFailure::new(
                field,
                status.canonical_reason().unwrap_or("invalid"),
            ))
        }
    }

    async fn probe_digitalocean(&self, key: &str) -> Result<(), ProbeFailure> {
        let field = CredentialField::DoApiKey;
        if key.contains(TEST_KEY_MARKER) {
            debug!("[CredentialGateway] Accepting test provider key without probe");
            return Ok(());
        }

        let response = self
            .client
            .get(format!("{}/v2/account", self.config.digitalocean_api))
            .bearer_auth(key)
            .send()
            .await
            .map_err(|e| transport_failure(field, e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ProbeFailure::new(
                field,
                format!("Key Invalid ({})", status.as_u16()),
            ));
        }

        let active = response
            .json::<AccountResponse>()
            .await
            .ok()
            .and_then(|body| body.account)
            .and_then(|account| account.status)
            .is_some_and(|s| s == "active");
        if active {
            Ok(())
        } else {
            Err(ProbeFailure::new(field, ACCOUNT_NOT_ACTIVE))
        }
    }

    async fn probe_maxmind(&self, key: &str) -> Result<(), ProbeFailure> {
        let field = CredentialField::MaxmindLicenseKey;
        let response = self
            .client
            .get(format!("{}/app/geoip_download", self.config.maxmind_download))
            .query(&[
                ("license_key", key),
                ("edition_id", self.config.maxmind_edition.as_str()),
                ("suffix", "tar.gz"),
            ])
            .send()
            .await
            .map_err(|e| transport_failure(field, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        let reason = match body.trim() {
            "" => format!("HTTP {}", status.as_u16()),
            text => text.to_string(),
        };
        Err(ProbeFailure::new(field, reason))
    }
}

#[async_trait]
impl CredentialGateway for HttpCredentialGateway {
    async fn validate(
        &self,
        field: CredentialField,
        value: &str,
        hostname: &str,
    ) -> Result<(), ProbeFailure> {
        info!(field = %field, hostname, "[CredentialGateway] Probing credential");
        let result = match field {
            CredentialField::DiscourseApiKey => self.probe_discourse(value, hostname).await,
            CredentialField::MgApiKey => self.probe_mailgun(value).await,
            CredentialField::DoApiKey => self.probe_digitalocean(value).await,
            CredentialField::MaxmindLicenseKey => self.probe_maxmind(value).await,
        };
        if let Err(failure) = &result {
            warn!(field = %field, hostname, "[CredentialGateway] Rejected: {}", failure.reason);
        }
        result
    }
}

/// Transport error text without the request URL, which may carry the key.
fn transport_failure(field: CredentialField, error: reqwest::Error) -> ProbeFailure {
    ProbeFailure::new(field, error.without_url().to_string())
}
