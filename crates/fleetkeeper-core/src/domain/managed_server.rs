//! ManagedServer entity - one remotely hosted application instance

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{outcome_for_label, RequestCode, RequestResult};

/// Third-party credentials held by a managed server.
///
/// Every variant is encrypted at rest and must pass its network probe
/// before it is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialField {
    /// Infrastructure provider (DigitalOcean) API token
    DoApiKey,
    /// Mail provider (Mailgun) API key
    MgApiKey,
    /// Geo-database (MaxMind) license key
    MaxmindLicenseKey,
    /// API key of the managed instance itself
    DiscourseApiKey,
}

impl CredentialField {
    pub const ALL: [CredentialField; 4] = [
        Self::DoApiKey,
        Self::MgApiKey,
        Self::MaxmindLicenseKey,
        Self::DiscourseApiKey,
    ];

    /// Field name as exposed to callers and used in field-scoped errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DoApiKey => "do_api_key",
            Self::MgApiKey => "mg_api_key",
            Self::MaxmindLicenseKey => "maxmind_license_key",
            Self::DiscourseApiKey => "discourse_api_key",
        }
    }
}

impl std::fmt::Display for CredentialField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Managed server record.
///
/// Mutated only through `ServerAppService`, which owns the ordering of
/// validation, request transitions, persistence and notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedServer {
    pub id: Uuid,

    /// Owning user (identity lives in the external user directory)
    pub user_id: i64,

    /// Rendezvous point for remote API calls
    pub hostname: String,

    pub do_api_key: Option<String>,
    pub mg_api_key: Option<String>,
    pub maxmind_license_key: Option<String>,
    pub discourse_api_key: Option<String>,

    /// OpenSSH formatted public key for automation access
    pub ssh_key_public: Option<String>,
    /// PKCS#8 PEM private key, generated once and never rotated here
    pub ssh_key_private: Option<String>,

    /// Trigger / single-flight sentinel
    pub request: RequestCode,
    pub request_status: Option<String>,
    pub request_status_updated_at: Option<DateTime<Utc>>,
    pub request_result: Option<RequestResult>,

    // Status cache from the remote dashboard
    pub installed_version: Option<String>,
    pub installed_sha: Option<String>,
    pub git_branch: Option<String>,
    pub server_status_json: Option<String>,
    pub server_status_updated_at: Option<DateTime<Utc>>,

    /// Audit: description of the last action taken
    pub last_action: Option<String>,
    /// Inventory text used for the most recent upgrade run
    pub inventory: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedServer {
    /// Create an idle server without credentials or keys.
    pub fn new(user_id: i64, hostname: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            hostname: hostname.into(),
            do_api_key: None,
            mg_api_key: None,
            maxmind_license_key: None,
            discourse_api_key: None,
            ssh_key_public: None,
            ssh_key_private: None,
            request: RequestCode::Idle,
            request_status: None,
            request_status_updated_at: None,
            request_result: None,
            installed_version: None,
            installed_sha: None,
            git_branch: None,
            server_status_json: None,
            server_status_updated_at: None,
            last_action: None,
            inventory: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Default hostname for a server created without one. Characters a
    /// hostname cannot carry are replaced with `-`.
    pub fn placeholder_hostname(username: &str, now: DateTime<Utc>) -> String {
        let username: String = username
            .chars()
            .map(|c| if is_hostname_char(c) && c != ':' { c } else { '-' })
            .collect();
        format!("{}.{}.unconfigured", username, now.format("%Y-%m-%d-%H%M%S"))
    }

    /// Whether the hostname is safe to use in URLs and artifact file names.
    ///
    /// Letters, digits, `.`, `-`, `_` and a `:port` suffix are allowed. It
    /// must not start with `.` or `-`.
    pub fn hostname_is_valid(hostname: &str) -> bool {
        !hostname.is_empty()
            && !hostname.starts_with(['.', '-'])
            && hostname.chars().all(is_hostname_char)
    }

    pub fn credential(&self, field: CredentialField) -> Option<&str> {
        match field {
            CredentialField::DoApiKey => self.do_api_key.as_deref(),
            CredentialField::MgApiKey => self.mg_api_key.as_deref(),
            CredentialField::MaxmindLicenseKey => self.maxmind_license_key.as_deref(),
            CredentialField::DiscourseApiKey => self.discourse_api_key.as_deref(),
        }
    }

    pub fn set_credential(&mut self, field: CredentialField, value: Option<String>) {
        let slot = match field {
            CredentialField::DoApiKey => &mut self.do_api_key,
            CredentialField::MgApiKey => &mut self.mg_api_key,
            CredentialField::MaxmindLicenseKey => &mut self.maxmind_license_key,
            CredentialField::DiscourseApiKey => &mut self.discourse_api_key,
        };
        *slot = value;
    }

    /// Credential value if present and non-blank.
    pub fn present_credential(&self, field: CredentialField) -> Option<&str> {
        self.credential(field).filter(|v| !v.trim().is_empty())
    }

    pub fn has_keypair(&self) -> bool {
        matches!(
            (&self.ssh_key_public, &self.ssh_key_private),
            (Some(public), Some(private)) if !public.is_empty() && !private.is_empty()
        )
    }

    /// Set the outcome label; the change is always timestamped.
    pub fn set_request_status(&mut self, label: impl Into<String>, at: DateTime<Utc>) {
        self.request_status = Some(label.into());
        self.request_status_updated_at = Some(at);
    }

    /// Map the current outcome label onto `request_result` and the sentinel.
    ///
    /// Returns `true` when the label calls for a status refresh.
    pub fn reconcile_outcome(&mut self) -> bool {
        let Some(outcome) = self
            .request_status
            .as_deref()
            .filter(|s| !s.is_empty())
            .and_then(outcome_for_label)
        else {
            return false;
        };

        self.request_result = Some(outcome.result);
        if outcome.clears_request {
            self.request = RequestCode::Idle;
        }
        outcome.refreshes_status
    }

    /// Read view with secrets replaced by presence flags.
    pub fn view(&self) -> ServerView {
        ServerView {
            id: self.id,
            user_id: self.user_id,
            hostname: self.hostname.clone(),
            has_do_api_key: self.present_credential(CredentialField::DoApiKey).is_some(),
            has_mg_api_key: self.present_credential(CredentialField::MgApiKey).is_some(),
            has_maxmind_license_key: self
                .present_credential(CredentialField::MaxmindLicenseKey)
                .is_some(),
            has_discourse_api_key: self
                .present_credential(CredentialField::DiscourseApiKey)
                .is_some(),
            ssh_key_public: self.ssh_key_public.clone(),
            request: self.request,
            request_status: self.request_status.clone(),
            request_status_updated_at: self.request_status_updated_at,
            request_result: self.request_result,
            installed_version: self.installed_version.clone(),
            installed_sha: self.installed_sha.clone(),
            git_branch: self.git_branch.clone(),
            server_status_updated_at: self.server_status_updated_at,
            last_action: self.last_action.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// What the read entry point hands to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerView {
    pub id: Uuid,
    pub user_id: i64,
    pub hostname: String,
    pub has_do_api_key: bool,
    pub has_mg_api_key: bool,
    pub has_maxmind_license_key: bool,
    pub has_discourse_api_key: bool,
    pub ssh_key_public: Option<String>,
    pub request: RequestCode,
    pub request_status: Option<String>,
    pub request_status_updated_at: Option<DateTime<Utc>>,
    pub request_result: Option<RequestResult>,
    pub installed_version: Option<String>,
    pub installed_sha: Option<String>,
    pub git_branch: Option<String>,
    pub server_status_updated_at: Option<DateTime<Utc>>,
    pub last_action: Option<String>,
    pub updated_at: DateTime<Utc>,
}

fn is_hostname_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':')
}
