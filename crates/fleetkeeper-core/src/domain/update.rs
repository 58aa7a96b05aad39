//! Sparse field set submitted by the HTTP layer.

use serde::{Deserialize, Serialize};

use super::CredentialField;

/// Incoming mutation. Absent fields are left untouched; an empty credential
/// string explicitly clears that credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerUpdate {
    pub user_id: Option<i64>,
    pub hostname: Option<String>,
    pub do_api_key: Option<String>,
    pub mg_api_key: Option<String>,
    pub maxmind_license_key: Option<String>,
    pub discourse_api_key: Option<String>,
    /// Raw trigger code, validated by the state machine
    pub request: Option<i64>,
    /// Explicit outcome label
    pub request_status: Option<String>,
}

impl ServerUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_credential(mut self, field: CredentialField, value: impl Into<String>) -> Self {
        let value = Some(value.into());
        match field {
            CredentialField::DoApiKey => self.do_api_key = value,
            CredentialField::MgApiKey => self.mg_api_key = value,
            CredentialField::MaxmindLicenseKey => self.maxmind_license_key = value,
            CredentialField::DiscourseApiKey => self.discourse_api_key = value,
        }
        self
    }

    pub fn with_request(mut self, code: i64) -> Self {
        self.request = Some(code);
        self
    }

    pub fn with_request_status(mut self, label: impl Into<String>) -> Self {
        self.request_status = Some(label.into());
        self
    }

    pub fn credential(&self, field: CredentialField) -> Option<&str> {
        match field {
            CredentialField::DoApiKey => self.do_api_key.as_deref(),
            CredentialField::MgApiKey => self.mg_api_key.as_deref(),
            CredentialField::MaxmindLicenseKey => self.maxmind_license_key.as_deref(),
            CredentialField::DiscourseApiKey => self.discourse_api_key.as_deref(),
        }
    }

    /// Outcome label if one was supplied and is not blank.
    pub fn outcome_label(&self) -> Option<&str> {
        self.request_status
            .as_deref()
            .filter(|label| !label.trim().is_empty())
    }
}
