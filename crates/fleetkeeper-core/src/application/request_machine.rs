//! Request state machine rules.
//!
//! The pure half of `ServerAppService::apply`: kind selection, field merging
//! and the record checks that run before any probe. Everything here is
//! synchronous and side-effect free.

use crate::domain::{labels, CredentialField, ManagedServer, RequestCode, ServerUpdate};
use crate::error::{FieldErrors, REQUEST_FIELD};

pub const HOSTNAME_FIELD: &str = "hostname";
pub const HOSTNAME_MISSING: &str = "Hostname must be present";
pub const HOSTNAME_INVALID: &str =
    "Hostname may only contain letters, digits, '.', '-', '_' and a :port suffix";
pub const HOSTNAME_TAKEN: &str = "Hostname has already been taken";
pub const REQUEST_RANGE: &str = "Valid values: 0..2";

/// How an update is interpreted. The first matching rule wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind<'a> {
    /// An explicit outcome label was supplied
    StatusOnly(&'a str),
    /// A trigger code was supplied
    Trigger(i64),
    /// Plain attribute assignment
    FieldUpdate,
}

impl<'a> MutationKind<'a> {
    pub fn classify(update: &'a ServerUpdate) -> Self {
        if let Some(label) = update.outcome_label() {
            Self::StatusOnly(label)
        } else if let Some(code) = update.request {
            Self::Trigger(code)
        } else {
            Self::FieldUpdate
        }
    }

    /// Whether this call sets the completion label that asks for a refresh.
    pub fn reports_success(&self) -> bool {
        matches!(self, Self::StatusOnly(label) if *label == labels::SUCCESS)
    }
}

/// Apply the plain attributes of `update` onto `server`.
///
/// An empty credential string clears the credential.
pub fn merge_fields(server: &mut ManagedServer, update: &ServerUpdate) {
    if let Some(user_id) = update.user_id {
        server.user_id = user_id;
    }
    if let Some(hostname) = &update.hostname {
        server.hostname = hostname.trim().to_string();
    }
    for field in CredentialField::ALL {
        if let Some(value) = update.credential(field) {
            let value = value.trim();
            server.set_credential(field, (!value.is_empty()).then(|| value.to_string()));
        }
    }
}

/// Credentials supplied in this call that need a probe.
pub fn credentials_to_probe(update: &ServerUpdate) -> Vec<(CredentialField, &str)> {
    CredentialField::ALL
        .into_iter()
        .filter_map(|field| {
            update
                .credential(field)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| (field, v))
        })
        .collect()
}

/// Record-level checks on the merged candidate.
pub fn record_errors(candidate: &ManagedServer, update: &ServerUpdate) -> FieldErrors {
    let mut errors = FieldErrors::new();
    if candidate.hostname.trim().is_empty() {
        errors.add(HOSTNAME_FIELD, HOSTNAME_MISSING);
    } else if !ManagedServer::hostname_is_valid(&candidate.hostname) {
        errors.add(HOSTNAME_FIELD, HOSTNAME_INVALID);
    }
    // Codes above 2 are rejected by the dispatcher with its own message
    if let Some(code) = update.request {
        if code < RequestCode::InFlight.as_i64() {
            errors.add(REQUEST_FIELD, REQUEST_RANGE);
        }
    }
    errors
}

/// Whether a field update touched what the status cache depends on.
pub fn affects_status(before: &ManagedServer, after: &ManagedServer) -> bool {
    before.hostname != after.hostname
        || before.credential(CredentialField::DiscourseApiKey)
            != after.credential(CredentialField::DiscourseApiKey)
}
