//! Error types returned by the orchestration core.
//!
//! Validation and dispatch problems are field-scoped so the HTTP layer can
//! render them next to the offending input. Storage errors pass through as
//! `anyhow::Error`.

use serde::Serialize;
use uuid::Uuid;

use crate::domain::CredentialField;

/// Field name used for errors about the request trigger.
pub const REQUEST_FIELD: &str = "request";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Ordered collection of field-scoped errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{}", self.full_messages().join(", "))]
pub struct FieldErrors {
    errors: Vec<FieldError>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether any error is attached to `field`.
    pub fn has(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// Messages attached to `field`, in insertion order.
    pub fn messages_for(&self, field: &str) -> Vec<&str> {
        self.errors
            .iter()
            .filter(|e| e.field == field)
            .map(|e| e.message.as_str())
            .collect()
    }

    /// "field message" strings, one per error.
    pub fn full_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| format!("{} {}", e.field, e.message))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }
}

/// Why the provisioning dispatcher refused a trigger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchRejected {
    #[error("an operation is already in flight for this server")]
    InFlight,
    #[error("valid triggers are 0, 1, 2 (got {0})")]
    InvalidTrigger(i64),
    #[error("failed to write inventory: {0}")]
    Artifact(String),
    #[error("failed to start operation: {0}")]
    Launch(String),
}

/// A credential probe said no, or could not be completed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} {reason}")]
pub struct ProbeFailure {
    pub field: CredentialField,
    pub reason: String,
}

impl ProbeFailure {
    pub fn new(field: CredentialField, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Status poll failure. Always logged and swallowed by the state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollFailed {
    #[error("status request failed: {0}")]
    Network(String),
    #[error("status endpoint returned HTTP {0}")]
    Status(u16),
    #[error("invalid status document: {0}")]
    Parse(String),
}

/// Result of a rejected `apply` or `create` call.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("validation failed: {0}")]
    Validation(FieldErrors),
    #[error("request rejected: {0}")]
    Dispatch(#[from] DispatchRejected),
    #[error("server {0} was modified concurrently")]
    Conflict(Uuid),
    #[error("server {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl ApplyError {
    /// Field-scoped view of the error. Persistence failures have none.
    pub fn field_errors(&self) -> FieldErrors {
        match self {
            Self::Validation(errors) => errors.clone(),
            Self::Dispatch(rejected) => FieldErrors::single(REQUEST_FIELD, rejected.to_string()),
            Self::Conflict(_) => FieldErrors::single(
                REQUEST_FIELD,
                "was changed by another update, reload and retry",
            ),
            Self::NotFound(_) => FieldErrors::single("id", "not found"),
            Self::Persistence(_) => FieldErrors::new(),
        }
    }
}
