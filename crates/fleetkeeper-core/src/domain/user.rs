//! Owner profile supplied by the external user directory.

use serde::{Deserialize, Serialize};

use crate::branding::DEFAULT_OWNER_NAME;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl UserProfile {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            name: None,
            email: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Stand-in used when the directory has no record for an owner.
    pub fn unknown(id: i64) -> Self {
        Self::new(id, format!("user{}", id))
    }

    /// Name written into inventories.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(DEFAULT_OWNER_NAME)
    }
}
