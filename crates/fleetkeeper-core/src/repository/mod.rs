//! Repository traits for data access
//!
//! These traits define the interface for data storage without specifying
//! the implementation (SQLite, in-memory, etc.)

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{ManagedServer, RequestCode, UserProfile};

/// Result type for repository operations
pub type RepoResult<T> = anyhow::Result<T>;

/// Managed server record store
#[async_trait]
pub trait ManagedServerRepository: Send + Sync {
    /// Get servers owned by a user
    async fn list_for_user(&self, user_id: i64) -> RepoResult<Vec<ManagedServer>>;

    /// Get a server by ID
    async fn get(&self, id: &Uuid) -> RepoResult<Option<ManagedServer>>;

    /// Whether a server other than `except` already uses `hostname`
    async fn hostname_taken(&self, hostname: &str, except: Option<&Uuid>) -> RepoResult<bool>;

    /// Insert a new server
    async fn insert(&self, server: &ManagedServer) -> RepoResult<()>;

    /// Update a server if its stored `request` still equals `expected_request`.
    ///
    /// Returns `false` without writing when the stored code differs, which is
    /// how concurrent triggers for the same server lose the race.
    async fn update(
        &self,
        server: &ManagedServer,
        expected_request: RequestCode,
    ) -> RepoResult<bool>;
}

/// Read-only view of the external user directory
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Get an owner profile by user ID
    async fn get(&self, user_id: i64) -> RepoResult<Option<UserProfile>>;
}

/// App Settings repository trait
///
/// Key-value store backing `SettingsService`.
///
/// # Key Naming Convention
/// Use dot-notation for namespacing:
/// - `provisioning.inventory_dir` - Inventory artifact directory
/// - `provisioning.skip_actions` - Simulate upgrade runs
/// - `probes.timeout_secs` - Credential/status probe timeout
#[async_trait]
pub trait AppSettingsRepository: Send + Sync {
    /// Get a setting value by key
    async fn get(&self, key: &str) -> RepoResult<Option<String>>;

    /// Set a setting value (insert or update)
    async fn set(&self, key: &str, value: &str) -> RepoResult<()>;

    /// Delete a setting by key
    async fn delete(&self, key: &str) -> RepoResult<()>;

    /// Get all settings (for export/debug)
    async fn list(&self) -> RepoResult<Vec<(String, String)>>;

    /// Get all settings with a given prefix (e.g., "probes." returns all probe settings)
    async fn list_by_prefix(&self, prefix: &str) -> RepoResult<Vec<(String, String)>>;
}
