//! Settings Service
//!
//! Typed access to the key-value settings store, and assembly of the
//! `ManagerConfig` handed to the dispatcher, gateway and poller.

use serde::{de::DeserializeOwned, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::ManagerConfig;
use crate::AppSettingsRepository;

// =============================================================================
// Setting Keys
// =============================================================================

pub mod keys {
    /// External automation runs
    pub mod provisioning {
        pub const INVENTORY_DIR: &str = "provisioning.inventory_dir";
        pub const SSH_KEY_DIR: &str = "provisioning.ssh_key_dir";
        pub const UPGRADE_PLAYBOOK: &str = "provisioning.upgrade_playbook";
        pub const INSTALL_COMMAND: &str = "provisioning.install_command";
        pub const VAULT_FILE: &str = "provisioning.vault_file";
        pub const UPGRADE_LOG: &str = "provisioning.upgrade_log";
        /// Simulate upgrades instead of running the playbook (bool)
        pub const SKIP_ACTIONS: &str = "provisioning.skip_actions";
    }

    /// Credential and status probes
    pub mod probes {
        /// Per-probe timeout in seconds (u64)
        pub const TIMEOUT_SECS: &str = "probes.timeout_secs";
        pub const REMOTE_SCHEME: &str = "probes.remote_scheme";
        pub const DIGITALOCEAN_API: &str = "probes.digitalocean_api";
        pub const MAILGUN_API: &str = "probes.mailgun_api";
        pub const MAXMIND_DOWNLOAD: &str = "probes.maxmind_download";
        pub const MAXMIND_EDITION: &str = "probes.maxmind_edition";
    }

    pub mod site {
        /// Public URL of the manager
        pub const BASE_URL: &str = "site.base_url";
    }

    pub mod notifications {
        /// User id that receives every status broadcast (i64)
        pub const ADMIN_USER_ID: &str = "notifications.admin_user_id";
    }
}

// =============================================================================
// SettingsService
// =============================================================================

pub struct SettingsService {
    repository: Arc<dyn AppSettingsRepository>,
}

impl SettingsService {
    pub fn new(repository: Arc<dyn AppSettingsRepository>) -> Self {
        Self { repository }
    }

    /// Setting parsed as `T`; `None` when missing or unparsable.
    pub async fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_string(key).await?;
        if let Ok(parsed) = serde_json::from_str(&value) {
            return Some(parsed);
        }
        // Bare strings are stored without quotes
        if let Ok(parsed) = serde_json::from_value(serde_json::Value::String(value.clone())) {
            return Some(parsed);
        }
        warn!("[Settings] Failed to parse '{}' value: {}", key, value);
        None
    }

    pub async fn get_string(&self, key: &str) -> Option<String> {
        match self.repository.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("[Settings] Failed to get '{}': {}", key, e);
                None
            }
        }
    }

    pub async fn get_or_default<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_typed(key).await.unwrap_or(default)
    }

    pub async fn set_typed<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let serialized = serde_json::to_value(value)?;
        let stored = match serialized {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        self.repository.set(key, &stored).await
    }

    pub async fn set_string(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.repository.set(key, value).await
    }

    pub async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.repository.delete(key).await
    }

    pub async fn list_by_prefix(&self, prefix: &str) -> anyhow::Result<Vec<(String, String)>> {
        self.repository.list_by_prefix(prefix).await
    }

    // =========================================================================
    // Provisioning
    // =========================================================================

    /// Whether upgrades are simulated (default: false).
    pub async fn get_skip_actions(&self) -> bool {
        self.get_or_default(keys::provisioning::SKIP_ACTIONS, false)
            .await
    }

    pub async fn set_skip_actions(&self, skip: bool) -> anyhow::Result<()> {
        info!("[Settings] Setting skip_actions to {}", skip);
        self.set_typed(keys::provisioning::SKIP_ACTIONS, &skip).await
    }

    // =========================================================================
    // Probes
    // =========================================================================

    pub async fn get_probe_timeout_secs(&self) -> u64 {
        self.get_or_default(
            keys::probes::TIMEOUT_SECS,
            ManagerConfig::default().probe_timeout_secs,
        )
        .await
    }

    pub async fn set_probe_timeout_secs(&self, secs: u64) -> anyhow::Result<()> {
        info!("[Settings] Setting probe timeout to {}s", secs);
        self.set_typed(keys::probes::TIMEOUT_SECS, &secs).await
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    pub async fn get_admin_user_id(&self) -> i64 {
        self.get_or_default(
            keys::notifications::ADMIN_USER_ID,
            ManagerConfig::default().admin_user_id,
        )
        .await
    }

    // =========================================================================
    // ManagerConfig
    // =========================================================================

    /// Build a `ManagerConfig`: stored values over built-in defaults.
    pub async fn load_manager_config(&self) -> ManagerConfig {
        use keys::{probes, provisioning, site};

        let defaults = ManagerConfig::default();
        let config = ManagerConfig {
            inventory_dir: self
                .get_path(provisioning::INVENTORY_DIR, defaults.inventory_dir)
                .await,
            ssh_key_dir: self
                .get_path(provisioning::SSH_KEY_DIR, defaults.ssh_key_dir)
                .await,
            upgrade_playbook: self
                .get_or_string(provisioning::UPGRADE_PLAYBOOK, defaults.upgrade_playbook)
                .await,
            install_command: self
                .get_or_string(provisioning::INSTALL_COMMAND, defaults.install_command)
                .await,
            vault_file: self
                .get_path(provisioning::VAULT_FILE, defaults.vault_file)
                .await,
            upgrade_log: self
                .get_path(provisioning::UPGRADE_LOG, defaults.upgrade_log)
                .await,
            skip_actions: self.get_skip_actions().await,
            base_url: self.get_or_string(site::BASE_URL, defaults.base_url).await,
            admin_user_id: self.get_admin_user_id().await,
            probe_timeout_secs: self.get_probe_timeout_secs().await,
            remote_scheme: self
                .get_or_string(probes::REMOTE_SCHEME, defaults.remote_scheme)
                .await,
            digitalocean_api: self
                .get_or_string(probes::DIGITALOCEAN_API, defaults.digitalocean_api)
                .await,
            mailgun_api: self
                .get_or_string(probes::MAILGUN_API, defaults.mailgun_api)
                .await,
            maxmind_download: self
                .get_or_string(probes::MAXMIND_DOWNLOAD, defaults.maxmind_download)
                .await,
            maxmind_edition: self
                .get_or_string(probes::MAXMIND_EDITION, defaults.maxmind_edition)
                .await,
        };
        info!(
            skip_actions = config.skip_actions,
            inventory_dir = %config.inventory_dir.display(),
            "[Settings] Loaded manager config"
        );
        config
    }

    async fn get_or_string(&self, key: &str, default: String) -> String {
        self.get_string(key)
            .await
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(default)
    }

    async fn get_path(&self, key: &str, default: PathBuf) -> PathBuf {
        self.get_string(key)
            .await
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(default)
    }
}
