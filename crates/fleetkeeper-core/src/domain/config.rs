//! Manager configuration threaded into services at construction.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for provisioning, probing and notifications.
///
/// Built by `SettingsService::load_manager_config` from the settings store,
/// or directly in tests. There is no ambient global copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directory for per-run inventory artifacts
    pub inventory_dir: PathBuf,
    /// Directory where SSH key files are written for provisioning runs
    pub ssh_key_dir: PathBuf,
    /// Executable invoked for trigger 1 (upgrade/rebuild)
    pub upgrade_playbook: String,
    /// Executable invoked by the create-droplet job (trigger 2)
    pub install_command: String,
    /// Vault password file passed to both executables
    pub vault_file: PathBuf,
    /// Output log for upgrade runs
    pub upgrade_log: PathBuf,
    /// Replace external upgrade runs with a simulated background job
    pub skip_actions: bool,
    /// Public URL of this manager, written into inventories
    pub base_url: String,
    /// Administrative identity included in every status broadcast
    pub admin_user_id: i64,
    /// Timeout for a single credential or status probe
    pub probe_timeout_secs: u64,
    /// Scheme used to reach managed instances ("https" outside tests)
    pub remote_scheme: String,
    pub digitalocean_api: String,
    pub mailgun_api: String,
    pub maxmind_download: String,
    pub maxmind_edition: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let data_dir = std::env::temp_dir().join(crate::branding::APP_IDENTIFIER);
        Self {
            inventory_dir: data_dir.join("inventories"),
            ssh_key_dir: data_dir.join("keys"),
            upgrade_playbook: "upgrade.yml".to_string(),
            install_command: "do_install.yml".to_string(),
            vault_file: PathBuf::from("vault-password.txt"),
            upgrade_log: data_dir.join("upgrade.log"),
            skip_actions: false,
            base_url: "http://localhost:3000".to_string(),
            admin_user_id: 1,
            probe_timeout_secs: 8,
            remote_scheme: "https".to_string(),
            digitalocean_api: "https://api.digitalocean.com".to_string(),
            mailgun_api: "https://api.mailgun.net".to_string(),
            maxmind_download: "https://download.maxmind.com".to_string(),
            maxmind_edition: "GeoLite2-City".to_string(),
        }
    }
}

impl ManagerConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    /// Dashboard endpoint of a managed instance.
    pub fn dashboard_url(&self, hostname: &str) -> String {
        format!("{}://{}/admin/dashboard.json", self.remote_scheme, hostname)
    }

    /// Host part of `base_url`, used in key comments.
    pub fn manager_host(&self) -> String {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| crate::branding::APP_IDENTIFIER.to_string())
    }
}
