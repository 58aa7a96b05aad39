//! Inventory artifacts for the external automation runs.
//!
//! Files are named `<id>-<hostname>-<YYYY-MMDD-HHMM>-<kind>.yml`, created with
//! mode 0600 and never overwritten: a second run in the same minute gets a
//! numeric suffix.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::domain::{CredentialField, ManagedServer, ManagerConfig, UserProfile};

const UPGRADE_SUFFIX: &str = "inventory";
const DROPLET_SUFFIX: &str = "droplet-inventory";
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Written artifact: where it went and what it said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenInventory {
    pub path: PathBuf,
    pub text: String,
}

/// Paths of the key files written for a provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFiles {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
}

#[derive(Debug, Serialize)]
struct Inventory<H: Serialize> {
    all: Group<H>,
}

#[derive(Debug, Serialize)]
struct Group<H: Serialize> {
    vars: GroupVars,
    children: BTreeMap<&'static str, Hosts<H>>,
}

#[derive(Debug, Serialize)]
struct Hosts<H: Serialize> {
    hosts: BTreeMap<String, H>,
}

#[derive(Debug, Serialize)]
struct GroupVars {
    ansible_user: &'static str,
    ansible_python_interpreter: &'static str,
    fleetkeeper_base_url: String,
    discourse_yml: &'static str,
}

#[derive(Debug, Serialize)]
struct UpgradeHostVars {
    fleetkeeper_server_id: String,
    skip_bootstrap: bool,
    discourse_name: String,
    discourse_email: String,
    discourse_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    discourse_mg_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    discourse_maxmind_license_key: Option<String>,
    discourse_extra_envs: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct DropletHostVars {
    fleetkeeper_server_id: String,
    discourse_name: String,
    discourse_email: String,
    discourse_url: String,
    do_api_key: Option<String>,
    mg_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    maxmind_license_key: Option<String>,
    ssh_private_key_file: String,
    ssh_public_key: Option<String>,
}

/// Builds and writes inventory and key files below the configured directories.
#[derive(Debug, Clone)]
pub struct InventoryWriter {
    inventory_dir: PathBuf,
    ssh_key_dir: PathBuf,
    base_url: String,
    remote_scheme: String,
}

impl InventoryWriter {
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            inventory_dir: config.inventory_dir.clone(),
            ssh_key_dir: config.ssh_key_dir.clone(),
            base_url: config.base_url.clone(),
            remote_scheme: config.remote_scheme.clone(),
        }
    }

    fn group_vars(&self) -> GroupVars {
        GroupVars {
            ansible_user: "root",
            ansible_python_interpreter: "/usr/bin/python3",
            fleetkeeper_base_url: self.base_url.clone(),
            discourse_yml: "app",
        }
    }

    fn site_url(&self, server: &ManagedServer) -> String {
        format!("{}://{}", self.remote_scheme, server.hostname)
    }

    /// Inventory text for an upgrade/rebuild of `server`.
    pub fn render_upgrade(
        &self,
        server: &ManagedServer,
        owner: &UserProfile,
    ) -> anyhow::Result<String> {
        let host = UpgradeHostVars {
            fleetkeeper_server_id: server.id.to_string(),
            skip_bootstrap: true,
            discourse_name: owner.display_name().to_string(),
            discourse_email: owner.email.clone().unwrap_or_default(),
            discourse_url: self.site_url(server),
            discourse_mg_api_key: owned(server, CredentialField::MgApiKey),
            discourse_maxmind_license_key: owned(server, CredentialField::MaxmindLicenseKey),
            discourse_extra_envs: vec!["CURRENTLY_IGNORED: true"],
        };
        self.render("discourse", server, host)
    }

    /// Inventory text for creating the droplet behind `server`.
    pub fn render_droplet(
        &self,
        server: &ManagedServer,
        owner: &UserProfile,
        keys: &KeyFiles,
    ) -> anyhow::Result<String> {
        let host = DropletHostVars {
            fleetkeeper_server_id: server.id.to_string(),
            discourse_name: owner.display_name().to_string(),
            discourse_email: owner.email.clone().unwrap_or_default(),
            discourse_url: self.site_url(server),
            do_api_key: owned(server, CredentialField::DoApiKey),
            mg_api_key: owned(server, CredentialField::MgApiKey),
            maxmind_license_key: owned(server, CredentialField::MaxmindLicenseKey),
            ssh_private_key_file: keys.private_key.display().to_string(),
            ssh_public_key: server.ssh_key_public.clone(),
        };
        self.render("droplets", server, host)
    }

    fn render<H: Serialize>(
        &self,
        group: &'static str,
        server: &ManagedServer,
        host: H,
    ) -> anyhow::Result<String> {
        let inventory = Inventory {
            all: Group {
                vars: self.group_vars(),
                children: BTreeMap::from([(
                    group,
                    Hosts {
                        hosts: BTreeMap::from([(server.hostname.clone(), host)]),
                    },
                )]),
            },
        };
        serde_yaml::to_string(&inventory).context("serializing inventory")
    }

    pub async fn write_upgrade(
        &self,
        server: &ManagedServer,
        owner: &UserProfile,
        now: DateTime<Utc>,
    ) -> anyhow::Result<WrittenInventory> {
        let text = self.render_upgrade(server, owner)?;
        let path = self.write_new(server, UPGRADE_SUFFIX, now, &text).await?;
        Ok(WrittenInventory { path, text })
    }

    pub async fn write_droplet(
        &self,
        server: &ManagedServer,
        owner: &UserProfile,
        keys: &KeyFiles,
        now: DateTime<Utc>,
    ) -> anyhow::Result<WrittenInventory> {
        let text = self.render_droplet(server, owner, keys)?;
        let path = self.write_new(server, DROPLET_SUFFIX, now, &text).await?;
        Ok(WrittenInventory { path, text })
    }

    /// Write the server's keypair to `<ssh_key_dir>/id_server<id>[.pub]`.
    pub async fn write_key_files(&self, server: &ManagedServer) -> anyhow::Result<KeyFiles> {
        let (Some(public), Some(private)) = (&server.ssh_key_public, &server.ssh_key_private)
        else {
            anyhow::bail!("server {} has no keypair", server.id);
        };
        tokio::fs::create_dir_all(&self.ssh_key_dir)
            .await
            .with_context(|| format!("creating {}", self.ssh_key_dir.display()))?;

        let keys = KeyFiles {
            private_key: self.ssh_key_dir.join(format!("id_server{}", server.id)),
            public_key: self.ssh_key_dir.join(format!("id_server{}.pub", server.id)),
        };
        write_private(&keys.private_key, private, false).await?;
        write_private(&keys.public_key, public, false).await?;
        info!(
            server_id = %server.id,
            "[Inventory] Wrote key files to {}",
            self.ssh_key_dir.display()
        );
        Ok(keys)
    }

    async fn write_new(
        &self,
        server: &ManagedServer,
        suffix: &str,
        now: DateTime<Utc>,
        text: &str,
    ) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.inventory_dir)
            .await
            .with_context(|| format!("creating {}", self.inventory_dir.display()))?;

        let stem = format!(
            "{}-{}-{}-{}",
            server.id,
            server.hostname,
            now.format("%Y-%m%d-%H%M"),
            suffix
        );
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = match attempt {
                0 => format!("{}.yml", stem),
                n => format!("{}.{}.yml", stem, n),
            };
            let path = self.inventory_dir.join(name);
            match write_private(&path, text, true).await {
                Ok(()) => {
                    info!(server_id = %server.id, "[Inventory] Wrote {}", path.display());
                    return Ok(path);
                }
                Err(e) if is_already_exists(&e) => continue,
                Err(e) => return Err(e),
            }
        }
        anyhow::bail!("no free inventory file name for {}", stem)
    }
}

fn owned(server: &ManagedServer, field: CredentialField) -> Option<String> {
    server.present_credential(field).map(str::to_string)
}

fn is_already_exists(e: &anyhow::Error) -> bool {
    e.downcast_ref::<std::io::Error>()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::AlreadyExists)
}

/// Write `contents` readable by the owner only. With `create_new` an existing
/// file is an `AlreadyExists` error, otherwise it is truncated.
async fn write_private(path: &Path, contents: &str, create_new: bool) -> anyhow::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true);
    if create_new {
        options.create_new(true);
    } else {
        options.create(true).truncate(true);
    }
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await?;
    }
    file.write_all(contents.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
