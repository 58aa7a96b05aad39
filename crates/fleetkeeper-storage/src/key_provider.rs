//! Master key storage.
//!
//! The master key lives in a hex-encoded file readable only by the service
//! user. It is created on first use.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto::{generate_master_key, KEY_SIZE};

/// Default key file name next to the database.
pub const MASTER_KEY_FILE: &str = "master.key";

/// Source of the master encryption key.
pub trait MasterKeyProvider: Send + Sync {
    /// Get the master key, creating one if it doesn't exist.
    fn get_or_create_key(&self) -> Result<Zeroizing<[u8; KEY_SIZE]>>;

    fn key_exists(&self) -> bool;

    /// Delete the master key (for testing or reset).
    fn delete_key(&self) -> Result<()>;
}

/// Key file provider.
#[derive(Debug, Clone)]
pub struct FileKeyProvider {
    path: PathBuf,
}

impl FileKeyProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Provider for `<data dir>/fleetkeeper/master.key`.
    pub fn default_location() -> Option<Self> {
        dirs::data_local_dir().map(|p| {
            Self::new(
                p.join(fleetkeeper_core::branding::APP_IDENTIFIER)
                    .join(MASTER_KEY_FILE),
            )
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_key(&self) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        let hex_key = Zeroizing::new(
            std::fs::read_to_string(&self.path)
                .with_context(|| format!("Failed to read key file {:?}", self.path))?,
        );
        let key_bytes =
            Zeroizing::new(hex::decode(hex_key.trim()).context("Invalid key format in key file")?);
        if key_bytes.len() != KEY_SIZE {
            anyhow::bail!(
                "Invalid key size in key file: expected {}, got {}",
                KEY_SIZE,
                key_bytes.len()
            );
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(&key_bytes);
        Ok(key)
    }

    fn write_new_key(&self) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create key directory {:?}", parent))?;
        }
        let key = Zeroizing::new(generate_master_key()?);
        let hex_key = Zeroizing::new(hex::encode(*key));

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&self.path)
            .with_context(|| format!("Failed to create key file {:?}", self.path))?;
        file.write_all(hex_key.as_bytes())?;
        file.sync_all()?;

        info!("[KeyProvider] Generated new master key at {:?}", self.path);
        Ok(key)
    }
}

impl MasterKeyProvider for FileKeyProvider {
    fn get_or_create_key(&self) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        if self.path.exists() {
            debug!("[KeyProvider] Using master key from {:?}", self.path);
            self.read_key()
        } else {
            self.write_new_key()
        }
    }

    fn key_exists(&self) -> bool {
        self.path.exists()
    }

    fn delete_key(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("[KeyProvider] Master key deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {:?}", self.path)),
        }
    }
}
