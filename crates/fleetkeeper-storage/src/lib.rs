//! Fleetkeeper Storage Layer
//!
//! SQLite database with field-level encryption for credentials and keys.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 ServerAppService                     │
//! ├──────────────────────────────────────────────────────┤
//! │               Repository Traits                      │
//! │   (ManagedServerRepository, AppSettingsRepository)   │
//! ├──────────────────────────────────────────────────────┤
//! │            SQLite Implementations                    │
//! │ (SqliteManagedServerRepository, SqliteAppSettings..) │
//! ├──────────────────────────────────────────────────────┤
//! │         FieldEncryptor (AES-256-GCM)                 │
//! │     (API keys, private key, inventory text)          │
//! ├──────────────────────────────────────────────────────┤
//! │             FileKeyProvider                          │
//! │        (0600 hex key file on the host)               │
//! ├──────────────────────────────────────────────────────┤
//! │                   Database                           │
//! │                   (SQLite)                           │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use fleetkeeper_storage::{
//!     Database, FieldEncryptor, FileKeyProvider, MasterKeyProvider,
//!     SqliteAppSettingsRepository, SqliteManagedServerRepository,
//! };
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//!
//! let key_provider = FileKeyProvider::default_location().expect("data dir");
//! let master_key = key_provider.get_or_create_key()?;
//!
//! let db = Arc::new(Mutex::new(Database::open(&path)?));
//! let encryptor = Arc::new(FieldEncryptor::new(&master_key)?);
//!
//! let servers = SqliteManagedServerRepository::new(db.clone(), encryptor);
//! let settings = SqliteAppSettingsRepository::new(db);
//! ```

pub mod crypto;
mod database;
pub mod key_provider;
mod repositories;

pub use crypto::{generate_master_key, FieldEncryptor, KEY_SIZE};
pub use database::Database;
pub use key_provider::{FileKeyProvider, MasterKeyProvider, MASTER_KEY_FILE};
pub use repositories::*;

/// Default database file name.
pub const DATABASE_FILE: &str = "fleetkeeper.db";

/// Get the default database path for the current platform.
pub fn default_database_path() -> Option<std::path::PathBuf> {
    dirs::data_local_dir().map(|p| {
        p.join(fleetkeeper_core::branding::APP_IDENTIFIER)
            .join(DATABASE_FILE)
    })
}
