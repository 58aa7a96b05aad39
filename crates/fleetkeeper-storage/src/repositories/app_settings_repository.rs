//! SQLite implementation of AppSettingsRepository.
//!
//! Flat key-value store backing `SettingsService`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use fleetkeeper_core::AppSettingsRepository;
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;

use crate::Database;

/// SQLite-backed settings repository.
///
/// Keys use dot-notation namespaces, e.g. `provisioning.inventory_dir`,
/// `probes.timeout_secs`, `notifications.admin_user_id`.
pub struct SqliteAppSettingsRepository {
    db: Arc<Mutex<Database>>,
}

impl SqliteAppSettingsRepository {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AppSettingsRepository for SqliteAppSettingsRepository {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        Ok(db
            .connection()
            .query_row(
                "SELECT value FROM app_settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(
            "INSERT INTO app_settings (key, value, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute("DELETE FROM app_settings WHERE key = ?1", params![key])?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, String)>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .connection()
            .prepare("SELECT key, value FROM app_settings ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let db = self.db.lock().await;

        let pattern = format!(
            "{}%",
            prefix
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_")
        );
        let mut stmt = db.connection().prepare(
            "SELECT key, value FROM app_settings WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key",
        )?;
        let rows = stmt
            .query_map(params![pattern], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
