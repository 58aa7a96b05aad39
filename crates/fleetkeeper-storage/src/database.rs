//! Database manager for SQLite storage.
//!
//! Secrets are encrypted at the application level by `FieldEncryptor` before
//! they reach SQLite.
//!
//! ## Migration System
//!
//! Migrations are numbered sequentially and stored in `migrations/`. Each one
//! runs exactly once inside a transaction and is recorded in
//! `schema_migrations`.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, error, info};

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial",
        sql: include_str!("migrations/001_initial.sql"),
    },
    Migration {
        version: 2,
        name: "unique_hostname",
        sql: include_str!("migrations/002_unique_hostname.sql"),
    },
];

/// SQLite database wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at `path` and apply pending migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        debug!("[Database] Opened {:?}", path);

        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        debug!("[Database] Opened in-memory database");

        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
        )?;

        let current_version = self.schema_version()?;
        let latest = MIGRATIONS.last().map(|m| m.version).unwrap_or(0);
        info!(
            "[Database] Schema version {}, latest available {}",
            current_version, latest
        );

        for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
            info!(
                "[Database] Running migration {} ({})",
                migration.version, migration.name
            );
            let tx = self.conn.unchecked_transaction()?;
            if let Err(e) = tx.execute_batch(migration.sql) {
                error!(
                    "[Database] Migration {} ({}) failed: {}",
                    migration.version, migration.name, e
                );
                return Err(anyhow::anyhow!(
                    "Failed to run migration {} ({}): {}",
                    migration.version,
                    migration.name,
                    e
                ));
            }
            tx.execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, datetime('now'))",
                rusqlite::params![migration.version, migration.name],
            )?;
            tx.commit()?;
        }

        Ok(())
    }

    /// Highest applied migration, 0 for a fresh database.
    pub fn schema_version(&self) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a transaction.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let result = f(&self.conn)?;
        tx.commit()?;
        Ok(result)
    }
}
