//! SQLite implementation of ManagedServerRepository with encrypted secrets.
//!
//! The four credential columns, the private key and the inventory text are
//! sealed with `FieldEncryptor`; everything else is plaintext for querying.
//! `update` is a compare-and-set on the stored `request` code.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetkeeper_core::{ManagedServer, ManagedServerRepository, RequestCode, RequestResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::crypto::FieldEncryptor;
use crate::Database;

const SELECT_COLUMNS: &str = "id, user_id, hostname, \
    do_api_key, mg_api_key, maxmind_license_key, discourse_api_key, \
    ssh_key_public, ssh_key_private, \
    request, request_status, request_status_updated_at, request_result, \
    installed_version, installed_sha, git_branch, server_status_json, server_status_updated_at, \
    last_action, inventory, created_at, updated_at";

/// Row as read from SQLite, before decryption.
struct RawServerRow {
    id: String,
    user_id: i64,
    hostname: String,
    do_api_key: Option<String>,
    mg_api_key: Option<String>,
    maxmind_license_key: Option<String>,
    discourse_api_key: Option<String>,
    ssh_key_public: Option<String>,
    ssh_key_private: Option<String>,
    request: i64,
    request_status: Option<String>,
    request_status_updated_at: Option<String>,
    request_result: Option<String>,
    installed_version: Option<String>,
    installed_sha: Option<String>,
    git_branch: Option<String>,
    server_status_json: Option<String>,
    server_status_updated_at: Option<String>,
    last_action: Option<String>,
    inventory: Option<String>,
    created_at: String,
    updated_at: String,
}

pub struct SqliteManagedServerRepository {
    db: Arc<Mutex<Database>>,
    encryptor: Arc<FieldEncryptor>,
}

impl SqliteManagedServerRepository {
    pub fn new(db: Arc<Mutex<Database>>, encryptor: Arc<FieldEncryptor>) -> Self {
        Self { db, encryptor }
    }

    fn seal(&self, value: Option<&str>) -> Result<Value> {
        Ok(self
            .encryptor
            .encrypt_optional(value)
            .map_err(|e| anyhow::anyhow!("Failed to encrypt server secret: {}", e))?
            .into())
    }

    fn open(&self, value: Option<String>) -> Result<Option<String>> {
        self.encryptor
            .decrypt_optional(value.as_deref())
            .map_err(|e| anyhow::anyhow!("Failed to decrypt server secret: {}", e))
    }

    /// Column values in `SELECT_COLUMNS` order, secrets sealed.
    fn bind_values(&self, server: &ManagedServer) -> Result<Vec<Value>> {
        Ok(vec![
            server.id.to_string().into(),
            server.user_id.into(),
            server.hostname.clone().into(),
            self.seal(server.do_api_key.as_deref())?,
            self.seal(server.mg_api_key.as_deref())?,
            self.seal(server.maxmind_license_key.as_deref())?,
            self.seal(server.discourse_api_key.as_deref())?,
            server.ssh_key_public.clone().into(),
            self.seal(server.ssh_key_private.as_deref())?,
            server.request.as_i64().into(),
            server.request_status.clone().into(),
            format_optional(server.request_status_updated_at).into(),
            server
                .request_result
                .map(|r| r.as_str().to_string())
                .into(),
            server.installed_version.clone().into(),
            server.installed_sha.clone().into(),
            server.git_branch.clone().into(),
            server.server_status_json.clone().into(),
            format_optional(server.server_status_updated_at).into(),
            server.last_action.clone().into(),
            self.seal(server.inventory.as_deref())?,
            server.created_at.to_rfc3339().into(),
            server.updated_at.to_rfc3339().into(),
        ])
    }

    fn extract_row(row: &rusqlite::Row) -> rusqlite::Result<RawServerRow> {
        Ok(RawServerRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            hostname: row.get(2)?,
            do_api_key: row.get(3)?,
            mg_api_key: row.get(4)?,
            maxmind_license_key: row.get(5)?,
            discourse_api_key: row.get(6)?,
            ssh_key_public: row.get(7)?,
            ssh_key_private: row.get(8)?,
            request: row.get(9)?,
            request_status: row.get(10)?,
            request_status_updated_at: row.get(11)?,
            request_result: row.get(12)?,
            installed_version: row.get(13)?,
            installed_sha: row.get(14)?,
            git_branch: row.get(15)?,
            server_status_json: row.get(16)?,
            server_status_updated_at: row.get(17)?,
            last_action: row.get(18)?,
            inventory: row.get(19)?,
            created_at: row.get(20)?,
            updated_at: row.get(21)?,
        })
    }

    fn build_server(&self, row: RawServerRow) -> Result<ManagedServer> {
        let request = RequestCode::from_i64(row.request)
            .ok_or_else(|| anyhow::anyhow!("Invalid stored request code: {}", row.request))?;

        Ok(ManagedServer {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| anyhow::anyhow!("Invalid server id '{}': {}", row.id, e))?,
            user_id: row.user_id,
            hostname: row.hostname,
            do_api_key: self.open(row.do_api_key)?,
            mg_api_key: self.open(row.mg_api_key)?,
            maxmind_license_key: self.open(row.maxmind_license_key)?,
            discourse_api_key: self.open(row.discourse_api_key)?,
            ssh_key_public: row.ssh_key_public,
            ssh_key_private: self.open(row.ssh_key_private)?,
            request,
            request_status: row.request_status,
            request_status_updated_at: parse_optional(row.request_status_updated_at),
            request_result: row.request_result.as_deref().and_then(RequestResult::parse),
            installed_version: row.installed_version,
            installed_sha: row.installed_sha,
            git_branch: row.git_branch,
            server_status_json: row.server_status_json,
            server_status_updated_at: parse_optional(row.server_status_updated_at),
            last_action: row.last_action,
            inventory: self.open(row.inventory)?,
            created_at: parse_datetime(&row.created_at),
            updated_at: parse_datetime(&row.updated_at),
        })
    }

    async fn query(&self, filter: &str, args: Vec<Value>) -> Result<Vec<ManagedServer>> {
        let raw = {
            let db = self.db.lock().await;
            let mut stmt = db.connection().prepare(&format!(
                "SELECT {} FROM managed_servers {} ORDER BY created_at, id",
                SELECT_COLUMNS, filter
            ))?;
            let rows = stmt
                .query_map(params_from_iter(args), Self::extract_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        raw.into_iter().map(|row| self.build_server(row)).collect()
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_optional(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn format_optional(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(|dt| dt.to_rfc3339())
}

#[async_trait]
impl ManagedServerRepository for SqliteManagedServerRepository {
    async fn list_for_user(&self, user_id: i64) -> Result<Vec<ManagedServer>> {
        self.query("WHERE user_id = ?1", vec![user_id.into()]).await
    }

    async fn get(&self, id: &Uuid) -> Result<Option<ManagedServer>> {
        let raw = {
            let db = self.db.lock().await;
            db.connection()
                .query_row(
                    &format!("SELECT {} FROM managed_servers WHERE id = ?1", SELECT_COLUMNS),
                    params![id.to_string()],
                    Self::extract_row,
                )
                .optional()?
        };
        raw.map(|row| self.build_server(row)).transpose()
    }

    async fn hostname_taken(&self, hostname: &str, except: Option<&Uuid>) -> Result<bool> {
        let db = self.db.lock().await;
        let taken: bool = db.connection().query_row(
            "SELECT EXISTS(SELECT 1 FROM managed_servers WHERE hostname = ?1 AND id IS NOT ?2)",
            params![hostname, except.map(|id| id.to_string())],
            |row| row.get(0),
        )?;
        Ok(taken)
    }

    async fn insert(&self, server: &ManagedServer) -> Result<()> {
        let values = self.bind_values(server)?;
        let db = self.db.lock().await;
        db.connection().execute(
            &format!(
                "INSERT INTO managed_servers ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, \
                 ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
                SELECT_COLUMNS
            ),
            params_from_iter(values),
        )?;
        debug!(server_id = %server.id, "[ServerRepo] Inserted server");
        Ok(())
    }

    async fn update(&self, server: &ManagedServer, expected_request: RequestCode) -> Result<bool> {
        let mut values = self.bind_values(server)?;
        values.push(expected_request.as_i64().into());

        let db = self.db.lock().await;
        let changed = db.connection().execute(
            "UPDATE managed_servers SET
                user_id = ?2, hostname = ?3,
                do_api_key = ?4, mg_api_key = ?5, maxmind_license_key = ?6, discourse_api_key = ?7,
                ssh_key_public = ?8, ssh_key_private = ?9,
                request = ?10, request_status = ?11, request_status_updated_at = ?12, request_result = ?13,
                installed_version = ?14, installed_sha = ?15, git_branch = ?16,
                server_status_json = ?17, server_status_updated_at = ?18,
                last_action = ?19, inventory = ?20, created_at = ?21, updated_at = ?22
             WHERE id = ?1 AND request = ?23",
            params_from_iter(values),
        )?;

        debug!(
            server_id = %server.id,
            expected = %expected_request,
            applied = changed == 1,
            "[ServerRepo] Compare-and-set update"
        );
        Ok(changed == 1)
    }
}
