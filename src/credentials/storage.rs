//! Encrypted credential storage using SQLite.

use super::{CredentialRecord, TokenCipher, UserType};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Credential store backed by SQLite, one row per tenant.
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     id INTEGER PRIMARY KEY,
///     company_id TEXT,
///     location_id TEXT,
///     access_token TEXT NOT NULL,        -- Encrypted
///     access_token_nonce TEXT NOT NULL,
///     refresh_token TEXT NOT NULL,       -- Encrypted
///     refresh_token_nonce TEXT NOT NULL,
///     token_type TEXT NOT NULL,
///     scope TEXT NOT NULL,
///     expires_in INTEGER NOT NULL,
///     user_type TEXT,
///     user_id TEXT,
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL
/// );
/// ```
///
/// A tenant key matches a row when it equals either `company_id` or
/// `location_id`. Every operation holds the connection lock for its whole
/// duration, so concurrent writers to one tenant never interleave.
pub struct CredentialStore {
    conn: Mutex<Connection>,
    cipher: TokenCipher,
}

const SELECT_COLUMNS: &str = r#"
    company_id, location_id,
    access_token, access_token_nonce,
    refresh_token, refresh_token_nonce,
    token_type, scope, expires_in, user_type, user_id, updated_at
"#;

impl CredentialStore {
    /// Creates or opens a credential store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let cipher =
            TokenCipher::from_base64_key(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id INTEGER PRIMARY KEY,
                company_id TEXT,
                location_id TEXT,
                access_token TEXT NOT NULL,
                access_token_nonce TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                refresh_token_nonce TEXT NOT NULL,
                token_type TEXT NOT NULL,
                scope TEXT NOT NULL,
                expires_in INTEGER NOT NULL,
                user_type TEXT,
                user_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_credentials_company ON credentials(company_id);
            CREATE INDEX IF NOT EXISTS idx_credentials_location ON credentials(location_id);
            "#,
        )
        .context("Failed to create credentials table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Credential store lock poisoned"))
    }

    /// Inserts a record, or overwrites the one matching `tenant_key`.
    ///
    /// Identifier fields that are `None` in `record` keep their stored
    /// value. Returns the record as stored.
    pub fn upsert(&self, tenant_key: &str, record: &CredentialRecord) -> Result<CredentialRecord> {
        let (access_token, access_token_nonce) = self
            .cipher
            .seal(&record.access_token)
            .context("Failed to encrypt access token")?;
        let (refresh_token, refresh_token_nonce) = self
            .cipher
            .seal(&record.refresh_token)
            .context("Failed to encrypt refresh token")?;
        let user_type = record.user_type.map(|t| t.as_str());
        let now = Utc::now().to_rfc3339();

        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM credentials WHERE company_id = ?1 OR location_id = ?1 LIMIT 1",
                params![tenant_key],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up tenant")?;

        let id = match existing {
            Some(id) => {
                tx.execute(
                    r#"
                    UPDATE credentials SET
                        company_id = COALESCE(?2, company_id),
                        location_id = COALESCE(?3, location_id),
                        access_token = ?4, access_token_nonce = ?5,
                        refresh_token = ?6, refresh_token_nonce = ?7,
                        token_type = ?8, scope = ?9, expires_in = ?10,
                        user_type = ?11, user_id = COALESCE(?12, user_id),
                        updated_at = ?13
                    WHERE id = ?1
                    "#,
                    params![
                        id,
                        record.company_id,
                        record.location_id,
                        access_token,
                        access_token_nonce,
                        refresh_token,
                        refresh_token_nonce,
                        record.token_type,
                        record.scope,
                        record.expires_in,
                        user_type,
                        record.user_id,
                        now,
                    ],
                )
                .context("Failed to update credentials")?;
                id
            }
            None => {
                tx.execute(
                    r#"
                    INSERT INTO credentials (
                        company_id, location_id,
                        access_token, access_token_nonce,
                        refresh_token, refresh_token_nonce,
                        token_type, scope, expires_in, user_type, user_id,
                        created_at, updated_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
                    "#,
                    params![
                        record.company_id,
                        record.location_id,
                        access_token,
                        access_token_nonce,
                        refresh_token,
                        refresh_token_nonce,
                        record.token_type,
                        record.scope,
                        record.expires_in,
                        user_type,
                        record.user_id,
                        now,
                    ],
                )
                .context("Failed to insert credentials")?;
                tx.last_insert_rowid()
            }
        };

        let stored = tx
            .query_row(
                &format!("SELECT {} FROM credentials WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                |row| Ok(self.decode_row(row)),
            )
            .context("Failed to read back credentials")??;

        tx.commit().context("Failed to commit credentials")?;

        debug!(tenant = %tenant_key, inserted = existing.is_none(), "Credentials upserted");
        Ok(stored)
    }

    /// Finds the record whose company or location id equals `tenant_key`.
    pub fn find(&self, tenant_key: &str) -> Result<Option<CredentialRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM credentials WHERE company_id = ?1 OR location_id = ?1 LIMIT 1",
                    SELECT_COLUMNS
                ),
                params![tenant_key],
                |row| Ok(self.decode_row(row)),
            )
            .optional()
            .context("Failed to query credentials")?;

        row.transpose()
    }

    /// Replaces only the token triple of the matching record.
    ///
    /// # Returns
    /// * `Ok(true)` - Tokens updated
    /// * `Ok(false)` - No record matches `tenant_key`
    pub fn update_tokens(
        &self,
        tenant_key: &str,
        access_token: &str,
        refresh_token: &str,
        expires_in: i64,
    ) -> Result<bool> {
        let (access_token, access_token_nonce) = self
            .cipher
            .seal(access_token)
            .context("Failed to encrypt access token")?;
        let (refresh_token, refresh_token_nonce) = self
            .cipher
            .seal(refresh_token)
            .context("Failed to encrypt refresh token")?;

        let rows_affected = self
            .lock()?
            .execute(
                r#"
                UPDATE credentials SET
                    access_token = ?2, access_token_nonce = ?3,
                    refresh_token = ?4, refresh_token_nonce = ?5,
                    expires_in = ?6, updated_at = ?7
                WHERE id = (
                    SELECT id FROM credentials
                    WHERE company_id = ?1 OR location_id = ?1
                    LIMIT 1
                )
                "#,
                params![
                    tenant_key,
                    access_token,
                    access_token_nonce,
                    refresh_token,
                    refresh_token_nonce,
                    expires_in,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to update tokens")?;

        Ok(rows_affected > 0)
    }

    fn decode_row(&self, row: &Row<'_>) -> Result<CredentialRecord> {
        let access_token: String = row.get(2)?;
        let access_token_nonce: String = row.get(3)?;
        let refresh_token: String = row.get(4)?;
        let refresh_token_nonce: String = row.get(5)?;
        let user_type: Option<String> = row.get(9)?;
        let updated_at: String = row.get(11)?;

        Ok(CredentialRecord {
            company_id: row.get(0)?,
            location_id: row.get(1)?,
            access_token: self
                .cipher
                .open(&access_token, &access_token_nonce)
                .context("Failed to decrypt access token")?,
            refresh_token: self
                .cipher
                .open(&refresh_token, &refresh_token_nonce)
                .context("Failed to decrypt refresh token")?,
            token_type: row.get(6)?,
            scope: row.get(7)?,
            expires_in: row.get(8)?,
            user_type: user_type.as_deref().and_then(UserType::parse),
            user_id: row.get(10)?,
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .context("Failed to parse updated_at timestamp")?
                .with_timezone(&Utc),
        })
    }
}
