//! SQLite-backed token store.
//!
//! Uses WAL mode so concurrent harvest requests can read while one
//! materializes a chain, and a busy timeout for lock contention.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{error, info};

use super::{ResumptionToken, StoreResult, TokenStore};
use crate::error::StoreError;

pub struct SqliteTokenStore {
    conn: Mutex<Connection>,
}

impl SqliteTokenStore {
    /// Open (or create) the token database at the given path.
    pub fn new(db_path: &Path) -> StoreResult<Self> {
        let conn =
            Connection::open(db_path).map_err(|e| StoreError::Database(e.to_string()))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StoreError::Database(e.to_string()))?;

        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests and ephemeral deployments.
    pub fn in_memory() -> StoreResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_token(row: &rusqlite::Row) -> rusqlite::Result<ResumptionToken> {
        Ok(ResumptionToken {
            token: row.get(0)?,
            metadata_prefix: row.get(1)?,
            expiry_ms: row.get(2)?,
            result_json: row.get(3)?,
            next_token: row.get(4)?,
        })
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn ensure_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS resumption_tokens (
                token TEXT PRIMARY KEY,
                metadata_prefix TEXT NOT NULL,
                expiry_ms INTEGER NOT NULL,
                result_json TEXT NOT NULL,
                next_token TEXT NOT NULL DEFAULT ''
            );
        "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        info!("Token table online");
        Ok(())
    }

    async fn store(&self, token: &ResumptionToken) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        let result = conn.execute(
            "INSERT INTO resumption_tokens
                (token, metadata_prefix, expiry_ms, result_json, next_token)
             VALUES (?, ?, ?, ?, ?)",
            params![
                token.token,
                token.metadata_prefix,
                token.expiry_ms,
                token.result_json,
                token.next_token,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                error!(token = %token.token, "Duplicate record already exists in table!");
                Err(StoreError::DuplicateToken(token.token.clone()))
            }
            Err(e) => Err(StoreError::Database(e.to_string())),
        }
    }

    async fn get(&self, token_id: &str) -> StoreResult<Option<ResumptionToken>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            "SELECT token, metadata_prefix, expiry_ms, result_json, next_token
             FROM resumption_tokens WHERE token = ?",
            params![token_id],
            Self::row_to_token,
        )
        .optional()
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn remove(&self, token_id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "DELETE FROM resumption_tokens WHERE token = ?",
                params![token_id],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if rows > 0 {
            info!(token = %token_id, "Delete successful!");
        }
        Ok(rows > 0)
    }
}
