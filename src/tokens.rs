//! Resumption token value type and durable token storage.
//!
//! Tokens are immutable once persisted: created in bulk when the first
//! request of a list verb materializes its result pages, read on each
//! resumed request, and deleted only on expiry detection or after the
//! last page of a chain is served.

mod memory;
mod sqlite;

pub use memory::MemoryTokenStore;
pub use sqlite::SqliteTokenStore;

use async_trait::async_trait;
use rand::RngCore;

use crate::error::StoreError;

/// Result alias for token store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Generate a fresh 128-bit random token id, hex encoded.
///
/// Collisions are negligible at any realistic table size; the store's
/// primary key constraint backstops the remaining probability.
pub fn new_token_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// One persisted page of a multi-page harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumptionToken {
    /// Opaque id handed to the client.
    pub token: String,
    /// Metadata prefix the harvest was started with.
    pub metadata_prefix: String,
    /// Serialized `ResultPage` captured at materialization time.
    pub result_json: String,
    /// Id of the token for the following page; empty on the last page.
    pub next_token: String,
    /// Absolute expiry as epoch milliseconds.
    pub expiry_ms: i64,
}

impl ResumptionToken {
    pub fn new(
        token: String,
        metadata_prefix: String,
        result_json: String,
        next_token: String,
        expiry_ms: i64,
    ) -> Self {
        Self {
            token,
            metadata_prefix,
            result_json,
            next_token,
            expiry_ms,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expiry_ms <= now_ms
    }

    /// Whether this token serves the final page of its chain.
    pub fn is_last_page(&self) -> bool {
        self.next_token.is_empty()
    }
}

/// Durable CRUD over resumption tokens.
///
/// Expiry is the caller's concern: stores never sweep rows on their own;
/// expired rows are pruned lazily when a lookup detects them.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Create the backing table if it does not exist. Idempotent.
    async fn ensure_schema(&self) -> StoreResult<()>;

    /// Insert a token. A duplicate id surfaces as
    /// [`StoreError::DuplicateToken`] and is never retried here.
    async fn store(&self, token: &ResumptionToken) -> StoreResult<()>;

    /// Look up a token by id.
    async fn get(&self, token_id: &str) -> StoreResult<Option<ResumptionToken>>;

    /// Delete a token, reporting whether a row existed. Losing a delete
    /// race yields `false`, not an error.
    async fn remove(&self, token_id: &str) -> StoreResult<bool>;
}
