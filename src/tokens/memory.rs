//! In-memory token store for tests and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ResumptionToken, StoreResult, TokenStore};
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<String, ResumptionToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tokens.
    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn ensure_schema(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn store(&self, token: &ResumptionToken) -> StoreResult<()> {
        let mut tokens = self.tokens.write().await;
        if tokens.contains_key(&token.token) {
            return Err(StoreError::DuplicateToken(token.token.clone()));
        }
        tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn get(&self, token_id: &str) -> StoreResult<Option<ResumptionToken>> {
        Ok(self.tokens.read().await.get(token_id).cloned())
    }

    async fn remove(&self, token_id: &str) -> StoreResult<bool> {
        Ok(self.tokens.write().await.remove(token_id).is_some())
    }
}
