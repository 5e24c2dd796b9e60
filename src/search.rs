//! Facade over the full-text index.
//!
//! The index is an external collaborator; this endpoint only needs
//! stateless offset-based paging over a filtered query. Implementations
//! translate `SearchQuery` into the backend's native request format.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::Record;

/// One paged query against the index.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Main query string, e.g. `*:*` or `id:abc123`.
    pub query: String,
    /// Filter queries ANDed onto the main query.
    pub filters: Vec<String>,
    /// Sort clause, e.g. `f_dc_title asc`.
    pub sort: Option<String>,
    /// Zero-based offset of the first row.
    pub start: usize,
    /// Page size.
    pub rows: usize,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// One page of results. Immutable once captured in a token snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPage {
    /// Total matches for the query, not just this page.
    pub num_found: u64,
    /// Offset of the first document in this page.
    pub start: u64,
    /// Documents in this page.
    pub documents: Vec<Record>,
}

impl ResultPage {
    pub fn empty() -> Self {
        Self {
            num_found: 0,
            start: 0,
            documents: Vec::new(),
        }
    }

    /// Serialize for storage inside a resumption token.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Query/response facade over the search backend.
#[async_trait]
pub trait SearchFacade: Send + Sync {
    /// Run one paged query. Errors are opaque infrastructure failures.
    async fn search(&self, query: &SearchQuery) -> anyhow::Result<ResultPage>;
}
