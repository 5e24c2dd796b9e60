//! OAI-PMH 2.0 harvesting endpoint core for a digital repository portal.
//!
//! Implements the protocol state machine of a metadata-harvesting endpoint
//! on top of a stateless, offset-paged full-text index:
//! - verb/argument validation with the protocol's closed error taxonomy,
//! - the resumption token lifecycle backed by a durable store,
//! - write-ahead page materialization, freezing a consistent result
//!   snapshot for the whole multi-request harvest sequence.
//!
//! XML rendering and HTTP plumbing live outside this crate; callers feed
//! decoded form parameters in and render the typed response out.

pub mod config;
pub mod error;
pub mod harvest;
pub mod models;
pub mod search;
pub mod tokens;
pub mod validate;

pub use config::{MetadataFormatConfig, OaiConfig, ViewConfig};
pub use error::{ErrorCode, HarvestError, ProtocolError, StoreError};
pub use harvest::{Body, HarvestOrchestrator, HarvestResponse};
pub use models::{HarvestParams, Verb};
pub use search::{ResultPage, SearchFacade, SearchQuery};
pub use tokens::{MemoryTokenStore, ResumptionToken, SqliteTokenStore, TokenStore};
pub use validate::HarvestRequest;
