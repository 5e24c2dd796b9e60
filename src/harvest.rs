//! Harvest orchestration: verb dispatch and page materialization.
//!
//! Bridges the stateless, offset-paged search facade to the stateful,
//! resumable protocol. A fresh list request materializes every page of
//! its result up front as a chain of persisted tokens, so a harvester
//! iterating across many requests sees one frozen snapshot of the index
//! even if documents mutate mid-harvest. Replaying offsets against the
//! live index on each resumption would break that consistency and is
//! deliberately not done here.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::config::OaiConfig;
use crate::error::{ErrorCode, HarvestError, ProtocolError};
use crate::models::{HarvestDate, HarvestParams, Record, Verb};
use crate::search::{ResultPage, SearchFacade, SearchQuery};
use crate::tokens::{new_token_id, ResumptionToken, TokenStore};
use crate::validate::{validate, HarvestRequest};

/// Repository identity block reported by Identify.
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryInfo {
    pub repository_name: String,
    pub protocol_version: &'static str,
    pub admin_email: String,
    pub earliest_datestamp: String,
    pub deleted_record: &'static str,
    pub granularity: &'static str,
}

/// One metadata format visible in the current view.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataFormat {
    pub prefix: String,
    pub schema: String,
    pub namespace: String,
}

/// One set exposed by ListSets.
#[derive(Debug, Clone, Serialize)]
pub struct SetInfo {
    pub spec: String,
    pub name: String,
}

/// Response body handed to the rendering layer.
#[derive(Debug, Clone)]
pub enum Body {
    Error(ProtocolError),
    Identify(RepositoryInfo),
    MetadataFormats(Vec<MetadataFormat>),
    Sets(Vec<SetInfo>),
    Record(Record),
    List {
        page: ResultPage,
        /// Token for the next call; `None` signals end of list.
        next_token: Option<String>,
    },
}

/// Typed outcome of one harvest request.
#[derive(Debug, Clone)]
pub struct HarvestResponse {
    /// The verb, when one parsed.
    pub verb: Option<Verb>,
    /// View the request was served against.
    pub view: String,
    /// Metadata prefix in effect, fresh or recovered from a token.
    pub metadata_prefix: Option<String>,
    pub body: Body,
}

impl HarvestResponse {
    pub fn error(&self) -> Option<&ProtocolError> {
        match &self.body {
            Body::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Resumption token for the next call, or `None` when the harvest is
    /// complete (or the request produced no pageable result).
    pub fn token(&self) -> Option<&str> {
        match &self.body {
            Body::List { next_token, .. } => next_token.as_deref(),
            _ => None,
        }
    }
}

/// Coordinates validator, token store and search facade.
pub struct HarvestOrchestrator {
    search: Arc<dyn SearchFacade>,
    store: Arc<dyn TokenStore>,
    config: OaiConfig,
}

impl HarvestOrchestrator {
    pub fn new(
        search: Arc<dyn SearchFacade>,
        store: Arc<dyn TokenStore>,
        config: OaiConfig,
    ) -> Self {
        Self {
            search,
            store,
            config,
        }
    }

    /// Idempotent startup hook creating the token table.
    pub async fn ensure_schema(&self) -> Result<(), HarvestError> {
        self.store.ensure_schema().await?;
        Ok(())
    }

    pub fn config(&self) -> &OaiConfig {
        &self.config
    }

    /// Whether `format` may be disseminated in `view`.
    pub fn is_in_view(&self, format: &str, view: &str) -> bool {
        self.config.is_in_view(format, view)
    }

    /// Handle one inbound harvest request.
    ///
    /// Protocol errors come back as [`Body::Error`]; `Err` is reserved for
    /// infrastructure failures (index or token store unreachable).
    pub async fn handle(&self, params: &HarvestParams) -> Result<HarvestResponse, HarvestError> {
        let now_ms = Utc::now().timestamp_millis();

        // A `set` parameter may override the current view
        let mut view = self.config.default_view.clone();
        let mut illegal_set = false;
        if let Some(set) = params.set.as_deref() {
            if self.config.views.contains_key(set) {
                view = set.to_string();
            } else {
                illegal_set = true;
            }
        }

        // Look up the prior token when one was supplied
        let prior_token = match params.resumption_token.as_deref() {
            Some(token_id) => self.store.get(token_id).await?,
            None => None,
        };

        let request = match validate(
            params,
            prior_token.as_ref(),
            now_ms,
            &self.config,
            self.store.as_ref(),
        )
        .await
        {
            Ok(request) => request,
            Err(err) => return Ok(self.error_response(params, &view, err)),
        };

        // The set error only surfaces when nothing else was wrong
        if illegal_set {
            let set = params.set.as_deref().unwrap_or("");
            let err =
                ProtocolError::new(ErrorCode::BadArgument, format!("Set '{set}' is not valid!"));
            return Ok(self.error_response(params, &view, err));
        }

        let metadata_prefix = request.metadata_prefix.clone();
        let body = match request.verb {
            Verb::Identify => Body::Identify(self.identify()),
            Verb::ListMetadataFormats => Body::MetadataFormats(self.metadata_formats(&view)),
            Verb::ListSets => Body::Sets(self.sets()),
            Verb::GetRecord => self.get_record(&request, &view).await?,
            Verb::ListIdentifiers | Verb::ListRecords => {
                self.list(&request, prior_token, &view, now_ms).await?
            }
        };

        Ok(HarvestResponse {
            verb: Some(request.verb),
            view,
            metadata_prefix,
            body,
        })
    }

    fn error_response(
        &self,
        params: &HarvestParams,
        view: &str,
        err: ProtocolError,
    ) -> HarvestResponse {
        HarvestResponse {
            verb: params.verb.as_deref().and_then(|v| v.parse().ok()),
            view: view.to_string(),
            metadata_prefix: params.metadata_prefix.clone(),
            body: Body::Error(err),
        }
    }

    fn identify(&self) -> RepositoryInfo {
        RepositoryInfo {
            repository_name: self.config.repository_name.clone(),
            protocol_version: "2.0",
            admin_email: self.config.admin_email.clone(),
            earliest_datestamp: self.config.earliest_datestamp.clone(),
            deleted_record: "transient",
            granularity: "YYYY-MM-DDThh:mm:ssZ",
        }
    }

    fn metadata_formats(&self, view: &str) -> Vec<MetadataFormat> {
        let mut formats: Vec<MetadataFormat> = self
            .config
            .metadata_formats
            .iter()
            .filter(|(prefix, _)| self.is_in_view(prefix, view))
            .map(|(prefix, format_config)| MetadataFormat {
                prefix: prefix.clone(),
                schema: format_config.schema.clone(),
                namespace: format_config.namespace.clone(),
            })
            .collect();
        formats.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        formats
    }

    fn sets(&self) -> Vec<SetInfo> {
        let mut sets: Vec<SetInfo> = self
            .config
            .views
            .iter()
            .map(|(spec, view_config)| SetInfo {
                spec: spec.clone(),
                name: if view_config.name.is_empty() {
                    spec.clone()
                } else {
                    view_config.name.clone()
                },
            })
            .collect();
        sets.sort_by(|a, b| a.spec.cmp(&b.spec));
        sets
    }

    async fn get_record(
        &self,
        request: &HarvestRequest,
        view: &str,
    ) -> Result<Body, HarvestError> {
        let prefix = request.metadata_prefix.as_deref().unwrap_or("");
        if !self.is_in_view(prefix, view) {
            return Ok(Body::Error(ProtocolError::new(
                ErrorCode::CannotDisseminateFormat,
                format!("Record not available as metadata type: {prefix}"),
            )));
        }

        let identifier = request.identifier.as_deref().unwrap_or("");
        let mut query = self.base_query(self.identifier_query(identifier), view);
        query.rows = 1;

        let page = match self.search.search(&query).await {
            Ok(page) => page,
            Err(e) => {
                error!(identifier, error = %e, "Search backend failure during GetRecord");
                return Err(HarvestError::Search(e));
            }
        };
        match page.documents.into_iter().next() {
            Some(document) => Ok(Body::Record(document)),
            None => Ok(Body::Error(ProtocolError::new(
                ErrorCode::NoRecordsMatch,
                format!("Identifier '{identifier}' not found"),
            ))),
        }
    }

    async fn list(
        &self,
        request: &HarvestRequest,
        prior_token: Option<ResumptionToken>,
        view: &str,
        now_ms: i64,
    ) -> Result<Body, HarvestError> {
        // Only list records when the format is enabled in this view
        let prefix = request.metadata_prefix.as_deref().unwrap_or("");
        if !self.is_in_view(prefix, view) {
            debug!(prefix, view, "Format not enabled in view, suppressing result");
            return Ok(Body::List {
                page: ResultPage::empty(),
                next_token: None,
            });
        }

        match prior_token {
            Some(token) => self.resume(token).await,
            None => self.materialize(request, view, now_ms).await,
        }
    }

    /// Serve an already-persisted page verbatim.
    async fn resume(&self, token: ResumptionToken) -> Result<Body, HarvestError> {
        let page = match ResultPage::from_json(&token.result_json) {
            Ok(page) => page,
            Err(e) => {
                error!(token = %token.token, error = %e, "Corrupt token snapshot");
                return Err(e.into());
            }
        };

        let next_token = if token.is_last_page() {
            // Last page consumed, the chain is complete
            if let Err(e) = self.store.remove(&token.token).await {
                warn!(token = %token.token, error = %e, "Failed to remove consumed token");
            }
            None
        } else {
            Some(token.next_token.clone())
        };

        debug!(token = %token.token, last = next_token.is_none(), "Resumed harvest page");
        Ok(Body::List { page, next_token })
    }

    /// Fetch every page of the result up front, persisting pages 1..n as a
    /// linked chain of tokens before returning page 0. Either the whole
    /// chain is stored or, on any failure, every already-stored token is
    /// deleted again; a partial chain never survives.
    async fn materialize(
        &self,
        request: &HarvestRequest,
        view: &str,
        now_ms: i64,
    ) -> Result<Body, HarvestError> {
        // A page size of zero would never advance the offset
        let page_size = self.config.records_per_page.max(1);
        let prefix = request.metadata_prefix.clone().unwrap_or_default();

        let main_query = match request.identifier.as_deref() {
            Some(id) if !id.is_empty() => self.identifier_query(id),
            _ => "*:*".to_string(),
        };
        let mut query = self.base_query(main_query, view);
        if let Some(date_filter) = date_range_filter(request.from.as_ref(), request.until.as_ref())
        {
            debug!(filter = %date_filter, "Date query");
            query.filters.push(date_filter);
        }
        query.start = 0;
        query.rows = page_size;

        let first_page = match self.search.search(&query).await {
            Ok(page) => page,
            Err(e) => {
                error!(error = %e, "Search backend failure during list harvest");
                return Err(HarvestError::Search(e));
            }
        };
        let total = first_page.num_found;
        if total <= page_size as u64 {
            // The only page; no tokens needed
            return Ok(Body::List {
                page: first_page,
                next_token: None,
            });
        }

        let expiry_ms = now_ms + self.config.session_expiry_ms;
        let first_chain_id = new_token_id();
        let mut current_id = first_chain_id.clone();
        let mut stored: Vec<String> = Vec::new();
        let mut offset = page_size;

        loop {
            query.start = offset;
            let page = match self.search.search(&query).await {
                Ok(page) => page,
                Err(e) => {
                    self.rollback_chain(&stored).await;
                    return Err(HarvestError::Search(e));
                }
            };

            offset += page_size;
            let is_last = offset as u64 >= total;
            let next_id = if is_last {
                String::new()
            } else {
                new_token_id()
            };

            let snapshot = match page.to_json() {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    self.rollback_chain(&stored).await;
                    return Err(e.into());
                }
            };
            let token = ResumptionToken::new(
                current_id.clone(),
                prefix.clone(),
                snapshot,
                next_id.clone(),
                expiry_ms,
            );
            if let Err(e) = self.store.store(&token).await {
                self.rollback_chain(&stored).await;
                return Err(e.into());
            }
            debug!(token = %token.token, start = query.start, "Stored resumption page");
            stored.push(token.token);

            if is_last {
                break;
            }
            current_id = next_id;
        }

        debug!(total, pages = stored.len() + 1, "Materialized harvest chain");
        Ok(Body::List {
            page: first_page,
            next_token: Some(first_chain_id),
        })
    }

    /// Compensating cleanup after a failed materialization.
    async fn rollback_chain(&self, stored: &[String]) {
        for token_id in stored {
            if let Err(e) = self.store.remove(token_id).await {
                error!(token = %token_id, error = %e, "Failed to roll back partial token chain");
            }
        }
        if !stored.is_empty() {
            warn!(
                count = stored.len(),
                "Rolled back partially materialized token chain"
            );
        }
    }

    /// Query matching a single record by its OAI identifier. A synthesized
    /// identifier is stripped back to internal-id equality; anything else
    /// is matched against the indexed `oai_identifier` field.
    fn identifier_query(&self, identifier: &str) -> String {
        match identifier.strip_prefix(&self.config.identifier_prefix) {
            Some(internal_id) => format!("id:{}", escape_query(internal_id)),
            None => format!("oai_identifier:{}", escape_query(identifier)),
        }
    }

    fn base_query(&self, main_query: String, view: &str) -> SearchQuery {
        let mut query = SearchQuery::new(main_query);
        query.sort = Some("f_dc_title asc".to_string());
        if let Some(view_config) = self.config.views.get(view) {
            if let Some(view_query) = view_config.query.as_deref() {
                if !view_query.is_empty() {
                    query.filters.push(view_query.to_string());
                }
            }
        }
        query.filters.push("item_type:object".to_string());
        query
    }
}

fn date_range_filter(
    from: Option<&HarvestDate>,
    until: Option<&HarvestDate>,
) -> Option<String> {
    match (from, until) {
        (Some(from), Some(until)) => Some(format!(
            "last_modified:[{} TO {}]",
            from.to_query_bound(),
            until.to_query_bound()
        )),
        (Some(from), None) => Some(format!("last_modified:[{} TO *]", from.to_query_bound())),
        (None, Some(until)) => Some(format!("last_modified:[* TO {}]", until.to_query_bound())),
        (None, None) => None,
    }
}

/// Escape characters with query syntax meaning in the index.
fn escape_query(raw: &str) -> String {
    const SPECIAL: &str = "+-&|!(){}[]^\"~*?:\\";
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if SPECIAL.contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
