//! Endpoint configuration.
//!
//! Mirrors the portal's `oai-pmh` configuration block: repository identity,
//! paging, token expiry, the views exposed as OAI-PMH sets, and the
//! metadata formats each view may disseminate.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Default page size for list verbs.
pub const DEFAULT_RECORDS_PER_PAGE: usize = 25;
/// Default resumption token lifetime (5 minutes).
pub const DEFAULT_SESSION_EXPIRY_MS: i64 = 300_000;

fn default_records_per_page() -> usize {
    DEFAULT_RECORDS_PER_PAGE
}

fn default_session_expiry_ms() -> i64 {
    DEFAULT_SESSION_EXPIRY_MS
}

/// Visibility configuration for one metadata format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFormatConfig {
    /// Schema location reported by ListMetadataFormats.
    #[serde(default)]
    pub schema: String,
    /// Metadata namespace reported by ListMetadataFormats.
    #[serde(default)]
    pub namespace: String,
    /// Visible in every view regardless of `enabled_views`.
    #[serde(default)]
    pub enabled_in_all_views: bool,
    /// Views this format is visible in when not globally enabled.
    #[serde(default)]
    pub enabled_views: Vec<String>,
}

/// A named view over the repository, exposed to harvesters as a set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewConfig {
    /// Human-readable set name.
    #[serde(default)]
    pub name: String,
    /// Optional filter query scoping the view to a subset of the index.
    #[serde(default)]
    pub query: Option<String>,
}

/// Top-level endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OaiConfig {
    /// Repository name reported by Identify.
    #[serde(default)]
    pub repository_name: String,
    /// Admin contact reported by Identify.
    #[serde(default)]
    pub admin_email: String,
    /// Prefix for synthesized identifiers, e.g. `oai:repo.example.org:`.
    #[serde(default)]
    pub identifier_prefix: String,
    /// Earliest datestamp reported by Identify.
    #[serde(default)]
    pub earliest_datestamp: String,
    /// View served when no `set` parameter is given.
    #[serde(default)]
    pub default_view: String,
    /// Page size for list verbs.
    #[serde(default = "default_records_per_page")]
    pub records_per_page: usize,
    /// Resumption token lifetime in milliseconds.
    #[serde(default = "default_session_expiry_ms")]
    pub session_expiry_ms: i64,
    /// Views keyed by set spec.
    #[serde(default)]
    pub views: HashMap<String, ViewConfig>,
    /// Metadata formats keyed by prefix.
    #[serde(default)]
    pub metadata_formats: HashMap<String, MetadataFormatConfig>,
}

impl Default for OaiConfig {
    fn default() -> Self {
        let mut views = HashMap::new();
        views.insert(
            "default".to_string(),
            ViewConfig {
                name: "Default view".to_string(),
                query: None,
            },
        );

        let mut metadata_formats = HashMap::new();
        metadata_formats.insert(
            "oai_dc".to_string(),
            MetadataFormatConfig {
                schema: "http://www.openarchives.org/OAI/2.0/oai_dc.xsd".to_string(),
                namespace: "http://www.openarchives.org/OAI/2.0/oai_dc/".to_string(),
                enabled_in_all_views: true,
                enabled_views: Vec::new(),
            },
        );

        Self {
            repository_name: "Repository".to_string(),
            admin_email: String::new(),
            identifier_prefix: "oai:localhost:".to_string(),
            earliest_datestamp: "1970-01-01T00:00:00Z".to_string(),
            default_view: "default".to_string(),
            records_per_page: DEFAULT_RECORDS_PER_PAGE,
            session_expiry_ms: DEFAULT_SESSION_EXPIRY_MS,
            views,
            metadata_formats,
        }
    }
}

impl OaiConfig {
    /// Load configuration from a TOML file.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Whether a metadata prefix is configured at all, in any view.
    pub fn has_format(&self, prefix: &str) -> bool {
        self.metadata_formats.contains_key(prefix)
    }

    /// Whether `format` may be disseminated in `view`.
    pub fn is_in_view(&self, format: &str, view: &str) -> bool {
        if format.is_empty() {
            return false;
        }
        let Some(format_config) = self.metadata_formats.get(format) else {
            return false;
        };
        format_config.enabled_in_all_views
            || format_config.enabled_views.iter().any(|v| v == view)
    }
}
