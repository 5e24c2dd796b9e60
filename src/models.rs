//! Core protocol types shared across the harvesting endpoint.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;

/// The six OAI-PMH 2.0 verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Identify,
    ListMetadataFormats,
    ListSets,
    GetRecord,
    ListIdentifiers,
    ListRecords,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Identify => "Identify",
            Verb::ListMetadataFormats => "ListMetadataFormats",
            Verb::ListSets => "ListSets",
            Verb::GetRecord => "GetRecord",
            Verb::ListIdentifiers => "ListIdentifiers",
            Verb::ListRecords => "ListRecords",
        }
    }

    /// Verbs that require a metadata prefix (or a resumption token to
    /// recover one from).
    pub fn takes_metadata_prefix(&self) -> bool {
        matches!(
            self,
            Verb::GetRecord | Verb::ListIdentifiers | Verb::ListRecords
        )
    }

    /// Verbs that page through results and accept date limits.
    pub fn is_list(&self) -> bool {
        matches!(self, Verb::ListIdentifiers | Verb::ListRecords)
    }
}

impl FromStr for Verb {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Identify" => Ok(Verb::Identify),
            "ListMetadataFormats" => Ok(Verb::ListMetadataFormats),
            "ListSets" => Ok(Verb::ListSets),
            "GetRecord" => Ok(Verb::GetRecord),
            "ListIdentifiers" => Ok(Verb::ListIdentifiers),
            "ListRecords" => Ok(Verb::ListRecords),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw form parameters of one inbound harvest request.
///
/// Presence matters independently of content: a blank `resumptionToken`
/// still counts as a supplied token when classifying errors.
#[derive(Debug, Clone, Default)]
pub struct HarvestParams {
    pub verb: Option<String>,
    pub metadata_prefix: Option<String>,
    pub identifier: Option<String>,
    pub from: Option<String>,
    pub until: Option<String>,
    pub resumption_token: Option<String>,
    pub set: Option<String>,
}

impl HarvestParams {
    /// Build from decoded form fields (GET query string or POST body).
    /// Unknown fields are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            let value = value.into();
            match key.as_ref() {
                "verb" => params.verb = Some(value),
                "metadataPrefix" => params.metadata_prefix = Some(value),
                "identifier" => params.identifier = Some(value),
                "from" => params.from = Some(value),
                "until" => params.until = Some(value),
                "resumptionToken" => params.resumption_token = Some(value),
                "set" => params.set = Some(value),
                _ => {}
            }
        }
        params
    }
}

/// Time granularity of a harvest date boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day,
    Seconds,
}

/// A `from`/`until` boundary parsed from one of the two accepted layouts:
/// `YYYY-MM-DD` or `YYYY-MM-DDThh:mm:ssZ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestDate {
    datetime: NaiveDateTime,
    granularity: Granularity,
}

impl HarvestDate {
    pub fn parse(s: &str) -> Result<Self, chrono::ParseError> {
        if s.contains('T') {
            let datetime = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")?;
            Ok(Self {
                datetime,
                granularity: Granularity::Seconds,
            })
        } else {
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")?;
            Ok(Self {
                datetime: date.and_time(NaiveTime::MIN),
                granularity: Granularity::Day,
            })
        }
    }

    pub fn datetime(&self) -> NaiveDateTime {
        self.datetime
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Render for an index range filter, always at seconds granularity.
    pub fn to_query_bound(&self) -> String {
        self.datetime.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

/// A search document. Documents are schemaless JSON objects exactly as the
/// index returns them.
pub type Record = serde_json::Map<String, Value>;

/// First string value of a field. Multivalued fields come back from the
/// index as arrays; missing, null and empty values all count as absent.
pub fn first_str<'a>(record: &'a Record, field: &str) -> Option<&'a str> {
    match record.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Array(items) => items
            .iter()
            .find_map(|v| v.as_str())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

/// OAI identifier of a record, synthesizing `oai:<host>:<internal-id>`
/// when the index carries no explicit `oai_identifier` field.
pub fn oai_identifier(record: &Record, identifier_prefix: &str) -> String {
    if let Some(id) = first_str(record, "oai_identifier") {
        return id.to_string();
    }
    format!(
        "{}{}",
        identifier_prefix,
        first_str(record, "id").unwrap_or("")
    )
}

/// Set spec of a record, falling back to the current view name.
pub fn oai_set(record: &Record, view: &str) -> String {
    match first_str(record, "oai_set") {
        Some(set) => set.to_string(),
        None => view.to_string(),
    }
}

/// Whether the index marks this record as deleted.
pub fn is_deleted(record: &Record) -> bool {
    first_str(record, "oai_deleted").is_some()
}
