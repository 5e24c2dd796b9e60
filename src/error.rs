//! Error types for the harvesting endpoint.
//!
//! Protocol errors are the closed taxonomy mandated by OAI-PMH 2.0 and
//! travel as response values for the rendering layer, never as `Err`.
//! Infrastructure failures (index or token store unreachable) are a
//! separate fatal class.

use thiserror::Error;

/// OAI-PMH protocol error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadVerb,
    BadArgument,
    BadResumptionToken,
    CannotDisseminateFormat,
    NoRecordsMatch,
}

impl ErrorCode {
    /// Protocol literal used in the `<error code="...">` attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadVerb => "badVerb",
            ErrorCode::BadArgument => "badArgument",
            ErrorCode::BadResumptionToken => "badResumptionToken",
            ErrorCode::CannotDisseminateFormat => "cannotDisseminateFormat",
            ErrorCode::NoRecordsMatch => "noRecordsMatch",
        }
    }
}

/// A protocol-level error attached to the harvest response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {}", .code.as_str(), .message)]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub message: String,
}

impl ProtocolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Token store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token database error: {0}")]
    Database(String),
    /// A generated id collided with an existing row. With 128-bit random
    /// ids this indicates something badly wrong; it is never retried.
    #[error("duplicate resumption token id: {0}")]
    DuplicateToken(String),
}

/// Infrastructure failures outside the protocol taxonomy.
///
/// These are logged and surfaced to the request handler as a best-effort
/// error result; they are never mapped onto a protocol error code.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("search backend failure: {0}")]
    Search(#[from] anyhow::Error),
    #[error("token store failure: {0}")]
    Store(#[from] StoreError),
    #[error("corrupt token snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}
