//! Verb and argument validation.
//!
//! Turns raw form parameters into a typed [`HarvestRequest`] or a
//! structured protocol error, enforcing the OAI-PMH verb/argument grammar.
//! Pure except for one side effect: an expired prior token is deleted
//! from the store on detection.

use tracing::{debug, error};

use crate::config::OaiConfig;
use crate::error::{ErrorCode, ProtocolError};
use crate::models::{Granularity, HarvestDate, HarvestParams, Verb};
use crate::tokens::{ResumptionToken, TokenStore};

/// A validated harvest request.
#[derive(Debug, Clone)]
pub struct HarvestRequest {
    pub verb: Verb,
    /// Fresh from the request, or recovered from a prior token.
    pub metadata_prefix: Option<String>,
    pub identifier: Option<String>,
    pub from: Option<HarvestDate>,
    pub until: Option<HarvestDate>,
    pub set: Option<String>,
    pub resumption_token: Option<String>,
}

/// Validate one inbound request.
///
/// `prior_token` is the stored token matching the request's
/// `resumptionToken` parameter, when that parameter was supplied and a row
/// was found. The error classification distinguishes "you sent a token we
/// do not know" (`badResumptionToken`) from "you sent nothing usable"
/// (`badArgument`) based purely on whether the parameter was present,
/// however malformed.
pub async fn validate(
    params: &HarvestParams,
    prior_token: Option<&ResumptionToken>,
    now_ms: i64,
    config: &OaiConfig,
    store: &dyn TokenStore,
) -> Result<HarvestRequest, ProtocolError> {
    let Some(verb_str) = params.verb.as_deref() else {
        return Err(ProtocolError::new(
            ErrorCode::BadVerb,
            "No verb was specified",
        ));
    };
    debug!(verb = verb_str, "OAI verb");

    let Ok(verb) = verb_str.parse::<Verb>() else {
        error!(verb = verb_str, "Invalid verb provided");
        return Err(ProtocolError::new(
            ErrorCode::BadVerb,
            format!("Unknown verb: '{verb_str}'"),
        ));
    };

    let mut request = HarvestRequest {
        verb,
        metadata_prefix: params.metadata_prefix.clone(),
        identifier: params.identifier.clone(),
        from: None,
        until: None,
        set: params.set.clone(),
        resumption_token: params.resumption_token.clone(),
    };

    // Identify, ListMetadataFormats and ListSets take no further arguments
    if !verb.takes_metadata_prefix() {
        return Ok(request);
    }

    // resumptionToken is an exclusive argument at the protocol level
    if params.resumption_token.is_some()
        && (params.metadata_prefix.is_some()
            || params.from.is_some()
            || params.until.is_some()
            || params.identifier.is_some())
    {
        error!("resumptionToken supplied alongside other arguments");
        return Err(ProtocolError::new(
            ErrorCode::BadArgument,
            "resumptionToken cannot be combined with other arguments",
        ));
    }

    // No metadata prefix supplied: try to recover it from the prior token
    if request.metadata_prefix.is_none() {
        match prior_token {
            Some(token) => {
                if token.is_expired(now_ms) {
                    error!(token = %token.token, "Using an expired token");
                    // Expired token, make sure it's not in the store anymore
                    match store.remove(&token.token).await {
                        Ok(true) => {}
                        Ok(false) | Err(_) => error!("Error removing expired token!"),
                    }
                    return Err(ProtocolError::new(
                        ErrorCode::BadResumptionToken,
                        "Token has expired",
                    ));
                }
                request.metadata_prefix = Some(token.metadata_prefix.clone());
            }
            None => {
                // Either they used an invalid token
                if let Some(attempted) = params.resumption_token.as_deref() {
                    error!(token = attempted, "Illegal resumption token");
                    return Err(ProtocolError::new(
                        ErrorCode::BadResumptionToken,
                        "Illegal resumption token",
                    ));
                }
                // Or were missing their metadata prefix
                error!("No metadata prefix supplied, and no token");
                return Err(ProtocolError::new(
                    ErrorCode::BadArgument,
                    "Metadata prefix required",
                ));
            }
        }
    }

    if let Some(prefix) = request.metadata_prefix.as_deref() {
        if !config.has_format(prefix) {
            error!(prefix, "Metadata prefix is not configured");
            return Err(ProtocolError::new(
                ErrorCode::CannotDisseminateFormat,
                format!("Record not available as metadata type: {prefix}"),
            ));
        }
    }

    // List verbs allow date limits
    if verb.is_list() {
        if let Some(from_str) = params.from.as_deref() {
            request.from = Some(HarvestDate::parse(from_str).map_err(|_| {
                error!(from = from_str, "Invalid FROM date");
                ProtocolError::new(ErrorCode::BadArgument, "From date not in valid format!")
            })?);
        }

        if let Some(until_str) = params.until.as_deref() {
            // Granularity mismatch is judged on layout before parsing
            if let Some(from) = &request.from {
                let from_has_time = from.granularity() == Granularity::Seconds;
                if from_has_time != until_str.contains('T') {
                    error!(
                        from = params.from.as_deref(),
                        until = until_str,
                        "Date granularity mismatch"
                    );
                    return Err(ProtocolError::new(
                        ErrorCode::BadArgument,
                        "Date granularity mismatch",
                    ));
                }
            }
            request.until = Some(HarvestDate::parse(until_str).map_err(|_| {
                error!(until = until_str, "Invalid UNTIL date");
                ProtocolError::new(ErrorCode::BadArgument, "Until date not in valid format!")
            })?);
        }

        if let (Some(from), Some(until)) = (&request.from, &request.until) {
            if from.datetime() > until.datetime() {
                error!(
                    from = params.from.as_deref(),
                    until = params.until.as_deref(),
                    "FROM date > UNTIL date"
                );
                return Err(ProtocolError::new(
                    ErrorCode::BadArgument,
                    "From date cannot be later than Until date!",
                ));
            }
        }
    }

    if verb == Verb::GetRecord {
        match params.identifier.as_deref() {
            Some(id) if !id.is_empty() => {}
            _ => {
                error!("GetRecord missing an identifier");
                return Err(ProtocolError::new(
                    ErrorCode::BadArgument,
                    "Identifier required",
                ));
            }
        }
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{new_token_id, MemoryTokenStore};

    fn test_config() -> OaiConfig {
        OaiConfig::default()
    }

    fn params(pairs: &[(&str, &str)]) -> HarvestParams {
        HarvestParams::from_pairs(pairs.iter().copied())
    }

    async fn check(
        pairs: &[(&str, &str)],
        prior: Option<&ResumptionToken>,
    ) -> Result<HarvestRequest, ProtocolError> {
        let store = MemoryTokenStore::new();
        validate(&params(pairs), prior, 1_000_000, &test_config(), &store).await
    }

    fn code(result: Result<HarvestRequest, ProtocolError>) -> ErrorCode {
        result.expect_err("expected a protocol error").code
    }

    #[tokio::test]
    async fn missing_verb_is_bad_verb() {
        assert_eq!(code(check(&[], None).await), ErrorCode::BadVerb);
    }

    #[tokio::test]
    async fn unknown_verb_is_bad_verb() {
        assert_eq!(
            code(check(&[("verb", "ListEverything")], None).await),
            ErrorCode::BadVerb
        );
    }

    #[tokio::test]
    async fn identify_needs_no_arguments() {
        let request = check(&[("verb", "Identify")], None).await.unwrap();
        assert_eq!(request.verb, Verb::Identify);
    }

    #[tokio::test]
    async fn missing_prefix_without_token_is_bad_argument() {
        let result = check(&[("verb", "ListRecords")], None).await;
        let err = result.unwrap_err();
        assert_eq!(err.code, ErrorCode::BadArgument);
        assert_eq!(err.message, "Metadata prefix required");
    }

    #[tokio::test]
    async fn unknown_token_is_bad_resumption_token() {
        let result = check(
            &[("verb", "ListRecords"), ("resumptionToken", "garbage")],
            None,
        )
        .await;
        assert_eq!(code(result), ErrorCode::BadResumptionToken);
    }

    #[tokio::test]
    async fn blank_token_parameter_still_counts_as_a_token() {
        let result = check(&[("verb", "ListRecords"), ("resumptionToken", "")], None).await;
        assert_eq!(code(result), ErrorCode::BadResumptionToken);
    }

    #[tokio::test]
    async fn token_is_exclusive_with_other_arguments() {
        let result = check(
            &[
                ("verb", "ListRecords"),
                ("resumptionToken", "abc"),
                ("metadataPrefix", "oai_dc"),
            ],
            None,
        )
        .await;
        assert_eq!(code(result), ErrorCode::BadArgument);
    }

    #[tokio::test]
    async fn prefix_is_recovered_from_a_valid_token() {
        let token = ResumptionToken::new(
            new_token_id(),
            "oai_dc".to_string(),
            "{}".to_string(),
            String::new(),
            2_000_000,
        );
        let request = check(
            &[("verb", "ListRecords"), ("resumptionToken", &token.token)],
            Some(&token),
        )
        .await
        .unwrap();
        assert_eq!(request.metadata_prefix.as_deref(), Some("oai_dc"));
    }

    #[tokio::test]
    async fn expired_token_is_rejected_and_deleted() {
        let store = MemoryTokenStore::new();
        let token = ResumptionToken::new(
            new_token_id(),
            "oai_dc".to_string(),
            "{}".to_string(),
            String::new(),
            500_000,
        );
        store.store(&token).await.unwrap();

        let request_params = params(&[("verb", "ListRecords"), ("resumptionToken", &token.token)]);
        let result = validate(
            &request_params,
            Some(&token),
            1_000_000,
            &test_config(),
            &store,
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.code, ErrorCode::BadResumptionToken);
        assert_eq!(err.message, "Token has expired");
        assert!(store.get(&token.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_prefix_cannot_be_disseminated() {
        let result = check(
            &[("verb", "ListRecords"), ("metadataPrefix", "mods")],
            None,
        )
        .await;
        assert_eq!(code(result), ErrorCode::CannotDisseminateFormat);
    }

    #[tokio::test]
    async fn recovered_prefix_must_still_be_configured() {
        let token = ResumptionToken::new(
            new_token_id(),
            "mods".to_string(),
            "{}".to_string(),
            String::new(),
            2_000_000,
        );
        let result = check(
            &[("verb", "ListRecords"), ("resumptionToken", &token.token)],
            Some(&token),
        )
        .await;
        assert_eq!(code(result), ErrorCode::CannotDisseminateFormat);
    }

    #[tokio::test]
    async fn valid_date_range_is_accepted() {
        let request = check(
            &[
                ("verb", "ListRecords"),
                ("metadataPrefix", "oai_dc"),
                ("from", "2011-01-01"),
                ("until", "2011-12-31"),
            ],
            None,
        )
        .await
        .unwrap();
        assert_eq!(request.from.unwrap().granularity(), Granularity::Day);
        assert_eq!(request.until.unwrap().granularity(), Granularity::Day);
    }

    #[tokio::test]
    async fn mixed_granularity_is_bad_argument() {
        let result = check(
            &[
                ("verb", "ListIdentifiers"),
                ("metadataPrefix", "oai_dc"),
                ("from", "2011-01-01"),
                ("until", "2011-12-31T23:59:59Z"),
            ],
            None,
        )
        .await;
        assert_eq!(code(result), ErrorCode::BadArgument);
    }

    #[tokio::test]
    async fn unparseable_dates_are_bad_arguments() {
        let result = check(
            &[
                ("verb", "ListRecords"),
                ("metadataPrefix", "oai_dc"),
                ("from", "01-01-2011"),
            ],
            None,
        )
        .await;
        assert_eq!(code(result), ErrorCode::BadArgument);

        let result = check(
            &[
                ("verb", "ListRecords"),
                ("metadataPrefix", "oai_dc"),
                ("until", "2011-13-45"),
            ],
            None,
        )
        .await;
        assert_eq!(code(result), ErrorCode::BadArgument);
    }

    #[tokio::test]
    async fn from_after_until_is_bad_argument() {
        let result = check(
            &[
                ("verb", "ListRecords"),
                ("metadataPrefix", "oai_dc"),
                ("from", "2012-01-01"),
                ("until", "2011-01-01"),
            ],
            None,
        )
        .await;
        assert_eq!(code(result), ErrorCode::BadArgument);
    }

    #[tokio::test]
    async fn dates_are_ignored_for_get_record() {
        // GetRecord takes no date limits; a garbage `from` is not parsed
        let request = check(
            &[
                ("verb", "GetRecord"),
                ("metadataPrefix", "oai_dc"),
                ("identifier", "oai:localhost:abc"),
                ("from", "garbage"),
            ],
            None,
        )
        .await
        .unwrap();
        assert!(request.from.is_none());
    }

    #[tokio::test]
    async fn get_record_requires_an_identifier() {
        let result = check(
            &[("verb", "GetRecord"), ("metadataPrefix", "oai_dc")],
            None,
        )
        .await;
        assert_eq!(code(result), ErrorCode::BadArgument);

        let result = check(
            &[
                ("verb", "GetRecord"),
                ("metadataPrefix", "oai_dc"),
                ("identifier", ""),
            ],
            None,
        )
        .await;
        assert_eq!(code(result), ErrorCode::BadArgument);
    }
}
