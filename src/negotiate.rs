//! Content negotiation: Content-Type admission and Accept selection.
//!
//! Both checks terminate the response on failure; callers must check
//! [`ResponseChannel::ended`] before continuing.

use crate::context::{RequestContext, ResponseChannel};
use crate::table::Route;

pub const JSON_MEDIA_TYPE: &str = "application/json";
pub const TEXT_MEDIA_TYPE: &str = "text/plain";
pub const FORM_MEDIA_TYPE: &str = "application/x-www-form-urlencoded";

/// Default assumed when the client omits Content-Type entirely.
pub const DEFAULT_CONTENT_TYPE: &str = JSON_MEDIA_TYPE;

/// Validate the request's Content-Type against the route's accepted set
/// and select a response media type from the Accept header.
///
/// A `None` accepted/produced set means "anything goes" for that side.
/// Accepting the form-encoded type flags the context for multipart
/// parsing. The selected response type lands in `ctx.media_type`.
pub fn check_media_types(route: &Route, ctx: &mut RequestContext, channel: &mut ResponseChannel) {
    if let Some(consumes) = &route.consumes {
        let content_type = ctx.header("content-type").unwrap_or(DEFAULT_CONTENT_TYPE);
        // Trim parameters (charset, multipart boundary) before comparing.
        let content_type = content_type.split(';').next().unwrap_or("").trim();
        let stripped = strip_boundary(content_type);
        if !consumes.iter().any(|c| c.eq_ignore_ascii_case(stripped)) {
            channel.end_with_error(
                400,
                &format!(
                    "Content-Type {} is not one of the supported types {:?}",
                    stripped, consumes
                ),
            );
        }
        if consumes.iter().any(|c| c == FORM_MEDIA_TYPE) {
            ctx.expect_multipart = true;
        }
    }

    if let Some(produces) = &route.produces {
        let accept = ctx.header("accept").unwrap_or("*/*");
        match accept_match(produces, accept) {
            Some(selected) => ctx.media_type = Some(selected.to_string()),
            None => channel.end_with_error(
                400,
                &format!(
                    "Accept header {} does not match any of the produced types {:?}",
                    accept, produces
                ),
            ),
        }
    }
}

/// First-match Accept scan, no q-value weighting (RFC 2616 §14 subset).
///
/// Walks the comma-separated media ranges in client order; for each range
/// the first produced type that matches exactly (case-insensitive) or via
/// `*/*` wins.
#[must_use]
pub fn accept_match<'a>(produced: &'a [String], accept: &str) -> Option<&'a str> {
    for range in accept.split(',') {
        let media_range = range.split(';').next().unwrap_or("").trim();
        if media_range.is_empty() {
            continue;
        }
        for candidate in produced {
            if media_range == "*/*" || candidate.eq_ignore_ascii_case(media_range) {
                return Some(candidate.as_str());
            }
        }
    }
    None
}

/// Drop a multipart boundary suffix, keeping the bare media type:
/// `multipart/form-data boundary=----X` becomes `multipart/form-data`.
/// Without a boundary the input passes through untouched.
#[must_use]
pub fn strip_boundary(content_type: &str) -> &str {
    match content_type.find("boundary") {
        Some(idx) => content_type[..idx.saturating_sub(1)].trim_end(),
        None => content_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_selects_first_produced_type() {
        let produced = vec![JSON_MEDIA_TYPE.to_string(), TEXT_MEDIA_TYPE.to_string()];
        assert_eq!(accept_match(&produced, "*/*"), Some(JSON_MEDIA_TYPE));
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let produced = vec![JSON_MEDIA_TYPE.to_string(), TEXT_MEDIA_TYPE.to_string()];
        assert_eq!(accept_match(&produced, "Text/Plain"), Some(TEXT_MEDIA_TYPE));
    }

    #[test]
    fn ranges_are_scanned_in_client_order() {
        let produced = vec![JSON_MEDIA_TYPE.to_string(), TEXT_MEDIA_TYPE.to_string()];
        assert_eq!(
            accept_match(&produced, "text/plain, application/json"),
            Some(TEXT_MEDIA_TYPE)
        );
        // Parameters after ';' are ignored per range.
        assert_eq!(
            accept_match(&produced, "text/plain;q=0.5"),
            Some(TEXT_MEDIA_TYPE)
        );
    }

    #[test]
    fn no_overlap_yields_none() {
        let produced = vec![JSON_MEDIA_TYPE.to_string()];
        assert_eq!(accept_match(&produced, "application/xml"), None);
    }

    #[test]
    fn boundary_suffix_is_stripped() {
        assert_eq!(
            strip_boundary("multipart/form-data boundary=----WebKitFormBoundaryP8wZ"),
            "multipart/form-data"
        );
        assert_eq!(strip_boundary("application/json"), "application/json");
    }
}
