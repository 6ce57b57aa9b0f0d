//! Mapping of transport failures and HTTP responses to [`ContentError`]

use crate::error::ContentError;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;

/// Longest Retry-After honored; larger values are clamped
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Classify a non-success HTTP response
///
/// `resource` names the request target for operator messages (e.g. "pages/welcome").
pub fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    resource: &str,
    body: &str,
) -> ContentError {
    match status.as_u16() {
        401 => ContentError::AuthExpired,
        403 => ContentError::Forbidden {
            resource: resource.to_string(),
        },
        404 => ContentError::NotFound {
            resource: resource.to_string(),
        },
        429 => ContentError::RateLimited {
            retry_after: parse_retry_after(headers),
        },
        500 | 502 | 503 | 504 => ContentError::Transient {
            status: Some(status.as_u16()),
            message: summarize(status, body),
        },
        code => ContentError::Fatal {
            status: Some(code),
            message: summarize(status, body),
        },
    }
}

/// Classify a transport-level failure (no usable response)
///
/// A connection that drops while the body streams in is as transient as one
/// that never connected. Unparseable bodies are [`classify_parse`]'s concern.
pub fn classify_transport(error: &reqwest::Error) -> ContentError {
    if error.is_timeout()
        || error.is_connect()
        || error.is_request()
        || error.is_body()
        || error.is_decode()
    {
        return ContentError::Transient {
            status: None,
            message: error.to_string(),
        };
    }
    if let Some(status) = error.status() {
        return classify_status(status, &HeaderMap::new(), "request", "");
    }
    ContentError::Fatal {
        status: None,
        message: error.to_string(),
    }
}

/// Classify a body that arrived with a success status but could not be parsed
pub fn classify_parse(error: &serde_json::Error) -> ContentError {
    ContentError::Data {
        message: error.to_string(),
    }
}

/// Read an integer-seconds `Retry-After` header
///
/// HTTP-date values are ignored and the limiter's own window is used instead.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

fn summarize(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return status.to_string();
    }
    let snippet: String = body.chars().take(200).collect();
    format!("{status}: {snippet}")
}
