//! Maps raw transport and HTTP failures onto [`ChatError`]
//!
//! Precedence (first match wins):
//! 1. cancellation
//! 2. transport connectivity
//! 3. HTTP failure with a provider error body: API-key check for 401/403,
//!    then the semantic detectors
//! 4. plain status mapping

use super::{ChatError, HttpFailure, TransportError};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// Error object found in a provider response body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ProviderErrorBody {
    message: String,
    code: Option<String>,
    kind: Option<String>,
    param: Option<String>,
}

impl ProviderErrorBody {
    fn haystack(&self) -> String {
        [
            Some(self.message.as_str()),
            self.code.as_deref(),
            self.kind.as_deref(),
            self.param.as_deref(),
        ]
        .iter()
        .flatten()
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
    }

    fn code_or_kind_is(&self, candidates: &[&str]) -> bool {
        [self.code.as_deref(), self.kind.as_deref()]
            .iter()
            .flatten()
            .any(|value| {
                let value = value.to_lowercase();
                candidates.iter().any(|c| value == *c)
            })
    }
}

/// Map a raw failure to the chat error taxonomy
pub fn map_error(error: &TransportError) -> ChatError {
    match error {
        TransportError::Cancelled => ChatError::Cancelled,
        TransportError::NotConnected(_) | TransportError::ConnectionDropped(_) => {
            ChatError::NetworkUnavailable
        }
        TransportError::TimedOut => ChatError::TimedOut,
        TransportError::Other(_) => ChatError::ConnectionLost,
        TransportError::Http(failure) => map_http_failure(failure),
    }
}

/// Map an HTTP failure (status + headers + optional body)
pub fn map_http_failure(failure: &HttpFailure) -> ChatError {
    let status = failure.status;
    let parsed = failure.body.as_deref().and_then(parse_provider_error);

    if let Some(body) = &parsed {
        if let Some(mapped) = detect_semantic_error(status, body) {
            debug!(status, ?mapped, "Provider error matched semantic detector");
            return mapped;
        }
    }

    match status {
        401 => ChatError::Unauthorized,
        403 => ChatError::Forbidden,
        429 => ChatError::RateLimited {
            retry_after: failure
                .header("retry-after")
                .and_then(|value| parse_retry_after(value, Utc::now())),
        },
        500..=599 => ChatError::ServerError(status),
        400..=499 => ChatError::BadRequest(status),
        _ => match parsed {
            Some(body) => ChatError::ProviderError {
                code: body.code,
                message: body.message,
            },
            None => ChatError::ProviderError {
                code: None,
                message: format!("HTTP status {}", status),
            },
        },
    }
}

fn detect_semantic_error(status: u16, body: &ProviderErrorBody) -> Option<ChatError> {
    let text = body.haystack();

    if (status == 401 || status == 403) && is_invalid_api_key(body, &text) {
        return Some(ChatError::InvalidApiKey);
    }

    if contains_any(&text, &["arrearage", "billing"]) {
        return Some(ChatError::BillingIssue(body.message.clone()));
    }

    if contains_any(&text, &["insufficient_quota", "insufficient quota", "quota"]) {
        return Some(ChatError::QuotaExceeded);
    }

    if contains_any(
        &text,
        &["model_not_found", "model not found", "modelnotfound", "does not exist"],
    ) {
        return Some(ChatError::ModelNotFound(extract_model_name(&body.message)));
    }

    if contains_any(
        &text,
        &["access_denied", "access denied", "accessdenied", "permission"],
    ) || body.code.as_deref() == Some("403")
    {
        return Some(ChatError::ModelAccessDenied(extract_model_name(
            &body.message,
        )));
    }

    if contains_any(
        &text,
        &[
            "context_length_exceeded",
            "maximum context length",
            "context length",
        ],
    ) {
        return Some(ChatError::ContextLengthExceeded);
    }

    if contains_any(
        &text,
        &[
            "content_filter",
            "content_policy",
            "content policy",
            "content management policy",
            "datainspectionfailed",
            "data_inspection_failed",
            "inappropriate content",
            "safety",
        ],
    ) {
        return Some(ChatError::ContentFiltered(body.message.clone()));
    }

    if body.param.as_deref() == Some("response_format") || text.contains("response_format") {
        return Some(ChatError::ResponseFormatInvalid);
    }

    None
}

fn is_invalid_api_key(body: &ProviderErrorBody, text: &str) -> bool {
    contains_any(
        text,
        &[
            "incorrect api key",
            "invalid api key",
            "invalid api-key",
            "invalid_api_key",
            "invalidapikey",
        ],
    ) || body.code_or_kind_is(&[
        "invalid_api_key",
        "invalidapikey",
        "authentication_error",
        "authentication_failed",
        "unauthenticated",
    ])
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| text.contains(needle))
}

/// Accepts `{"error": {message, code, type, param}}` or the flat
/// `{message, code, type, param}` shape.
fn parse_provider_error(body: &[u8]) -> Option<ProviderErrorBody> {
    let json: Value = serde_json::from_slice(body).ok()?;

    let nested = json.get("error").filter(|e| e.is_object());
    let object = nested.unwrap_or(&json);
    if !object.is_object() {
        return None;
    }

    let parsed = ProviderErrorBody {
        message: field_as_string(object, "message").unwrap_or_default(),
        code: field_as_string(object, "code"),
        kind: field_as_string(object, "type"),
        param: field_as_string(object, "param"),
    };

    if parsed.message.is_empty() && parsed.code.is_none() && parsed.kind.is_none() {
        return None;
    }
    Some(parsed)
}

fn field_as_string(object: &Value, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a `Retry-After` value: delay seconds or an HTTP-date relative to `now`
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && (0.0..=u32::MAX as f64).contains(&seconds) {
            return Some(Duration::from_secs_f64(seconds));
        }
        return None;
    }

    let wait = parse_http_date(value)? - now;
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

/// HTTP-date in IMF-fixdate, RFC 850 or asctime form
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }

    const OBSOLETE_FORMATS: &[&str] = &["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"];
    OBSOLETE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

const MODEL_WORD_STOPLIST: &[&str] = &[
    "not", "does", "is", "was", "you", "the", "access", "has", "not_found", "name",
];

fn model_name_patterns() -> &'static [Option<Regex>; 3] {
    static PATTERNS: OnceLock<[Option<Regex>; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"`([^`]+)`").ok(),
            Regex::new(r"'([^'\s]+)'").ok(),
            Regex::new(r"(?i)\bmodel\s+([A-Za-z0-9][A-Za-z0-9._:/\-]*)").ok(),
        ]
    })
}

/// Pull a model name out of a provider message: a backtick span, a
/// single-quoted span, then a `model <identifier>` pattern.
pub fn extract_model_name(message: &str) -> Option<String> {
    let [backtick, single, model_word] = model_name_patterns();

    for re in [backtick, single].into_iter().flatten() {
        let found = re
            .captures(message)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|name| !name.is_empty());
        if found.is_some() {
            return found;
        }
    }

    model_word
        .as_ref()?
        .captures_iter(message)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end_matches(['.', ':']).to_string())
        .find(|name| !MODEL_WORD_STOPLIST.contains(&name.to_lowercase().as_str()))
}
