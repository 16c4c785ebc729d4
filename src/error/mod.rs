//! Error taxonomy shared by every provider
//!
//! Raw failures come in as [`TransportError`] (network or HTTP) and are mapped
//! onto the closed [`ChatError`] set by [`map_error`]. Only `ChatError` crosses
//! into the orchestrator.

mod mapper;

pub use mapper::{extract_model_name, map_error, map_http_failure, parse_retry_after};

use std::time::Duration;
use thiserror::Error;

/// A failed HTTP exchange: status, response headers and a bounded body prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpFailure {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Raw failure reported by the transport layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request cancelled")]
    Cancelled,

    #[error("not connected: {0}")]
    NotConnected(String),

    #[error("network connection lost: {0}")]
    ConnectionDropped(String),

    #[error("request timed out")]
    TimedOut,

    #[error("HTTP status {}", .0.status)]
    Http(HttpFailure),

    #[error("transport error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::TimedOut
        } else if err.is_connect() {
            TransportError::NotConnected(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::ConnectionDropped(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Every way a chat request can fail, as seen by callers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("cancelled")]
    Cancelled,

    #[error("network unavailable")]
    NetworkUnavailable,

    #[error("timed out")]
    TimedOut,

    #[error("connection lost")]
    ConnectionLost,

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("billing issue: {0}")]
    BillingIssue(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("server error ({0})")]
    ServerError(u16),

    #[error("bad request ({0})")]
    BadRequest(u16),

    #[error("model not found: {}", .0.as_deref().unwrap_or("unknown"))]
    ModelNotFound(Option<String>),

    #[error("model access denied: {}", .0.as_deref().unwrap_or("unknown"))]
    ModelAccessDenied(Option<String>),

    #[error("context length exceeded")]
    ContextLengthExceeded,

    #[error("content filtered: {0}")]
    ContentFiltered(String),

    #[error("response format invalid")]
    ResponseFormatInvalid,

    #[error("provider error{}: {message}", .code.as_ref().map(|c| format!(" [{}]", c)).unwrap_or_default())]
    ProviderError {
        code: Option<String>,
        message: String,
    },
}

impl ChatError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChatError::Cancelled)
    }

    /// Canned text shown to the user for this error
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Cancelled => "Generation stopped.".to_string(),
            ChatError::NetworkUnavailable => {
                "Network unavailable. Check your connection.".to_string()
            }
            ChatError::TimedOut => "The request timed out. Please try again later.".to_string(),
            ChatError::ConnectionLost => "The connection was interrupted. Please retry.".to_string(),
            ChatError::RateLimited { retry_after } => match retry_after {
                Some(wait) if wait.as_secs() > 0 => {
                    format!("Too many requests. Retry in {} seconds.", wait.as_secs())
                }
                _ => "Too many requests (rate limited). Please retry later.".to_string(),
            },
            ChatError::QuotaExceeded => {
                "The quota for this API key is used up. Check your plan or usage.".to_string()
            }
            ChatError::BillingIssue(message) => non_empty_or(
                message,
                "The account has a billing problem. Check your balance.",
            ),
            ChatError::Unauthorized | ChatError::InvalidApiKey => {
                "The API key is invalid or expired. Update it in the settings.".to_string()
            }
            ChatError::Forbidden => "No permission to access this model or endpoint.".to_string(),
            ChatError::ServerError(status) => {
                format!("Service error ({}). Please retry later.", status)
            }
            ChatError::BadRequest(_) => {
                "Invalid request parameters. Check the model settings.".to_string()
            }
            ChatError::ModelNotFound(model) => match model {
                Some(name) => format!("Model `{}` does not exist or is unavailable.", name),
                None => "The requested model does not exist or is unavailable.".to_string(),
            },
            ChatError::ModelAccessDenied(model) => match model {
                Some(name) => format!("This API key has no access to model `{}`.", name),
                None => "This API key has no access to the requested model.".to_string(),
            },
            ChatError::ContextLengthExceeded => {
                "The conversation is too long for this model. Start a new conversation or shorten the input."
                    .to_string()
            }
            ChatError::ContentFiltered(message) => non_empty_or(
                message,
                "The request was blocked by the content safety policy.",
            ),
            ChatError::ResponseFormatInvalid => {
                "Failed to parse the response (incompatible protocol).".to_string()
            }
            ChatError::ProviderError { message, .. } => {
                non_empty_or(message, "The service returned an error.")
            }
        }
    }
}

impl From<TransportError> for ChatError {
    fn from(err: TransportError) -> Self {
        map_error(&err)
    }
}

fn non_empty_or(message: &str, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_message_shows_countdown() {
        let err = ChatError::RateLimited {
            retry_after: Some(Duration::from_secs(12)),
        };
        assert_eq!(err.user_message(), "Too many requests. Retry in 12 seconds.");

        let err = ChatError::RateLimited { retry_after: None };
        assert!(err.user_message().contains("rate limited"));
    }

    #[test]
    fn test_provider_text_forwarded_with_fallback() {
        let err = ChatError::BillingIssue("Arrearage: account overdue".to_string());
        assert_eq!(err.user_message(), "Arrearage: account overdue");

        let err = ChatError::ContentFiltered(String::new());
        assert!(err.user_message().contains("content safety"));

        let err = ChatError::ProviderError {
            code: None,
            message: "  ".to_string(),
        };
        assert_eq!(err.user_message(), "The service returned an error.");
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let failure = HttpFailure::new(429).with_header("retry-after", "5");
        assert_eq!(failure.header("Retry-After"), Some("5"));
        assert_eq!(failure.header("content-type"), None);
    }

    #[test]
    fn test_provider_error_display() {
        let err = ChatError::ProviderError {
            code: Some("E42".to_string()),
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "provider error [E42]: boom");
    }
}
