use ailimits_common::StatusKind;
use serde_json::Value;
use thiserror::Error;

use crate::model::decode::Loose;

/// Upstream bodies are truncated to this many bytes in error messages
pub const ERROR_BODY_LIMIT: usize = 200;

/// Why a provider could not produce usage data this cycle.
///
/// Never escapes the resolver boundary: the aggregator turns it into a
/// `ServiceStatus` with the message inline.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Missing credential, detected before any network call
    #[error("{0}")]
    Configuration(String),

    /// Connection, TLS or timeout failure
    #[error("API error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response
    #[error("HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    /// 401/403; the Claude resolver tries a token refresh before giving up
    #[error("HTTP {status}: {message}")]
    AuthExpired { status: u16, message: String },

    /// Body is not the JSON we can read
    #[error("Parse error: {0}")]
    Parse(String),

    /// Push source has nothing recent to show yet
    #[error("{0}")]
    AwaitingPush(String),
}

impl FetchError {
    /// Classify a non-2xx response, pulling a readable message out of the body
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = error_message(body);
        if status == 401 || status == 403 {
            FetchError::AuthExpired { status, message }
        } else {
            FetchError::Upstream { status, message }
        }
    }

    pub fn status_kind(&self) -> StatusKind {
        match self {
            FetchError::AwaitingPush(_) => StatusKind::Warning,
            _ => StatusKind::Error,
        }
    }

    /// Failures are cached for the TTL like successes; placeholders are not
    pub fn is_cacheable(&self) -> bool {
        !matches!(
            self,
            FetchError::Configuration(_) | FetchError::AwaitingPush(_)
        )
    }
}

/// Message from a provider error envelope, else the raw body; truncated either way
pub fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = envelope_message(&value) {
            return truncate_body(message).to_string();
        }
    }
    truncate_body(body).to_string()
}

/// `error.message`, `error`, `message` or `msg`, whichever is set first
pub fn envelope_message(value: &Value) -> Option<&str> {
    let root = Loose::new(value);
    [
        root.get("error").get("message").str(),
        root.get("error").str(),
        root.get("message").str(),
        root.get("msg").str(),
    ]
    .into_iter()
    .find(|m| !m.is_empty())
}

/// First [`ERROR_BODY_LIMIT`] bytes, cut back to a char boundary
pub fn truncate_body(body: &str) -> &str {
    if body.len() <= ERROR_BODY_LIMIT {
        return body;
    }
    let mut end = ERROR_BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_message_is_preferred() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        let err = FetchError::from_response(400, body);
        assert_eq!(err.to_string(), "HTTP 400: Incorrect API key provided");
        assert!(matches!(err, FetchError::Upstream { status: 400, .. }));
    }

    #[test]
    fn test_flat_message_fields() {
        assert_eq!(error_message(r#"{"msg":"token expired"}"#), "token expired");
        assert_eq!(error_message(r#"{"error":"invalid_grant"}"#), "invalid_grant");
    }

    #[test]
    fn test_long_envelope_message_is_truncated() {
        let body = serde_json::json!({ "error": { "message": "a".repeat(5000) } }).to_string();
        let err = FetchError::from_response(500, &body);
        let FetchError::Upstream { message, .. } = &err else {
            panic!("expected upstream error, got {:?}", err);
        };
        assert_eq!(message.len(), ERROR_BODY_LIMIT);

        let multibyte = serde_json::json!({ "msg": "é".repeat(150) }).to_string();
        assert_eq!(error_message(&multibyte).len(), 200);
    }

    #[test]
    fn test_auth_statuses_are_auth_expired() {
        assert!(matches!(
            FetchError::from_response(401, "nope"),
            FetchError::AuthExpired { status: 401, .. }
        ));
        assert!(matches!(
            FetchError::from_response(403, ""),
            FetchError::AuthExpired { status: 403, .. }
        ));
    }

    #[test]
    fn test_raw_body_is_truncated_on_char_boundary() {
        let body = "é".repeat(150); // 300 bytes
        let truncated = truncate_body(&body);
        assert!(truncated.len() <= ERROR_BODY_LIMIT);
        assert_eq!(truncated.len(), 200);

        let odd = format!("x{}", "é".repeat(150));
        assert_eq!(truncate_body(&odd).len(), 199);
        assert_eq!(error_message("<html>bad gateway</html>"), "<html>bad gateway</html>");
    }

    #[test]
    fn test_cacheability() {
        assert!(!FetchError::Configuration("API key not configured".into()).is_cacheable());
        assert!(!FetchError::AwaitingPush("waiting".into()).is_cacheable());
        assert!(FetchError::Parse("bad".into()).is_cacheable());
        assert_eq!(
            FetchError::AwaitingPush("waiting".into()).status_kind(),
            StatusKind::Warning
        );
    }
}
