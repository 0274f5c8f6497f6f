use std::fmt;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AccessDenied,
    InvalidInput,
    RateLimited,
    SafetyBlocked,
    MissingCredential,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::SafetyBlocked => "safety_blocked",
            ErrorKind::MissingCredential => "missing_credential",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Authentication-class failures stop the whole batch and invalidate the
    /// credential.
    pub fn aborts_batch(self) -> bool {
        matches!(self, ErrorKind::AccessDenied | ErrorKind::MissingCredential)
    }

    fn user_message(self) -> Option<&'static str> {
        match self {
            ErrorKind::AccessDenied => Some("Access denied. Check the API key."),
            ErrorKind::InvalidInput => Some("Image format not supported or too large."),
            ErrorKind::RateLimited => Some("Too many requests. Please pause briefly."),
            ErrorKind::SafetyBlocked => Some("Safety filter triggered. Please change the prompt."),
            ErrorKind::MissingCredential => Some("API key missing. Please connect a key."),
            ErrorKind::Unknown => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure as reported by the provider boundary.
///
/// Providers fill in whatever structure they have (HTTP status, API status
/// string); `message` is kept verbatim for the substring fallback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub http_status: Option<u16>,
    pub api_status: Option<String>,
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            http_status: None,
            api_status: None,
            message: message.into(),
        }
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_api_status(mut self, status: impl Into<String>) -> Self {
        self.api_status = Some(status.into());
        self
    }

    pub fn missing_credential() -> Self {
        Self::new("No API key configured").with_api_status("API_KEY_MISSING")
    }

    pub fn safety_blocked(reason: &str) -> Self {
        Self::new(format!("Request blocked by the safety filter ({reason})"))
            .with_api_status("SAFETY")
    }

    /// Builds an error from a non-success HTTP response, reading the
    /// `{"error": {"code", "status", "message"}}` envelope when present.
    pub fn from_response(http_status: u16, body: &str) -> Self {
        let envelope = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|parsed| parsed.get("error").cloned());
        let api_status = envelope
            .as_ref()
            .and_then(|error| error.get("status"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let message = envelope
            .as_ref()
            .and_then(|error| error.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("request failed ({http_status}): {}", body.trim()));
        Self {
            http_status: Some(http_status),
            api_status,
            message,
        }
    }
}

/// A classified failure, ready to be shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DispatchError {
    pub kind: ErrorKind,
    /// User-facing text.
    pub message: String,
    /// The provider's own wording, for logs.
    pub detail: String,
}

impl DispatchError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let message = match kind.user_message() {
            Some(text) => text.to_string(),
            None => unwrap_json_message(&detail),
        };
        Self {
            kind,
            message,
            detail,
        }
    }
}

impl From<ProviderError> for DispatchError {
    fn from(err: ProviderError) -> Self {
        classify(&err)
    }
}

pub fn classify(err: &ProviderError) -> DispatchError {
    let kind = structured_kind(err).unwrap_or_else(|| message_kind(&err.message));
    DispatchError::new(kind, err.message.clone())
}

fn structured_kind(err: &ProviderError) -> Option<ErrorKind> {
    let api_status = err.api_status.as_deref().map(str::to_ascii_uppercase);
    let api_is = |candidates: &[&str]| {
        api_status
            .as_deref()
            .is_some_and(|status| candidates.contains(&status))
    };
    let http_is = |candidates: &[u16]| err.http_status.is_some_and(|code| candidates.contains(&code));

    if http_is(&[401, 403]) || api_is(&["PERMISSION_DENIED", "UNAUTHENTICATED"]) {
        return Some(ErrorKind::AccessDenied);
    }
    if http_is(&[400, 413]) || api_is(&["INVALID_ARGUMENT"]) {
        return Some(ErrorKind::InvalidInput);
    }
    if http_is(&[429]) || api_is(&["RESOURCE_EXHAUSTED"]) {
        return Some(ErrorKind::RateLimited);
    }
    if api_is(&["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST"]) {
        return Some(ErrorKind::SafetyBlocked);
    }
    if api_is(&["API_KEY_MISSING"]) {
        return Some(ErrorKind::MissingCredential);
    }
    None
}

/// Last-resort classification on the message wording.
fn message_kind(raw: &str) -> ErrorKind {
    let message = unwrap_json_message(raw);
    let has = |needles: &[&str]| needles.iter().any(|needle| message.contains(needle));
    if has(&["403", "PERMISSION_DENIED"]) {
        ErrorKind::AccessDenied
    } else if has(&["400", "INVALID_ARGUMENT"]) {
        ErrorKind::InvalidInput
    } else if has(&["429", "RESOURCE_EXHAUSTED"]) {
        ErrorKind::RateLimited
    } else if has(&["SAFETY", "Safety", "Sicherheit"]) {
        ErrorKind::SafetyBlocked
    } else if has(&["API_KEY"]) {
        ErrorKind::MissingCredential
    } else {
        ErrorKind::Unknown
    }
}

fn unwrap_json_message(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "An unexpected error occurred.".to_string();
    }
    if trimmed.starts_with('{') {
        if let Some(message) = serde_json::from_str::<Value>(trimmed)
            .ok()
            .as_ref()
            .and_then(|parsed| parsed.get("error"))
            .and_then(|error| error.get("message"))
            .and_then(Value::as_str)
        {
            return message.to_string();
        }
    }
    trimmed.to_string()
}
