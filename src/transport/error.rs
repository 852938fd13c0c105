//! Transport error types

use thiserror::Error;

/// Stream failure with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StreamError {
    pub kind: StreamErrorKind,
    pub message: String,
    /// HTTP status of the connection-open response, when there was one
    pub status: Option<u16>,
    /// Message the server meant for the user, if it sent one
    pub detail: Option<String>,
}

impl StreamError {
    pub fn new(kind: StreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            detail: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(StreamErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(StreamErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(StreamErrorKind::ServerError, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(StreamErrorKind::Rejected, message)
    }

    /// Terminal error event sent by the backend inside the stream
    pub fn backend(message: impl Into<String>) -> Self {
        let mut error = Self::new(StreamErrorKind::Backend, message);
        error.detail = Some(error.message.trim().to_string()).filter(|m| !m.is_empty());
        error
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(StreamErrorKind::Unknown, message)
    }

    /// Classify a non-2xx connection-open status.
    ///
    /// 4xx other than 429 is fatal; 429, 5xx and anything else is retriable.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = body.trim();
        let message = if detail.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {detail}")
        };
        let mut error = match status {
            429 => Self::rate_limit(message),
            400..=499 => Self::rejected(message),
            500..=599 => Self::server_error(message),
            _ => Self::network(message),
        };
        error.detail = body_detail(detail);
        error.with_status(status)
    }

    /// What to show the user for a failure that ends the answer
    pub fn user_message(&self) -> Option<&str> {
        match self.kind {
            StreamErrorKind::Backend | StreamErrorKind::Rejected => self.detail.as_deref(),
            _ => None,
        }
    }

    /// Convert a reqwest failure (connect, timeout, body read)
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::network(format!("Request timeout: {e}"))
        } else if e.is_connect() {
            Self::network(format!("Connection failed: {e}"))
        } else if e.is_body() || e.is_decode() || e.is_request() {
            Self::network(format!("Stream interrupted: {e}"))
        } else {
            Self::unknown(format!("Request failed: {e}"))
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// `detail`, `message` or `error` of a JSON body, else the plain text body.
/// Markup error pages yield nothing.
fn body_detail(body: &str) -> Option<String> {
    if body.is_empty() || body.starts_with('<') {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => ["detail", "message", "error"]
            .iter()
            .find_map(|key| map.get(*key).and_then(serde_json::Value::as_str))
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string),
        Ok(serde_json::Value::String(text)) => {
            Some(text.trim().to_string()).filter(|m| !m.is_empty())
        }
        Ok(_) => None,
        Err(_) => Some(body.to_string()),
    }
}

/// Error classification for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// Connection refused, reset, timed out - retryable
    Network,
    /// Rate limited (429) - retryable with backoff
    RateLimit,
    /// Server error (5xx) - retryable
    ServerError,
    /// Client error (4xx except 429) - not retryable
    Rejected,
    /// `error`/`fatalerror` event from the backend - not retryable
    Backend,
    /// Unknown error
    Unknown,
}

impl StreamErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::ServerError)
    }
}
