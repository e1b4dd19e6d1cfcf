use std::time::Duration;

use thiserror::Error;

/// Coarse error classification used by consumers to pick UI treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    MalformedEndpoint,
    HttpStatus,
    Timeout,
    Transport,
    RateLimited,
    Parse,
    ReconnectExhausted,
    Socket,
    InvalidConfig,
}

/// Errors surfaced by the tester, the scheduler and the socket manager.
///
/// Everything that reaches a consumer callback is one of these; the `Display`
/// output is the short human-readable message, the fields carry the structure
/// (status code, wait time) needed for actionable feedback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("malformed URL '{url}': {reason}")]
    MalformedEndpoint { url: String, reason: String },

    #[error("HTTP {status} {reason}")]
    HttpStatus { status: u16, reason: String },

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("network error: {message}")]
    Transport { message: String },

    #[error("rate limited; retry in {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    #[error("failed to parse payload: {message}")]
    Parse { message: String },

    #[error("socket reconnection abandoned after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("socket error: {message}")]
    Socket { message: String },

    #[error("invalid source configuration: {message}")]
    InvalidConfig { message: String },
}

impl SyncError {
    pub fn malformed_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn socket(message: impl Into<String>) -> Self {
        Self::Socket {
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Builds an HTTP status failure, filling in the canonical reason phrase.
    ///
    /// The reason is the registered phrase for `status`, not the text the
    /// server put on its status line: reqwest does not expose that text and
    /// HTTP/2 responses carry none. Unregistered codes get `Unknown Status`.
    pub fn http_status(status: u16) -> Self {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or("Unknown Status");
        Self::HttpStatus {
            status,
            reason: reason.to_owned(),
        }
    }

    pub const fn kind(&self) -> SyncErrorKind {
        match self {
            Self::MalformedEndpoint { .. } => SyncErrorKind::MalformedEndpoint,
            Self::HttpStatus { .. } => SyncErrorKind::HttpStatus,
            Self::Timeout { .. } => SyncErrorKind::Timeout,
            Self::Transport { .. } => SyncErrorKind::Transport,
            Self::RateLimited { .. } => SyncErrorKind::RateLimited,
            Self::Parse { .. } => SyncErrorKind::Parse,
            Self::ReconnectExhausted { .. } => SyncErrorKind::ReconnectExhausted,
            Self::Socket { .. } => SyncErrorKind::Socket,
            Self::InvalidConfig { .. } => SyncErrorKind::InvalidConfig,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self.kind() {
            SyncErrorKind::MalformedEndpoint => "sync.malformed_endpoint",
            SyncErrorKind::HttpStatus => "sync.http_status",
            SyncErrorKind::Timeout => "sync.timeout",
            SyncErrorKind::Transport => "sync.transport",
            SyncErrorKind::RateLimited => "sync.rate_limited",
            SyncErrorKind::Parse => "sync.parse",
            SyncErrorKind::ReconnectExhausted => "sync.reconnect_exhausted",
            SyncErrorKind::Socket => "sync.socket",
            SyncErrorKind::InvalidConfig => "sync.invalid_config",
        }
    }

    /// Whether retrying the same request later can succeed.
    pub const fn retryable(&self) -> bool {
        match self {
            Self::MalformedEndpoint { .. }
            | Self::Parse { .. }
            | Self::ReconnectExhausted { .. }
            | Self::InvalidConfig { .. } => false,
            Self::HttpStatus { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            Self::Timeout { .. }
            | Self::Transport { .. }
            | Self::RateLimited { .. }
            | Self::Socket { .. } => true,
        }
    }

    /// Rate-limit errors are local and frequent; UIs usually mute them.
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
