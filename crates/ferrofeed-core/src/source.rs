//! Source configuration supplied by the host for each tracked source id.
//!
//! A [`SourceConfig`] is built by the configuration layer (or loaded from a
//! JSON file by the CLI) and handed to the engine unchanged. Keys use
//! camelCase on the wire:
//!
//! ```json
//! {
//!   "endpoint": "https://api.example.com/prices",
//!   "method": "GET",
//!   "authentication": { "type": "bearer", "token": "..." },
//!   "refreshIntervalMs": 5000,
//!   "financialDataPath": "Time Series (Daily)"
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;
use crate::http_client::{Authentication, HttpMethod, HttpRequest};

/// Wire variant used for a persistent socket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketKind {
    /// Plain WebSocket; each text frame is one JSON payload.
    #[serde(alias = "websocket")]
    Raw,
    /// Event-multiplexed framing (Socket.IO over Engine.IO v4).
    #[serde(alias = "socketio", alias = "socket.io")]
    Event,
}

impl SocketKind {
    /// Picks the variant for `url` when the config does not name one.
    pub fn for_url(url: &str) -> Self {
        let lowered = url.trim_start().to_ascii_lowercase();
        if lowered.starts_with("ws://") || lowered.starts_with("wss://") {
            Self::Raw
        } else {
            Self::Event
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "websocket",
            Self::Event => "socketio",
        }
    }
}

impl Display for SocketKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub endpoint: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub authentication: Authentication,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_type: Option<SocketKind>,
    /// Event name to listen for on event-multiplexed sockets; all events when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_event: Option<String>,
    /// Sent once after every successful socket open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe_message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financial_data_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl SourceConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: HttpMethod::Get,
            authentication: Authentication::None,
            headers: BTreeMap::new(),
            body: None,
            socket_url: None,
            socket_type: None,
            socket_event: None,
            subscribe_message: None,
            refresh_interval_ms: None,
            financial_data_path: None,
            timeout_ms: None,
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_authentication(mut self, authentication: Authentication) -> Self {
        self.authentication = authentication;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_socket_url(mut self, url: impl Into<String>) -> Self {
        self.socket_url = Some(url.into());
        self
    }

    pub fn with_socket_type(mut self, kind: SocketKind) -> Self {
        self.socket_type = Some(kind);
        self
    }

    pub fn with_socket_event(mut self, event: impl Into<String>) -> Self {
        self.socket_event = Some(event.into());
        self
    }

    pub fn with_subscribe_message(mut self, message: Value) -> Self {
        self.subscribe_message = Some(message);
        self
    }

    pub fn with_refresh_interval_ms(mut self, interval_ms: u64) -> Self {
        self.refresh_interval_ms = Some(interval_ms);
        self
    }

    pub fn with_financial_data_path(mut self, path: impl Into<String>) -> Self {
        self.financial_data_path = Some(path.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Positive polling interval, if one is configured.
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_ms
            .filter(|interval| *interval > 0)
            .map(Duration::from_millis)
    }

    pub fn socket_kind(&self) -> Option<SocketKind> {
        let url = self.socket_url.as_deref()?;
        Some(self.socket_type.unwrap_or_else(|| SocketKind::for_url(url)))
    }

    /// True when either a socket or a positive refresh interval is configured.
    pub fn supports_continuous_updates(&self) -> bool {
        self.socket_url.is_some() || self.refresh_interval().is_some()
    }

    /// Checks that the endpoint is an absolute http(s) URL.
    pub fn validate_endpoint(&self) -> Result<reqwest::Url, SyncError> {
        let url = reqwest::Url::parse(self.endpoint.trim())
            .map_err(|e| SyncError::malformed_endpoint(&self.endpoint, e.to_string()))?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(SyncError::malformed_endpoint(
                &self.endpoint,
                format!("unsupported scheme '{other}'"),
            )),
        }
    }

    /// Header set for a request or socket handshake: custom headers first,
    /// credentials applied last so they cannot be shadowed.
    pub fn request_headers(&self) -> BTreeMap<String, String> {
        let mut headers = self
            .headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
            .collect::<BTreeMap<_, _>>();
        self.authentication.apply(&mut headers);
        headers
    }

    pub fn to_http_request(&self, default_timeout: Duration) -> HttpRequest {
        let timeout_ms = self
            .timeout_ms
            .unwrap_or_else(|| u64::try_from(default_timeout.as_millis()).unwrap_or(u64::MAX));

        let mut request = HttpRequest::new(self.method, self.endpoint.trim())
            .with_timeout_ms(timeout_ms);
        request.headers = self.request_headers();

        if let Some(body) = &self.body {
            if !request.headers.contains_key("content-type") {
                request
                    .headers
                    .insert(String::from("content-type"), String::from("application/json"));
            }
            let rendered = match body {
                Value::String(raw) => raw.clone(),
                other => other.to_string(),
            };
            request = request.with_body(rendered);
        }

        request
    }
}
