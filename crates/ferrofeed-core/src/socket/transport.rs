use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::error::SyncError;
use crate::source::SourceConfig;

/// Everything a connector needs to open one socket.
#[derive(Clone, PartialEq, Eq)]
pub struct SocketTarget {
    pub url: String,
    /// Handshake headers, credentials included.
    pub headers: BTreeMap<String, String>,
    /// Event name filter for event-multiplexed sockets.
    pub event: Option<String>,
}

impl SocketTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            event: None,
        }
    }

    /// Builds the target from a source's socket settings; `None` when the
    /// source has no socket URL.
    pub fn from_source(config: &SourceConfig) -> Option<Self> {
        let url = config.socket_url.as_deref()?.trim();
        Some(Self {
            url: url.to_owned(),
            headers: config.request_headers(),
            event: config.socket_event.clone(),
        })
    }
}

// Header values may hold credentials; only names are printed.
impl std::fmt::Debug for SocketTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketTarget")
            .field("url", &self.url)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("event", &self.event)
            .finish()
    }
}

/// One live socket. Dropping it without [`close`](Self::close) abandons the
/// connection without a closing handshake.
pub trait SocketConnection: Send {
    fn send<'a>(
        &'a mut self,
        payload: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send + 'a>>;

    /// Next application payload. `None` once the peer has closed.
    fn next_message<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<String, SyncError>>> + Send + 'a>>;

    /// Closes with the normal-closure code.
    fn close<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Opens sockets of one wire variant.
pub trait SocketConnector: Send + Sync {
    fn connect<'a>(
        &'a self,
        target: &'a SocketTarget,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn SocketConnection>, SyncError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::Authentication;

    #[test]
    fn target_carries_auth_headers_and_event() {
        let config = SourceConfig::new("https://api.example.com")
            .with_socket_url(" wss://stream.example.com/ws ")
            .with_socket_event("ticker")
            .with_authentication(Authentication::Bearer {
                token: String::from("abc"),
            });

        let target = SocketTarget::from_source(&config).expect("socket configured");

        assert_eq!(target.url, "wss://stream.example.com/ws");
        assert_eq!(target.event.as_deref(), Some("ticker"));
        assert_eq!(
            target.headers.get("authorization").map(String::as_str),
            Some("Bearer abc")
        );
    }

    #[test]
    fn no_socket_url_yields_no_target() {
        assert!(SocketTarget::from_source(&SourceConfig::new("https://api.example.com")).is_none());
    }
}
