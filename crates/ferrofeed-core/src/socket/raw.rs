//! Plain websocket transport over tokio-tungstenite.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::transport::{SocketConnection, SocketConnector, SocketTarget};
use crate::error::SyncError;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Builds the upgrade request with the source's headers attached.
pub(crate) fn handshake_request(
    url: &str,
    headers: &BTreeMap<String, String>,
) -> Result<Request, SyncError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| SyncError::invalid_config(format!("invalid socket URL '{url}': {e}")))?;

    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| SyncError::invalid_config(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| SyncError::invalid_config(format!("invalid value for header '{name}'")))?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

pub(crate) async fn open_stream(
    url: &str,
    headers: &BTreeMap<String, String>,
) -> Result<WsStream, SyncError> {
    let request = handshake_request(url, headers)?;
    let (stream, response) = connect_async(request)
        .await
        .map_err(|e| SyncError::socket(format!("connection to {url} failed: {e}")))?;
    tracing::debug!(url, status = response.status().as_u16(), "websocket handshake complete");
    Ok(stream)
}

pub(crate) async fn close_stream(stream: &mut WsStream) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: Cow::Borrowed(""),
    };
    if let Err(error) = stream.close(Some(frame)).await {
        tracing::debug!(%error, "websocket close handshake failed");
    }
}

/// Reads the next data frame as text. Control frames are answered by
/// tungstenite itself and skipped here.
pub(crate) async fn next_text(stream: &mut WsStream) -> Option<Result<String, SyncError>> {
    loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => return Some(Ok(text)),
            Ok(Message::Binary(bytes)) => {
                return Some(
                    String::from_utf8(bytes)
                        .map_err(|_| SyncError::socket("binary frame is not valid UTF-8")),
                )
            }
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
            Err(error) => return Some(Err(SyncError::socket(error.to_string()))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawSocketConnector;

impl SocketConnector for RawSocketConnector {
    fn connect<'a>(
        &'a self,
        target: &'a SocketTarget,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn SocketConnection>, SyncError>> + Send + 'a>>
    {
        Box::pin(async move {
            let stream = open_stream(&target.url, &target.headers).await?;
            Ok(Box::new(RawSocketConnection::new(stream)) as Box<dyn SocketConnection>)
        })
    }
}

pub struct RawSocketConnection {
    stream: WsStream,
    failed: bool,
}

impl RawSocketConnection {
    pub(crate) fn new(stream: WsStream) -> Self {
        Self {
            stream,
            failed: false,
        }
    }
}

impl SocketConnection for RawSocketConnection {
    fn send<'a>(
        &'a mut self,
        payload: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send + 'a>> {
        Box::pin(async move {
            let text = match payload {
                Value::String(raw) => raw.clone(),
                other => other.to_string(),
            };
            self.stream
                .send(Message::Text(text))
                .await
                .map_err(|e| SyncError::socket(format!("send failed: {e}")))
        })
    }

    fn next_message<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<String, SyncError>>> + Send + 'a>> {
        Box::pin(async move {
            // A read error leaves the stream unusable; report it once, then
            // surface the close.
            if self.failed {
                return None;
            }
            let next = next_text(&mut self.stream).await;
            if matches!(next, Some(Err(_))) {
                self.failed = true;
            }
            next
        })
    }

    fn close<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(close_stream(&mut self.stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_request_carries_headers() {
        let headers = BTreeMap::from([
            (String::from("authorization"), String::from("Bearer abc")),
            (String::from("x-api-key"), String::from("k")),
        ]);

        let request = handshake_request("wss://stream.example.com/ws", &headers).expect("valid request");

        assert_eq!(
            request.headers().get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer abc")
        );
        assert_eq!(request.uri().host(), Some("stream.example.com"));
    }

    #[test]
    fn invalid_socket_url_is_a_config_error() {
        let error = handshake_request("not a url", &BTreeMap::new()).expect_err("invalid url");
        assert_eq!(error.kind(), crate::error::SyncErrorKind::InvalidConfig);
    }
}
