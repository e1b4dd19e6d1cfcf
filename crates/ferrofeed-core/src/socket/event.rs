//! Event-multiplexed transport: Socket.IO v5 packets over an Engine.IO v4
//! websocket.
//!
//! Only the websocket transport is spoken (no long-polling upgrade). The
//! client waits for the Engine.IO open packet, joins the default namespace,
//! answers heartbeats, and yields the payload of every `EVENT` packet whose
//! name matches the configured filter.
//!
//! | Frame | Meaning |
//! |-------|---------|
//! | `0{...}` | engine open |
//! | `1` | engine close |
//! | `2` / `3` | ping / pong |
//! | `40` | namespace connect (and its ack) |
//! | `41` | namespace disconnect |
//! | `42[...]` | event |
//! | `44{...}` | namespace connect error |

use std::future::Future;
use std::pin::Pin;

use futures_util::SinkExt;
use reqwest::Url;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use super::raw::{close_stream, next_text, open_stream, WsStream};
use super::transport::{SocketConnection, SocketConnector, SocketTarget};
use crate::error::SyncError;

/// Event name used when a subscription payload is not already an
/// `[event, ...args]` array.
pub const SUBSCRIBE_EVENT: &str = "subscribe";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Packet {
    Open,
    Close,
    Ping,
    Pong,
    Connected,
    Disconnected,
    Event { name: String, payload: Value },
    ConnectError(String),
    Other,
}

pub(crate) fn decode_packet(frame: &str) -> Packet {
    let mut chars = frame.chars();
    match chars.next() {
        Some('0') => Packet::Open,
        Some('1') => Packet::Close,
        Some('2') => Packet::Ping,
        Some('3') => Packet::Pong,
        Some('4') => decode_socket_packet(chars.as_str()),
        _ => Packet::Other,
    }
}

fn decode_socket_packet(body: &str) -> Packet {
    let mut chars = body.chars();
    match chars.next() {
        Some('0') => Packet::Connected,
        Some('1') => Packet::Disconnected,
        Some('2') => decode_event(chars.as_str()),
        Some('4') => Packet::ConnectError(strip_namespace(chars.as_str()).to_owned()),
        _ => Packet::Other,
    }
}

// Event bodies may be prefixed by a namespace (`/ns,`) and an ack id.
fn decode_event(body: &str) -> Packet {
    let Some(start) = body.find('[') else {
        return Packet::Other;
    };
    let Ok(Value::Array(mut items)) = serde_json::from_str::<Value>(&body[start..]) else {
        return Packet::Other;
    };
    if items.is_empty() {
        return Packet::Other;
    }
    let Value::String(name) = items.remove(0) else {
        return Packet::Other;
    };
    let payload = if items.is_empty() {
        Value::Null
    } else {
        items.remove(0)
    };
    Packet::Event { name, payload }
}

fn strip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        body.split_once(',').map_or("", |(_, rest)| rest)
    } else {
        body
    }
}

/// Rewrites a server URL into the Engine.IO websocket endpoint.
///
/// `https://host` becomes `wss://host/socket.io/?EIO=4&transport=websocket`;
/// an explicit path other than `/` is kept.
pub fn engine_io_url(url: &str) -> Result<String, SyncError> {
    let mut parsed = Url::parse(url.trim())
        .map_err(|e| SyncError::invalid_config(format!("invalid socket URL '{url}': {e}")))?;

    let scheme = match parsed.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SyncError::invalid_config(format!(
                "unsupported socket scheme '{other}'"
            )))
        }
    };
    parsed
        .set_scheme(scheme)
        .map_err(|()| SyncError::invalid_config(format!("cannot use scheme '{scheme}' for '{url}'")))?;

    if parsed.path().is_empty() || parsed.path() == "/" {
        parsed.set_path("/socket.io/");
    }
    parsed
        .query_pairs_mut()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");

    Ok(parsed.to_string())
}

/// Encodes an outgoing subscription as an event packet.
pub(crate) fn encode_emit(payload: &Value) -> String {
    match payload {
        Value::Array(items) if matches!(items.first(), Some(Value::String(_))) => {
            format!("42{payload}")
        }
        other => format!("42{}", Value::Array(vec![Value::from(SUBSCRIBE_EVENT), other.clone()])),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EventSocketConnector;

impl SocketConnector for EventSocketConnector {
    fn connect<'a>(
        &'a self,
        target: &'a SocketTarget,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn SocketConnection>, SyncError>> + Send + 'a>>
    {
        Box::pin(async move {
            let url = engine_io_url(&target.url)?;
            let stream = open_stream(&url, &target.headers).await?;
            let mut connection = EventSocketConnection {
                stream,
                event: target.event.clone(),
                closed: false,
            };
            connection.join_namespace().await?;
            Ok(Box::new(connection) as Box<dyn SocketConnection>)
        })
    }
}

pub struct EventSocketConnection {
    stream: WsStream,
    event: Option<String>,
    closed: bool,
}

impl EventSocketConnection {
    async fn send_frame(&mut self, frame: String) -> Result<(), SyncError> {
        self.stream
            .send(Message::Text(frame))
            .await
            .map_err(|e| SyncError::socket(format!("send failed: {e}")))
    }

    async fn join_namespace(&mut self) -> Result<(), SyncError> {
        let mut joined = false;
        loop {
            let frame = match next_text(&mut self.stream).await {
                Some(frame) => frame?,
                None => return Err(SyncError::socket("closed during handshake")),
            };
            match decode_packet(&frame) {
                Packet::Open if !joined => {
                    self.send_frame(String::from("40")).await?;
                    joined = true;
                }
                Packet::Ping => self.send_frame(String::from("3")).await?,
                Packet::Connected if joined => return Ok(()),
                Packet::ConnectError(reason) => {
                    return Err(SyncError::socket(format!("namespace rejected: {reason}")))
                }
                Packet::Close | Packet::Disconnected => {
                    return Err(SyncError::socket("closed during handshake"))
                }
                _ => {}
            }
        }
    }

    fn wants(&self, name: &str) -> bool {
        self.event.as_deref().map_or(true, |wanted| wanted == name)
    }
}

impl SocketConnection for EventSocketConnection {
    fn send<'a>(
        &'a mut self,
        payload: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send + 'a>> {
        Box::pin(async move { self.send_frame(encode_emit(payload)).await })
    }

    fn next_message<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<String, SyncError>>> + Send + 'a>> {
        Box::pin(async move {
            loop {
                if self.closed {
                    return None;
                }
                let frame = match next_text(&mut self.stream).await? {
                    Ok(frame) => frame,
                    Err(error) => {
                        self.closed = true;
                        return Some(Err(error));
                    }
                };
                match decode_packet(&frame) {
                    Packet::Ping => {
                        if let Err(error) = self.send_frame(String::from("3")).await {
                            return Some(Err(error));
                        }
                    }
                    Packet::Event { name, payload } if self.wants(&name) => {
                        return Some(Ok(payload.to_string()));
                    }
                    Packet::ConnectError(reason) => {
                        return Some(Err(SyncError::socket(format!("namespace error: {reason}"))));
                    }
                    Packet::Close | Packet::Disconnected => {
                        self.closed = true;
                        return None;
                    }
                    _ => {}
                }
            }
        })
    }

    fn close<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if !self.closed {
                let _ = self.send_frame(String::from("41")).await;
                self.closed = true;
            }
            close_stream(&mut self.stream).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_engine_and_socket_packets() {
        assert_eq!(decode_packet(r#"0{"sid":"abc","pingInterval":25000}"#), Packet::Open);
        assert_eq!(decode_packet("2"), Packet::Ping);
        assert_eq!(decode_packet(r#"40{"sid":"xyz"}"#), Packet::Connected);
        assert_eq!(decode_packet("41"), Packet::Disconnected);
        assert_eq!(
            decode_packet(r#"44{"message":"unauthorized"}"#),
            Packet::ConnectError(String::from(r#"{"message":"unauthorized"}"#))
        );
    }

    #[test]
    fn decodes_event_with_namespace_and_ack_id() {
        assert_eq!(
            decode_packet(r#"42/feed,17["ticker",{"p":1.5}]"#),
            Packet::Event {
                name: String::from("ticker"),
                payload: json!({"p": 1.5})
            }
        );
        assert_eq!(
            decode_packet(r#"42["heartbeat"]"#),
            Packet::Event {
                name: String::from("heartbeat"),
                payload: Value::Null
            }
        );
        assert_eq!(decode_packet("42[1,2]"), Packet::Other);
    }

    #[test]
    fn rewrites_server_url_to_engine_io_endpoint() {
        assert_eq!(
            engine_io_url("https://stream.example.com").expect("valid"),
            "wss://stream.example.com/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            engine_io_url("http://localhost:3000/live/?token=t").expect("valid"),
            "ws://localhost:3000/live/?token=t&EIO=4&transport=websocket"
        );
        assert!(engine_io_url("ftp://example.com").is_err());
    }

    #[test]
    fn subscription_payloads_become_event_packets() {
        assert_eq!(encode_emit(&json!(["join", "BTC-USD"])), r#"42["join","BTC-USD"]"#);
        assert_eq!(encode_emit(&json!({"symbol": "BTC"})), r#"42["subscribe",{"symbol":"BTC"}]"#);
    }
}
