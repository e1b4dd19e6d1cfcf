//! Persistent socket transports with automatic reconnection.
//!
//! The reconnection logic lives once in [`state::SocketMachine`]; the wire
//! variants only implement [`SocketConnector`]/[`SocketConnection`].

pub mod event;
pub mod manager;
pub mod raw;
pub mod state;
pub mod transport;

pub use event::{engine_io_url, EventSocketConnection, EventSocketConnector};
pub use manager::SocketManager;
pub use raw::{RawSocketConnection, RawSocketConnector};
pub use state::{Effect, SocketEvent, SocketMachine, SocketState};
pub use transport::{SocketConnection, SocketConnector, SocketTarget};
