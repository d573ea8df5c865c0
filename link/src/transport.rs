//! Transport boundary between the client and the server.
//!
//! A transport owns the duplex channel. It accepts [`ClientMessage`]s through
//! [`Transport::send`] and reports everything that happens on the channel as
//! [`TransportEvent`]s on the unbounded receiver handed out at construction.
//! Implementations reconnect on their own; the client only reacts to the
//! `Connected`/`Disconnected` events.

pub mod memory;

pub use memory::MemoryTransport;

use crate::error::Result;
use crate::event_handlers::DisconnectReason;
use crate::models::{ClientMessage, ServerMessage};
use std::fmt;

/// Events emitted by a transport, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A (re)connection attempt started.
    Connecting,
    /// The channel is open and authenticated.
    Connected,
    /// The channel closed. The transport may reconnect later.
    Disconnected(DisconnectReason),
    /// A decoded server message.
    Message(ServerMessage),
}

/// Connection state as seen by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Duplex channel to the server.
pub trait Transport: Send + Sync + 'static {
    /// Queue a message for the server. Fire-and-forget: an `Ok` only means
    /// the message was accepted for sending.
    fn send(&self, message: ClientMessage) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Close the channel and stop reconnecting. Idempotent.
    fn close(&self);

    fn transport_type(&self) -> &'static str;
}
