//! WebSocket transport.
//!
//! - [`websocket`]: URL resolution, the authenticate handshake, frame
//!   encoding and keepalive jitter
//! - [`shared`]: [`WsTransport`], one socket owned by a background task that
//!   reconnects with exponential backoff

pub mod shared;
pub mod websocket;

pub use shared::WsTransport;
pub(crate) use websocket::{
    jitter_keepalive_interval, parse_server_message, resolve_ws_url, send_auth_and_wait,
    send_message, WebSocketStream,
};

/// Maximum accepted text frame (16 MiB).
pub(crate) const MAX_WS_TEXT_MESSAGE_BYTES: usize = 16 << 20;

/// A duration far enough in the future (~100 years) to act as "never" for
/// deadline calculations without overflowing `Instant::now() + dur`.
pub(crate) const FAR_FUTURE: std::time::Duration =
    std::time::Duration::from_secs(100 * 365 * 24 * 3600);
