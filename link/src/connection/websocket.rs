//! Low-level WebSocket helpers used by the connection task.

use crate::error::{LabLinkError, Result};
use crate::event_handlers::EventHandlers;
use crate::models::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::{tungstenite::protocol::Message, MaybeTlsStream};
use url::Url;

pub(crate) type WebSocketStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Turn the configured base URL into the socket URL.
///
/// `http`/`https` map to `ws`/`wss`. When the base URL has no path of its
/// own, `ws_path` is used.
pub(crate) fn resolve_ws_url(base_url: &str, ws_path: &str) -> Result<String> {
    let base = Url::parse(base_url.trim()).map_err(|e| {
        LabLinkError::ConfigurationError(format!("Invalid base_url '{}': {}", base_url, e))
    })?;

    validate_ws_url(&base, "base_url")?;

    let ws_scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(LabLinkError::ConfigurationError(format!(
                "Unsupported base_url scheme '{}'; expected http(s) or ws(s)",
                other
            )));
        },
    };

    let mut ws_url = base.clone();
    ws_url.set_scheme(ws_scheme).map_err(|_| {
        LabLinkError::ConfigurationError("Failed to set WebSocket URL scheme".to_string())
    })?;

    let own_path = base.path().trim_end_matches('/').to_string();
    if own_path.is_empty() {
        let path = if ws_path.starts_with('/') {
            ws_path.to_string()
        } else {
            format!("/{}", ws_path)
        };
        ws_url.set_path(&path);
    } else {
        ws_url.set_path(&own_path);
    }

    Ok(ws_url.to_string())
}

fn validate_ws_url(url: &Url, context: &str) -> Result<()> {
    if url.host_str().is_none() {
        return Err(LabLinkError::ConfigurationError(format!("{} must include a host", context)));
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(LabLinkError::ConfigurationError(format!(
            "{} must not include username/password credentials",
            context
        )));
    }

    if url.query().is_some() || url.fragment().is_some() {
        return Err(LabLinkError::ConfigurationError(format!(
            "{} must not include query parameters or fragments",
            context
        )));
    }

    Ok(())
}

/// Serialize and send one message, reporting it to the `on_send` hook.
pub(crate) async fn send_message(
    ws: &mut WebSocketStream,
    message: &ClientMessage,
    event_handlers: &EventHandlers,
) -> Result<()> {
    let payload = serde_json::to_string(message).map_err(|e| {
        LabLinkError::SerializationError(format!("Failed to serialize {}: {}", message.kind(), e))
    })?;
    event_handlers.emit_send(&payload);
    ws.send(Message::Text(payload.into())).await.map_err(|e| {
        LabLinkError::WebSocketError(format!("Failed to send {}: {}", message.kind(), e))
    })
}

pub(crate) fn parse_server_message(text: &str) -> Result<ServerMessage> {
    serde_json::from_str(text).map_err(|e| {
        LabLinkError::SerializationError(format!("Malformed server message: {}", e))
    })
}

/// Send `authenticate` and wait for the server's verdict.
///
/// Pings are answered and unrelated frames ignored while waiting.
pub(crate) async fn send_auth_and_wait(
    ws: &mut WebSocketStream,
    token: &str,
    auth_timeout: Duration,
    event_handlers: &EventHandlers,
) -> Result<()> {
    let auth_message = ClientMessage::Authenticate {
        token: token.to_string(),
    };
    send_message(ws, &auth_message, event_handlers).await?;

    let deadline = TokioInstant::now() + auth_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(TokioInstant::now());
        if remaining.is_zero() {
            return Err(LabLinkError::TimeoutError(format!(
                "Authentication timeout ({:?})",
                auth_timeout
            )));
        }

        match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                event_handlers.emit_receive(&text);
                match parse_server_message(&text) {
                    Ok(ServerMessage::AuthSuccess { user }) => {
                        log::debug!("[lab-link] Authenticated as {:?}", user);
                        return Ok(());
                    },
                    Ok(ServerMessage::AuthError { message }) => {
                        return Err(LabLinkError::AuthenticationError(format!(
                            "WebSocket authentication failed: {}",
                            message
                        )));
                    },
                    Ok(_) => continue,
                    Err(e) => return Err(e),
                }
            },
            Ok(Some(Ok(Message::Ping(payload)))) => {
                let _ = ws.send(Message::Pong(payload)).await;
            },
            Ok(Some(Ok(Message::Pong(_) | Message::Binary(_) | Message::Frame(_)))) => {
                continue;
            },
            Ok(Some(Ok(Message::Close(_)))) => {
                return Err(LabLinkError::WebSocketError(
                    "Connection closed during authentication".to_string(),
                ));
            },
            Ok(Some(Err(e))) => {
                return Err(LabLinkError::WebSocketError(format!(
                    "WebSocket error during authentication: {}",
                    e
                )));
            },
            Ok(None) => {
                return Err(LabLinkError::WebSocketError(
                    "Connection closed before authentication completed".to_string(),
                ));
            },
            Err(_) => {
                return Err(LabLinkError::TimeoutError(format!(
                    "Authentication timeout ({:?})",
                    auth_timeout
                )));
            },
        }
    }
}

/// Spread keepalive pings of different clients by up to +/-20% of `base`.
///
/// The jitter is derived from `key`, so a client keeps its phase across
/// reconnects.
pub(crate) fn jitter_keepalive_interval(base: Duration, key: &str) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    if base_ms <= 1 {
        return base;
    }

    let jitter_span = (base_ms / 5).max(1);
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let hashed = hasher.finish();

    let offset = (hashed % (2 * jitter_span + 1)) as i64 - jitter_span as i64;
    let jittered_ms = if offset >= 0 {
        base_ms.saturating_add(offset as u64)
    } else {
        base_ms.saturating_sub(offset.unsigned_abs()).max(1)
    };

    Duration::from_millis(jittered_ms)
}
