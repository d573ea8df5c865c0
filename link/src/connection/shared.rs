//! Single WebSocket owned by a background task.
//!
//! [`WsTransport`] is the handle; `connection_task` owns the socket. The
//! task keeps the socket alive with pings, reconnects with exponential
//! backoff after a drop, and reports everything as [`TransportEvent`]s.
//! It does not know about subscriptions: replaying them after a reconnect is
//! the client's job.

use super::{
    jitter_keepalive_interval, parse_server_message, resolve_ws_url, send_auth_and_wait,
    send_message, WebSocketStream, FAR_FUTURE, MAX_WS_TEXT_MESSAGE_BYTES,
};
use crate::auth::AuthProvider;
use crate::error::{LabLinkError, Result};
use crate::event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
use crate::models::{ClientMessage, ConnectionOptions};
use crate::timeouts::LabLinkTimeouts;
use crate::transport::{Transport, TransportEvent};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest, error::Error as WsError, protocol::Message,
};

/// Commands sent from the handle to the background connection task.
enum ConnCmd {
    Send(ClientMessage),
    Shutdown,
}

/// Everything the connection task needs to (re)open the socket.
struct ConnectionSettings {
    url: String,
    auth: AuthProvider,
    timeouts: LabLinkTimeouts,
    options: ConnectionOptions,
    event_handlers: EventHandlers,
}

/// WebSocket implementation of [`Transport`].
pub struct WsTransport {
    cmd_tx: mpsc::UnboundedSender<ConnCmd>,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
    url: String,
    _task: JoinHandle<()>,
}

impl WsTransport {
    /// Resolve the socket URL and start connecting in the background.
    ///
    /// Must be called from within a tokio runtime. Returns the transport and
    /// the receiver its events are delivered to.
    pub fn connect(
        base_url: &str,
        auth: AuthProvider,
        timeouts: LabLinkTimeouts,
        options: ConnectionOptions,
        event_handlers: EventHandlers,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        let url = resolve_ws_url(base_url, &options.ws_path)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            LabLinkError::ConfigurationError(
                "WsTransport must be created inside a tokio runtime".to_string(),
            )
        })?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let settings = ConnectionSettings {
            url: url.clone(),
            auth,
            timeouts,
            options,
            event_handlers,
        };
        let task = runtime.spawn(connection_task(cmd_rx, settings, connected.clone(), event_tx));

        Ok((
            Self {
                cmd_tx,
                connected,
                closed: AtomicBool::new(false),
                url,
                _task: task,
            },
            event_rx,
        ))
    }

    /// The resolved `ws://` / `wss://` URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for WsTransport {
    fn send(&self, message: ClientMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LabLinkError::NotConnected("Transport closed".to_string()));
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(LabLinkError::NotConnected(format!(
                "Cannot send {} while disconnected",
                message.kind()
            )));
        }
        self.cmd_tx.send(ConnCmd::Send(message)).map_err(|_| {
            LabLinkError::WebSocketError("Connection task is not running".to_string())
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.cmd_tx.send(ConnCmd::Shutdown);
        }
    }

    fn transport_type(&self) -> &'static str {
        "websocket"
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Background connection task ──────────────────────────────────────────────

async fn establish_ws(settings: &ConnectionSettings) -> Result<WebSocketStream> {
    log::debug!("[lab-link] Establishing WebSocket connection to {}", settings.url);

    let mut request = settings.url.as_str().into_client_request().map_err(|e| {
        LabLinkError::WebSocketError(format!("Failed to build WebSocket request: {}", e))
    })?;
    settings.auth.apply_to_ws_request(&mut request)?;

    let timeouts = &settings.timeouts;
    let connect_result = if !LabLinkTimeouts::is_no_timeout(timeouts.connection_timeout) {
        tokio::time::timeout(timeouts.connection_timeout, tokio_tungstenite::connect_async(request))
            .await
    } else {
        Ok(tokio_tungstenite::connect_async(request).await)
    };

    let handlers = &settings.event_handlers;
    let mut ws_stream = match connect_result {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(WsError::Http(response))) => {
            let message = match response.status().as_u16() {
                401 => "Unauthorized: socket requires valid credentials".to_string(),
                403 => "Forbidden: access to socket denied".to_string(),
                code => format!("WebSocket HTTP error: {}", code),
            };
            handlers.emit_error(ConnectionError::new(&message, false));
            return Err(LabLinkError::WebSocketError(message));
        },
        Ok(Err(e)) => {
            let msg = format!("Connection failed: {}", e);
            handlers.emit_error(ConnectionError::new(&msg, true));
            return Err(LabLinkError::WebSocketError(msg));
        },
        Err(_) => {
            let msg = format!("Connection timeout ({:?})", timeouts.connection_timeout);
            handlers.emit_error(ConnectionError::new(&msg, true));
            return Err(LabLinkError::TimeoutError(msg));
        },
    };

    if let Some(token) = settings.auth.token() {
        if let Err(e) = send_auth_and_wait(&mut ws_stream, token, timeouts.auth_timeout, handlers).await
        {
            let recoverable = !matches!(e, LabLinkError::AuthenticationError(_));
            handlers.emit_error(ConnectionError::new(e.to_string(), recoverable));
            let _ = ws_stream.close(None).await;
            return Err(e);
        }
        log::info!("[lab-link] WebSocket authenticated successfully");
    }

    Ok(ws_stream)
}

fn report_lost(
    connected: &AtomicBool,
    event_tx: &mpsc::UnboundedSender<TransportEvent>,
    reason: DisconnectReason,
) {
    log::warn!("[lab-link] Connection lost: {}", reason);
    connected.store(false, Ordering::SeqCst);
    let _ = event_tx.send(TransportEvent::Disconnected(reason));
}

/// Drain commands until shutdown. Messages cannot be delivered meanwhile.
async fn wait_for_shutdown(cmd_rx: &mut mpsc::UnboundedReceiver<ConnCmd>) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            ConnCmd::Send(message) => {
                log::debug!("[lab-link] Dropping {} while disconnected", message.kind());
            },
            ConnCmd::Shutdown => return,
        }
    }
}

async fn connection_task(
    mut cmd_rx: mpsc::UnboundedReceiver<ConnCmd>,
    settings: ConnectionSettings,
    connected: Arc<AtomicBool>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let options = &settings.options;
    let handlers = &settings.event_handlers;
    let mut ws_stream: Option<WebSocketStream> = None;
    let mut attempt: u32 = 0;
    let mut first_attempt = true;

    let has_keepalive = !settings.timeouts.keepalive_interval.is_zero();
    let keepalive_dur = if has_keepalive {
        jitter_keepalive_interval(settings.timeouts.keepalive_interval, &settings.url)
    } else {
        FAR_FUTURE
    };
    let mut idle_deadline = TokioInstant::now() + keepalive_dur;

    let pong_timeout_dur = settings.timeouts.pong_timeout;
    let has_pong_timeout = has_keepalive && !pong_timeout_dur.is_zero();
    let mut awaiting_pong = false;
    let mut pong_deadline = TokioInstant::now() + FAR_FUTURE;

    loop {
        if let Some(ref mut ws) = ws_stream {
            let idle_sleep = tokio::time::sleep_until(idle_deadline);
            tokio::pin!(idle_sleep);

            let pong_sleep = tokio::time::sleep_until(pong_deadline);
            tokio::pin!(pong_sleep);

            tokio::select! {
                biased;

                _ = &mut pong_sleep, if has_pong_timeout && awaiting_pong => {
                    report_lost(&connected, &event_tx, DisconnectReason::new(format!(
                        "Pong timeout ({:?}), server unresponsive",
                        pong_timeout_dur,
                    )));
                    awaiting_pong = false;
                    ws_stream = None;
                    continue;
                }

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ConnCmd::Send(message)) => {
                            if let Err(e) = send_message(ws, &message, handlers).await {
                                handlers.emit_error(ConnectionError::new(e.to_string(), true));
                                report_lost(&connected, &event_tx, DisconnectReason::new(e.to_string()));
                                ws_stream = None;
                                continue;
                            }
                        },
                        Some(ConnCmd::Shutdown) | None => {
                            let _ = ws.close(None).await;
                            if connected.swap(false, Ordering::SeqCst) {
                                let _ = event_tx.send(TransportEvent::Disconnected(
                                    DisconnectReason::with_code("Client closed", 1000),
                                ));
                            }
                            log::debug!("[lab-link] Connection task stopped");
                            return;
                        },
                    }
                }

                _ = &mut idle_sleep, if has_keepalive && !awaiting_pong => {
                    if let Err(e) = ws.send(Message::Ping(Bytes::new())).await {
                        report_lost(&connected, &event_tx, DisconnectReason::new(format!(
                            "Keepalive ping failed: {}", e
                        )));
                        ws_stream = None;
                        continue;
                    }
                    handlers.emit_send("[ping]");
                    if has_pong_timeout {
                        awaiting_pong = true;
                        pong_deadline = TokioInstant::now() + pong_timeout_dur;
                    }
                    idle_deadline = TokioInstant::now() + keepalive_dur;
                }

                frame = ws.next() => {
                    idle_deadline = TokioInstant::now() + keepalive_dur;
                    if awaiting_pong {
                        awaiting_pong = false;
                        pong_deadline = TokioInstant::now() + FAR_FUTURE;
                    }

                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if text.len() > MAX_WS_TEXT_MESSAGE_BYTES {
                                log::warn!("[lab-link] Text message too large ({} bytes)", text.len());
                                continue;
                            }
                            handlers.emit_receive(&text);
                            match parse_server_message(&text) {
                                Ok(message) => {
                                    let _ = event_tx.send(TransportEvent::Message(message));
                                },
                                Err(e) => log::warn!("[lab-link] Dropping frame: {}", e),
                            }
                        },
                        Some(Ok(Message::Binary(data))) => {
                            match std::str::from_utf8(&data).map(parse_server_message) {
                                Ok(Ok(message)) => {
                                    let _ = event_tx.send(TransportEvent::Message(message));
                                },
                                Ok(Err(e)) => log::warn!("[lab-link] Dropping binary frame: {}", e),
                                Err(e) => log::warn!("[lab-link] Dropping non UTF-8 binary frame: {}", e),
                            }
                        },
                        Some(Ok(Message::Close(frame))) => {
                            let reason = match frame {
                                Some(f) => DisconnectReason::with_code(f.reason.to_string(), f.code.into()),
                                None => DisconnectReason::new("Server closed connection"),
                            };
                            report_lost(&connected, &event_tx, reason);
                            ws_stream = None;
                            continue;
                        },
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws.send(Message::Pong(payload)).await;
                        },
                        Some(Ok(Message::Pong(_))) => {
                            log::debug!("[lab-link] Keepalive: received Pong");
                        },
                        Some(Ok(Message::Frame(_))) => {},
                        Some(Err(e)) => {
                            let msg = e.to_string();
                            handlers.emit_error(ConnectionError::new(&msg, true));
                            report_lost(&connected, &event_tx, DisconnectReason::new(format!(
                                "WebSocket error: {}", msg
                            )));
                            ws_stream = None;
                            continue;
                        },
                        None => {
                            report_lost(&connected, &event_tx, DisconnectReason::new("WebSocket stream ended"));
                            ws_stream = None;
                            continue;
                        },
                    }
                }
            }
        } else {
            // ── Not connected: connect, back off, or give up ────────────
            if !first_attempt {
                if !options.auto_reconnect {
                    log::info!("[lab-link] Auto-reconnect disabled, staying disconnected");
                    let _ = event_tx.send(TransportEvent::Disconnected(DisconnectReason::new(
                        "Disconnected (auto-reconnect disabled)",
                    )));
                    wait_for_shutdown(&mut cmd_rx).await;
                    return;
                }

                if let Some(max) = options.max_reconnect_attempts {
                    if attempt >= max {
                        let msg = format!("Max reconnection attempts ({}) reached", max);
                        log::warn!("[lab-link] {}", msg);
                        handlers.emit_error(ConnectionError::new(&msg, false));
                        let _ = event_tx.send(TransportEvent::Disconnected(DisconnectReason::new(msg)));
                        wait_for_shutdown(&mut cmd_rx).await;
                        return;
                    }
                }

                let delay = options.reconnect_delay_for(attempt);
                attempt += 1;
                log::info!("[lab-link] Attempting reconnection in {}ms (attempt {})", delay, attempt);

                let sleep_fut = tokio::time::sleep(Duration::from_millis(delay));
                tokio::pin!(sleep_fut);
                tokio::select! {
                    _ = &mut sleep_fut => {},
                    _ = wait_for_shutdown(&mut cmd_rx) => return,
                }
            }
            first_attempt = false;

            let _ = event_tx.send(TransportEvent::Connecting);
            let result = tokio::select! {
                result = establish_ws(&settings) => result,
                _ = wait_for_shutdown(&mut cmd_rx) => return,
            };

            match result {
                Ok(stream) => {
                    if attempt > 0 {
                        log::info!("[lab-link] Reconnection successful after {} attempt(s)", attempt);
                    }
                    attempt = 0;
                    connected.store(true, Ordering::SeqCst);
                    let _ = event_tx.send(TransportEvent::Connected);
                    ws_stream = Some(stream);
                    idle_deadline = TokioInstant::now() + keepalive_dur;
                    awaiting_pong = false;
                    pong_deadline = TokioInstant::now() + FAR_FUTURE;
                },
                Err(e) => {
                    log::warn!("[lab-link] Connection attempt failed: {}", e);
                },
            }
        }
    }
}
