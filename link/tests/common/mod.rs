#![allow(dead_code)]

use lab_link::{
    ClientMessage, ConnectionError, EventHandlers, LabLinkClient, LabLinkTimeouts,
    MemoryTransport, Path, Query, ServerMessage, WatchNotification,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn q(value: Value) -> Query {
    Query::from_json(&value).expect("valid query")
}

pub fn p(keys: &[&str]) -> Path {
    Path::from(keys)
}

/// A client on a [`MemoryTransport`] plus a way to wait for the dispatcher.
pub struct Harness {
    pub client: LabLinkClient,
    pub transport: MemoryTransport,
    errors: mpsc::UnboundedReceiver<ConnectionError>,
    markers: AtomicU64,
}

impl Harness {
    pub async fn disconnected() -> Self {
        Self::with_request_timeout(500).await
    }

    pub async fn connected() -> Self {
        let harness = Self::disconnected().await;
        harness.transport.connect();
        harness.client.wait_for_connection(WAIT).await.expect("connected");
        harness
    }

    pub async fn with_request_timeout(request_timeout_ms: u64) -> Self {
        let (transport, events) = MemoryTransport::new();
        let (error_tx, errors) = mpsc::unbounded_channel();
        let handlers = EventHandlers::new().on_error(move |e| {
            let _ = error_tx.send(e);
        });
        let client = LabLinkClient::builder()
            .timeouts(LabLinkTimeouts::for_testing(request_timeout_ms))
            .event_handlers(handlers)
            .build_with_transport(transport.clone(), events)
            .expect("client");
        Self {
            client,
            transport,
            errors,
            markers: AtomicU64::new(0),
        }
    }

    /// Wait until every event injected so far has been dispatched.
    ///
    /// Events are handled in order, so once a marker `error` message comes
    /// back through `on_error` everything before it is done.
    pub async fn settle(&mut self) {
        let marker = format!("settle-{}", self.markers.fetch_add(1, Ordering::SeqCst));
        self.transport.deliver(ServerMessage::Error {
            message: marker.clone(),
        });
        loop {
            let error = timeout(WAIT, self.errors.recv())
                .await
                .expect("dispatcher stalled")
                .expect("error channel closed");
            if error.message == marker {
                return;
            }
        }
    }
}

/// Callback that forwards every notification to a channel.
pub fn recorder() -> (
    impl Fn(&WatchNotification) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<WatchNotification>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |n: &WatchNotification| {
            let _ = tx.send(n.clone());
        },
        rx,
    )
}

pub async fn next_notification(rx: &mut mpsc::UnboundedReceiver<WatchNotification>) -> WatchNotification {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("notification channel closed")
}

/// Paths of every `subscribe` message, one entry per message.
pub fn subscribes(sent: &[ClientMessage]) -> Vec<Vec<Path>> {
    sent.iter()
        .filter_map(|m| match m {
            ClientMessage::Subscribe { paths } => Some(paths.clone()),
            _ => None,
        })
        .collect()
}

/// Paths of every `unsubscribe` message, one entry per message.
pub fn unsubscribes(sent: &[ClientMessage]) -> Vec<Vec<Path>> {
    sent.iter()
        .filter_map(|m| match m {
            ClientMessage::Unsubscribe { paths } => Some(paths.clone()),
            _ => None,
        })
        .collect()
}

/// Wait for the next `get` the client sends and return its id, query and
/// session.
pub async fn next_get(transport: &MemoryTransport) -> (u64, Query, Option<String>) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let found = transport.take_sent().into_iter().find_map(|m| match m {
            ClientMessage::Get {
                request_id,
                query,
                session,
            } => Some((request_id, query, session)),
            _ => None,
        });
        if let Some(get) = found {
            return get;
        }
        assert!(tokio::time::Instant::now() < deadline, "no get request was sent");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
