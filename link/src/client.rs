//! The synchronization client.
//!
//! [`LabLinkClient`] ties a [`Transport`] to the watch registry and the
//! cache. One dispatcher task per client consumes transport events in
//! arrival order; registry, cache and in-flight requests sit behind a single
//! lock that is never held while user callbacks run.

use crate::{
    auth::AuthProvider,
    cache::CacheStore,
    connection::{WsTransport, FAR_FUTURE},
    error::{LabLinkError, Result},
    event_handlers::{ConnectionError, DisconnectReason, EventHandlers},
    events::{LinkEvent, LinkEventKind, ListenerId, Listeners},
    models::{ClientMessage, ConnectionOptions, RequestContext, ServerMessage, WatchInfo},
    path::{self, Path},
    query::Query,
    subscription::{SubscriptionRegistry, WatchId, WatchNotification},
    timeouts::LabLinkTimeouts,
    transport::{ConnectionState, Transport, TransportEvent},
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant as TokioInstant;

/// Real-time view onto the server's state tree.
///
/// Cheap to clone; all clones share one connection, one cache and one set of
/// watches. Dropping the last clone closes the transport.
///
/// # Examples
///
/// ```rust,no_run
/// use lab_link::{LabLinkClient, Query};
///
/// # async fn example() -> lab_link::Result<()> {
/// let client = LabLinkClient::builder()
///     .base_url("http://localhost:8080")
///     .build()?;
///
/// let query: Query = r#"{"meta": {"sources": {"42": {"params": 0}}}}"#.parse()?;
/// let id = client.watch(query.clone(), |change| {
///     println!("{} changed: {}", change.path, change.value);
/// });
///
/// let current = client.fetch(&query).await?;
/// println!("now: {}", current);
///
/// client.unwatch(id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LabLinkClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Box<dyn Transport>,
    state: Mutex<SyncState>,
    listeners: Mutex<Listeners>,
    connection: watch::Sender<ConnectionState>,
    event_handlers: EventHandlers,
    timeouts: LabLinkTimeouts,
    next_request_id: AtomicU64,
    shut_down: AtomicBool,
}

/// Everything guarded by the client lock.
struct SyncState {
    connection: ConnectionState,
    registry: SubscriptionRegistry,
    cache: CacheStore,
    pending: HashMap<u64, PendingGet>,
}

/// An in-flight `get`, answered from the dispatcher.
struct PendingGet {
    tx: oneshot::Sender<Result<Value>>,
    query: Query,
    use_cache: bool,
}

type WatchTarget = (WatchId, crate::subscription::WatchCallback, Value);

impl LabLinkClient {
    pub fn builder() -> LabLinkClientBuilder {
        LabLinkClientBuilder::new()
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Fetch the data selected by `query` from the server.
    ///
    /// Never answers from cache. Waits for the connection if needed; the
    /// whole call is bounded by [`LabLinkTimeouts::request_timeout`]. With
    /// `use_cache`, every queried path of the answer is written into the
    /// cache (without notifying watchers) in arrival order with pushes, so a
    /// push received after the answer always wins.
    pub async fn get(
        &self,
        query: &Query,
        use_cache: bool,
        ctx: Option<&RequestContext>,
    ) -> Result<Value> {
        let timeout = self.inner.timeouts.request_timeout;
        let deadline = TokioInstant::now()
            + if LabLinkTimeouts::is_no_timeout(timeout) {
                FAR_FUTURE
            } else {
                timeout
            };

        self.wait_for_state_until(ConnectionState::Connected, deadline)
            .await
            .map_err(|_| {
                LabLinkError::TimeoutError(format!("not connected within {:?}", timeout))
            })?;

        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            if state.connection != ConnectionState::Connected {
                return Err(LabLinkError::ConnectionLost(
                    "Connection dropped before the request was sent".to_string(),
                ));
            }
            state.pending.insert(
                request_id,
                PendingGet {
                    tx,
                    query: query.clone(),
                    use_cache,
                },
            );
            let message = ClientMessage::Get {
                request_id,
                query: query.clone(),
                session: ctx.and_then(|c| c.session.clone()),
            };
            if let Err(e) = self.inner.transport.send(message) {
                // The socket dropped before the Disconnected event got here.
                state.pending.remove(&request_id);
                return Err(LabLinkError::ConnectionLost(format!(
                    "get #{} could not be sent: {}",
                    request_id, e
                )));
            }
        }
        log::debug!("[lab-link] get #{} sent", request_id);

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LabLinkError::ConnectionLost("Client shut down".to_string())),
            Err(_) => {
                self.inner.state.lock().pending.remove(&request_id);
                Err(LabLinkError::TimeoutError(format!(
                    "get #{} got no answer within {:?}",
                    request_id, timeout
                )))
            },
        }
    }

    /// [`get`](Self::get) with the cache written through and no context.
    pub async fn fetch(&self, query: &Query) -> Result<Value> {
        self.get(query, true, None).await
    }

    /// Project the cache onto `query`. Never touches the network.
    ///
    /// Returns an empty object when nothing under the query is cached yet.
    pub fn get_cached(&self, query: &Query) -> Value {
        self.inner.state.lock().cache.project(query)
    }

    // ── Watches ─────────────────────────────────────────────────────────

    /// Start watching `query`. `callback` runs once for every push that
    /// overlaps it, never during this call.
    ///
    /// While connected, any part of the query the server is not already
    /// pushing is subscribed right away; otherwise the watch is sent with
    /// the next (re)connection.
    pub fn watch<F>(&self, query: Query, callback: F) -> WatchId
    where
        F: Fn(&WatchNotification) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        let id = state.registry.insert(query, Arc::new(callback));
        if state.connection == ConnectionState::Connected {
            self.inner.sync_server_set(&mut state);
        }
        log::debug!("[lab-link] {} registered ({} live)", id, state.registry.len());
        id
    }

    /// Stop a watch. Unknown or already removed handles are ignored.
    pub fn unwatch(&self, id: WatchId) {
        let mut state = self.inner.state.lock();
        if !state.registry.remove(id) {
            log::debug!("[lab-link] unwatch of unknown {}", id);
            return;
        }
        if state.connection == ConnectionState::Connected {
            self.inner.sync_server_set(&mut state);
        }
        log::debug!("[lab-link] {} removed ({} live)", id, state.registry.len());
    }

    /// Snapshot of every live watch.
    pub fn subscriptions(&self) -> Vec<WatchInfo> {
        self.inner.state.lock().registry.snapshot()
    }

    /// Paths the server is currently pushing to this client.
    pub fn server_paths(&self) -> Vec<Path> {
        self.inner.state.lock().registry.server_paths().iter().cloned().collect()
    }

    // ── Cache ───────────────────────────────────────────────────────────

    /// Drop the cached node at `path`. Returns `true` if something was there.
    pub fn invalidate(&self, path: &Path) -> bool {
        self.inner.state.lock().cache.invalidate(path)
    }

    pub fn clear_cache(&self) {
        self.inner.state.lock().cache.clear();
    }

    // ── Connection ──────────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connection == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.connection.borrow()
    }

    /// Register a `connect` or `disconnect` listener.
    pub fn on<F>(&self, kind: LinkEventKind, listener: F) -> ListenerId
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.lock().add(kind, Arc::new(listener))
    }

    /// Remove a listener. Returns `false` for unknown handles.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.listeners.lock().remove(id)
    }

    /// Wait until the connection reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState, timeout: Duration) -> Result<()> {
        self.wait_for_state_until(state, TokioInstant::now() + timeout).await
    }

    pub async fn wait_for_connection(&self, timeout: Duration) -> Result<()> {
        self.wait_for_state(ConnectionState::Connected, timeout).await
    }

    async fn wait_for_state_until(
        &self,
        state: ConnectionState,
        deadline: TokioInstant,
    ) -> Result<()> {
        let mut rx = self.inner.connection.subscribe();
        let result = match tokio::time::timeout_at(deadline, rx.wait_for(|s| *s == state)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(LabLinkError::InternalError("Connection state channel closed".into())),
            Err(_) => Err(LabLinkError::TimeoutError(format!("waiting for state '{}'", state))),
        };
        result
    }

    /// Close the transport, fail in-flight requests and stop dispatching
    /// events. Watches and cache stay readable.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("[lab-link] Shutting down");
        self.inner.transport.close();
        let pending = {
            let mut state = self.inner.state.lock();
            state.connection = ConnectionState::Disconnected;
            state.registry.reset_server_paths();
            std::mem::take(&mut state.pending)
        };
        self.inner.connection.send_replace(ConnectionState::Disconnected);
        for (_, pending) in pending {
            let _ = pending.tx.send(Err(LabLinkError::ConnectionLost("Client shut down".to_string())));
        }
    }

    pub fn timeouts(&self) -> &LabLinkTimeouts {
        &self.inner.timeouts
    }

    pub fn transport_type(&self) -> &'static str {
        self.inner.transport.transport_type()
    }
}

impl ClientInner {
    /// Bring the server set in line with the live watches. Caller holds the
    /// lock, which keeps these messages ordered with any other sync.
    fn sync_server_set(&self, state: &mut SyncState) {
        let delta = state.registry.reconcile();
        for message in delta.into_messages() {
            if let Err(e) = self.transport.send(message) {
                // The pending Disconnected event resets the server set.
                log::warn!("[lab-link] Failed to sync subscriptions: {}", e);
            }
        }
    }

    fn handle_event(&self, event: TransportEvent) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        match event {
            TransportEvent::Connecting => {
                self.state.lock().connection = ConnectionState::Connecting;
                self.connection.send_replace(ConnectionState::Connecting);
            },
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Disconnected(reason) => self.on_disconnected(reason),
            TransportEvent::Message(message) => self.on_message(message),
        }
    }

    fn on_connected(&self) {
        let replayed = {
            let mut state = self.state.lock();
            state.connection = ConnectionState::Connected;
            state.registry.reset_server_paths();
            self.sync_server_set(&mut state);
            state.registry.server_paths().len()
        };
        self.connection.send_replace(ConnectionState::Connected);
        log::info!("[lab-link] Connected ({} path(s) subscribed)", replayed);

        self.event_handlers.emit_connect();
        self.emit_event(LinkEvent::Connect);
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        let (was_connected, pending) = {
            let mut state = self.state.lock();
            let was_connected = state.connection == ConnectionState::Connected;
            state.connection = ConnectionState::Disconnected;
            state.registry.reset_server_paths();
            (was_connected, std::mem::take(&mut state.pending))
        };
        self.connection.send_replace(ConnectionState::Disconnected);

        for (_, pending) in pending {
            let _ = pending.tx.send(Err(LabLinkError::ConnectionLost(reason.to_string())));
        }
        if was_connected {
            log::info!("[lab-link] Disconnected: {}", reason);
            self.event_handlers.emit_disconnect(reason.clone());
            self.emit_event(LinkEvent::Disconnect(reason));
        }
    }

    fn on_message(&self, message: ServerMessage) {
        match message {
            ServerMessage::Push { path, value, mode } => {
                let targets: Vec<WatchTarget> = {
                    let mut state = self.state.lock();
                    if !state.registry.is_interested(&path) {
                        log::debug!("[lab-link] Ignoring push for {} (no live watch)", path);
                        return;
                    }
                    state.cache.merge_push(&path, value, mode);
                    let ids = state.registry.matching(&path);
                    for id in &ids {
                        state.registry.mark_notified(*id);
                    }
                    ids.into_iter()
                        .filter_map(|id| {
                            let entry = state.registry.get(id)?;
                            Some((id, entry.callback.clone(), state.cache.project(&entry.query)))
                        })
                        .collect()
                };
                self.notify(&path, targets);
            },
            ServerMessage::GetResult { request_id, value } => {
                self.resolve_request(request_id, Ok(value));
            },
            ServerMessage::GetError {
                request_id,
                code,
                message,
            } => {
                self.resolve_request(request_id, Err(LabLinkError::RequestRejected { code, message }));
            },
            ServerMessage::Error { message } => {
                log::warn!("[lab-link] Server error: {}", message);
                self.event_handlers.emit_error(ConnectionError::new(message, true));
            },
            ServerMessage::AuthError { message } => {
                log::warn!("[lab-link] Unexpected auth error: {}", message);
                self.event_handlers.emit_error(ConnectionError::new(message, false));
            },
            ServerMessage::AuthSuccess { .. } => {
                log::debug!("[lab-link] Ignoring auth_success outside handshake");
            },
        }
    }

    fn notify(&self, path: &Path, targets: Vec<WatchTarget>) {
        for (id, callback, value) in targets {
            // An earlier callback may have removed this watch.
            if !self.state.lock().registry.contains(id) {
                continue;
            }
            let notification = WatchNotification {
                id,
                path: path.clone(),
                value,
            };
            if catch_unwind(AssertUnwindSafe(|| callback(&notification))).is_err() {
                log::error!("[lab-link] Callback of {} panicked on push to {}", id, path);
            }
        }
    }

    /// Hand an answer to its caller. The cache write-through happens here,
    /// under the lock, so it is ordered with the pushes around it.
    fn resolve_request(&self, request_id: u64, result: Result<Value>) {
        let pending = {
            let mut state = self.state.lock();
            let Some(pending) = state.pending.remove(&request_id) else {
                log::debug!("[lab-link] Late answer for get #{} dropped", request_id);
                return;
            };
            match &result {
                Ok(value) if pending.use_cache => {
                    write_through(&mut state.cache, &pending.query, value);
                },
                _ => {},
            }
            pending
        };
        let _ = pending.tx.send(result);
    }

    fn emit_event(&self, event: LinkEvent) {
        let listeners = self.listeners.lock().for_kind(event.kind());
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                log::error!("[lab-link] '{}' listener panicked", event.kind());
            }
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.transport.close();
    }
}

fn write_through(cache: &mut CacheStore, query: &Query, value: &Value) {
    for path in query.paths() {
        if let Some(fragment) = path::read(value, &path) {
            cache.merge_push(&path, fragment.clone(), Default::default());
        }
    }
}

async fn run_dispatcher(inner: Weak<ClientInner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_event(event);
    }
    log::debug!("[lab-link] Event dispatcher stopped");
}

/// Builder for configuring [`LabLinkClient`] instances.
pub struct LabLinkClientBuilder {
    base_url: Option<String>,
    auth: AuthProvider,
    timeouts: LabLinkTimeouts,
    connection_options: ConnectionOptions,
    event_handlers: EventHandlers,
}

impl LabLinkClientBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            auth: AuthProvider::none(),
            timeouts: LabLinkTimeouts::default(),
            connection_options: ConnectionOptions::default(),
            event_handlers: EventHandlers::default(),
        }
    }

    /// Server address, `http(s)://` or `ws(s)://`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn auth(mut self, auth: AuthProvider) -> Self {
        self.auth = auth;
        self
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthProvider::bearer_token(token);
        self
    }

    /// ```rust,no_run
    /// use lab_link::{LabLinkClient, LabLinkTimeouts};
    ///
    /// # async fn example() -> lab_link::Result<()> {
    /// let client = LabLinkClient::builder()
    ///     .base_url("http://localhost:8080")
    ///     .timeouts(LabLinkTimeouts::fast())
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn timeouts(mut self, timeouts: LabLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = options;
        self
    }

    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Build a client on a [`WsTransport`]. Must run inside a tokio runtime;
    /// the socket opens in the background.
    pub fn build(self) -> Result<LabLinkClient> {
        let base_url = self
            .base_url
            .clone()
            .ok_or_else(|| LabLinkError::ConfigurationError("base_url is required".into()))?;

        let (transport, events) = WsTransport::connect(
            &base_url,
            self.auth.clone(),
            self.timeouts.clone(),
            self.connection_options.clone(),
            self.event_handlers.clone(),
        )?;
        log::debug!("[lab-link] Client for {}", transport.url());
        self.build_with_transport(transport, events)
    }

    /// Build a client on any transport, e.g. a
    /// [`MemoryTransport`](crate::MemoryTransport). `base_url`, `auth` and
    /// connection options are ignored.
    pub fn build_with_transport<T: Transport>(
        self,
        transport: T,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Result<LabLinkClient> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            LabLinkError::ConfigurationError(
                "LabLinkClient must be built inside a tokio runtime".to_string(),
            )
        })?;

        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Arc::new(ClientInner {
            transport: Box::new(transport),
            state: Mutex::new(SyncState {
                connection: ConnectionState::Disconnected,
                registry: SubscriptionRegistry::new(),
                cache: CacheStore::new(),
                pending: HashMap::new(),
            }),
            listeners: Mutex::new(Listeners::default()),
            connection,
            event_handlers: self.event_handlers,
            timeouts: self.timeouts,
            next_request_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        });

        runtime.spawn(run_dispatcher(Arc::downgrade(&inner), events));
        Ok(LabLinkClient { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    #[tokio::test]
    async fn test_builder_pattern() {
        let result = LabLinkClient::builder()
            .base_url("http://localhost:8080")
            .bearer_token("test_token")
            .timeouts(LabLinkTimeouts::for_testing(100))
            .connection_options(ConnectionOptions::new().with_auto_reconnect(false))
            .build();

        let client = result.unwrap();
        assert_eq!(client.transport_type(), "websocket");
        assert!(!client.is_connected());
        client.shutdown();
    }

    #[test]
    fn test_builder_missing_url() {
        let result = LabLinkClient::builder().build();
        assert!(matches!(result, Err(LabLinkError::ConfigurationError(_))));
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let (transport, events) = MemoryTransport::new();
        let result = LabLinkClient::builder().build_with_transport(transport, events);
        assert!(matches!(result, Err(LabLinkError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn test_state_follows_transport() {
        let (transport, events) = MemoryTransport::new();
        let client = LabLinkClient::builder()
            .build_with_transport(transport.clone(), events)
            .unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        transport.connect();
        client.wait_for_connection(Duration::from_secs(2)).await.unwrap();
        assert!(client.is_connected());

        transport.disconnect("cable pulled");
        client
            .wait_for_state(ConnectionState::Disconnected, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_drop_closes_transport() {
        let (transport, events) = MemoryTransport::new();
        let client = LabLinkClient::builder()
            .build_with_transport(transport.clone(), events)
            .unwrap();
        let clone = client.clone();
        drop(client);
        assert!(!transport.is_closed(), "a clone is still alive");
        drop(clone);
        assert!(transport.is_closed());
    }
}
