//! # lab-link
//!
//! Real-time state synchronization client for the laboratory dashboard.
//!
//! The server holds one large state tree describing every instrument. Pages
//! use [`LabLinkClient`] to watch narrow paths of that tree, read them from a
//! local cache and fetch them on demand, all over a single socket.
//!
//! ## Features
//!
//! - **Multiplexed watches**: any number of watches share one connection;
//!   the server only ever sees the minimal set of covering paths
//! - **Path-scoped cache**: pushes merge into a local mirror that
//!   [`LabLinkClient::get_cached`] reads synchronously
//! - **Reconnection**: exponential backoff, and the live watch set is
//!   re-subscribed in one message after every reconnect
//! - **Pluggable transport**: [`WsTransport`] for production,
//!   [`MemoryTransport`] for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lab_link::{LabLinkClient, LinkEventKind, Query};
//!
//! # async fn example() -> lab_link::Result<()> {
//! let client = LabLinkClient::builder()
//!     .base_url("http://localhost:8080")
//!     .build()?;
//!
//! let params: Query = r#"{"meta": {"sources": {"42": {"params": 0}}}}"#.parse()?;
//!
//! let reader = client.clone();
//! let query = params.clone();
//! client.watch(params.clone(), move |_| {
//!     let latest = reader.get_cached(&query);
//!     println!("source 42 params: {}", latest);
//! });
//!
//! client.on(LinkEventKind::Disconnect, |event| println!("offline: {:?}", event));
//!
//! // One-shot authoritative read; the answer is written into the cache.
//! let now = client.fetch(&params).await?;
//! println!("{}", now);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_handlers;
pub mod events;
pub mod models;
pub mod path;
pub mod query;
pub mod subscription;
pub mod timeouts;
pub mod transport;

pub use auth::AuthProvider;
pub use cache::CacheStore;
pub use client::{LabLinkClient, LabLinkClientBuilder};
pub use config::LinkConfig;
pub use connection::WsTransport;
pub use error::{LabLinkError, Result};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
pub use events::{LinkEvent, LinkEventKind, ListenerId};
pub use models::{
    ClientMessage, ConnectionOptions, PushMode, RequestContext, ServerMessage, WatchInfo,
};
pub use path::Path;
pub use query::Query;
pub use subscription::{WatchCallback, WatchId, WatchNotification};
pub use timeouts::{LabLinkTimeouts, LabLinkTimeoutsBuilder};
pub use transport::{ConnectionState, MemoryTransport, Transport, TransportEvent};
