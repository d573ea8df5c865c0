//! Subscription metadata exposed to callers.
//!
//! [`WatchInfo`] is a read-only snapshot of a live watch, handy for tests and
//! diagnostics pages.

use serde::{Deserialize, Serialize};

use crate::path::Path;
use crate::query::Query;

/// Read-only snapshot of a live watch.
///
/// Returned by [`LabLinkClient::subscriptions()`](crate::LabLinkClient::subscriptions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchInfo {
    /// Handle returned by `watch`.
    pub id: u64,
    /// The query this watch is tracking.
    pub query: Query,
    /// Marker-leaf paths of the query.
    pub paths: Vec<Path>,
    /// Timestamp (millis since Unix epoch) when the watch was created.
    pub created_at_ms: u64,
    /// Timestamp (millis since Unix epoch) of the last notification,
    /// or `None` if none has been delivered yet.
    pub last_event_time_ms: Option<u64>,
    /// Number of notifications delivered so far.
    pub notify_count: u64,
}
