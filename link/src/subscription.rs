//! Watch handles, callbacks and the registry that multiplexes them.

pub mod registry;

pub use registry::{SubscriptionDelta, SubscriptionRegistry};

use crate::path::Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Handle returned by `watch`. Never reused within one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchId(u64);

impl WatchId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

/// Delivered to a watch callback after a push touched its query.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchNotification {
    pub id: WatchId,
    /// Path the server pushed to.
    pub path: Path,
    /// Cache projected onto the watch's query, after the push was merged.
    pub value: Value,
}

/// Callback invoked once per overlapping push.
pub type WatchCallback = Arc<dyn Fn(&WatchNotification) + Send + Sync>;
