//! Live watches and the server-visible subscription set.
//!
//! Every watch contributes the flattened paths of its query. The set
//! actually subscribed on the server is kept equal to the minimal union of
//! those paths: [`SubscriptionRegistry::reconcile`] computes what has to be
//! subscribed and unsubscribed to get there.

use super::{WatchCallback, WatchId};
use crate::models::{ClientMessage, WatchInfo};
use crate::path::{minimal_union, Path};
use crate::query::Query;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in millis since Unix epoch.
#[inline]
fn now_ms() -> u64 {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) struct WatchEntry {
    pub(crate) query: Query,
    pub(crate) paths: Vec<Path>,
    pub(crate) callback: WatchCallback,
    created_at_ms: u64,
    last_event_time_ms: Option<u64>,
    notify_count: u64,
}

/// Changes needed to bring the server set in line with the live watches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDelta {
    pub subscribe: Vec<Path>,
    pub unsubscribe: Vec<Path>,
}

impl SubscriptionDelta {
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Wire messages for this delta. The subscribe always goes first so a
    /// path is never left uncovered between the two.
    pub fn into_messages(self) -> Vec<ClientMessage> {
        let mut messages = Vec::with_capacity(2);
        if !self.subscribe.is_empty() {
            messages.push(ClientMessage::Subscribe {
                paths: self.subscribe,
            });
        }
        if !self.unsubscribe.is_empty() {
            messages.push(ClientMessage::Unsubscribe {
                paths: self.unsubscribe,
            });
        }
        messages
    }
}

pub struct SubscriptionRegistry {
    next_id: u64,
    entries: BTreeMap<WatchId, WatchEntry>,
    server_paths: BTreeSet<Path>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self {
            next_id: 1,
            entries: BTreeMap::new(),
            server_paths: BTreeSet::new(),
        }
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watch and hand out a fresh handle.
    pub fn insert(&mut self, query: Query, callback: WatchCallback) -> WatchId {
        let id = WatchId(self.next_id);
        self.next_id += 1;
        let paths = query.paths();
        self.entries.insert(
            id,
            WatchEntry {
                query,
                paths,
                callback,
                created_at_ms: now_ms(),
                last_event_time_ms: None,
                notify_count: 0,
            },
        );
        id
    }

    /// Drop a watch. Unknown handles return `false`.
    pub fn remove(&mut self, id: WatchId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn contains(&self, id: WatchId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn get(&self, id: WatchId) -> Option<&WatchEntry> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Minimal union of the paths of every live watch.
    pub fn target_paths(&self) -> BTreeSet<Path> {
        minimal_union(self.entries.values().flat_map(|e| e.paths.iter().cloned()))
    }

    /// Paths the server is believed to be pushing.
    pub fn server_paths(&self) -> &BTreeSet<Path> {
        &self.server_paths
    }

    /// Forget the server set; called when the connection is lost.
    pub fn reset_server_paths(&mut self) {
        self.server_paths.clear();
    }

    /// Compute the delta towards [`target_paths`](Self::target_paths) and
    /// record the target as the new server set.
    pub fn reconcile(&mut self) -> SubscriptionDelta {
        let target = self.target_paths();
        let delta = SubscriptionDelta {
            subscribe: target.difference(&self.server_paths).cloned().collect(),
            unsubscribe: self.server_paths.difference(&target).cloned().collect(),
        };
        self.server_paths = target;
        delta
    }

    /// `true` when a push at `path` can affect some live watch.
    pub fn is_interested(&self, path: &Path) -> bool {
        self.entries
            .values()
            .any(|e| e.paths.iter().any(|p| p.overlaps(path)))
    }

    /// Handles of every watch with a path overlapping `path`, each once, in
    /// registration order.
    pub fn matching(&self, path: &Path) -> Vec<WatchId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.paths.iter().any(|p| p.overlaps(path)))
            .map(|(id, _)| *id)
            .collect()
    }

    pub(crate) fn mark_notified(&mut self, id: WatchId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.last_event_time_ms = Some(now_ms());
            entry.notify_count += 1;
        }
    }

    /// Snapshot of every live watch.
    pub fn snapshot(&self) -> Vec<WatchInfo> {
        self.entries
            .iter()
            .map(|(id, entry)| WatchInfo {
                id: id.as_u64(),
                query: entry.query.clone(),
                paths: entry.paths.clone(),
                created_at_ms: entry.created_at_ms,
                last_event_time_ms: entry.last_event_time_ms,
                notify_count: entry.notify_count,
            })
            .collect()
    }
}
