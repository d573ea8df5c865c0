//! Runtime `connect` / `disconnect` listeners.
//!
//! Unlike [`EventHandlers`](crate::EventHandlers), listeners can be attached
//! and detached at any time while the client runs.

use crate::error::LabLinkError;
use crate::event_handlers::DisconnectReason;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkEventKind {
    Connect,
    Disconnect,
}

impl FromStr for LinkEventKind {
    type Err = LabLinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connect" => Ok(LinkEventKind::Connect),
            "disconnect" => Ok(LinkEventKind::Disconnect),
            other => Err(LabLinkError::ConfigurationError(format!(
                "Unknown event kind '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for LinkEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEventKind::Connect => write!(f, "connect"),
            LinkEventKind::Disconnect => write!(f, "disconnect"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connect,
    Disconnect(DisconnectReason),
}

impl LinkEvent {
    pub fn kind(&self) -> LinkEventKind {
        match self {
            LinkEvent::Connect => LinkEventKind::Connect,
            LinkEvent::Disconnect(_) => LinkEventKind::Disconnect,
        }
    }
}

/// Handle returned by `on`, used with `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

pub type LinkListener = Arc<dyn Fn(&LinkEvent) + Send + Sync>;

pub(crate) struct Listeners {
    next_id: u64,
    entries: BTreeMap<ListenerId, (LinkEventKind, LinkListener)>,
}

impl Default for Listeners {
    fn default() -> Self {
        Self {
            next_id: 1,
            entries: BTreeMap::new(),
        }
    }
}

impl Listeners {
    pub(crate) fn add(&mut self, kind: LinkEventKind, listener: LinkListener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, (kind, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Listeners for `kind` in registration order, cloned so they can be
    /// called without holding the table.
    pub(crate) fn for_kind(&self, kind: LinkEventKind) -> Vec<LinkListener> {
        self.entries
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, listener)| listener.clone())
            .collect()
    }
}
