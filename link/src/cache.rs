//! Client-side mirror of the pushed state tree.

use crate::models::PushMode;
use crate::path::{self, Path};
use crate::query::Query;
use serde_json::{Map, Value};

/// The single merged tree of every fragment the client has received.
///
/// Entries are never evicted implicitly; use [`CacheStore::invalidate`] or
/// [`CacheStore::clear`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStore {
    root: Value,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a fragment at `path`. Nothing outside `path` changes.
    ///
    /// A path that indexes an array beyond its end (or with a non-numeric
    /// key) is dropped with a warning rather than reshaping the array.
    pub fn merge_push(&mut self, path: &Path, value: Value, mode: PushMode) {
        let landed = match mode {
            PushMode::Replace => path::merge(&mut self.root, path, value),
            PushMode::Merge => match path::entry(&mut self.root, path) {
                Some(slot) => {
                    path::deep_merge(slot, value);
                    true
                },
                None => false,
            },
        };
        if !landed {
            log::warn!("[lab-link] Ignoring push to {}: not a valid array position", path);
            return;
        }
        if !self.root.is_object() {
            // Only a root-level push can get here; keep the tree addressable.
            let scalar = std::mem::replace(&mut self.root, Value::Object(Map::new()));
            log::warn!("[lab-link] Ignoring non-object root fragment: {}", scalar);
        }
    }

    pub fn read(&self, path: &Path) -> Option<&Value> {
        path::read(&self.root, path)
    }

    /// Project the cache onto the shape of `query`.
    ///
    /// Node queries yield an object holding only the branches that are
    /// populated, which is an empty object when nothing matches. A leaf
    /// query yields the whole tree.
    pub fn project(&self, query: &Query) -> Value {
        match query {
            Query::Leaf => self.root.clone(),
            Query::Node(_) => {
                project_node(&self.root, query).unwrap_or_else(|| Value::Object(Map::new()))
            },
        }
    }

    /// Drop the cached node at `path`. Returns `true` if something was there.
    pub fn invalidate(&mut self, path: &Path) -> bool {
        path::remove(&mut self.root, path).is_some()
    }

    pub fn clear(&mut self) {
        self.root = Value::Object(Map::new());
    }

    pub fn is_empty(&self) -> bool {
        self.root.as_object().is_some_and(Map::is_empty)
    }

    pub fn root(&self) -> &Value {
        &self.root
    }
}

fn project_node(node: &Value, query: &Query) -> Option<Value> {
    match query {
        Query::Leaf => Some(node.clone()),
        Query::Node(children) => {
            let out: Map<String, Value> = children
                .iter()
                .filter_map(|(key, child_query)| {
                    let child = path::child(node, key)?;
                    project_node(child, child_query).map(|v| (key.clone(), v))
                })
                .collect();
            if out.is_empty() {
                None
            } else {
                Some(Value::Object(out))
            }
        },
    }
}
