//! Path addressing over the server state tree.
//!
//! A [`Path`] names one node of the nested JSON state tree by its ordered
//! keys. The free functions in this module read, write and detach nodes at a
//! path, and turn a [`Query`] into the set of paths it denotes.
//!
//! All readers treat a missing intermediate node as "not there yet" rather
//! than as an error: pages routinely read before the first push arrives.

use crate::query::Query;
use serde::{Deserialize, Serialize};
use serde_json::{map::Entry, Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Ordered sequence of keys identifying one node in the state tree.
///
/// The empty path is the root of the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<String>);

impl Path {
    /// The root path (addresses the whole tree).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from any sequence of keys.
    ///
    /// ```rust
    /// use lab_link::Path;
    ///
    /// let path = Path::new(["meta", "sources", "42", "params"]);
    /// assert_eq!(path.len(), 4);
    /// ```
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    pub fn keys(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Return a new path one level deeper.
    pub fn child(&self, key: impl Into<String>) -> Path {
        let mut keys = self.0.clone();
        keys.push(key.into());
        Path(keys)
    }

    /// `true` when `self` equals `other` or is an ancestor of it.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// `true` when one path is a prefix of the other, i.e. a change at one
    /// of them can affect data under the other.
    pub fn overlaps(&self, other: &Path) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for key in &self.0 {
            write!(f, "/{}", key)?;
        }
        Ok(())
    }
}

impl From<Vec<String>> for Path {
    fn from(keys: Vec<String>) -> Self {
        Self(keys)
    }
}

impl From<&[&str]> for Path {
    fn from(keys: &[&str]) -> Self {
        Self::new(keys.iter().copied())
    }
}

/// Read the value at `path`, or `None` if any node along the way is absent.
///
/// Objects are walked by key; arrays are walked when the key is a decimal
/// index. Scalars in the middle of the path yield `None`.
pub fn read<'a>(tree: &'a Value, path: &Path) -> Option<&'a Value> {
    path.keys().iter().try_fold(tree, |node, key| child(node, key))
}

/// One step of [`read`].
pub(crate) fn child<'a>(node: &'a Value, key: &str) -> Option<&'a Value> {
    match node {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Write `value` at `path`, creating intermediate objects as needed.
///
/// Whatever sat at `path` before is replaced; siblings are left alone. A
/// scalar found on the way is replaced by an object so the write can land.
/// Arrays are only indexed in range or extended by one element at their end;
/// any other key into an array leaves the tree untouched and returns `false`.
pub fn merge(tree: &mut Value, path: &Path, value: Value) -> bool {
    match entry(tree, path) {
        Some(slot) => {
            *slot = value;
            true
        },
        None => false,
    }
}

/// Deep-merge `value` into `target`: objects are merged key by key, any
/// other combination replaces `target`.
pub fn deep_merge(target: &mut Value, value: Value) {
    match (target, value) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, child) in incoming {
                match existing.entry(key) {
                    Entry::Occupied(mut slot) => deep_merge(slot.get_mut(), child),
                    Entry::Vacant(slot) => {
                        slot.insert(child);
                    },
                }
            }
        },
        (slot, value) => *slot = value,
    }
}

/// Detach and return the node at `path`.
///
/// Removing the root leaves an empty object behind.
pub fn remove(tree: &mut Value, path: &Path) -> Option<Value> {
    let Some((last, parent_keys)) = path.keys().split_last() else {
        return Some(std::mem::replace(tree, Value::Object(Map::new())));
    };
    let parent = parent_keys.iter().try_fold(tree, |node, key| match node {
        Value::Object(map) => map.get_mut(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(move |i| items.get_mut(i)),
        _ => None,
    })?;
    match parent {
        Value::Object(map) => map.remove(last),
        _ => None,
    }
}

/// Expand the marker leaves of a query into the paths they denote, in key
/// order.
pub fn flatten(query: &Query) -> Vec<Path> {
    fn collect(query: &Query, prefix: &mut Vec<String>, out: &mut Vec<Path>) {
        match query {
            Query::Leaf => out.push(Path(prefix.clone())),
            Query::Node(children) => {
                for (key, child) in children {
                    prefix.push(key.clone());
                    collect(child, prefix, out);
                    prefix.pop();
                }
            },
        }
    }

    let mut out = Vec::new();
    collect(query, &mut Vec::new(), &mut out);
    out
}

/// Deduplicate `paths` and drop every path already covered by an ancestor in
/// the same set.
pub fn minimal_union<I>(paths: I) -> BTreeSet<Path>
where
    I: IntoIterator<Item = Path>,
{
    // Sorted order places every extension of a path directly after it.
    let sorted: BTreeSet<Path> = paths.into_iter().collect();
    let mut out = BTreeSet::new();
    let mut last_kept: Option<Path> = None;
    for path in sorted {
        if last_kept.as_ref().is_some_and(|kept| kept.is_prefix_of(&path)) {
            continue;
        }
        last_kept = Some(path.clone());
        out.insert(path);
    }
    out
}

/// Mutable slot at `path`, created as `null` (with object ancestors) when
/// absent. `None` when the path runs into an array with a key that is not an
/// index in `0..=len`; nothing is modified in that case.
pub(crate) fn entry<'a>(tree: &'a mut Value, path: &Path) -> Option<&'a mut Value> {
    path.keys().iter().try_fold(tree, |node, key| child_or_insert(node, key))
}

fn child_or_insert<'a>(node: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    let array_len = match &*node {
        Value::Array(items) => Some(items.len()),
        _ => None,
    };
    match array_len {
        Some(len) => {
            let index = key.parse::<usize>().ok().filter(|i| *i <= len)?;
            match node {
                Value::Array(items) => {
                    if index == len {
                        items.push(Value::Null);
                    }
                    items.get_mut(index)
                },
                _ => None,
            }
        },
        None => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            match node {
                Value::Object(map) => Some(map.entry(key.to_string()).or_insert(Value::Null)),
                _ => None,
            }
        },
    }
}
