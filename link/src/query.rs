//! Query shapes describing which parts of the state tree a caller wants.
//!
//! A query mirrors the shape of the data it selects. In JSON a leaf is the
//! number `0` and every other level is an object:
//!
//! ```rust
//! use lab_link::Query;
//!
//! let query: Query = r#"{"meta": {"sources": {"42": {"params": 0}}}}"#.parse().unwrap();
//! assert_eq!(query.paths().len(), 1);
//! ```

use crate::error::{LabLinkError, Result};
use crate::path::{self, Path};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Recursive description of interest in the state tree.
///
/// Represents interest, not data: a [`Query::Leaf`] asks for the whole value
/// found at its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Query {
    Leaf,
    Node(BTreeMap<String, Query>),
}

impl Query {
    /// Build a node from `(key, child)` pairs.
    pub fn node<I, K>(children: I) -> Self
    where
        I: IntoIterator<Item = (K, Query)>,
        K: Into<String>,
    {
        Query::Node(children.into_iter().map(|(k, q)| (k.into(), q)).collect())
    }

    /// The query selecting exactly the value at `path`.
    pub fn at(path: &Path) -> Self {
        path.keys()
            .iter()
            .rev()
            .fold(Query::Leaf, |inner, key| Query::node([(key.clone(), inner)]))
    }

    /// Parse the `0`-leaf JSON form.
    pub fn from_json(value: &Value) -> Result<Self> {
        Self::parse_at(value, &Path::root())
    }

    fn parse_at(value: &Value, at: &Path) -> Result<Self> {
        match value {
            Value::Number(n) if n.as_f64() == Some(0.0) => Ok(Query::Leaf),
            Value::Object(map) => map
                .iter()
                .map(|(key, child)| Ok((key.clone(), Self::parse_at(child, &at.child(key.as_str()))?)))
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Query::Node),
            other => Err(LabLinkError::InvalidQuery(format!(
                "expected 0 or an object at {}, found {}",
                at, other
            ))),
        }
    }

    /// Render the `0`-leaf JSON form.
    pub fn to_json(&self) -> Value {
        match self {
            Query::Leaf => Value::from(0),
            Query::Node(children) => Value::Object(
                children.iter().map(|(k, q)| (k.clone(), q.to_json())).collect::<Map<_, _>>(),
            ),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Query::Leaf)
    }

    /// The marker-leaf paths this query denotes, in key order.
    pub fn paths(&self) -> Vec<Path> {
        path::flatten(self)
    }
}

impl TryFrom<Value> for Query {
    type Error = LabLinkError;

    fn try_from(value: Value) -> Result<Self> {
        Query::from_json(&value)
    }
}

impl From<Query> for Value {
    fn from(query: Query) -> Self {
        query.to_json()
    }
}

impl FromStr for Query {
    type Err = LabLinkError;

    fn from_str(s: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(s)
            .map_err(|e| LabLinkError::InvalidQuery(format!("not valid JSON: {}", e)))?;
        Query::from_json(&value)
    }
}
