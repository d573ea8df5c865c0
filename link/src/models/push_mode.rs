use serde::{Deserialize, Serialize};

/// How a pushed fragment is applied to the node at its path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushMode {
    /// Overwrite the node.
    #[default]
    Replace,
    /// Deep-merge objects into the node; anything else overwrites.
    Merge,
}
