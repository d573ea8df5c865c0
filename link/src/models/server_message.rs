use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::Path;

use super::push_mode::PushMode;

/// Server-to-client messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication accepted
    AuthSuccess {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
    },

    /// Authentication refused; the server closes the socket afterwards
    AuthError {
        message: String,
    },

    /// A fragment of the state tree changed
    ///
    /// `value` replaces (or, with `mode: "merge"`, is deep-merged into) the
    /// node at `path`.
    Push {
        path: Path,
        value: Value,
        #[serde(default)]
        mode: PushMode,
    },

    /// Answer to a Get request
    GetResult {
        request_id: u64,
        value: Value,
    },

    /// The server refused a Get request (invalid or unauthorized path)
    GetError {
        request_id: u64,
        code: String,
        message: String,
    },

    /// Connection-level error reported by the server
    Error {
        message: String,
    },
}
