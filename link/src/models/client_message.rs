use serde::{Deserialize, Serialize};

use crate::path::Path;
use crate::query::Query;

/// Client-to-server request messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate the WebSocket connection
    ///
    /// Sent immediately after the socket opens when a bearer token is
    /// configured. Server responds with AuthSuccess or AuthError.
    Authenticate {
        token: String,
    },

    /// Start receiving pushes for every path listed
    ///
    /// Paths already covered by an earlier subscribe are never repeated.
    Subscribe {
        paths: Vec<Path>,
    },

    /// Stop receiving pushes for every path listed
    Unsubscribe {
        paths: Vec<Path>,
    },

    /// One-shot fetch of the data selected by a query
    Get {
        /// Correlates the GetResult/GetError answer
        request_id: u64,
        query: Query,
        /// Session credential of the page that issued the request
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
}

impl ClientMessage {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Authenticate { .. } => "authenticate",
            ClientMessage::Subscribe { .. } => "subscribe",
            ClientMessage::Unsubscribe { .. } => "unsubscribe",
            ClientMessage::Get { .. } => "get",
        }
    }
}
