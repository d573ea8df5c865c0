use serde::{Deserialize, Serialize};

/// Per-call context for [`LabLinkClient::get`](crate::LabLinkClient::get).
///
/// Pages rendered for a specific visitor forward that visitor's session so
/// the server can authorize the read on their behalf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }
}
