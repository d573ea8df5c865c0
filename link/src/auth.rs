//! Credentials presented when the socket opens.

use crate::error::{LabLinkError, Result};
use tokio_tungstenite::tungstenite::http::{
    header::{HeaderValue, AUTHORIZATION},
    Request,
};

/// How the client authenticates its socket.
///
/// # Examples
///
/// ```rust
/// use lab_link::AuthProvider;
///
/// let auth = AuthProvider::bearer_token("eyJhbGc...");
/// assert!(auth.is_authenticated());
///
/// // Dashboards served from the instrument host itself usually run open
/// let auth = AuthProvider::none();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthProvider {
    /// Sent as `Authorization: Bearer` on the upgrade request and again in an
    /// `authenticate` message whose answer is awaited before the socket
    /// counts as connected.
    BearerToken(String),

    #[default]
    None,
}

impl AuthProvider {
    pub fn bearer_token(token: impl Into<String>) -> Self {
        Self::BearerToken(token.into())
    }

    pub fn none() -> Self {
        Self::None
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub(crate) fn token(&self) -> Option<&str> {
        match self {
            Self::BearerToken(token) => Some(token),
            Self::None => None,
        }
    }

    /// Attach the `Authorization` header to a WebSocket upgrade request.
    pub(crate) fn apply_to_ws_request(&self, request: &mut Request<()>) -> Result<()> {
        if let Self::BearerToken(token) = self {
            let header_value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                LabLinkError::ConfigurationError(format!(
                    "Invalid token for Authorization header: {}",
                    e
                ))
            })?;
            request.headers_mut().insert(AUTHORIZATION, header_value);
        }
        Ok(())
    }
}
