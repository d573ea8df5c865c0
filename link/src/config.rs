//! File-based client configuration.
//!
//! # Configuration Format
//!
//! ```toml
//! [server]
//! url = "http://localhost:8080"
//!
//! [auth]
//! token = "your-bearer-token"   # omit for open servers
//!
//! [timeouts]
//! connection_secs = 10
//! request_secs = 10
//! auth_secs = 5
//! keepalive_secs = 10   # 0 disables pings
//! pong_secs = 5
//!
//! [connection]
//! auto_reconnect = true
//! reconnect_delay_ms = 1000
//! max_reconnect_delay_ms = 30000
//! ws_path = "/socket"
//! ```

use crate::auth::AuthProvider;
use crate::client::LabLinkClientBuilder;
use crate::error::{LabLinkError, Result};
use crate::models::ConnectionOptions;
use crate::timeouts::LabLinkTimeouts;
use crate::LabLinkClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client configuration loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub connection: ConnectionOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_url")]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token; none means the socket is opened unauthenticated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_connection_secs")]
    pub connection_secs: u64,
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
    #[serde(default = "default_auth_secs")]
    pub auth_secs: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    #[serde(default = "default_pong_secs")]
    pub pong_secs: u64,
}

fn default_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_connection_secs() -> u64 {
    10
}

fn default_request_secs() -> u64 {
    10
}

fn default_auth_secs() -> u64 {
    5
}

fn default_keepalive_secs() -> u64 {
    10
}

fn default_pong_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { url: default_url() }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connection_secs: default_connection_secs(),
            request_secs: default_request_secs(),
            auth_secs: default_auth_secs(),
            keepalive_secs: default_keepalive_secs(),
            pong_secs: default_pong_secs(),
        }
    }
}

impl From<&TimeoutsConfig> for LabLinkTimeouts {
    fn from(config: &TimeoutsConfig) -> Self {
        LabLinkTimeouts::builder()
            .connection_timeout(Duration::from_secs(config.connection_secs))
            .request_timeout(Duration::from_secs(config.request_secs))
            .auth_timeout(Duration::from_secs(config.auth_secs))
            .keepalive_interval(Duration::from_secs(config.keepalive_secs))
            .pong_timeout(Duration::from_secs(config.pong_secs))
            .build()
    }
}

impl LinkConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Read a config file. A missing file is an error.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LabLinkError::ConfigurationError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Like [`from_file`](Self::from_file), but a missing file yields the
    /// defaults.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| LabLinkError::ConfigurationError(format!("Failed to serialize: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn auth_provider(&self) -> AuthProvider {
        match &self.auth.token {
            Some(token) if !token.is_empty() => AuthProvider::bearer_token(token.clone()),
            _ => AuthProvider::None,
        }
    }

    pub fn timeouts(&self) -> LabLinkTimeouts {
        LabLinkTimeouts::from(&self.timeouts)
    }

    /// A client builder preloaded with this configuration.
    pub fn builder(&self) -> LabLinkClientBuilder {
        LabLinkClient::builder()
            .base_url(self.server.url.clone())
            .auth(self.auth_provider())
            .timeouts(self.timeouts())
            .connection_options(self.connection.clone())
    }
}
