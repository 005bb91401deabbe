//! Proxy identity handed to the fetcher for one attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{RotationMethod, SessionType};

/// The proxy endpoint and credentials currently in use.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub proxy_host: String,
    pub proxy_port: u16,
    pub auth_username: String,
    pub auth_password: String,
    #[serde(default)]
    pub use_tls: bool,
    pub created_at: DateTime<Utc>,
    /// Lifetime in seconds; only sticky sessions expire.
    pub ttl_secs: Option<u64>,
    pub rotation_method: RotationMethod,
    pub session_type: SessionType,
    /// Bumped on every identity change.
    pub generation: u64,
}

impl SessionIdentity {
    /// Whether a sticky identity has reached its lifetime at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_secs {
            Some(ttl) => {
                let ttl = chrono::Duration::seconds(i64::try_from(ttl).unwrap_or(i64::MAX));
                now.signed_duration_since(self.created_at) >= ttl
            }
            None => false,
        }
    }

    /// Proxy server URL and credentials for this identity.
    pub fn proxy_address(&self) -> ProxyAddress {
        let scheme = if self.use_tls { "https" } else { "http" };
        ProxyAddress {
            server: format!("{scheme}://{}:{}", self.proxy_host, self.proxy_port),
            username: self.auth_username.clone(),
            password: self.auth_password.clone(),
        }
    }
}

impl std::fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("proxy_host", &self.proxy_host)
            .field("proxy_port", &self.proxy_port)
            .field("auth_username", &self.auth_username)
            .field("auth_password", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("ttl_secs", &self.ttl_secs)
            .field("rotation_method", &self.rotation_method)
            .field("session_type", &self.session_type)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Connection settings a fetcher needs to route through the proxy.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyAddress {
    /// `scheme://host:port`
    pub server: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ProxyAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyAddress")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
