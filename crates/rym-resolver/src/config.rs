//! Resolver configuration, validation and path resolution.
//!
//! Every option the engine consumes lives in one [`ResolverConfig`]. It is
//! validated once when a [`crate::Resolver`] is built and treated as
//! immutable afterwards.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default cache directory, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = ".rym_cache";

/// Default session-state file, relative to the working directory.
pub const DEFAULT_SESSION_STATE_FILE: &str = ".rym_session_state.json";

/// When a proxy identity is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    /// Fixed until a forced rotation.
    Const,
    /// Held for `session_duration`, then replaced on next access.
    Sticky,
    /// Replaced before every fetch attempt.
    Rotate,
}

/// How a new proxy identity differs from the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationMethod {
    /// Cycle the proxy port through the configured range.
    Port,
    /// Change the session suffix on the proxy username.
    Username,
}

/// How anti-bot blocks are charged against the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BlockedRetryBudget {
    /// Blocked and transient failures both count against `max_retries`.
    Shared,
    /// Blocked failures have their own budget; transient failures keep `max_retries`.
    Separate { max_blocked_retries: u32 },
}

/// Upstream proxy endpoint and credentials.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    /// Fixed port used by username rotation. Port rotation draws from the port range instead.
    pub port: u16,
    pub username: String,
    pub password: String,
    /// `https://` proxy scheme instead of `http://`.
    #[serde(default)]
    pub use_tls: bool,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

/// All options consumed by the resolution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub cache_enabled: bool,
    pub cache_dir: PathBuf,
    /// Entry lifetime in days; 0 keeps entries forever.
    pub cache_expiry_days: u32,

    /// Total fetch attempts per page, including the first.
    pub max_retries: u32,
    /// Base backoff in seconds; doubled after each failed attempt.
    pub retry_delay: f64,
    pub blocked_retry_budget: BlockedRetryBudget,
    pub page_timeout_ms: u64,
    /// Successful fetches shorter than this many bytes are retried.
    pub min_content_length: usize,

    /// Minimum seconds between fetch attempts; 0 disables limiting.
    pub min_request_interval: f64,
    /// Apply ±25% jitter to `min_request_interval`.
    pub humanize_request_interval: bool,

    pub matching_threshold: f64,

    /// `None` fetches without a proxy and disables identity rotation.
    pub proxy: Option<ProxyConfig>,
    pub proxy_rotation_method: RotationMethod,
    pub auto_rotate_on_failure: bool,
    pub session_type: SessionType,
    /// Sticky session lifetime in seconds.
    pub session_duration: u64,
    pub session_id_length: usize,
    pub port_range_start: u16,
    pub port_range_end: u16,
    /// Minimum seconds between two forced rotations.
    pub min_rotation_spacing: f64,
    pub session_state_file: PathBuf,

    /// Simultaneous in-flight fetches (browser sessions).
    pub concurrent_requests: usize,

    pub expand_parent_genres: bool,
    pub genre_hierarchy_file: Option<PathBuf>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            cache_expiry_days: 7,
            max_retries: 5,
            retry_delay: 2.0,
            blocked_retry_budget: BlockedRetryBudget::Shared,
            page_timeout_ms: 30_000,
            min_content_length: 1000,
            min_request_interval: 3.0,
            humanize_request_interval: true,
            matching_threshold: 0.8,
            proxy: None,
            proxy_rotation_method: RotationMethod::Port,
            auto_rotate_on_failure: true,
            session_type: SessionType::Const,
            session_duration: 600,
            session_id_length: 10,
            port_range_start: 10001,
            port_range_end: 10100,
            min_rotation_spacing: 30.0,
            session_state_file: PathBuf::from(DEFAULT_SESSION_STATE_FILE),
            concurrent_requests: 1,
            expand_parent_genres: true,
            genre_hierarchy_file: None,
        }
    }
}

impl ResolverConfig {
    /// Reject invalid values and invalid combinations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if !(0.0..=1.0).contains(&self.matching_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.matching_threshold));
        }
        for (field, value) in [
            ("retry_delay", self.retry_delay),
            ("min_request_interval", self.min_request_interval),
            ("min_rotation_spacing", self.min_rotation_spacing),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidInterval { field, value });
            }
        }
        if self.page_timeout_ms == 0 {
            return Err(ConfigError::ZeroPageTimeout);
        }
        if self.port_range_start > self.port_range_end {
            return Err(ConfigError::EmptyPortRange {
                start: self.port_range_start,
                end: self.port_range_end,
            });
        }
        if self.concurrent_requests == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.session_type == SessionType::Sticky && self.session_duration == 0 {
            return Err(ConfigError::ZeroSessionDuration);
        }
        if self.proxy_rotation_method == RotationMethod::Username && self.session_id_length == 0 {
            return Err(ConfigError::ZeroSessionIdLength);
        }
        if self.cache_enabled && self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyCacheDir);
        }
        if let Some(proxy) = &self.proxy {
            if proxy.host.trim().is_empty() {
                return Err(ConfigError::EmptyProxyHost);
            }
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_secs_f64(self.min_request_interval)
    }

    pub fn min_rotation_spacing(&self) -> Duration {
        Duration::from_secs_f64(self.min_rotation_spacing)
    }
}

/// Resolve the cache directory: explicit value, then `RYM_CACHE_DIR`, then the default.
pub fn resolve_cache_dir(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var("RYM_CACHE_DIR") {
        if !env_path.is_empty() {
            return PathBuf::from(env_path);
        }
    }

    PathBuf::from(DEFAULT_CACHE_DIR)
}

/// Resolve the session-state file: explicit value, then `RYM_SESSION_STATE`, then the default.
pub fn resolve_session_state_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var("RYM_SESSION_STATE") {
        if !env_path.is_empty() {
            return PathBuf::from(env_path);
        }
    }

    PathBuf::from(DEFAULT_SESSION_STATE_FILE)
}
