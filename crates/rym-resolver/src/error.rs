//! Error types for configuration, fetching, page parsing and resolver setup.

/// Rejected configuration values. Raised once, when a resolver is built.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("max_retries must be at least 1")]
    ZeroRetries,

    #[error("matching_threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f64),

    #[error("{field} must be a finite, non-negative number of seconds, got {value}")]
    InvalidInterval { field: &'static str, value: f64 },

    #[error("port range is empty: start {start} > end {end}")]
    EmptyPortRange { start: u16, end: u16 },

    #[error("concurrent_requests must be at least 1")]
    ZeroConcurrency,

    #[error("sticky sessions need a session_duration greater than zero")]
    ZeroSessionDuration,

    #[error("username rotation needs a session_id_length greater than zero")]
    ZeroSessionIdLength,

    #[error("cache is enabled but cache_dir is empty")]
    EmptyCacheDir,

    #[error("proxy host must not be empty")]
    EmptyProxyHost,

    #[error("page_timeout_ms must be greater than zero")]
    ZeroPageTimeout,
}

/// A classified failure reported by a [`crate::fetch::PageFetcher`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// Connection-level failure (DNS, reset, TLS, proxy refused).
    #[error("network error: {0}")]
    Network(String),

    /// The attempt did not finish within the page timeout.
    #[error("timed out")]
    Timeout,

    /// The site answered with an anti-bot challenge instead of content.
    #[error("anti-bot challenge detected")]
    Challenge,

    /// The site answered with a non-success HTTP status.
    #[error("HTTP status {0}")]
    Status(u16),
}

/// Structural problems in an otherwise successfully fetched page.
///
/// These are never retried: refetching a page does not change its structure.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("document is empty")]
    EmptyDocument,

    #[error("{url} is not a release page")]
    NotAReleasePage { url: String },

    #[error("{url} is not an artist page")]
    NotAnArtistPage { url: String },
}

/// Errors raised while setting up or tearing down a resolver.
#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("session state error: {0}")]
    Session(String),

    #[error("fetcher setup failed: {0}")]
    Fetcher(#[from] FetchFailure),
}

/// Convenience result type.
pub type ResolveResult<T> = Result<T, ResolveError>;
