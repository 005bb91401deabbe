//! Page fetching abstraction.
//!
//! The resolver never talks to the network directly. It hands a URL (and,
//! for the catalog's AJAX endpoints, a form), the current proxy identity and
//! a timeout to a [`PageFetcher`] and gets back either the response body or
//! a [`FetchFailure`]. [`http::HttpFetcher`] is the
//! reqwest-backed implementation; tests script their own.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::FetchFailure;
use crate::session::SessionIdentity;

pub use http::HttpFetcher;

/// Fetch raw page content for a URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url`, routed through `identity` when one is given.
    ///
    /// Implementations should honor `timeout`; the resolver also enforces
    /// it around the call.
    async fn fetch(
        &self,
        url: &str,
        identity: Option<&SessionIdentity>,
        timeout: Duration,
    ) -> Result<String, FetchFailure>;

    /// POST `form` to `url` as `application/x-www-form-urlencoded`.
    async fn submit_form(
        &self,
        url: &str,
        form: &[(&'static str, String)],
        identity: Option<&SessionIdentity>,
        timeout: Duration,
    ) -> Result<String, FetchFailure>;
}

/// A fetcher with no network access. Every fetch fails.
///
/// Lets a resolver answer purely from its cache.
pub struct OfflineFetcher;

#[async_trait]
impl PageFetcher for OfflineFetcher {
    async fn fetch(
        &self,
        url: &str,
        _identity: Option<&SessionIdentity>,
        _timeout: Duration,
    ) -> Result<String, FetchFailure> {
        Err(FetchFailure::Network(format!("offline, cannot fetch {url}")))
    }

    async fn submit_form(
        &self,
        url: &str,
        _form: &[(&'static str, String)],
        _identity: Option<&SessionIdentity>,
        _timeout: Duration,
    ) -> Result<String, FetchFailure> {
        Err(FetchFailure::Network(format!("offline, cannot submit to {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_fetcher_fails() {
        let result = OfflineFetcher
            .fetch("https://rateyourmusic.com/", None, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(FetchFailure::Network(_))));

        let result = OfflineFetcher
            .submit_form(
                "https://rateyourmusic.com/httprequest/FilterDiscography",
                &[("artist_id", "1".to_string())],
                None,
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(FetchFailure::Network(_))));
    }
}
