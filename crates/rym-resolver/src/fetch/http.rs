//! reqwest-backed [`PageFetcher`].
//!
//! Plain HTTP, not a browser. Sends a desktop Chrome user agent, follows a
//! limited number of redirects, and reports anti-bot interstitials as
//! [`FetchFailure::Challenge`] instead of content.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::PageFetcher;
use crate::error::FetchFailure;
use crate::session::SessionIdentity;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/131.0.0.0 Safari/537.36";

/// Body markers of a challenge interstitial, matched case-insensitively.
const CHALLENGE_INDICATORS: &[&str] = &[
    "just a moment",
    "checking your browser",
    "cf-challenge",
    "attention required",
];

/// Proxied clients kept before the pool is reset.
const MAX_PROXY_CLIENTS: usize = 16;

pub struct HttpFetcher {
    direct: reqwest::Client,
    /// One client per proxy endpoint and username.
    proxied: Mutex<HashMap<String, reqwest::Client>>,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchFailure> {
        Ok(Self {
            direct: build_client(None)?,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn client_for(&self, identity: Option<&SessionIdentity>) -> Result<reqwest::Client, FetchFailure> {
        let Some(identity) = identity else {
            return Ok(self.direct.clone());
        };

        let address = identity.proxy_address();
        let pool_key = format!("{}|{}", address.server, address.username);

        let mut pool = self.proxied.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = pool.get(&pool_key) {
            return Ok(client.clone());
        }

        let proxy = reqwest::Proxy::all(&address.server)
            .map_err(|e| FetchFailure::Network(format!("invalid proxy {}: {e}", address.server)))?
            .basic_auth(&address.username, &address.password);
        let client = build_client(Some(proxy))?;

        if pool.len() >= MAX_PROXY_CLIENTS {
            pool.clear();
        }
        pool.insert(pool_key, client.clone());
        Ok(client)
    }
}

impl HttpFetcher {
    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<String, FetchFailure> {
        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let served_by_cloudflare = response
            .headers()
            .get("server")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("cloudflare"));
        let body = response.text().await.map_err(map_reqwest_error)?;

        if is_challenge(status, served_by_cloudflare, &body) {
            tracing::warn!("anti-bot challenge at {url} (HTTP {status})");
            return Err(FetchFailure::Challenge);
        }
        if !(200..300).contains(&status) {
            return Err(FetchFailure::Status(status));
        }

        tracing::debug!("fetched {url}: {} bytes", body.len());
        Ok(body)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        identity: Option<&SessionIdentity>,
        timeout: Duration,
    ) -> Result<String, FetchFailure> {
        let client = self.client_for(identity)?;
        self.send(client.get(url).timeout(timeout), url).await
    }

    async fn submit_form(
        &self,
        url: &str,
        form: &[(&'static str, String)],
        identity: Option<&SessionIdentity>,
        timeout: Duration,
    ) -> Result<String, FetchFailure> {
        let client = self.client_for(identity)?;
        let request = client
            .post(url)
            .header("X-Requested-With", "XMLHttpRequest")
            .form(form)
            .timeout(timeout);
        self.send(request, url).await
    }
}

fn build_client(proxy: Option<reqwest::Proxy>) -> Result<reqwest::Client, FetchFailure> {
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent(USER_AGENT);
    if let Some(proxy) = proxy {
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| FetchFailure::Network(format!("failed to build HTTP client: {e}")))
}

fn map_reqwest_error(e: reqwest::Error) -> FetchFailure {
    if e.is_timeout() {
        FetchFailure::Timeout
    } else {
        FetchFailure::Network(e.to_string())
    }
}

/// Whether a response is an anti-bot interstitial rather than the page.
pub fn is_challenge(status: u16, served_by_cloudflare: bool, body: &str) -> bool {
    let lower = body.to_lowercase();
    if CHALLENGE_INDICATORS.iter().any(|marker| lower.contains(marker)) {
        return true;
    }
    status == 403 && (served_by_cloudflare || lower.contains("cloudflare") || lower.contains("ray id"))
}
