//! Resolution orchestrator.
//!
//! Turns a [`Query`] into a [`Resolution`]. Each request needed along the
//! way goes through the same state machine:
//!
//! ```text
//! CacheCheck ──hit──────────────────────────────▶ Content
//!     │ miss
//!     ▼
//! Fetching ──ok──▶ cache write ─────────────────▶ Content
//!     │ failure
//!     ▼
//! classify ──4xx─────────────────────────────────▶ Unavailable
//!     │ transient / blocked
//!     ▼
//! (blocked: force rotation) ▶ retry budget ──spent──▶ Exhausted
//!     │ granted
//!     ▼
//! backoff wait ──▶ Fetching
//! ```
//!
//! Album lookups try, in order:
//!
//! 1. the direct release URL;
//! 2. the artist's discography, filtered by album title through the
//!    discography endpoint (the artist's catalog ID comes from the
//!    [`ArtistIdStore`] or from the artist page);
//! 3. a release search.
//!
//! Candidates from 2 and 3 are scored by the matcher. Artist lookups use the
//! direct artist URL, then an artist search.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;

use crate::artist_ids::{self, ArtistIdStore};
use crate::cache::{CacheKey, CacheStats, ResponseCache};
use crate::config::ResolverConfig;
use crate::error::{FetchFailure, ParseError, ResolveError, ResolveResult};
use crate::fetch::{HttpFetcher, PageFetcher};
use crate::genres::GenreHierarchy;
use crate::matcher::{self, Candidate};
use crate::rate_limit::RateLimiter;
use crate::retry::{self, Classification, ErrorClass, RetryDecision, RetryPolicy, RetryState};
use crate::session::{ForcedRotation, SessionIdentity, SessionRotator};
use crate::site::parse::{self, ReleasePage, SearchEntry};
use crate::site::{self, SearchKind};
use crate::types::{Metadata, Query, ReleaseType, Resolution};

/// How fetching one request ended.
#[derive(Debug, Clone, PartialEq)]
enum PageOutcome {
    Content(String),
    /// The site refused the URL outright (404 and friends).
    Unavailable(u16),
    Exhausted {
        attempts: u32,
        last_error: ErrorClass,
    },
}

/// A request run through the fetch state machine.
#[derive(Debug, Clone, Copy)]
enum Request<'a> {
    Page(&'a str),
    Form {
        url: &'a str,
        form: &'a [(&'static str, String)],
    },
}

impl Request<'_> {
    fn url(&self) -> &str {
        match self {
            Request::Page(url) | Request::Form { url, .. } => url,
        }
    }

    /// Pages shorter than `min_len` are interstitials or truncated. Form
    /// responses are legitimately tiny when nothing matches.
    fn is_complete(&self, content: &str, min_len: usize) -> bool {
        match self {
            Request::Page(_) => content.len() >= min_len,
            Request::Form { .. } => true,
        }
    }
}

/// Outcome of one candidate-finding step.
enum Step<T> {
    Hit(T),
    /// Nothing usable; the caller moves on to the next strategy.
    Miss,
    /// Ends the resolution.
    Done(Resolution),
}

pub struct Resolver {
    config: ResolverConfig,
    fetcher: Arc<dyn PageFetcher>,
    cache: Option<ResponseCache>,
    artist_ids: Option<ArtistIdStore>,
    rotator: Option<SessionRotator>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    /// Caps simultaneous fetches.
    permits: Semaphore,
    genres: Option<GenreHierarchy>,
}

impl Resolver {
    /// Validate `config` and set up cache, session state and genre data.
    pub fn new(config: ResolverConfig, fetcher: Arc<dyn PageFetcher>) -> ResolveResult<Self> {
        config.validate()?;

        let cache = if config.cache_enabled {
            let cache = ResponseCache::open(&config.cache_dir, config.cache_expiry_days)
                .map_err(|e| ResolveError::Cache(format!("{e:#}")))?;
            if config.cache_expiry_days > 0 {
                if let Err(e) = cache.sweep_expired() {
                    tracing::warn!("startup cache sweep failed: {e:#}");
                }
            }
            Some(cache)
        } else {
            None
        };
        let artist_ids = config
            .cache_enabled
            .then(|| ArtistIdStore::open(config.cache_dir.join(artist_ids::STORE_FILE)));

        let genres = match (&config.genre_hierarchy_file, config.expand_parent_genres) {
            (Some(path), true) => match GenreHierarchy::load(path) {
                Ok(hierarchy) => Some(hierarchy),
                Err(e) => {
                    tracing::warn!("parent genre expansion disabled: {e:#}");
                    None
                }
            },
            _ => None,
        };

        let rotator = SessionRotator::from_config(&config);
        if rotator.is_none() {
            tracing::info!("no proxy configured, fetching directly");
        }

        Ok(Self {
            limiter: RateLimiter::new(
                config.min_request_interval(),
                config.humanize_request_interval,
            ),
            retry: RetryPolicy::from_config(&config),
            permits: Semaphore::new(config.concurrent_requests),
            fetcher,
            cache,
            artist_ids,
            rotator,
            genres,
            config,
        })
    }

    /// Resolver backed by the reqwest [`HttpFetcher`].
    pub fn with_http(config: ResolverConfig) -> ResolveResult<Self> {
        let fetcher = HttpFetcher::new()?;
        Self::new(config, Arc::new(fetcher))
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve one query.
    ///
    /// Dropping the returned future abandons any in-flight fetch. Nothing is
    /// cached for it and the proxy identity is left as it was.
    pub async fn resolve(&self, query: &Query) -> Resolution {
        let resolution = if query.is_artist_lookup() {
            self.resolve_artist(query).await
        } else {
            self.resolve_release(query).await
        };

        match &resolution {
            Resolution::Found(metadata) => {
                tracing::info!("resolved {} -> {}", describe(query), metadata.url)
            }
            Resolution::NoMatch => tracing::info!("no match for {}", describe(query)),
            Resolution::Exhausted {
                attempts,
                last_error,
            } => tracing::warn!(
                "gave up on {} after {attempts} attempts ({last_error:?})",
                describe(query)
            ),
            Resolution::Fatal(e) => tracing::error!("cannot resolve {}: {e}", describe(query)),
        }
        resolution
    }

    /// Metadata for `query`, or `None` for every non-found outcome.
    pub async fn lookup(&self, query: &Query) -> Option<Metadata> {
        self.resolve(query).await.into_metadata()
    }

    /// Resolve many queries. Results keep the input order; failures stay per entry.
    pub async fn resolve_batch(&self, queries: &[Query]) -> Vec<Resolution> {
        stream::iter(queries)
            .map(|query| self.resolve(query))
            .buffered(self.config.concurrent_requests)
            .collect()
            .await
    }

    /// Remove every cached page and the artist ID map. Returns how many files were deleted.
    pub fn clear_cache(&self) -> ResolveResult<usize> {
        let mut removed = match &self.cache {
            Some(cache) => cache
                .clear()
                .map_err(|e| ResolveError::Cache(format!("{e:#}")))?,
            None => 0,
        };
        if let Some(ids) = &self.artist_ids {
            let cleared = ids
                .clear()
                .map_err(|e| ResolveError::Cache(format!("{e:#}")))?;
            if cleared {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Cache statistics; empty when caching is disabled.
    pub fn cache_stats(&self) -> ResolveResult<CacheStats> {
        match &self.cache {
            Some(cache) => cache
                .stats()
                .map_err(|e| ResolveError::Cache(format!("{e:#}"))),
            None => Ok(CacheStats::default()),
        }
    }

    /// Delete expired and corrupt cache entries.
    pub fn sweep_expired(&self) -> ResolveResult<usize> {
        match &self.cache {
            Some(cache) => cache
                .sweep_expired()
                .map_err(|e| ResolveError::Cache(format!("{e:#}"))),
            None => Ok(0),
        }
    }

    /// Proxy identity the next attempt would start from, if a proxy is configured.
    pub async fn current_identity(&self) -> Option<SessionIdentity> {
        match &self.rotator {
            Some(rotator) => rotator.current().await,
            None => None,
        }
    }

    /// Flush session state. Consumes the resolver.
    pub async fn shutdown(self) -> ResolveResult<()> {
        if let Some(rotator) = &self.rotator {
            rotator
                .save()
                .await
                .map_err(|e| ResolveError::Session(format!("{e:#}")))?;
        }
        tracing::debug!("resolver shut down");
        Ok(())
    }

    // ── Albums ──────────────────────────────────────────────────────────────

    async fn resolve_release(&self, query: &Query) -> Resolution {
        let album = query.album.as_deref().unwrap_or_default();

        let direct = site::release_url(&query.artist, album, query.release_type);
        match self.fetch_page(&direct, &CacheKey::for_page(&direct)).await {
            PageOutcome::Content(html) => match parse::parse_release_page(&html, &direct) {
                Ok(page) if self.page_matches(query, page.artist.as_deref(), page.title.as_deref()) => {
                    return Resolution::Found(self.release_metadata(query, page, direct));
                }
                Ok(_) => tracing::info!("direct page {direct} is a different release"),
                Err(e) => tracing::debug!("direct lookup failed ({e})"),
            },
            PageOutcome::Unavailable(status) => {
                tracing::debug!("direct page {direct} unavailable (HTTP {status})")
            }
            PageOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                return Resolution::Exhausted {
                    attempts,
                    last_error,
                }
            }
        }

        let url = match self.discography_match(query).await {
            Step::Hit(url) => url,
            Step::Done(resolution) => return resolution,
            Step::Miss => {
                tracing::info!("no discography match for {}, searching", describe(query));
                match self.release_search_match(query).await {
                    Step::Hit(url) => url,
                    Step::Miss => return Resolution::NoMatch,
                    Step::Done(resolution) => return resolution,
                }
            }
        };

        match self.fetch_page(&url, &CacheKey::for_page(&url)).await {
            PageOutcome::Content(html) => match parse::parse_release_page(&html, &url) {
                Ok(page) => Resolution::Found(self.release_metadata(query, page, url)),
                Err(e) => Resolution::Fatal(e),
            },
            PageOutcome::Unavailable(_) => Resolution::NoMatch,
            PageOutcome::Exhausted {
                attempts,
                last_error,
            } => Resolution::Exhausted {
                attempts,
                last_error,
            },
        }
    }

    /// Best release in the artist's discography, looked up by catalog artist ID.
    async fn discography_match(&self, query: &Query) -> Step<String> {
        let cached = self
            .artist_ids
            .as_ref()
            .and_then(|ids| ids.lookup(&query.artist));

        let artist_id = match cached {
            Some(id) => id,
            None => {
                let (url, html) = match self.find_artist_page(&query.artist).await {
                    Step::Hit(page) => page,
                    Step::Miss => return Step::Miss,
                    Step::Done(resolution) => return Step::Done(resolution),
                };
                let Some(id) = parse::parse_artist_id(&html) else {
                    tracing::info!("no artist ID on {url}");
                    return Step::Miss;
                };
                if let Some(ids) = &self.artist_ids {
                    if let Err(e) = ids.save(&query.artist, &id) {
                        tracing::warn!("failed to remember artist ID: {e:#}");
                    }
                }
                id
            }
        };

        let album = query.album.as_deref().unwrap_or_default();
        let url = site::discography_url();
        let form = site::discography_form(&artist_id, album);
        let request = Request::Form {
            url: &url,
            form: &form,
        };
        tracing::info!("filtering discography of artist {artist_id} for '{album}'");

        match self
            .fetch(request, &CacheKey::for_discography(&artist_id, album))
            .await
        {
            PageOutcome::Content(body) => match parse::parse_discography(&body) {
                Ok(entries) => {
                    let entries = entries
                        .into_iter()
                        .map(|e| SearchEntry {
                            title: e.title,
                            artist: query.artist.clone(),
                            year: e.year,
                            url: e.url,
                        })
                        .collect();
                    match self.best_match(query, entries, site::is_release_url) {
                        Some(url) => Step::Hit(url),
                        None => Step::Miss,
                    }
                }
                Err(e) => {
                    tracing::debug!("unusable discography response: {e}");
                    Step::Miss
                }
            },
            PageOutcome::Unavailable(status) => {
                tracing::debug!("discography filter unavailable (HTTP {status})");
                Step::Miss
            }
            PageOutcome::Exhausted {
                attempts,
                last_error,
            } => Step::Done(Resolution::Exhausted {
                attempts,
                last_error,
            }),
        }
    }

    async fn release_search_match(&self, query: &Query) -> Step<String> {
        let album = query.album.as_deref().unwrap_or_default();
        let term = format!("{} {}", query.artist, album);
        let search = site::search_url(&term, SearchKind::Release);
        let key = CacheKey::for_search(query);

        match self.search(&search, &key, parse::parse_release_search).await {
            Step::Hit(entries) => match self.best_match(query, entries, site::is_release_url) {
                Some(url) => Step::Hit(url),
                None => Step::Miss,
            },
            Step::Miss => Step::Miss,
            Step::Done(resolution) => Step::Done(resolution),
        }
    }

    fn release_metadata(&self, query: &Query, page: ReleasePage, url: String) -> Metadata {
        Metadata {
            artist: page.artist.unwrap_or_else(|| query.artist.clone()),
            album: page.title.or_else(|| query.album.clone()),
            album_type: ReleaseType::from_release_url(&url).or(Some(query.release_type)),
            genres: self.expand_genres(page.genres),
            descriptors: page.descriptors,
            url,
        }
    }

    // ── Artists ─────────────────────────────────────────────────────────────

    async fn resolve_artist(&self, query: &Query) -> Resolution {
        let (url, html) = match self.find_artist_page(&query.artist).await {
            Step::Hit(page) => page,
            Step::Miss => return Resolution::NoMatch,
            Step::Done(resolution) => return resolution,
        };
        match parse::parse_artist_page(&html, &url) {
            Ok(page) => Resolution::Found(self.artist_metadata(query, page.name, page.genres, url)),
            Err(e) => Resolution::Fatal(e),
        }
    }

    /// URL and HTML of `artist`'s page: the direct URL when it shows that
    /// artist, otherwise the best artist search result.
    async fn find_artist_page(&self, artist: &str) -> Step<(String, String)> {
        let query = Query::artist(artist);

        let direct = site::artist_url(artist);
        match self.fetch_page(&direct, &CacheKey::for_page(&direct)).await {
            PageOutcome::Content(html) => match parse::parse_artist_page(&html, &direct) {
                Ok(page) if self.page_matches(&query, page.name.as_deref(), None) => {
                    return Step::Hit((direct, html));
                }
                Ok(_) => tracing::info!("direct page {direct} is a different artist, searching"),
                Err(e) => tracing::debug!("direct artist lookup failed ({e}), searching"),
            },
            PageOutcome::Unavailable(status) => {
                tracing::debug!("direct page {direct} unavailable (HTTP {status}), searching")
            }
            PageOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                return Step::Done(Resolution::Exhausted {
                    attempts,
                    last_error,
                })
            }
        }

        let search = site::search_url(artist, SearchKind::Artist);
        let entries = match self
            .search(&search, &CacheKey::for_search(&query), parse::parse_artist_search)
            .await
        {
            Step::Hit(entries) => entries,
            Step::Miss => return Step::Miss,
            Step::Done(resolution) => return Step::Done(resolution),
        };

        let Some(url) = self.best_match(&query, entries, site::is_artist_url) else {
            return Step::Miss;
        };

        match self.fetch_page(&url, &CacheKey::for_page(&url)).await {
            PageOutcome::Content(html) => Step::Hit((url, html)),
            PageOutcome::Unavailable(_) => Step::Miss,
            PageOutcome::Exhausted {
                attempts,
                last_error,
            } => Step::Done(Resolution::Exhausted {
                attempts,
                last_error,
            }),
        }
    }

    fn artist_metadata(
        &self,
        query: &Query,
        name: Option<String>,
        genres: Vec<String>,
        url: String,
    ) -> Metadata {
        Metadata {
            artist: name.unwrap_or_else(|| query.artist.clone()),
            album: None,
            album_type: None,
            genres: self.expand_genres(genres),
            descriptors: Vec::new(),
            url,
        }
    }

    // ── Shared steps ────────────────────────────────────────────────────────

    /// Fetch and parse a search page.
    async fn search(
        &self,
        url: &str,
        key: &CacheKey,
        parse_results: fn(&str) -> Result<Vec<SearchEntry>, ParseError>,
    ) -> Step<Vec<SearchEntry>> {
        match self.fetch_page(url, key).await {
            PageOutcome::Content(html) => match parse_results(&html) {
                Ok(entries) => Step::Hit(entries),
                Err(e) => Step::Done(Resolution::Fatal(e)),
            },
            PageOutcome::Unavailable(_) => Step::Miss,
            PageOutcome::Exhausted {
                attempts,
                last_error,
            } => Step::Done(Resolution::Exhausted {
                attempts,
                last_error,
            }),
        }
    }

    /// URL of the best candidate among `entries` whose URL passes `accept`.
    fn best_match(
        &self,
        query: &Query,
        entries: Vec<SearchEntry>,
        accept: fn(&str) -> bool,
    ) -> Option<String> {
        let candidates = entries
            .into_iter()
            .filter(|e| {
                let ok = accept(&e.url);
                if !ok {
                    tracing::debug!("ignoring result of the wrong kind: {}", e.url);
                }
                ok
            })
            .map(|e| Candidate::for_query(query, e.title, e.artist, e.year, e.url))
            .collect();
        let best = matcher::select_best(query, candidates, self.config.matching_threshold)?;
        tracing::info!(
            "best match: {} - {} ({}) score {:.3}",
            best.candidate.artist,
            best.candidate.title,
            best.candidate
                .year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "?".to_string()),
            best.final_score
        );
        Some(best.candidate.url)
    }

    /// Whether a directly addressed page is the entity the query asks for.
    ///
    /// Fields the page does not expose are taken from the query.
    fn page_matches(&self, query: &Query, artist: Option<&str>, title: Option<&str>) -> bool {
        let artist = artist.unwrap_or(&query.artist);
        let title = title.or(query.album.as_deref()).unwrap_or_default();
        matcher::similarity(query, artist, title) >= self.config.matching_threshold
    }

    fn expand_genres(&self, genres: Vec<String>) -> Vec<String> {
        match &self.genres {
            Some(hierarchy) if !genres.is_empty() => hierarchy.expand(&genres),
            _ => genres,
        }
    }

    async fn fetch_page(&self, url: &str, key: &CacheKey) -> PageOutcome {
        self.fetch(Request::Page(url), key).await
    }

    /// Cache check, then fetch with retry, rotation and backoff.
    async fn fetch(&self, request: Request<'_>, key: &CacheKey) -> PageOutcome {
        let url = request.url();
        if let Some(entry) = self.cache.as_ref().and_then(|cache| cache.get(key)) {
            return PageOutcome::Content(entry.content);
        }

        let mut state = RetryState::default();
        loop {
            let (identity, class) = {
                // The semaphore is never closed.
                let _permit = self.permits.acquire().await.ok();
                self.limiter.acquire().await;
                let identity = match &self.rotator {
                    Some(rotator) => Some(rotator.acquire().await),
                    None => None,
                };

                tracing::info!(
                    "fetching {url} (attempt {}/{})",
                    state.attempt,
                    self.config.max_retries
                );
                let timeout = self.config.page_timeout();
                let call = async {
                    match request {
                        Request::Page(url) => {
                            self.fetcher.fetch(url, identity.as_ref(), timeout).await
                        }
                        Request::Form { url, form } => {
                            self.fetcher
                                .submit_form(url, form, identity.as_ref(), timeout)
                                .await
                        }
                    }
                };
                let result = tokio::time::timeout(timeout, call)
                    .await
                    .unwrap_or(Err(FetchFailure::Timeout));

                match result {
                    Ok(content) if request.is_complete(&content, self.config.min_content_length) => {
                        if let Some(rotator) = &self.rotator {
                            rotator.record_success().await;
                        }
                        if let Some(cache) = &self.cache {
                            if let Err(e) = cache.put(key, &content, url) {
                                tracing::warn!("failed to cache {url}: {e:#}");
                            }
                        }
                        return PageOutcome::Content(content);
                    }
                    Ok(content) => {
                        tracing::info!(
                            "minimal content from {url} ({} bytes), retrying",
                            content.len()
                        );
                        (identity, ErrorClass::Transient)
                    }
                    Err(failure) => match retry::classify(&failure) {
                        Classification::Retry(class) => {
                            if class == ErrorClass::Blocked {
                                tracing::warn!("blocked at {url}: {failure}");
                            } else {
                                tracing::info!("transient failure at {url}: {failure}");
                            }
                            (identity, class)
                        }
                        Classification::Unavailable(status) => {
                            tracing::debug!("{url} unavailable: HTTP {status}");
                            return PageOutcome::Unavailable(status);
                        }
                    },
                }
            };

            if class == ErrorClass::Blocked && self.config.auto_rotate_on_failure {
                if let (Some(rotator), Some(identity)) = (&self.rotator, &identity) {
                    match rotator.force_rotate(identity.generation).await {
                        ForcedRotation::Rotated(_) => {}
                        ForcedRotation::Stale => {
                            tracing::debug!("identity already rotated by another request")
                        }
                        ForcedRotation::TooSoon => {
                            tracing::debug!("forced rotation suppressed, too soon after the last")
                        }
                    }
                }
            }

            match self.retry.on_failure(&mut state, class) {
                RetryDecision::Retry { delay } => {
                    tracing::debug!("backing off {:.1}s before retrying {url}", delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    return PageOutcome::Exhausted {
                        attempts: state.attempt,
                        last_error: class,
                    };
                }
            }
        }
    }
}

fn describe(query: &Query) -> String {
    match &query.album {
        Some(album) => format!("'{}' by '{}'", album, query.artist),
        None => format!("artist '{}'", query.artist),
    }
}
