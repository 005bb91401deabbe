//! End-to-end resolution tests against a scripted fetcher.
//!
//! Covers direct hits, discography and search fallback, caching, retry
//! exhaustion, forced rotation, timeouts, cancellation, batch ordering and
//! genre expansion.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use rym_resolver::artist_ids;
use rym_resolver::site::{artist_url, discography_url, release_url, search_url, SearchKind};
use rym_resolver::{
    ErrorClass, FetchFailure, OfflineFetcher, PageFetcher, ParseError, ProxyConfig, Query,
    ReleaseType, Resolution, Resolver, ResolverConfig, SessionIdentity,
};

// ─────────────────────── helpers ───────────────────────

enum Reply {
    Page(String),
    Fail(FetchFailure),
    /// Never answers within any sane timeout.
    Hang,
}

struct Call {
    url: String,
    port: Option<u16>,
    at: Instant,
}

/// Replies per URL, in order. The last reply repeats; unknown URLs are 404.
#[derive(Default)]
struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedFetcher {
    fn on(&self, url: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into());
    }

    fn calls_to(&self, url: &str) -> Vec<(Option<u16>, Instant)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.url == url)
            .map(|c| (c.port, c.at))
            .collect()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl ScriptedFetcher {
    async fn answer(
        &self,
        key: String,
        identity: Option<&SessionIdentity>,
    ) -> Result<String, FetchFailure> {
        let reply = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&key) {
                None => None,
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().map(|r| match r {
                    Reply::Page(html) => Reply::Page(html.clone()),
                    Reply::Fail(f) => Reply::Fail(f.clone()),
                    Reply::Hang => Reply::Hang,
                }),
            }
        };
        self.calls.lock().unwrap().push(Call {
            url: key,
            port: identity.map(|i| i.proxy_port),
            at: Instant::now(),
        });

        match reply {
            Some(Reply::Page(html)) => Ok(html),
            Some(Reply::Fail(failure)) => Err(failure),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(FetchFailure::Timeout)
            }
            None => Err(FetchFailure::Status(404)),
        }
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        url: &str,
        identity: Option<&SessionIdentity>,
        _timeout: Duration,
    ) -> Result<String, FetchFailure> {
        self.answer(url.to_string(), identity).await
    }

    /// Form posts are scripted under `url#artist_id`.
    async fn submit_form(
        &self,
        url: &str,
        form: &[(&'static str, String)],
        identity: Option<&SessionIdentity>,
        _timeout: Duration,
    ) -> Result<String, FetchFailure> {
        let artist_id = form
            .iter()
            .find(|(name, _)| *name == "artist_id")
            .map(|(_, value)| value.as_str())
            .unwrap_or_default();
        self.answer(format!("{url}#{artist_id}"), identity).await
    }
}

fn test_config(dir: &tempfile::TempDir) -> ResolverConfig {
    ResolverConfig {
        cache_dir: dir.path().join("cache"),
        session_state_file: dir.path().join("session.json"),
        min_request_interval: 0.0,
        retry_delay: 1.0,
        max_retries: 3,
        min_content_length: 0,
        ..Default::default()
    }
}

fn resolver(config: ResolverConfig, fetcher: &Arc<ScriptedFetcher>) -> Resolver {
    Resolver::new(config, fetcher.clone()).unwrap()
}

fn release_page(artist: &str, title: &str, genres: &[&str], descriptors: &[&str]) -> String {
    let genres = genres
        .iter()
        .map(|g| format!(r#"<a class="genre" href="/genre/{g}/">{g}</a>"#))
        .collect::<Vec<_>>()
        .join(", ");
    let descriptors: String = descriptors
        .iter()
        .map(|d| format!(r#"<meta content="{d}" />"#))
        .collect();
    format!(
        r#"<html><body>
          <div class="album_title">{title}</div>
          <table class="album_info">
            <tr><td><a class="artist" href="/artist/x">{artist}</a></td></tr>
            <tr class="release_genres"><td>{genres}</td></tr>
            <tr class="release_descriptors"><td>{descriptors}</td></tr>
          </table>
        </body></html>"#
    )
}

fn search_page(results: &[(&str, &str, i32, &str)]) -> String {
    let tables: String = results
        .iter()
        .map(|(artist, title, year, href)| {
            format!(
                r#"<table><tr>
                  <td><a class="artist" href="/artist/x">{artist}</a></td>
                  <td><a class="searchpage" href="{href}">{title}</a></td>
                  <td>{year}</td>
                </tr></table>"#
            )
        })
        .collect();
    format!(r#"<html><body><table><tr class="infobox"><td>{tables}</td></tr></table></body></html>"#)
}

fn artist_page(name: &str, genres: &[&str]) -> String {
    let genres = genres
        .iter()
        .map(|g| format!(r#"<a class="genre" href="/genre/{g}/">{g}</a>"#))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"<html><body>
          <h1 class="artist_name_hdr">{name}</h1>
          <div class="artist_info_main">
            <div class="info_hdr">Genres</div>
            <div class="info_content">{genres}</div>
          </div>
        </body></html>"#
    )
}

fn artist_page_with_id(name: &str, id: &str) -> String {
    artist_page(name, &["Art Rock"]).replace(
        "</body>",
        &format!(r#"<input class="rym_shortcut" type="text" value="[Artist{id}]" readonly></body>"#),
    )
}

/// Discography filter response in the site's callback form.
fn discography_response(releases: &[(&str, &str, &str)]) -> String {
    let items: String = releases
        .iter()
        .map(|(title, date, href)| {
            format!(
                r#"<div class="disco_release"><div class="disco_info"><a class="album" href="{href}">{title}</a></div><span class="disco_year_ymd">{date}</span></div>"#
            )
        })
        .collect();
    format!("RYMartistPage._searchCallback('ok computer', '{}')", items.replace('/', "\\/"))
}

fn discography_key(artist_id: &str) -> String {
    format!("{}#{artist_id}", discography_url())
}

fn proxy_config(dir: &tempfile::TempDir) -> ResolverConfig {
    ResolverConfig {
        proxy: Some(ProxyConfig {
            host: "gate.proxy.example".to_string(),
            port: 7000,
            username: "customer".to_string(),
            password: "secret".to_string(),
            use_tls: false,
        }),
        port_range_start: 10001,
        port_range_end: 10010,
        min_rotation_spacing: 0.0,
        ..test_config(dir)
    }
}

fn ok_computer() -> Query {
    Query::album("Radiohead", "OK Computer", Some(1997))
}

fn ok_computer_direct() -> String {
    release_url("Radiohead", "OK Computer", ReleaseType::Album)
}

fn ok_computer_search() -> String {
    search_url("Radiohead OK Computer", SearchKind::Release)
}

// ─────────────────────── direct and search ───────────────────────

#[tokio::test]
async fn test_direct_release_page_resolves() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(
        &ok_computer_direct(),
        vec![Reply::Page(release_page(
            "Radiohead",
            "OK Computer",
            &["Alternative Rock", "Art Rock"],
            &["melancholic", "anxious"],
        ))],
    );

    let resolver = resolver(test_config(&dir), &fetcher);
    let Resolution::Found(metadata) = resolver.resolve(&ok_computer()).await else {
        panic!("expected a match");
    };

    assert_eq!(metadata.artist, "Radiohead");
    assert_eq!(metadata.album.as_deref(), Some("OK Computer"));
    assert_eq!(metadata.album_type, Some(ReleaseType::Album));
    assert_eq!(metadata.genres, vec!["Alternative Rock", "Art Rock"]);
    assert_eq!(metadata.descriptors, vec!["melancholic", "anxious"]);
    assert_eq!(metadata.url, ok_computer_direct());
    assert_eq!(fetcher.total_calls(), 1);
}

#[tokio::test]
async fn test_search_fallback_picks_matching_year() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    let reissue = "/release/comp/radiohead/ok-computer-collectors-edition/";
    let original = "/release/album/radiohead/ok-computer-1/";
    fetcher.on(
        &ok_computer_search(),
        vec![Reply::Page(search_page(&[
            ("Radiohead", "OK Computer", 2009, reissue),
            ("Radiohead", "OK Computer", 1997, original),
            ("Radiohead", "OK Computer OKNOTOK 1997 2017", 2017, "/release/album/radiohead/oknotok/"),
        ]))],
    );
    let original_url = format!("https://rateyourmusic.com{original}");
    fetcher.on(
        &original_url,
        vec![Reply::Page(release_page(
            "Radiohead",
            "OK Computer",
            &["Alternative Rock"],
            &[],
        ))],
    );

    let resolver = resolver(test_config(&dir), &fetcher);
    let metadata = resolver.lookup(&ok_computer()).await.unwrap();

    assert_eq!(metadata.url, original_url);
    // Direct URL 404, artist page 404, artist search 404, release search, winner page.
    assert_eq!(fetcher.total_calls(), 5);
    assert_eq!(fetcher.calls_to(&ok_computer_direct()).len(), 1);
}

#[tokio::test]
async fn test_direct_page_of_other_release_falls_back_to_search() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(
        &ok_computer_direct(),
        vec![Reply::Page(release_page("Radiohead", "Amnesiac", &["Art Rock"], &[]))],
    );
    fetcher.on(&ok_computer_search(), vec![Reply::Page(search_page(&[]))]);

    let resolver = resolver(test_config(&dir), &fetcher);
    assert_eq!(resolver.resolve(&ok_computer()).await, Resolution::NoMatch);
    assert_eq!(fetcher.calls_to(&ok_computer_search()).len(), 1);
}

#[tokio::test]
async fn test_unrelated_results_are_no_match() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(
        &ok_computer_search(),
        vec![Reply::Page(search_page(&[(
            "Björk",
            "Homogenic",
            1997,
            "/release/album/bjork/homogenic/",
        )]))],
    );

    let resolver = resolver(test_config(&dir), &fetcher);
    assert_eq!(resolver.resolve(&ok_computer()).await, Resolution::NoMatch);
    assert!(fetcher
        .calls_to("https://rateyourmusic.com/release/album/bjork/homogenic/")
        .is_empty());
}

#[tokio::test]
async fn test_winner_that_is_not_a_release_page_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    let href = "/release/album/radiohead/ok-computer-1/";
    let winner = format!("https://rateyourmusic.com{href}");
    fetcher.on(
        &ok_computer_search(),
        vec![Reply::Page(search_page(&[("Radiohead", "OK Computer", 1997, href)]))],
    );
    fetcher.on(&winner, vec![Reply::Page(artist_page("Radiohead", &[]))]);

    let resolver = resolver(test_config(&dir), &fetcher);
    assert_eq!(
        resolver.resolve(&ok_computer()).await,
        Resolution::Fatal(ParseError::NotAReleasePage { url: winner.clone() })
    );
    // Parse errors are not retried.
    assert_eq!(fetcher.calls_to(&winner).len(), 1);
}

#[tokio::test]
async fn test_artist_lookup_direct_and_search() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(
        &artist_url("Radiohead"),
        vec![Reply::Page(artist_page("Radiohead", &["Art Rock", "Alternative Rock"]))],
    );
    let burial_page = "https://rateyourmusic.com/artist/burial-1";
    fetcher.on(
        &search_url("Burial", SearchKind::Artist),
        vec![Reply::Page(
            r#"<html><body><a class="searchpage" href="/artist/burial-1">Burial</a></body></html>"#
                .to_string(),
        )],
    );
    fetcher.on(burial_page, vec![Reply::Page(artist_page("Burial", &["Future Garage"]))]);

    let resolver = resolver(test_config(&dir), &fetcher);

    let radiohead = resolver.lookup(&Query::artist("Radiohead")).await.unwrap();
    assert_eq!(radiohead.genres, vec!["Art Rock", "Alternative Rock"]);
    assert_eq!(radiohead.album, None);
    assert!(radiohead.descriptors.is_empty());

    let burial = resolver.lookup(&Query::artist("Burial")).await.unwrap();
    assert_eq!(burial.url, burial_page);
    assert_eq!(burial.genres, vec!["Future Garage"]);
}

// ─────────────────────── discography ───────────────────────

#[tokio::test]
async fn test_discography_filter_finds_release_and_remembers_artist_id() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    let original = "/release/album/radiohead/ok-computer-1/";
    let original_url = format!("https://rateyourmusic.com{original}");
    fetcher.on(
        &artist_url("Radiohead"),
        vec![Reply::Page(artist_page_with_id("Radiohead", "123"))],
    );
    fetcher.on(
        &discography_key("123"),
        vec![Reply::Page(discography_response(&[
            ("OK Computer", "2009-04-14", "/release/comp/radiohead/ok-computer-collectors-edition/"),
            ("OK Computer", "1997-06-16", original),
        ]))],
    );
    fetcher.on(
        &original_url,
        vec![Reply::Page(release_page("Radiohead", "OK Computer", &["Art Rock"], &[]))],
    );

    let config = test_config(&dir);
    let first = resolver(config.clone(), &fetcher);
    let metadata = first.lookup(&ok_computer()).await.unwrap();
    assert_eq!(metadata.url, original_url);
    assert!(fetcher.calls_to(&ok_computer_search()).is_empty());
    assert_eq!(fetcher.calls_to(&discography_key("123")).len(), 1);
    assert!(config.cache_dir.join(artist_ids::STORE_FILE).exists());

    // Drop the cached pages; the artist ID survives in its own file.
    for entry in std::fs::read_dir(&config.cache_dir).unwrap().flatten() {
        if entry.path().is_file() {
            std::fs::remove_file(entry.path()).unwrap();
        }
    }
    let second = resolver(config, &fetcher);
    assert_eq!(second.lookup(&ok_computer()).await.unwrap().url, original_url);
    assert_eq!(fetcher.calls_to(&artist_url("Radiohead")).len(), 1);
    assert_eq!(fetcher.calls_to(&discography_key("123")).len(), 2);
}

#[tokio::test]
async fn test_empty_discography_falls_back_to_release_search() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    let href = "/release/album/radiohead/ok-computer-1/";
    fetcher.on(
        &artist_url("Radiohead"),
        vec![Reply::Page(artist_page_with_id("Radiohead", "123"))],
    );
    fetcher.on(&discography_key("123"), vec![Reply::Page(discography_response(&[]))]);
    fetcher.on(
        &ok_computer_search(),
        vec![Reply::Page(search_page(&[("Radiohead", "OK Computer", 1997, href)]))],
    );
    fetcher.on(
        &format!("https://rateyourmusic.com{href}"),
        vec![Reply::Page(release_page("Radiohead", "OK Computer", &["Art Rock"], &[]))],
    );

    let resolver = resolver(test_config(&dir), &fetcher);
    assert!(resolver.resolve(&ok_computer()).await.is_found());
    assert_eq!(fetcher.calls_to(&discography_key("123")).len(), 1);
    assert_eq!(fetcher.calls_to(&ok_computer_search()).len(), 1);
}

#[tokio::test]
async fn test_artist_page_without_id_skips_discography() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(
        &artist_url("Radiohead"),
        vec![Reply::Page(artist_page("Radiohead", &["Art Rock"]))],
    );
    fetcher.on(&ok_computer_search(), vec![Reply::Page(search_page(&[]))]);

    let resolver = resolver(test_config(&dir), &fetcher);
    assert_eq!(resolver.resolve(&ok_computer()).await, Resolution::NoMatch);
    assert_eq!(fetcher.calls_to(&ok_computer_search()).len(), 1);
    // Direct page, artist page, release search.
    assert_eq!(fetcher.total_calls(), 3);
}

#[tokio::test]
async fn test_search_results_that_are_not_releases_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    let list = "/list/someone/ok-computer/";
    fetcher.on(
        &ok_computer_search(),
        vec![Reply::Page(search_page(&[("Radiohead", "OK Computer", 1997, list)]))],
    );

    let resolver = resolver(test_config(&dir), &fetcher);
    assert_eq!(resolver.resolve(&ok_computer()).await, Resolution::NoMatch);
    assert!(fetcher
        .calls_to(&format!("https://rateyourmusic.com{list}"))
        .is_empty());
}

// ─────────────────────── cache ───────────────────────

#[tokio::test]
async fn test_cached_pages_skip_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(
        &ok_computer_direct(),
        vec![Reply::Page(release_page("Radiohead", "OK Computer", &["Art Rock"], &[]))],
    );

    let first = resolver(test_config(&dir), &fetcher);
    let found = first.resolve(&ok_computer()).await;
    assert!(found.is_found());
    assert_eq!(first.resolve(&ok_computer()).await, found);
    assert_eq!(fetcher.total_calls(), 1);
    assert_eq!(first.cache_stats().unwrap().entries, 1);

    // A fresh resolver with no network answers from the same cache.
    let offline = Resolver::new(test_config(&dir), Arc::new(OfflineFetcher)).unwrap();
    assert_eq!(offline.resolve(&ok_computer()).await, found);
}

#[tokio::test]
async fn test_corrupt_cache_entry_is_refetched() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(
        &ok_computer_direct(),
        vec![Reply::Page(release_page("Radiohead", "OK Computer", &["Art Rock"], &[]))],
    );
    let config = test_config(&dir);
    let resolver = resolver(config.clone(), &fetcher);
    assert!(resolver.resolve(&ok_computer()).await.is_found());

    for entry in std::fs::read_dir(&config.cache_dir).unwrap().flatten() {
        std::fs::write(entry.path(), b"{\"key\": \"trunc").unwrap();
    }

    assert!(resolver.resolve(&ok_computer()).await.is_found());
    assert_eq!(fetcher.total_calls(), 2);
}

#[tokio::test]
async fn test_unavailable_pages_are_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(&ok_computer_search(), vec![Reply::Page(search_page(&[]))]);

    let resolver = resolver(test_config(&dir), &fetcher);
    assert_eq!(resolver.resolve(&ok_computer()).await, Resolution::NoMatch);
    // Only the search page is cached; the 404 direct page is not.
    assert_eq!(resolver.cache_stats().unwrap().entries, 1);
    assert_eq!(resolver.clear_cache().unwrap(), 1);
}

// ─────────────────────── retry, rotation, timeouts ───────────────────────

#[tokio::test(start_paused = true)]
async fn test_three_transient_failures_exhaust_with_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(
        &ok_computer_direct(),
        vec![Reply::Fail(FetchFailure::Network("connection reset".into()))],
    );

    let resolver = resolver(test_config(&dir), &fetcher);
    assert_eq!(
        resolver.resolve(&ok_computer()).await,
        Resolution::Exhausted {
            attempts: 3,
            last_error: ErrorClass::Transient
        }
    );

    let calls = fetcher.calls_to(&ok_computer_direct());
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1].1 - calls[0].1, Duration::from_secs(1));
    assert_eq!(calls[2].1 - calls[1].1, Duration::from_secs(2));
    // Exhaustion ends the resolution: no search afterwards.
    assert_eq!(fetcher.total_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_block_forces_rotation_before_retry() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(
        &ok_computer_direct(),
        vec![
            Reply::Fail(FetchFailure::Challenge),
            Reply::Page(release_page("Radiohead", "OK Computer", &["Art Rock"], &[])),
        ],
    );

    let config = proxy_config(&dir);
    let state_file = config.session_state_file.clone();
    let resolver = resolver(config, &fetcher);

    assert!(resolver.resolve(&ok_computer()).await.is_found());
    let ports: Vec<_> = fetcher
        .calls_to(&ok_computer_direct())
        .into_iter()
        .map(|(port, _)| port)
        .collect();
    assert_eq!(ports, vec![Some(10001), Some(10002)]);

    resolver.shutdown().await.unwrap();
    let state = std::fs::read_to_string(state_file).unwrap();
    assert!(state.contains("10002"));
    assert!(state.contains("10001"), "blocked port should be recorded");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_retried_as_transient() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(
        &ok_computer_direct(),
        vec![
            Reply::Hang,
            Reply::Page(release_page("Radiohead", "OK Computer", &["Art Rock"], &[])),
        ],
    );

    let config = ResolverConfig {
        page_timeout_ms: 500,
        ..test_config(&dir)
    };
    let resolver = resolver(config, &fetcher);
    let started = Instant::now();
    assert!(resolver.resolve(&ok_computer()).await.is_found());

    let calls = fetcher.calls_to(&ok_computer_direct());
    assert_eq!(calls.len(), 2);
    // 500 ms timeout plus 1 s backoff.
    assert_eq!(calls[1].1 - started, Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn test_minimal_content_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(
        &ok_computer_direct(),
        vec![
            Reply::Page("<html></html>".to_string()),
            Reply::Page(release_page("Radiohead", "OK Computer", &["Art Rock"], &[])),
        ],
    );

    let config = ResolverConfig {
        min_content_length: 100,
        ..test_config(&dir)
    };
    let resolver = resolver(config, &fetcher);
    assert!(resolver.resolve(&ok_computer()).await.is_found());
    assert_eq!(fetcher.calls_to(&ok_computer_direct()).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limiter_spaces_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(&ok_computer_search(), vec![Reply::Page(search_page(&[]))]);

    let config = ResolverConfig {
        min_request_interval: 3.0,
        humanize_request_interval: false,
        ..test_config(&dir)
    };
    let resolver = resolver(config, &fetcher);
    assert_eq!(resolver.resolve(&ok_computer()).await, Resolution::NoMatch);

    // Direct page, artist page, artist search, then the release search.
    let direct = fetcher.calls_to(&ok_computer_direct());
    let artist = fetcher.calls_to(&artist_url("Radiohead"));
    let search = fetcher.calls_to(&ok_computer_search());
    assert_eq!(artist[0].1 - direct[0].1, Duration::from_secs(3));
    assert_eq!(search[0].1 - direct[0].1, Duration::from_secs(9));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_resolution_leaves_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(
        &ok_computer_direct(),
        vec![Reply::Page(release_page("Radiohead", "OK Computer", &["Art Rock"], &[]))],
    );
    let kid_a = Query::album("Radiohead", "Kid A", Some(2000));
    let kid_a_direct = release_url("Radiohead", "Kid A", ReleaseType::Album);
    fetcher.on(&kid_a_direct, vec![Reply::Hang]);

    let config = ResolverConfig {
        concurrent_requests: 1,
        ..proxy_config(&dir)
    };
    let resolver = resolver(config, &fetcher);
    assert!(resolver.resolve(&ok_computer()).await.is_found());
    let identity = resolver.current_identity().await;
    assert!(identity.is_some());
    let entries = resolver.cache_stats().unwrap().entries;

    let abandoned = tokio::time::timeout(Duration::from_secs(5), resolver.resolve(&kid_a)).await;
    assert!(abandoned.is_err());
    assert_eq!(fetcher.calls_to(&kid_a_direct).len(), 1);
    assert_eq!(resolver.cache_stats().unwrap().entries, entries);
    assert_eq!(resolver.current_identity().await, identity);

    // The permit and the rate gate were released with the dropped future.
    fetcher.on(
        &kid_a_direct,
        vec![Reply::Page(release_page("Radiohead", "Kid A", &["Electronic"], &[]))],
    );
    let metadata = resolver.lookup(&kid_a).await.unwrap();
    assert_eq!(metadata.album.as_deref(), Some("Kid A"));
    assert_eq!(resolver.cache_stats().unwrap().entries, entries + 1);
    assert_eq!(resolver.current_identity().await, identity);
}

// ─────────────────────── batch and genres ───────────────────────

#[tokio::test(start_paused = true)]
async fn test_batch_preserves_order_and_isolates_failures() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(
        &ok_computer_direct(),
        vec![Reply::Page(release_page("Radiohead", "OK Computer", &["Art Rock"], &[]))],
    );
    fetcher.on(
        &release_url("Radiohead", "Kid A", ReleaseType::Album),
        vec![Reply::Fail(FetchFailure::Status(500))],
    );
    fetcher.on(
        &release_url("Björk", "Homogenic", ReleaseType::Album),
        vec![Reply::Page(release_page("Björk", "Homogenic", &["Art Pop"], &[]))],
    );

    let config = ResolverConfig {
        concurrent_requests: 2,
        ..test_config(&dir)
    };
    let resolver = resolver(config, &fetcher);
    let results = resolver
        .resolve_batch(&[
            ok_computer(),
            Query::album("Radiohead", "Kid A", Some(2000)),
            Query::album("Björk", "Homogenic", None),
        ])
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(
        results[0].clone().into_metadata().unwrap().album.as_deref(),
        Some("OK Computer")
    );
    assert_eq!(
        results[1],
        Resolution::Exhausted {
            attempts: 3,
            last_error: ErrorClass::Transient
        }
    );
    assert_eq!(
        results[2].clone().into_metadata().unwrap().artist,
        "Björk"
    );
}

#[tokio::test]
async fn test_genres_expanded_with_parents() {
    let dir = tempfile::tempdir().unwrap();
    let hierarchy = dir.path().join("genres.json");
    std::fs::write(
        &hierarchy,
        r#"{
            "Rock": {"depth": 0, "parents": []},
            "Art Rock": {"depth": 1, "parents": ["Rock"]},
            "Alternative Rock": {"depth": 1, "parents": ["Rock"]}
        }"#,
    )
    .unwrap();

    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(
        &ok_computer_direct(),
        vec![Reply::Page(release_page(
            "Radiohead",
            "OK Computer",
            &["Alternative Rock", "Art Rock"],
            &[],
        ))],
    );

    let config = ResolverConfig {
        genre_hierarchy_file: Some(hierarchy),
        ..test_config(&dir)
    };
    let resolver = resolver(config, &fetcher);
    let metadata = resolver.lookup(&ok_computer()).await.unwrap();
    assert_eq!(metadata.genres, vec!["Alternative Rock", "Art Rock", "Rock"]);
}

#[tokio::test]
async fn test_missing_genre_file_disables_expansion() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.on(
        &ok_computer_direct(),
        vec![Reply::Page(release_page("Radiohead", "OK Computer", &["Art Rock"], &[]))],
    );

    let config = ResolverConfig {
        genre_hierarchy_file: Some(dir.path().join("absent.json")),
        ..test_config(&dir)
    };
    let resolver = resolver(config, &fetcher);
    let metadata = resolver.lookup(&ok_computer()).await.unwrap();
    assert_eq!(metadata.genres, vec!["Art Rock"]);
}
