//! Catalog site addressing: URL construction for release, artist and search
//! pages, and the discography filter endpoint.

pub mod parse;

use url::Url;

use crate::text::slugify;
use crate::types::ReleaseType;

pub const BASE_URL: &str = "https://rateyourmusic.com";

/// What a search page lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Release,
    Artist,
}

impl SearchKind {
    fn searchtype(self) -> &'static str {
        match self {
            SearchKind::Release => "l",
            SearchKind::Artist => "a",
        }
    }
}

/// Direct release page: `/release/{type}/{artist}/{album}/`.
pub fn release_url(artist: &str, album: &str, release_type: ReleaseType) -> String {
    format!(
        "{BASE_URL}/release/{}/{}/{}/",
        release_type.url_segment(),
        slugify(artist),
        slugify(album)
    )
}

/// Direct artist page: `/artist/{artist}`.
pub fn artist_url(artist: &str) -> String {
    format!("{BASE_URL}/artist/{}", slugify(artist))
}

/// Search page for `term`.
pub fn search_url(term: &str, kind: SearchKind) -> String {
    let base = format!("{BASE_URL}/search");
    match Url::parse_with_params(
        &base,
        &[("searchtype", kind.searchtype()), ("searchterm", term.trim())],
    ) {
        Ok(url) => url.to_string(),
        Err(_) => base,
    }
}

/// Endpoint that filters one artist's discography by title.
pub fn discography_url() -> String {
    format!("{BASE_URL}/httprequest/FilterDiscography")
}

/// Form fields for a discography filter request.
pub fn discography_form(artist_id: &str, album: &str) -> Vec<(&'static str, String)> {
    vec![
        ("artist_id", artist_id.to_string()),
        ("sort", "release_date.a,title.a".to_string()),
        ("searchterm", album.trim().to_string()),
        ("show_appearances", "true".to_string()),
        ("action", "FilterDiscography".to_string()),
        ("rym_ajax_req", "1".to_string()),
        ("request_token", String::new()),
    ]
}

/// Resolve a site-relative link against the base URL.
pub fn absolute_url(href: &str) -> Option<String> {
    let base = Url::parse(BASE_URL).ok()?;
    base.join(href.trim()).ok().map(|u| u.to_string())
}

pub fn is_release_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| u.path().starts_with("/release/"))
        .unwrap_or(false)
}

pub fn is_artist_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| u.path().starts_with("/artist/"))
        .unwrap_or(false)
}
