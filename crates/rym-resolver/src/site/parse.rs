//! HTML extraction for search results, release pages, artist pages and
//! discography filter responses.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::absolute_url;
use crate::error::ParseError;
use crate::text::dedup_preserving_order;

/// One row of a search results page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchEntry {
    pub title: String,
    pub artist: String,
    pub year: Option<i32>,
    /// Absolute URL of the release or artist page.
    pub url: String,
}

/// Data extracted from a release page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleasePage {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genres: Vec<String>,
    pub descriptors: Vec<String>,
}

/// Data extracted from an artist page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtistPage {
    pub name: Option<String>,
    pub genres: Vec<String>,
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

fn text_of(element: &ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_document(html: &str) -> Result<Html, ParseError> {
    if html.trim().is_empty() {
        return Err(ParseError::EmptyDocument);
    }
    Ok(Html::parse_document(html))
}

// ── Search results ──────────────────────────────────────────────────────────

/// Release search: each nested table in the `tr.infobox` row is one result.
///
/// A page without results yields an empty list.
pub fn parse_release_search(html: &str) -> Result<Vec<SearchEntry>, ParseError> {
    let document = parse_document(html)?;
    let infobox = selector("tr.infobox");
    let table = selector("table");
    let artist_link = selector("a.artist");
    let release_link = selector("a.searchpage");
    let cell = selector("td");

    let mut entries: Vec<SearchEntry> = Vec::new();
    for row in document.select(&infobox) {
        for result in row.select(&table) {
            let Some(artist) = result.select(&artist_link).next() else {
                continue;
            };
            let Some(link) = result.select(&release_link).next() else {
                continue;
            };
            let Some(url) = link.value().attr("href").and_then(absolute_url) else {
                continue;
            };
            let year = result
                .select(&cell)
                .map(|td| text_of(&td))
                .find(|t| t.len() == 4 && t.chars().all(|c| c.is_ascii_digit()))
                .and_then(|t| t.parse().ok());

            let entry = SearchEntry {
                title: text_of(&link),
                artist: text_of(&artist),
                year,
                url,
            };
            if !entries.iter().any(|e| e.url == entry.url) {
                entries.push(entry);
            }
        }
    }

    tracing::debug!("parsed {} release search results", entries.len());
    Ok(entries)
}

/// Artist search: every `a.searchpage` link pointing at an artist page.
pub fn parse_artist_search(html: &str) -> Result<Vec<SearchEntry>, ParseError> {
    let document = parse_document(html)?;
    let link = selector(r#"a.searchpage[href*="/artist/"]"#);

    let mut entries: Vec<SearchEntry> = Vec::new();
    for anchor in document.select(&link) {
        let Some(url) = anchor.value().attr("href").and_then(absolute_url) else {
            continue;
        };
        let name = text_of(&anchor);
        if name.is_empty() || entries.iter().any(|e| e.url == url) {
            continue;
        }
        entries.push(SearchEntry {
            title: name.clone(),
            artist: name,
            year: None,
            url,
        });
    }

    tracing::debug!("parsed {} artist search results", entries.len());
    Ok(entries)
}

// ── Release page ────────────────────────────────────────────────────────────

/// Genres, descriptors, title and artist of a release page.
///
/// A document without a `tr.release_genres` row is not a release page.
pub fn parse_release_page(html: &str, url: &str) -> Result<ReleasePage, ParseError> {
    let document = parse_document(html)?;

    let Some(genre_row) = document.select(&selector("tr.release_genres")).next() else {
        return Err(ParseError::NotAReleasePage {
            url: url.to_string(),
        });
    };

    let genres = genre_row
        .select(&selector("a.genre"))
        .map(|a| text_of(&a))
        .filter(|g| !g.is_empty())
        .collect();

    let descriptors = document
        .select(&selector("tr.release_descriptors meta[content]"))
        .filter_map(|meta| meta.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect();

    let title = document
        .select(&selector(".album_title"))
        .next()
        .and_then(|el| el.text().map(str::trim).find(|t| !t.is_empty()))
        .map(str::to_string);

    let artist = document
        .select(&selector(".album_info a.artist"))
        .next()
        .map(|a| text_of(&a))
        .filter(|a| !a.is_empty());

    Ok(ReleasePage {
        title,
        artist,
        genres: dedup_preserving_order(genres),
        descriptors: dedup_preserving_order(descriptors),
    })
}

// ── Artist page ─────────────────────────────────────────────────────────────

/// Name and genres of an artist page.
///
/// Genres come from the `.info_content` block after the "Genres" header.
pub fn parse_artist_page(html: &str, url: &str) -> Result<ArtistPage, ParseError> {
    let document = parse_document(html)?;

    let Some(main) = document.select(&selector(".artist_info_main")).next() else {
        return Err(ParseError::NotAnArtistPage {
            url: url.to_string(),
        });
    };

    let mut genres = Vec::new();
    let genre_link = selector("a.genre");
    for header in main.select(&selector("div.info_hdr")) {
        if !text_of(&header).eq_ignore_ascii_case("genres") {
            continue;
        }
        let content = header
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|el| {
                el.value().name() == "div" && el.value().classes().any(|c| c == "info_content")
            });
        if let Some(content) = content {
            genres.extend(
                content
                    .select(&genre_link)
                    .map(|a| text_of(&a))
                    .filter(|g| !g.is_empty()),
            );
        }
        break;
    }

    let name = document
        .select(&selector(".artist_name_hdr"))
        .next()
        .map(|h| text_of(&h))
        .filter(|n| !n.is_empty());

    Ok(ArtistPage {
        name,
        genres: dedup_preserving_order(genres),
    })
}

// ── Discography ─────────────────────────────────────────────────────────────

/// One release listed by a discography filter response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscographyEntry {
    pub title: String,
    pub year: Option<i32>,
    pub url: String,
}

fn shortcut_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[Artist(\d+)\]$").expect("valid regex"))
}

fn callback_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)_searchCallback\(\s*'(?:[^'\\]|\\.)*'\s*,\s*'((?:[^'\\]|\\.)*)'\s*\)")
            .expect("valid regex")
    })
}

/// Catalog ID of the artist a page belongs to, read from its shortcut box
/// (`<input class="rym_shortcut" value="[Artist1521023]">`).
pub fn parse_artist_id(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let shortcut = selector("input.rym_shortcut");
    let id = document
        .select(&shortcut)
        .filter_map(|input| input.value().attr("value"))
        .find_map(|value| {
            shortcut_re()
                .captures(value.trim())
                .map(|captures| captures[1].to_string())
        });
    if id.is_none() {
        tracing::debug!("no artist shortcut on page");
    }
    id
}

/// Releases listed in a discography filter response.
///
/// The endpoint answers with a JavaScript callback carrying the HTML as a
/// single-quoted string argument. A bare HTML body is accepted too.
pub fn parse_discography(body: &str) -> Result<Vec<DiscographyEntry>, ParseError> {
    if body.trim().is_empty() {
        return Err(ParseError::EmptyDocument);
    }
    let html = match callback_re().captures(body) {
        Some(captures) => unescape_js(&captures[1]),
        None => body.to_string(),
    };

    let fragment = Html::parse_fragment(&html);
    let release = selector(".disco_release");
    let album_link = selector(".disco_info .album");
    let year_cell = selector(".disco_year_ymd");

    let mut entries: Vec<DiscographyEntry> = Vec::new();
    for item in fragment.select(&release) {
        let Some(link) = item.select(&album_link).next() else {
            continue;
        };
        let Some(url) = link.value().attr("href").and_then(absolute_url) else {
            continue;
        };
        let title = text_of(&link);
        if title.is_empty() || entries.iter().any(|e| e.url == url) {
            continue;
        }
        let year = item
            .select(&year_cell)
            .next()
            .map(|cell| text_of(&cell))
            .and_then(|text| {
                text.get(..4)
                    .filter(|y| y.chars().all(|c| c.is_ascii_digit()))
                    .and_then(|y| y.parse().ok())
            });
        entries.push(DiscographyEntry { title, year, url });
    }

    tracing::debug!("parsed {} discography entries", entries.len());
    Ok(entries)
}

/// Undo backslash escapes of a JavaScript string literal.
fn unescape_js(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
