//! Query and result types exposed to callers.

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::retry::ErrorClass;

/// Kind of release, mapped onto the catalog's URL segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseType {
    #[default]
    Album,
    Single,
    Ep,
    Compilation,
}

impl ReleaseType {
    /// Path segment used by release URLs.
    pub fn url_segment(self) -> &'static str {
        match self {
            ReleaseType::Album => "album",
            ReleaseType::Single => "single",
            ReleaseType::Ep => "ep",
            ReleaseType::Compilation => "comp",
        }
    }

    /// Inverse of [`ReleaseType::url_segment`].
    pub fn from_url_segment(segment: &str) -> Option<Self> {
        match segment {
            "album" => Some(ReleaseType::Album),
            "single" => Some(ReleaseType::Single),
            "ep" => Some(ReleaseType::Ep),
            "comp" => Some(ReleaseType::Compilation),
            _ => None,
        }
    }

    /// Release type encoded in a `/release/{type}/...` URL.
    pub fn from_release_url(url: &str) -> Option<Self> {
        let path = url::Url::parse(url).ok()?;
        let mut segments = path.path_segments()?;
        match segments.next() {
            Some("release") => segments.next().and_then(Self::from_url_segment),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReleaseType::Album => "album",
            ReleaseType::Single => "single",
            ReleaseType::Ep => "ep",
            ReleaseType::Compilation => "compilation",
        }
    }
}

/// A lookup request. `album: None` asks for artist-level metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub artist: String,
    pub album: Option<String>,
    pub year: Option<i32>,
    #[serde(default)]
    pub release_type: ReleaseType,
}

impl Query {
    /// Album lookup.
    pub fn album(artist: impl Into<String>, album: impl Into<String>, year: Option<i32>) -> Self {
        Self {
            artist: artist.into(),
            album: Some(album.into()),
            year,
            release_type: ReleaseType::Album,
        }
    }

    /// Artist-only lookup.
    pub fn artist(artist: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            album: None,
            year: None,
            release_type: ReleaseType::Album,
        }
    }

    pub fn with_release_type(mut self, release_type: ReleaseType) -> Self {
        self.release_type = release_type;
        self
    }

    pub fn is_artist_lookup(&self) -> bool {
        self.album.is_none()
    }
}

/// Resolved metadata for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub artist: String,
    pub album: Option<String>,
    pub album_type: Option<ReleaseType>,
    /// Most specific first.
    pub genres: Vec<String>,
    pub descriptors: Vec<String>,
    pub url: String,
}

/// Terminal state of one resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found(Metadata),
    /// Nothing on the site matched well enough. A normal outcome.
    NoMatch,
    /// Every permitted fetch attempt failed.
    Exhausted { attempts: u32, last_error: ErrorClass },
    /// A fetched page could not be interpreted.
    Fatal(ParseError),
}

impl Resolution {
    /// Collapse into the upward "metadata or not found" surface.
    pub fn into_metadata(self) -> Option<Metadata> {
        match self {
            Resolution::Found(metadata) => Some(metadata),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
}
