//! rym-resolver: resilient music-metadata resolution against an anti-bot protected catalog.
//!
//! A [`Resolver`] answers (artist, album, year) queries with genres,
//! descriptors and the canonical page URL. It reuses fetched pages from a
//! persistent [`cache::ResponseCache`], paces requests through a
//! [`rate_limit::RateLimiter`], routes them through rotating proxy identities
//! managed by [`session::SessionRotator`], and retries transient and blocked
//! fetches with exponential backoff. Artist catalog IDs learned along the way
//! are remembered in an [`artist_ids::ArtistIdStore`].
//!
//! ```no_run
//! use rym_resolver::{Query, Resolver, ResolverConfig};
//!
//! # async fn run() -> rym_resolver::ResolveResult<()> {
//! let resolver = Resolver::with_http(ResolverConfig::default())?;
//! let query = Query::album("Radiohead", "OK Computer", Some(1997));
//! if let Some(metadata) = resolver.lookup(&query).await {
//!     println!("{}: {}", metadata.url, metadata.genres.join(", "));
//! }
//! resolver.shutdown().await
//! # }
//! ```

pub mod artist_ids;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod genres;
pub mod logging;
pub mod matcher;
mod persist;
pub mod rate_limit;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod site;
pub mod text;
pub mod types;

pub use config::{BlockedRetryBudget, ProxyConfig, ResolverConfig, RotationMethod, SessionType};
pub use error::{ConfigError, FetchFailure, ParseError, ResolveError, ResolveResult};
pub use fetch::{HttpFetcher, OfflineFetcher, PageFetcher};
pub use resolver::Resolver;
pub use retry::ErrorClass;
pub use session::SessionIdentity;
pub use types::{Metadata, Query, ReleaseType, Resolution};
