//! Response cache: fetched pages stored on disk, keyed by request fingerprint.
//!
//! ## Layout
//!
//! One JSON file per entry, named `<fingerprint>.json`, holding the key, the
//! source URL, the fetch time and the page content. Writes go to a hidden
//! temp file that is synced and renamed into place, so readers see either
//! the old entry or the new one, never a partial write.
//!
//! ## Corruption
//!
//! Unreadable, truncated or mismatched entries are reported as misses and
//! removed by the next sweep.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::text::fold_for_matching;
use crate::types::Query;

const ENTRY_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Stable fingerprint of a logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for the search that answers `query`.
    pub fn for_search(query: &Query) -> Self {
        let kind = if query.is_artist_lookup() {
            "artist"
        } else {
            query.release_type.as_str()
        };
        let album = query.album.as_deref().map(fold_for_matching).unwrap_or_default();
        let year = query.year.map(|y| y.to_string()).unwrap_or_default();
        Self::from_parts("search", &[kind, &fold_for_matching(&query.artist), &album, &year])
    }

    /// Key for a directly addressed page.
    pub fn for_page(url: &str) -> Self {
        Self::from_parts("page", &[url.trim()])
    }

    /// Key for a discography filter request.
    pub fn for_discography(artist_id: &str, album: &str) -> Self {
        Self::from_parts("discography", &[artist_id.trim(), &fold_for_matching(album)])
    }

    fn from_parts(discriminator: &str, parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(discriminator.as_bytes());
        for part in parts {
            // Unit separator keeps ("ab", "c") and ("a", "bc") apart.
            hasher.update([0x1f]);
            hasher.update(part.as_bytes());
        }
        let digest = hasher.finalize();
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub source_url: String,
    pub fetched_at: DateTime<Utc>,
    pub content: String,
}

/// Snapshot of the cache directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Removes a temp file on drop unless it was renamed into place.
struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Filesystem-backed response cache with age-based expiry.
pub struct ResponseCache {
    dir: PathBuf,
    /// `None` keeps entries forever.
    expiry: Option<chrono::Duration>,
    /// Readers share, writers and sweeps are exclusive.
    lock: RwLock<()>,
}

impl ResponseCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>, expiry_days: u32) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache dir: {}", dir.display()))?;

        let expiry = (expiry_days > 0).then(|| chrono::Duration::days(i64::from(expiry_days)));

        tracing::debug!(
            "ResponseCache opened at {} (expiry: {})",
            dir.display(),
            expiry
                .map(|d| format!("{} days", d.num_days()))
                .unwrap_or_else(|| "never".to_string())
        );

        Ok(Self {
            dir,
            expiry,
            lock: RwLock::new(()),
        })
    }

    /// Cache directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fresh, intact entry for `key`, if any.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.get_at(key, Utc::now())
    }

    pub(crate) fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        let path = self.entry_path(key);

        let entry = match read_entry(&path) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!("cache miss: {key}");
                return None;
            }
            Err(e) => {
                tracing::warn!("ignoring corrupt cache entry {}: {e:#}", path.display());
                return None;
            }
        };

        if entry.key != key.as_str() {
            tracing::warn!(
                "ignoring cache entry {} stored under a different key",
                path.display()
            );
            return None;
        }

        if !self.is_fresh(&entry, now) {
            tracing::debug!("cache expired: {key} (fetched {})", entry.fetched_at);
            return None;
        }

        tracing::debug!("cache hit: {key} ({})", entry.source_url);
        Some(entry)
    }

    /// Store `content` under `key`, replacing any previous entry.
    ///
    /// The entry is on disk when this returns.
    pub fn put(&self, key: &CacheKey, content: &str, source_url: &str) -> Result<()> {
        self.put_at(key, content, source_url, Utc::now())
    }

    pub(crate) fn put_at(
        &self,
        key: &CacheKey,
        content: &str,
        source_url: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        let entry = CacheEntry {
            key: key.as_str().to_string(),
            source_url: source_url.to_string(),
            fetched_at,
            content: content.to_string(),
        };
        let data = serde_json::to_vec(&entry).context("failed to serialize cache entry")?;

        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let path = self.entry_path(key);
        let mut tmp = TempFile::new(
            self.dir
                .join(format!(".{}.{TEMP_EXTENSION}", uuid::Uuid::new_v4())),
        );

        {
            let mut file = File::create(&tmp.path)
                .with_context(|| format!("failed to create temp file: {}", tmp.path.display()))?;
            file.write_all(&data)
                .with_context(|| format!("failed to write temp file: {}", tmp.path.display()))?;
            file.sync_all()
                .with_context(|| format!("failed to sync temp file: {}", tmp.path.display()))?;
        }

        fs::rename(&tmp.path, &path)
            .with_context(|| format!("failed to write cache file: {}", path.display()))?;
        tmp.disarm();

        tracing::debug!("cached {} as {key}", source_url);
        Ok(())
    }

    /// Remove every entry. Returns how many files were deleted.
    pub fn clear(&self) -> Result<usize> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for path in self.cache_files()? {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove cache file: {}", path.display()))?;
            removed += 1;
        }
        tracing::info!("cleared {removed} cache entries from {}", self.dir.display());
        Ok(removed)
    }

    /// Count, size and age range of intact entries.
    pub fn stats(&self) -> Result<CacheStats> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats = CacheStats::default();

        for path in self.cache_files()? {
            if !is_entry_file(&path) {
                continue;
            }
            let Ok(Some(entry)) = read_entry(&path) else {
                continue;
            };
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

            stats.entries += 1;
            stats.total_bytes += size;
            stats.oldest = Some(match stats.oldest {
                Some(oldest) => oldest.min(entry.fetched_at),
                None => entry.fetched_at,
            });
            stats.newest = Some(match stats.newest {
                Some(newest) => newest.max(entry.fetched_at),
                None => entry.fetched_at,
            });
        }

        Ok(stats)
    }

    /// Delete expired, corrupt and orphaned temp files. Returns how many were removed.
    pub fn sweep_expired(&self) -> Result<usize> {
        self.sweep_expired_at(Utc::now())
    }

    pub(crate) fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;

        for path in self.cache_files()? {
            let stale = if is_entry_file(&path) {
                match read_entry(&path) {
                    Ok(Some(entry)) => !self.is_fresh(&entry, now),
                    Ok(None) => false,
                    Err(_) => true,
                }
            } else {
                // Leftover from an interrupted write.
                true
            };

            if stale {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!("failed to remove {}: {e}", path.display());
                    }
                }
            }
        }

        if removed > 0 {
            tracing::info!("swept {removed} stale cache files from {}", self.dir.display());
        }
        Ok(removed)
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match self.expiry {
            None => true,
            Some(expiry) => now.signed_duration_since(entry.fetched_at) <= expiry,
        }
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.{ENTRY_EXTENSION}"))
    }

    /// Entry and temp files in the cache directory.
    fn cache_files(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read cache dir: {}", self.dir.display()))?;
        Ok(entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some(ENTRY_EXTENSION) | Some(TEMP_EXTENSION)
                    )
            })
            .collect())
    }
}

fn is_entry_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION)
}

/// `Ok(None)` when the file does not exist.
fn read_entry(path: &Path) -> Result<Option<CacheEntry>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let entry = serde_json::from_slice(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(entry))
}
