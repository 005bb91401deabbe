//! Artist name to catalog ID map.
//!
//! An artist's ID is what the discography filter endpoint needs. Finding it
//! costs an artist page fetch (and possibly a search), so resolved IDs are
//! kept in one JSON object file and reused across runs. Names are folded
//! before lookup, so "Björk" and "bjork" share an entry.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};

use crate::text::fold_for_matching;

/// Where the map lives inside a cache directory. A subdirectory keeps it out
/// of the response cache's sweeps.
pub const STORE_FILE: &str = "artists/ids.json";

pub struct ArtistIdStore {
    path: PathBuf,
    ids: RwLock<BTreeMap<String, String>>,
}

impl ArtistIdStore {
    /// Load the map at `path`. Missing or unreadable files start empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ids = match fs::read(&path) {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::warn!("ignoring corrupt artist ID map {}: {e}", path.display());
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!("failed to read artist ID map {}: {e}", path.display());
                BTreeMap::new()
            }
        };
        tracing::debug!("loaded {} artist IDs from {}", ids.len(), path.display());

        Self {
            path,
            ids: RwLock::new(ids),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.ids.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lookup(&self, artist: &str) -> Option<String> {
        let ids = self.ids.read().unwrap_or_else(PoisonError::into_inner);
        let id = ids.get(&fold_for_matching(artist)).cloned();
        if id.is_some() {
            tracing::debug!("artist ID hit for {artist}");
        }
        id
    }

    /// Record `id` for `artist` and rewrite the file.
    pub fn save(&self, artist: &str, id: &str) -> Result<()> {
        let mut ids = self.ids.write().unwrap_or_else(PoisonError::into_inner);
        ids.insert(fold_for_matching(artist), id.to_string());
        crate::persist::write_json(&self.path, &*ids).context("failed to save artist IDs")?;
        tracing::debug!("saved artist ID {id} for {artist}");
        Ok(())
    }

    /// Forget every ID. Returns whether a file was removed.
    pub fn clear(&self) -> Result<bool> {
        let mut ids = self.ids.write().unwrap_or_else(PoisonError::into_inner);
        ids.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e)
                .with_context(|| format!("failed to remove {}", self.path.display())),
        }
    }
}
