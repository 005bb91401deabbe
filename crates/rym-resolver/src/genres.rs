//! Genre hierarchy and parent-genre expansion.
//!
//! The hierarchy file is a JSON object mapping each genre name to its depth
//! in the tree (0 for top-level genres) and the names of all its ancestors.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GenreInfo {
    pub depth: u32,
    #[serde(default)]
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GenreHierarchy {
    genres: HashMap<String, GenreInfo>,
}

impl GenreHierarchy {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("failed to read genre hierarchy: {}", path.display()))?;
        let genres: HashMap<String, GenreInfo> = serde_json::from_slice(&data)
            .with_context(|| format!("failed to parse genre hierarchy: {}", path.display()))?;
        if genres.is_empty() {
            bail!("genre hierarchy {} is empty", path.display());
        }
        tracing::info!("loaded {} genres from {}", genres.len(), path.display());
        Ok(Self { genres })
    }

    pub fn from_map(genres: HashMap<String, GenreInfo>) -> Self {
        Self { genres }
    }

    pub fn len(&self) -> usize {
        self.genres.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genres.is_empty()
    }

    /// Add every known ancestor and order the result most specific first.
    ///
    /// Unknown genres are kept with depth 0. Genres of equal depth keep
    /// their first-seen order.
    pub fn expand(&self, genres: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut ranked: Vec<(String, u32)> = Vec::new();

        let mut push = |name: &str, depth: u32, ranked: &mut Vec<(String, u32)>| {
            if seen.insert(name.to_string()) {
                ranked.push((name.to_string(), depth));
            }
        };

        for genre in genres {
            match self.genres.get(genre) {
                Some(info) => {
                    push(genre, info.depth, &mut ranked);
                    for parent in &info.parents {
                        if let Some(parent_info) = self.genres.get(parent) {
                            push(parent, parent_info.depth, &mut ranked);
                        }
                    }
                }
                None => {
                    tracing::debug!("genre not in hierarchy: {genre}");
                    push(genre, 0, &mut ranked);
                }
            }
        }

        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.into_iter().map(|(name, _)| name).collect()
    }
}
