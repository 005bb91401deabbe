//! Text normalization shared by matching, cache keys and URL building.

use std::sync::OnceLock;

use regex::Regex;

/// Which normalization steps to apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalize {
    pub remove_accents: bool,
    pub lowercase: bool,
    /// Drop `(…)` and `[…]` segments such as "(2023 Remaster)".
    pub remove_parentheticals: bool,
    /// Replace punctuation with spaces.
    pub remove_punctuation: bool,
}

impl Normalize {
    /// Accent-free, lowercase, punctuation-free: the form used for similarity scoring.
    pub const MATCHING: Self = Self {
        remove_accents: true,
        lowercase: true,
        remove_parentheticals: false,
        remove_punctuation: true,
    };

    /// Apply the selected steps, then collapse whitespace.
    pub fn apply(&self, text: &str) -> String {
        let mut result = text.trim().to_string();

        if self.remove_parentheticals {
            result = parenthetical_re().replace_all(&result, " ").into_owned();
        }
        if self.remove_accents {
            result = deunicode::deunicode(&result);
        }
        if self.lowercase {
            result = result.to_lowercase();
        }
        if self.remove_punctuation {
            result = result
                .chars()
                .map(|c| {
                    if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
                        c
                    } else {
                        ' '
                    }
                })
                .collect();
        }

        collapse_whitespace(&result)
    }
}

fn parenthetical_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]").expect("valid regex"))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-folded, accent- and punctuation-free form used for similarity and fingerprints.
pub fn fold_for_matching(text: &str) -> String {
    Normalize::MATCHING.apply(text)
}

/// URL path segment form: "Sigur Rós" → "sigur-ros".
pub fn slugify(text: &str) -> String {
    fold_for_matching(text).replace(' ', "-")
}

/// Remove duplicates, keeping the first occurrence of each item.
pub fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
