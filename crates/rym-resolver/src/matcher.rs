//! Candidate scoring and best-match selection.
//!
//! Similarity is the normalized Levenshtein ratio between the folded query
//! text and the folded candidate text. A year bonus is added when both sides
//! carry a year, the sum is clamped to `[0, 1]`, and anything under the
//! threshold is dropped.

use crate::text::fold_for_matching;
use crate::types::Query;

/// Bonus when the candidate year equals the query year.
pub const EXACT_YEAR_BONUS: f64 = 0.05;

/// Bonus when the years differ by exactly one (reissue/region slips).
pub const ADJACENT_YEAR_BONUS: f64 = 0.02;

/// One parsed search result, scored against the query it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub title: String,
    pub artist: String,
    pub year: Option<i32>,
    pub url: String,
    pub raw_similarity: f64,
}

impl Candidate {
    /// Build a candidate and compute its raw similarity to `query`.
    pub fn for_query(
        query: &Query,
        title: impl Into<String>,
        artist: impl Into<String>,
        year: Option<i32>,
        url: impl Into<String>,
    ) -> Self {
        let title = title.into();
        let artist = artist.into();
        let raw_similarity = similarity(query, &artist, &title);
        Self {
            title,
            artist,
            year,
            url: url.into(),
            raw_similarity,
        }
    }
}

/// A candidate that survived the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub final_score: f64,
    pub exact_year: bool,
}

/// Text similarity in `[0, 1]` between a query and a candidate's artist/title.
///
/// Artist lookups compare artist names only.
pub fn similarity(query: &Query, artist: &str, title: &str) -> f64 {
    let (wanted, offered) = match &query.album {
        Some(album) => (
            format!("{} {}", query.artist, album),
            format!("{artist} {title}"),
        ),
        None => (query.artist.clone(), artist.to_string()),
    };
    strsim::normalized_levenshtein(&fold_for_matching(&wanted), &fold_for_matching(&offered))
}

/// Year adjustment; never negative.
pub fn year_adjustment(query_year: Option<i32>, candidate_year: Option<i32>) -> f64 {
    match (query_year, candidate_year) {
        (Some(q), Some(c)) if q == c => EXACT_YEAR_BONUS,
        (Some(q), Some(c)) if (q - c).abs() == 1 => ADJACENT_YEAR_BONUS,
        _ => 0.0,
    }
}

/// Pick the best candidate at or above `threshold`.
///
/// Ties on score go to an exact year match, then the shorter title, then
/// the earliest candidate.
pub fn select_best(
    query: &Query,
    candidates: Vec<Candidate>,
    threshold: f64,
) -> Option<ScoredCandidate> {
    let mut best: Option<ScoredCandidate> = None;

    for candidate in candidates {
        let final_score =
            (candidate.raw_similarity + year_adjustment(query.year, candidate.year)).clamp(0.0, 1.0);
        if final_score < threshold {
            tracing::debug!(
                "Discarding '{}' by '{}': score {:.3} below {:.3}",
                candidate.title,
                candidate.artist,
                final_score,
                threshold
            );
            continue;
        }

        let scored = ScoredCandidate {
            exact_year: query.year.is_some() && candidate.year == query.year,
            candidate,
            final_score,
        };

        let replace = match &best {
            None => true,
            Some(current) => beats(&scored, current),
        };
        if replace {
            best = Some(scored);
        }
    }

    best
}

fn beats(challenger: &ScoredCandidate, current: &ScoredCandidate) -> bool {
    if challenger.final_score != current.final_score {
        return challenger.final_score > current.final_score;
    }
    if challenger.exact_year != current.exact_year {
        return challenger.exact_year;
    }
    challenger.candidate.title.chars().count() < current.candidate.title.chars().count()
}
