//! Fuzzy resolution of source-specific color labels to canonical colors
//!
//! A price source spells colors its own way ("Dark Bluish Gray" vs
//! "Dark Bluish Grey"). Resolution tries an exact case-insensitive match,
//! then accepts a candidate only when both a positional (Hamming-style) and
//! an edit (Levenshtein) distance are small relative to the strings
//! involved, and picks the candidate closest on both.

use crate::models::ColorRecord;

/// Distances between a label and one candidate name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchScore {
    pub hamming: usize,
    pub levenshtein: usize,
}

impl MatchScore {
    /// Combined rank; lower is closer
    pub fn distance(&self) -> f64 {
        let h = self.hamming as f64;
        let l = self.levenshtein as f64;
        (h * h + l * l).sqrt()
    }
}

/// Canonical color a label refers to, if any candidate is close enough
///
/// Ties on distance keep the earlier candidate.
pub fn resolve<'a, I>(label: &str, candidates: I) -> Option<&'a ColorRecord>
where
    I: IntoIterator<Item = &'a ColorRecord>,
{
    let label = label.trim();
    if label.is_empty() {
        return None;
    }

    let candidates: Vec<&ColorRecord> = candidates.into_iter().collect();

    let lowered = label.to_lowercase();
    if let Some(exact) = candidates
        .iter()
        .find(|c| c.name.trim().to_lowercase() == lowered)
    {
        return Some(exact);
    }

    candidates
        .into_iter()
        .filter_map(|c| score(label, &c.name).map(|s| (c, s.distance())))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c)
}

/// Distances between `label` and `name`, or `None` when they are too far
/// apart to be the same color
///
/// With equal word counts every word pair must be close: both distances
/// below half of each word's length, rounded up. Otherwise the whole strings
/// are compared and both distances must stay below a third of each length,
/// with the third rounded down (10 characters allow a distance of 2).
pub fn score(label: &str, name: &str) -> Option<MatchScore> {
    let label = label.trim().to_lowercase();
    let name = name.trim().to_lowercase();

    let label_words: Vec<&str> = label.split_whitespace().collect();
    let name_words: Vec<&str> = name.split_whitespace().collect();

    if label_words.len() == name_words.len() {
        let mut total = MatchScore {
            hamming: 0,
            levenshtein: 0,
        };
        for (a, b) in label_words.iter().zip(&name_words) {
            let pair = distances(a, b);
            let limit = half_rounded_up(a).min(half_rounded_up(b));
            if pair.hamming >= limit || pair.levenshtein >= limit {
                return None;
            }
            total.hamming += pair.hamming;
            total.levenshtein += pair.levenshtein;
        }
        return Some(total);
    }

    let whole = distances(&label, &name);
    let limit = (char_len(&label) / 3).min(char_len(&name) / 3);
    if whole.hamming < limit && whole.levenshtein < limit {
        Some(whole)
    } else {
        None
    }
}

fn distances(a: &str, b: &str) -> MatchScore {
    MatchScore {
        hamming: positional_mismatches(a, b),
        levenshtein: strsim::levenshtein(a, b),
    }
}

/// Hamming distance over the common prefix length (shorter string wins)
fn positional_mismatches(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).filter(|(x, y)| x != y).count()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn half_rounded_up(s: &str) -> usize {
    char_len(s).div_ceil(2)
}
