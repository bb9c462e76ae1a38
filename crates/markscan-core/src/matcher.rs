//! Fuzzy reconciliation of recognized student IDs against a roster.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Result of matching one recognized ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// Identical after normalization.
    Exact { index: usize },
    /// Unique best similarity at or above the threshold.
    Fuzzy { index: usize, similarity: f64 },
    /// Several roster IDs share the best score.
    Tied { similarity: f64 },
    /// Lost the roster ID to a stronger claim from another scan.
    Duplicate { index: usize, similarity: f64 },
    /// Nothing reached the threshold.
    NotFound { best: f64 },
}

impl MatchOutcome {
    /// Roster row index, for accepted matches only.
    pub fn index(&self) -> Option<usize> {
        match self {
            MatchOutcome::Exact { index } | MatchOutcome::Fuzzy { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn similarity(&self) -> f64 {
        match self {
            MatchOutcome::Exact { .. } => 100.0,
            MatchOutcome::Fuzzy { similarity, .. }
            | MatchOutcome::Tied { similarity }
            | MatchOutcome::Duplicate { similarity, .. } => *similarity,
            MatchOutcome::NotFound { best } => *best,
        }
    }

    pub fn status(&self) -> MatchStatus {
        match self {
            MatchOutcome::Exact { .. } => MatchStatus::Exact,
            MatchOutcome::Fuzzy { .. } => MatchStatus::Fuzzy,
            MatchOutcome::Tied { .. } => MatchStatus::Tied,
            MatchOutcome::Duplicate { .. } => MatchStatus::Duplicate,
            MatchOutcome::NotFound { .. } => MatchStatus::Unmatched,
        }
    }
}

/// Flat label stored in the results table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Exact,
    Fuzzy,
    Tied,
    Duplicate,
    Unmatched,
}

impl MatchStatus {
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchStatus::Exact | MatchStatus::Fuzzy)
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStatus::Exact => write!(f, "exact"),
            MatchStatus::Fuzzy => write!(f, "fuzzy"),
            MatchStatus::Tied => write!(f, "tied"),
            MatchStatus::Duplicate => write!(f, "duplicate"),
            MatchStatus::Unmatched => write!(f, "unmatched"),
        }
    }
}

impl std::str::FromStr for MatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exact" => Ok(MatchStatus::Exact),
            "fuzzy" => Ok(MatchStatus::Fuzzy),
            "tied" => Ok(MatchStatus::Tied),
            "duplicate" => Ok(MatchStatus::Duplicate),
            "unmatched" | "" => Ok(MatchStatus::Unmatched),
            other => Err(format!("unknown match status: {other}")),
        }
    }
}

/// Trim and uppercase, as applied to both sides before comparing.
pub fn normalize_id(id: &str) -> String {
    id.trim().to_uppercase()
}

/// Similarity in `[0, 100]` of two normalized IDs.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Match one recognized ID against every roster ID.
pub fn match_id(recognized: &str, roster_ids: &[String], threshold: f64) -> MatchOutcome {
    let needle = normalize_id(recognized);
    if needle.is_empty() {
        return MatchOutcome::NotFound { best: 0.0 };
    }
    let normalized: Vec<String> = roster_ids.iter().map(|id| normalize_id(id)).collect();

    let exact: Vec<usize> = normalized
        .iter()
        .enumerate()
        .filter(|(_, id)| **id == needle)
        .map(|(i, _)| i)
        .collect();
    match exact.as_slice() {
        [index] => return MatchOutcome::Exact { index: *index },
        [_, _, ..] => return MatchOutcome::Tied { similarity: 100.0 },
        [] => {}
    }
    if threshold >= 100.0 {
        let best = best_similarity(&needle, &normalized);
        return MatchOutcome::NotFound { best };
    }

    let mut best: Option<(usize, f64)> = None;
    let mut second = f64::NEG_INFINITY;
    for (i, id) in normalized.iter().enumerate() {
        if id.is_empty() {
            continue;
        }
        let s = similarity(&needle, id);
        match best {
            Some((_, b)) if s > b => {
                second = b;
                best = Some((i, s));
            }
            Some(_) => second = second.max(s),
            None => best = Some((i, s)),
        }
    }

    match best {
        Some((index, s)) if s >= threshold && s > second => MatchOutcome::Fuzzy {
            index,
            similarity: s,
        },
        Some((_, s)) if s >= threshold => MatchOutcome::Tied { similarity: s },
        Some((_, s)) => MatchOutcome::NotFound { best: s },
        None => MatchOutcome::NotFound { best: 0.0 },
    }
}

fn best_similarity(needle: &str, ids: &[String]) -> f64 {
    ids.iter()
        .filter(|id| !id.is_empty())
        .map(|id| similarity(needle, id))
        .fold(0.0, f64::max)
}

/// Match every recognized ID, then make accepted matches one-to-one.
///
/// Exact claims on a roster row beat fuzzy ones; among fuzzy claims only a
/// strictly highest similarity keeps the row. Losers become `Duplicate`.
pub fn match_all(recognized: &[String], roster_ids: &[String], threshold: f64) -> Vec<MatchOutcome> {
    let mut outcomes: Vec<MatchOutcome> = recognized
        .iter()
        .map(|id| match_id(id, roster_ids, threshold))
        .collect();

    let mut claims: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, outcome) in outcomes.iter().enumerate() {
        if let Some(index) = outcome.index() {
            claims.entry(index).or_default().push(i);
        }
    }

    for (index, claimants) in claims {
        if claimants.len() < 2 {
            continue;
        }
        let exact: Vec<usize> = claimants
            .iter()
            .copied()
            .filter(|&i| matches!(outcomes[i], MatchOutcome::Exact { .. }))
            .collect();
        let winner = match exact.as_slice() {
            [only] => Some(*only),
            [_, _, ..] => None,
            [] => {
                let top = claimants
                    .iter()
                    .map(|&i| outcomes[i].similarity())
                    .fold(f64::NEG_INFINITY, f64::max);
                let at_top: Vec<usize> = claimants
                    .iter()
                    .copied()
                    .filter(|&i| outcomes[i].similarity() >= top)
                    .collect();
                (at_top.len() == 1).then(|| at_top[0])
            }
        };
        for i in claimants {
            if Some(i) != winner {
                let similarity = outcomes[i].similarity();
                tracing::warn!(
                    "roster row {index} claimed by several scans, dropping claim {i} ({similarity:.1})"
                );
                outcomes[i] = MatchOutcome::Duplicate { index, similarity };
            }
        }
    }

    outcomes
}
