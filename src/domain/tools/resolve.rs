//! Field-name resolution heuristic
//!
//! Maps free-form terms from the user's wording to actual schema columns:
//! case-insensitive exact match first, then substring containment in either
//! direction weighted by length overlap. At most five candidates per term;
//! ties keep schema order.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::constants::MAX_RESOLVE_CANDIDATES;
use crate::data::Dataset;

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedFields {
    /// Union of all matched columns, in first-match order
    pub mapped_columns: Vec<String>,
    /// Candidates per input term
    pub suggestions: BTreeMap<String, Vec<String>>,
}

/// Score a term against a column name; 0 means no match
fn score(term: &str, column: &str) -> u32 {
    let term = term.trim().to_lowercase();
    let column_lower = column.to_lowercase();
    if term.is_empty() {
        return 0;
    }
    if term == column_lower {
        return 100;
    }
    let (short, long) = if term.len() <= column_lower.len() {
        (&term, &column_lower)
    } else {
        (&column_lower, &term)
    };
    if long.contains(short.as_str()) {
        // Weight by how much of the longer name the overlap covers
        let ratio = short.chars().count() as f64 / long.chars().count() as f64;
        60 + (ratio * 40.0) as u32
    } else {
        0
    }
}

/// Resolve each term to its best-matching columns
pub fn resolve_terms(dataset: &Dataset, terms: &[String]) -> ResolvedFields {
    let mut mapped_columns: Vec<String> = Vec::new();
    let mut suggestions = BTreeMap::new();

    for term in terms {
        let mut scored: Vec<(u32, &str)> = dataset
            .columns
            .iter()
            .map(|c| (score(term, &c.name), c.name.as_str()))
            .filter(|(s, _)| *s > 0)
            .collect();
        // Stable sort keeps schema order among equal scores
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(MAX_RESOLVE_CANDIDATES);

        let candidates: Vec<String> = scored.iter().map(|(_, name)| name.to_string()).collect();
        for candidate in &candidates {
            if !mapped_columns.contains(candidate) {
                mapped_columns.push(candidate.clone());
            }
        }
        suggestions.insert(term.clone(), candidates);
    }

    ResolvedFields {
        mapped_columns,
        suggestions,
    }
}
