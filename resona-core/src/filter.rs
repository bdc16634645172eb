//! Candidate filtering and ranking.
//!
//! Pure and side-effect free: the same input always produces the same
//! output, and re-ranking an already-ranked list is a no-op. The sort is
//! stable so that equal scores keep their discovery order, which reflects
//! scrape-time relevance.

use crate::types::CandidateItem;

#[derive(Debug, Clone)]
pub struct FilterOptions {
    pub min_reactions: u32,
    pub exclude_flagged: bool,
    pub excluded_terms: Vec<String>,
    pub min_content_length: usize,
}

impl FilterOptions {
    pub fn new(
        min_reactions: u32,
        exclude_flagged: bool,
        excluded_terms: &[String],
        min_content_length: usize,
    ) -> Self {
        Self {
            min_reactions,
            exclude_flagged,
            excluded_terms: excluded_terms.to_vec(),
            min_content_length,
        }
    }
}

/// Case-insensitive substring match against the exclusion term list.
pub fn contains_excluded_term(content: &str, terms: &[String]) -> bool {
    let haystack = content.to_lowercase();
    terms
        .iter()
        .any(|term| !term.is_empty() && haystack.contains(&term.to_lowercase()))
}

/// Narrow and order candidates, returning at most `limit` items.
///
/// Drops, in order: items already acted upon, items under the reaction
/// threshold, items matching an exclusion term (when the flag is set), and
/// items whose content is too short to be worth replying to. Survivors are
/// sorted by `reactions + replies` descending with ties broken by input
/// order.
pub fn select_candidates(
    items: &[CandidateItem],
    options: &FilterOptions,
    limit: usize,
) -> Vec<CandidateItem> {
    let mut survivors: Vec<&CandidateItem> = items
        .iter()
        .filter(|item| !item.acted_upon)
        .filter(|item| item.reaction_count >= options.min_reactions)
        .filter(|item| {
            !(options.exclude_flagged
                && contains_excluded_term(&item.content, &options.excluded_terms))
        })
        .filter(|item| item.content.trim().len() >= options.min_content_length)
        .collect();

    // Vec::sort_by is stable; equal scores keep their relative input order.
    survivors.sort_by(|a, b| b.engagement_score().cmp(&a.engagement_score()));

    survivors.into_iter().take(limit).cloned().collect()
}
