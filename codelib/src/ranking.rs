//! Match-degree scoring and result ordering.
//!
//! The match degree is a plain integer sum over query tokens. Per token:
//!
//! 1. keywords: `keyword_weight * (len - offset) / len` for the first
//!    occurrence, so earlier hits in shorter keyword strings score higher
//! 2. content: `content_occurrence_weight` per occurrence, at most
//!    `content_occurrence_cap` occurrences, so big files cannot win on
//!    repetition alone
//! 3. attachment names: `attachment_name_weight` scaled by the fraction of
//!    attachments whose name contains the token

use std::cmp::Ordering;
use std::sync::Arc;

use crate::interface::Ranking;
use crate::models::Snippet;
use crate::search::{find_ignore_case, Needle};

/// Weights for [`match_degree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringWeights {
    pub keyword_weight: u32,
    pub content_occurrence_weight: u32,
    pub content_occurrence_cap: u32,
    pub attachment_name_weight: u32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            keyword_weight: 100,
            content_occurrence_weight: 5,
            content_occurrence_cap: 10,
            attachment_name_weight: 50,
        }
    }
}

/// Relevance of `snippet` for `needles`. Pure and deterministic; empty needles
/// contribute nothing.
pub fn match_degree(snippet: &Snippet, needles: &[Needle], weights: &ScoringWeights) -> u32 {
    let keywords = snippet.keywords().as_bytes();
    let content = snippet.content();
    let mut degree: u64 = 0;

    for needle in needles.iter().filter(|n| !n.is_empty()) {
        if let Some(offset) = find_ignore_case(keywords, 0, needle) {
            let len = keywords.len() as u64;
            degree += u64::from(weights.keyword_weight) * (len - offset as u64) / len;
        }

        let mut from = 0;
        let mut occurrences = 0;
        while occurrences < weights.content_occurrence_cap {
            let Some(pos) = find_ignore_case(content, from, needle) else {
                break;
            };
            degree += u64::from(weights.content_occurrence_weight);
            occurrences += 1;
            from = pos + 1;
        }

        if let Some(attachments) = snippet.attachments().filter(|a| !a.is_empty()) {
            let named = attachments
                .iter()
                .filter(|a| find_ignore_case(a.name().as_bytes(), 0, needle).is_some())
                .count() as u64;
            degree += u64::from(weights.attachment_name_weight) * named / attachments.len() as u64;
        }
    }

    u32::try_from(degree).unwrap_or(u32::MAX)
}

/// A matched snippet with its match degree.
#[derive(Debug, Clone)]
pub struct ScoredHit {
    pub snippet: Arc<Snippet>,
    pub match_degree: u32,
}

impl Ranking {
    pub fn compare(&self, a: &ScoredHit, b: &ScoredHit) -> Ordering {
        let primary = match self {
            Ranking::MatchDegree => b
                .match_degree
                .cmp(&a.match_degree)
                .then_with(|| b.snippet.update_time().cmp(&a.snippet.update_time())),
            Ranking::Keywords => a.snippet.keywords().cmp(b.snippet.keywords()),
        };
        primary.then_with(|| a.snippet.id().cmp(b.snippet.id()))
    }
}

/// Sort hits in delivery order.
pub fn sort_hits(hits: &mut [ScoredHit], ranking: Ranking) {
    hits.sort_unstable_by(|a, b| ranking.compare(a, b));
}
