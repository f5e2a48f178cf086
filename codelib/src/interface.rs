//! CodeLib Public Interface Definition
//!
//! Types shared between the search engine, the persistence codec and whatever
//! hosts them (CLI, UI shell). This file is the source of truth for the
//! result-callback contract and the error taxonomy.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

use crate::models::Snippet;
use crate::persistence::CodecError;

// ═══════════════════════════════════════════════════════════════════════════════
// RESULT DELIVERY
// ═══════════════════════════════════════════════════════════════════════════════

/// Order in which a completed generation's hits were delivered.
///
/// Handed to [`ResultCatcher::on_complete`] so a host that buffers hits can
/// re-sort them the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ranking {
    /// Descending match degree, ties broken by most recent update first.
    MatchDegree,
    /// Ascending keywords (browse-all query `*`).
    Keywords,
}

/// Receives search results.
///
/// Hits of one generation arrive in ranked order after every worker of that
/// generation has finished, followed by exactly one `on_complete`. A generation
/// that is cancelled or superseded delivers nothing further.
pub trait ResultCatcher: Send + Sync {
    /// One ranked hit. `match_degree` is the relevance score, higher is better.
    fn on_result(&self, keyword: &str, snippet: &Arc<Snippet>, match_degree: u32);

    /// The generation for `keyword` finished. Blank queries complete
    /// immediately with no hits.
    fn on_complete(&self, keyword: &str, ranking: Ranking);
}

/// Search events as forwarded by [`ChannelCatcher`].
#[derive(Debug, Clone)]
pub enum SearchEvent {
    Hit {
        keyword: String,
        snippet: Arc<Snippet>,
        match_degree: u32,
    },
    Complete {
        keyword: String,
        ranking: Ranking,
    },
}

/// A [`ResultCatcher`] that forwards every callback as a [`SearchEvent`].
#[derive(Debug, Clone)]
pub struct ChannelCatcher {
    tx: Sender<SearchEvent>,
}

impl ChannelCatcher {
    pub fn new() -> (Self, Receiver<SearchEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl ResultCatcher for ChannelCatcher {
    fn on_result(&self, keyword: &str, snippet: &Arc<Snippet>, match_degree: u32) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(SearchEvent::Hit {
            keyword: keyword.to_string(),
            snippet: Arc::clone(snippet),
            match_degree,
        });
    }

    fn on_complete(&self, keyword: &str, ranking: Ranking) {
        let _ = self.tx.send(SearchEvent::Complete {
            keyword: keyword.to_string(),
            ranking,
        });
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for CodeLib operations
#[derive(Debug, Error)]
pub enum CodeLibError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("Matching snippet {id} failed: {reason}")]
    RecordMatch { id: String, reason: String },
    #[error("Snippet not found: {0}")]
    NotFound(String),
}

pub type CodeLibResult<T> = Result<T, CodeLibError>;

impl From<std::io::Error> for CodeLibError {
    fn from(e: std::io::Error) -> Self {
        CodeLibError::Codec(CodecError::Io(e))
    }
}

impl From<rayon::ThreadPoolBuildError> for CodeLibError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        CodeLibError::Configuration(format!("failed to build search worker pool: {e}"))
    }
}
