//! Search worker: query parsing, per-token matching and the cohort scan.
//!
//! There is no index. A generation runs a cohort of identical workers over an
//! immutable snapshot of the store; each worker claims the next unclaimed
//! index from a shared cursor, so cheap records (tombstones, short snippets)
//! never leave a worker idle while another still has a long static slice.
//!
//! Per token the cheapest check runs first and the first hit wins:
//! keywords, then content bytes, then attachment names, then decoded
//! attachment text (text attachments only).

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::content_detection::ContentTypeTable;
use crate::interface::{CodeLibError, Ranking};
use crate::models::Snippet;
use crate::ranking::{match_degree, ScoredHit, ScoringWeights};

/// Query token prepared for case-insensitive matching.
///
/// `lower` and `upper` are byte-aligned: position `i` of a haystack matches
/// when it equals either `lower[i]` or `upper[i]`. Characters whose upper and
/// lower case forms differ in UTF-8 length only match their lowercase form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Needle {
    text: String,
    lower: Vec<u8>,
    upper: Vec<u8>,
}

impl Needle {
    pub fn new(token: &str) -> Self {
        let mut lower = Vec::with_capacity(token.len());
        let mut upper = Vec::with_capacity(token.len());
        let mut buf_l = [0u8; 4];
        let mut buf_u = [0u8; 4];

        for ch in token.chars() {
            let mut lowers = ch.to_lowercase();
            let mut uppers = ch.to_uppercase();
            match (lowers.next(), lowers.next(), uppers.next(), uppers.next()) {
                (Some(l), None, Some(u), None) if l.len_utf8() == u.len_utf8() => {
                    lower.extend_from_slice(l.encode_utf8(&mut buf_l).as_bytes());
                    upper.extend_from_slice(u.encode_utf8(&mut buf_u).as_bytes());
                }
                _ => {
                    for l in ch.to_lowercase() {
                        let bytes = l.encode_utf8(&mut buf_l).as_bytes();
                        lower.extend_from_slice(bytes);
                        upper.extend_from_slice(bytes);
                    }
                }
            }
        }

        Self {
            text: token.to_lowercase(),
            lower,
            upper,
        }
    }

    /// Lowercased token text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    fn matches_at(&self, haystack: &[u8], at: usize) -> bool {
        self.lower
            .iter()
            .zip(&self.upper)
            .zip(&haystack[at..at + self.lower.len()])
            .all(|((l, u), b)| b == l || b == u)
    }
}

/// First offset `>= from` where `needle` occurs in `haystack`, ignoring case.
pub fn find_ignore_case(haystack: &[u8], from: usize, needle: &Needle) -> Option<usize> {
    let n = needle.lower.len();
    if n == 0 {
        return (from <= haystack.len()).then_some(from);
    }
    if haystack.len() < n || from > haystack.len() - n {
        return None;
    }

    let (first_l, first_u) = (needle.lower[0], needle.upper[0]);
    (from..=haystack.len() - n).find(|&i| {
        let b = haystack[i];
        (b == first_l || b == first_u) && needle.matches_at(haystack, i)
    })
}

/// Parsed form of a raw query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedQuery {
    /// Nothing but whitespace and commas.
    Blank,
    /// A lone `*`: every live snippet matches.
    BrowseAll,
    /// AND of all tokens.
    Terms(Vec<Needle>),
}

/// Split on whitespace and commas.
pub fn parse_query(text: &str) -> ParsedQuery {
    let tokens: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();

    match tokens.as_slice() {
        [] => ParsedQuery::Blank,
        ["*"] => ParsedQuery::BrowseAll,
        _ => ParsedQuery::Terms(tokens.into_iter().map(Needle::new).collect()),
    }
}

/// `true` when every needle matches `snippet` somewhere.
pub fn snippet_matches(snippet: &Snippet, needles: &[Needle], table: &ContentTypeTable) -> bool {
    let keywords = snippet.keywords().to_lowercase();
    needles
        .iter()
        .all(|needle| token_matches(snippet, &keywords, needle, table))
}

fn token_matches(snippet: &Snippet, keywords_lower: &str, needle: &Needle, table: &ContentTypeTable) -> bool {
    if keywords_lower.contains(needle.as_str()) {
        return true;
    }
    if find_ignore_case(snippet.content(), 0, needle).is_some() {
        return true;
    }

    snippet.attachments().is_some_and(|attachments| {
        attachments.iter().any(|attachment| {
            attachment.name().to_lowercase().contains(needle.as_str())
                || attachment
                    .decoded_text(table)
                    .is_some_and(|text| text.to_lowercase().contains(needle.as_str()))
        })
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// COHORT
// ─────────────────────────────────────────────────────────────────────────────

/// Shared monotonic cursor handing out each index of `[0, len)` exactly once.
#[derive(Debug)]
pub struct IndexCursor {
    next: AtomicUsize,
    len: usize,
}

impl IndexCursor {
    pub fn new(len: usize) -> Self {
        Self {
            next: AtomicUsize::new(0),
            len,
        }
    }

    /// Claim the next unclaimed index, `None` once all are taken.
    pub fn claim(&self) -> Option<usize> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        (index < self.len).then_some(index)
    }
}

/// What a generation's workers look for.
#[derive(Debug, Clone)]
pub(crate) enum QueryPlan {
    BrowseAll,
    Terms(Vec<Needle>),
}

impl QueryPlan {
    pub(crate) fn ranking(&self) -> Ranking {
        match self {
            QueryPlan::BrowseAll => Ranking::Keywords,
            QueryPlan::Terms(_) => Ranking::MatchDegree,
        }
    }
}

/// Inputs and collected hits of one generation. Everything but `hits` and
/// the two counters is immutable for the generation's lifetime.
pub(crate) struct Cohort {
    pub(crate) generation: u64,
    pub(crate) keyword: String,
    pub(crate) plan: QueryPlan,
    pub(crate) snapshot: Arc<[Arc<Snippet>]>,
    pub(crate) token: CancellationToken,
    pub(crate) content_types: Arc<ContentTypeTable>,
    pub(crate) weights: ScoringWeights,
    cursor: IndexCursor,
    live_workers: AtomicUsize,
    hits: Mutex<Vec<ScoredHit>>,
}

impl Cohort {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        generation: u64,
        keyword: String,
        plan: QueryPlan,
        snapshot: Arc<[Arc<Snippet>]>,
        token: CancellationToken,
        content_types: Arc<ContentTypeTable>,
        weights: ScoringWeights,
        workers: usize,
    ) -> Self {
        let len = snapshot.len();
        Self {
            generation,
            keyword,
            plan,
            snapshot,
            token,
            content_types,
            weights,
            cursor: IndexCursor::new(len),
            live_workers: AtomicUsize::new(workers),
            hits: Mutex::new(Vec::new()),
        }
    }

    /// Count a worker out. Returns `true` for the last one.
    pub(crate) fn leave(&self) -> bool {
        self.live_workers.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn take_hits(&self) -> Vec<ScoredHit> {
        std::mem::take(&mut *self.hits.lock())
    }
}

type MatchFn = fn(&Snippet, &[Needle], &ContentTypeTable) -> bool;
type ScoreFn = fn(&Snippet, &[Needle], &ScoringWeights) -> u32;

/// Scan claimed indices until the cursor is exhausted or the generation is
/// cancelled. Returns the number of hits this worker recorded.
pub(crate) fn run_worker(cohort: &Cohort) -> usize {
    run_worker_with(cohort, snippet_matches, match_degree)
}

fn run_worker_with(cohort: &Cohort, matches: MatchFn, score: ScoreFn) -> usize {
    let mut matched = 0;

    loop {
        if cohort.token.is_cancelled() {
            break;
        }
        let Some(index) = cohort.cursor.claim() else {
            break;
        };
        let snippet = &cohort.snapshot[index];
        if snippet.is_deleted() {
            continue;
        }

        let match_degree = match evaluate(cohort, snippet, matches, score) {
            Ok(Some(degree)) => degree,
            Ok(None) => continue,
            Err(e) => {
                warn!(
                    "event=record_match_failed module=search status=skipped generation={} {}",
                    cohort.generation, e
                );
                continue;
            }
        };

        if cohort.token.is_cancelled() {
            break;
        }
        cohort.hits.lock().push(ScoredHit {
            snippet: Arc::clone(snippet),
            match_degree,
        });
        matched += 1;
    }

    matched
}

/// Match and score one snippet. A failure while matching skips the snippet;
/// a failure while scoring keeps the hit with degree 0.
fn evaluate(
    cohort: &Cohort,
    snippet: &Snippet,
    matches: MatchFn,
    score: ScoreFn,
) -> Result<Option<u32>, CodeLibError> {
    let needles = match &cohort.plan {
        QueryPlan::BrowseAll => return Ok(Some(0)),
        QueryPlan::Terms(needles) => needles,
    };

    let matched = guarded(snippet, || matches(snippet, needles, &cohort.content_types))?;
    if !matched {
        return Ok(None);
    }

    let degree = guarded(snippet, || score(snippet, needles, &cohort.weights)).unwrap_or_else(|e| {
        warn!(
            "event=match_degree_failed module=search status=zeroed generation={} {}",
            cohort.generation, e
        );
        0
    });
    Ok(Some(degree))
}

fn guarded<T>(snippet: &Snippet, f: impl FnOnce() -> T) -> Result<T, CodeLibError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        CodeLibError::RecordMatch {
            id: snippet.id().to_string(),
            reason,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Attachment;
    use std::collections::HashSet;

    fn table() -> ContentTypeTable {
        ContentTypeTable::default()
    }

    fn terms(query: &str) -> Vec<Needle> {
        match parse_query(query) {
            ParsedQuery::Terms(needles) => needles,
            other => panic!("expected terms, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_query() {
        assert_eq!(parse_query(""), ParsedQuery::Blank);
        assert_eq!(parse_query("  , \t,"), ParsedQuery::Blank);
        assert_eq!(parse_query(" * "), ParsedQuery::BrowseAll);
        assert_eq!(terms("java,gui  swing").len(), 3);
        // `*` only means browse-all on its own
        assert_eq!(terms("* java").len(), 2);
    }

    #[test]
    fn test_find_ignore_case() {
        let needle = Needle::new("Class");
        assert_eq!(find_ignore_case(b"public CLASS A", 0, &needle), Some(7));
        assert_eq!(find_ignore_case(b"public class A class", 8, &needle), Some(15));
        assert_eq!(find_ignore_case(b"cla", 0, &needle), None);
        assert_eq!(find_ignore_case(b"", 0, &needle), None);
        assert_eq!(find_ignore_case(b"abc", 0, &Needle::new("")), Some(0));
    }

    #[test]
    fn test_find_ignore_case_non_ascii() {
        let needle = Needle::new("ÉTÉ");
        assert_eq!(find_ignore_case("un été chaud".as_bytes(), 0, &needle), Some(3));
        let needle = Needle::new("straße");
        assert!(find_ignore_case("STRAße".as_bytes(), 0, &needle).is_some());
    }

    #[test]
    fn test_match_order_sources() {
        let t = table();
        let mut s = Snippet::with_text("java, gui", "public class Window {}");
        s.add_attachment(Attachment::new("layout.xml", b"<GridBagLayout/>".to_vec()));
        s.add_attachment(Attachment::new("icon.png", b"gridbag".to_vec()));

        assert!(snippet_matches(&s, &terms("JAVA"), &t));
        assert!(snippet_matches(&s, &terms("window"), &t));
        assert!(snippet_matches(&s, &terms("LAYOUT"), &t));
        assert!(snippet_matches(&s, &terms("gridbaglayout"), &t));
        assert!(snippet_matches(&s, &terms("java window layout"), &t));
        assert!(!snippet_matches(&s, &terms("java python"), &t));
    }

    #[test]
    fn test_binary_and_image_attachment_bytes_not_searched() {
        let t = table();
        let mut s = Snippet::with_text("misc", "");
        s.add_attachment(Attachment::new("blob.bin", b"secret".to_vec()));
        s.add_attachment(Attachment::new("icon.png", b"pixels".to_vec()));
        assert!(!snippet_matches(&s, &terms("secret"), &t));
        assert!(!snippet_matches(&s, &terms("pixels"), &t));
        assert!(snippet_matches(&s, &terms("blob"), &t));
        assert!(snippet_matches(&s, &terms("ICON"), &t));
    }

    #[test]
    fn test_cursor_partition_complete() {
        for &(size, workers) in &[(0usize, 1usize), (1, 32), (7, 3), (1000, 8), (100_000, 32)] {
            let cursor = IndexCursor::new(size);
            let claimed: Vec<Vec<usize>> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..workers)
                    .map(|_| {
                        scope.spawn(|| {
                            let mut mine = Vec::new();
                            while let Some(i) = cursor.claim() {
                                mine.push(i);
                            }
                            mine
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            let total: usize = claimed.iter().map(Vec::len).sum();
            let unique: HashSet<usize> = claimed.into_iter().flatten().collect();
            assert_eq!(total, size, "double visit with size={size} workers={workers}");
            assert_eq!(unique.len(), size);
            assert!(unique.iter().all(|&i| i < size));
        }
    }

    fn cohort(snippets: Vec<Snippet>, plan: QueryPlan, workers: usize) -> Cohort {
        let snapshot: Arc<[Arc<Snippet>]> = snippets.into_iter().map(Arc::new).collect();
        Cohort::new(
            1,
            "q".to_string(),
            plan,
            snapshot,
            CancellationToken::new(),
            Arc::new(table()),
            ScoringWeights::default(),
            workers,
        )
    }

    #[test]
    fn test_run_worker_skips_deleted() {
        let mut gone = Snippet::with_text("java", "x");
        gone.delete();
        let c = cohort(
            vec![Snippet::with_text("java", ""), gone, Snippet::with_text("rust", "")],
            QueryPlan::BrowseAll,
            1,
        );
        assert_eq!(run_worker(&c), 2);
        assert!(c.leave());
        assert_eq!(c.take_hits().len(), 2);
    }

    #[test]
    fn test_run_worker_stops_when_cancelled() {
        let c = cohort(
            (0..100).map(|i| Snippet::with_text(&format!("k{i}"), "")).collect(),
            QueryPlan::BrowseAll,
            1,
        );
        c.token.cancel();
        assert_eq!(run_worker(&c), 0);
        assert!(c.take_hits().is_empty());
    }

    fn panics_on_broken(snippet: &Snippet, needles: &[Needle], table: &ContentTypeTable) -> bool {
        if snippet.keywords().contains("broken") {
            panic!("unreadable record");
        }
        snippet_matches(snippet, needles, table)
    }

    fn panics_on_unscorable(snippet: &Snippet, needles: &[Needle], weights: &ScoringWeights) -> u32 {
        if snippet.keywords().contains("unscorable") {
            panic!("scorer failed");
        }
        match_degree(snippet, needles, weights)
    }

    #[test]
    fn test_failing_record_does_not_stop_the_scan() {
        let c = cohort(
            vec![
                Snippet::with_text("java, broken", "java"),
                Snippet::with_text("java, ok", "java"),
                Snippet::with_text("java, unscorable", "java"),
                Snippet::with_text("java, fine", "java"),
            ],
            QueryPlan::Terms(terms("java")),
            1,
        );

        assert_eq!(run_worker_with(&c, panics_on_broken, panics_on_unscorable), 3);
        assert!(c.leave());

        let hits = c.take_hits();
        let degree = |k: &str| hits.iter().find(|h| h.snippet.keywords() == k).map(|h| h.match_degree);
        assert_eq!(degree("java, broken"), None);
        assert_eq!(degree("java, unscorable"), Some(0));
        assert!(degree("java, ok").unwrap() > 0);
        assert!(degree("java, fine").unwrap() > 0);
    }

    #[test]
    fn test_guarded_reports_record_and_reason() {
        let s = Snippet::with_text("java", "");
        let err = guarded(&s, || -> bool { panic!("boom") }).unwrap_err();
        match err {
            CodeLibError::RecordMatch { id, reason } => {
                assert_eq!(id, s.id());
                assert_eq!(reason, "boom");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(guarded(&s, || 7).is_ok());
    }

    #[test]
    fn test_parallel_workers_collect_every_hit_once() {
        let snippets: Vec<Snippet> = (0..2000)
            .map(|i| Snippet::with_text(&format!("item {i}"), if i % 2 == 0 { "even" } else { "odd" }))
            .collect();
        let c = Arc::new(cohort(snippets, QueryPlan::Terms(terms("even")), 8));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let c = Arc::clone(&c);
                scope.spawn(move || run_worker(&c));
            }
        });

        let hits = c.take_hits();
        let ids: HashSet<&str> = hits.iter().map(|h| h.snippet.id()).collect();
        assert_eq!(hits.len(), 1000);
        assert_eq!(ids.len(), 1000);
        assert!(hits.iter().all(|h| h.match_degree > 0));
    }
}
