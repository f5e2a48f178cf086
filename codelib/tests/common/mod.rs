//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use codelib::{
    ChannelCatcher, Ranking, SearchEngine, SearchEvent, SearchOptions, SharedStore, Snippet,
    SnippetStore,
};
use crossbeam_channel::Receiver;
use parking_lot::RwLock;

pub const WAIT: Duration = Duration::from_secs(30);

/// One finished search as seen by a [`ChannelCatcher`].
#[derive(Debug)]
pub struct Outcome {
    pub keyword: String,
    pub ranking: Ranking,
    /// `(keywords, match_degree, snippet)` in delivery order.
    pub hits: Vec<(String, u32, Arc<Snippet>)>,
}

impl Outcome {
    pub fn keywords(&self) -> Vec<&str> {
        self.hits.iter().map(|(k, _, _)| k.as_str()).collect()
    }
}

pub fn shared(snippets: Vec<Snippet>) -> SharedStore {
    Arc::new(RwLock::new(SnippetStore::from_snippets(snippets)))
}

pub fn engine(store: SharedStore, workers: usize) -> (SearchEngine, Receiver<SearchEvent>) {
    let (catcher, rx) = ChannelCatcher::new();
    let options = SearchOptions {
        worker_threads: workers,
        ..SearchOptions::default()
    };
    let engine = SearchEngine::new(store, Arc::new(catcher), options).expect("engine starts");
    (engine, rx)
}

/// Receive events until the next completion.
pub fn next_outcome(rx: &Receiver<SearchEvent>) -> Outcome {
    let mut hits = Vec::new();
    loop {
        match rx.recv_timeout(WAIT).expect("search did not complete in time") {
            SearchEvent::Hit {
                snippet,
                match_degree,
                ..
            } => hits.push((snippet.keywords().to_string(), match_degree, snippet)),
            SearchEvent::Complete { keyword, ranking } => {
                return Outcome {
                    keyword,
                    ranking,
                    hits,
                }
            }
        }
    }
}

/// Run one query to completion.
pub fn search(engine: &SearchEngine, rx: &Receiver<SearchEvent>, query: &str) -> Outcome {
    engine.search_now(query);
    next_outcome(rx)
}

/// The two-snippet library used by the scenario tests.
pub fn scenario_a() -> Vec<Snippet> {
    vec![
        Snippet::with_text("java, gui", "public class A{}"),
        Snippet::with_text("python", "def f(): pass"),
    ]
}
