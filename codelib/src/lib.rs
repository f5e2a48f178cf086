//! CodeLib Core - snippet library search and persistence
//!
//! A personal code-snippet library: an in-memory collection of snippets with
//! keywords, content and attachments, searched by a debounced, cancellable
//! parallel scan with weighted relevance scoring, and stored in a versioned,
//! compressed file format (reads versions 0, 2, 3, 4 and 5, writes 5).

pub mod compression;
pub mod config;
pub mod content_detection;
pub mod engine;
pub mod export;
pub mod interface;
pub mod logging;
pub mod models;
pub mod persistence;
pub mod ranking;
pub mod search;
pub mod serializer;
pub mod store;

pub use engine::{SearchEngine, SearchOptions, SharedStore};
pub use interface::*;
pub use models::{Attachment, Snippet};
pub use persistence::{CodecError, CodecResult, DataHeader, LoadedLibrary, CURRENT_VERSION};
pub use store::{MergeReport, SaveState, SnippetStore};

/// Crate version, as reported by the CLI.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
