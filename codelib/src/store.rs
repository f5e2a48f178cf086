//! SnippetStore - the in-memory record collection
//!
//! Single-writer: the hosting session owns the store (behind
//! [`SharedStore`](crate::engine::SharedStore) when a search engine reads it).
//! Searches never see the live vector; they take a [`SnippetStore::snapshot`],
//! an immutable `Arc` slice, so an in-flight generation is unaffected by
//! later mutation.
//!
//! The collection is kept ordered by normalised keywords after every keyword
//! mutation so an unfiltered listing is deterministic.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};

use crate::content_detection::{file_extension, ContentTypeTable};
use crate::interface::{CodeLibError, CodeLibResult};
use crate::models::{Attachment, Snippet};
use crate::persistence::{self, LIBRARY_EXTENSION};

/// Whether the collection differs from what is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveState {
    /// Never saved or loaded.
    #[default]
    New,
    Modified,
    Saved,
}

/// Outcome of [`SnippetStore::import_merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Incoming snippets with an id not seen before.
    pub added: usize,
    /// Existing snippets replaced by a newer incoming one.
    pub replaced: usize,
    /// Incoming snippets dropped because the existing one won.
    pub kept: usize,
}

#[derive(Debug, Default)]
pub struct SnippetStore {
    snippets: Vec<Arc<Snippet>>,
    content_types: Arc<ContentTypeTable>,
    state: SaveState,
    loaded_version: Option<i32>,
}

impl SnippetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_types(content_types: Arc<ContentTypeTable>) -> Self {
        Self {
            content_types,
            ..Self::default()
        }
    }

    /// Adopt `snippets` as-is (normalised by their constructors), then order.
    pub fn from_snippets(snippets: impl IntoIterator<Item = Snippet>) -> Self {
        let mut store = Self::new();
        store.snippets = snippets.into_iter().map(Arc::new).collect();
        store.reorder();
        store
    }

    /// Load a library file. Nothing is adopted unless the whole file decodes.
    pub fn open(path: impl AsRef<Path>, content_types: Arc<ContentTypeTable>) -> CodeLibResult<Self> {
        let loaded = persistence::load(path)?;
        let mut store = Self::with_content_types(content_types);
        store.snippets = loaded.snippets.into_iter().map(Arc::new).collect();
        store.reorder();
        store.loaded_version = Some(loaded.header.version());
        // Legacy files that needed ids no longer match what is on disk.
        store.state = if loaded.repaired_ids > 0 {
            SaveState::Modified
        } else {
            SaveState::Saved
        };
        Ok(store)
    }

    /// Save every snippet, tombstones included, in the current format.
    pub fn save(&mut self, path: impl AsRef<Path>) -> CodeLibResult<()> {
        persistence::save(path, &self.snippets)?;
        self.state = SaveState::Saved;
        self.loaded_version = Some(persistence::CURRENT_VERSION);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Read Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Number of snippets including tombstones.
    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// Number of snippets that are not tombstoned.
    pub fn active_count(&self) -> usize {
        self.snippets.iter().filter(|s| !s.is_deleted()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Snippet>> {
        self.snippets.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Snippet>> {
        self.snippets.iter().find(|s| s.id() == id)
    }

    /// Immutable view of the current collection for one search generation.
    pub fn snapshot(&self) -> Arc<[Arc<Snippet>]> {
        self.snippets.iter().cloned().collect()
    }

    pub fn content_types(&self) -> &Arc<ContentTypeTable> {
        &self.content_types
    }

    pub fn save_state(&self) -> SaveState {
        self.state
    }

    pub fn is_modified(&self) -> bool {
        self.state == SaveState::Modified
    }

    /// Format version of the file this store was last loaded from or saved to.
    pub fn loaded_version(&self) -> Option<i32> {
        self.loaded_version
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Write Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Add a snippet and return its id.
    pub fn add(&mut self, snippet: Snippet) -> String {
        let id = snippet.id().to_string();
        let pos = self
            .snippets
            .partition_point(|s| s.keywords() <= snippet.keywords());
        self.snippets.insert(pos, Arc::new(snippet));
        self.mark_modified();
        id
    }

    /// Tombstone the snippet. Deleting a tombstone again is a no-op.
    pub fn soft_delete(&mut self, id: &str) -> CodeLibResult<()> {
        let index = self.index_of(id)?;
        if self.snippets[index].is_deleted() {
            return Ok(());
        }
        Arc::make_mut(&mut self.snippets[index]).delete();
        self.reorder();
        self.mark_modified();
        Ok(())
    }

    /// Mutate one snippet in place and restore ordering afterwards.
    ///
    /// Snapshots held by running searches keep the old version.
    pub fn update<R>(&mut self, id: &str, f: impl FnOnce(&mut Snippet) -> R) -> CodeLibResult<R> {
        let index = self.index_of(id)?;
        let snippet = Arc::make_mut(&mut self.snippets[index]);
        let keywords_before = snippet.keywords().to_string();
        let result = f(snippet);
        if snippet.keywords() != keywords_before {
            self.reorder();
        }
        self.mark_modified();
        Ok(result)
    }

    pub fn set_keywords(&mut self, id: &str, raw: &str) -> CodeLibResult<()> {
        self.update(id, |s| s.set_keywords(raw))
    }

    pub fn set_content(&mut self, id: &str, content: Vec<u8>) -> CodeLibResult<()> {
        self.update(id, |s| s.set_content(content))
    }

    pub fn set_attachments(&mut self, id: &str, attachments: Option<Vec<Attachment>>) -> CodeLibResult<()> {
        self.update(id, |s| s.set_attachments(attachments))
    }

    pub fn add_attachment(&mut self, id: &str, attachment: Attachment) -> CodeLibResult<()> {
        self.update(id, |s| s.add_attachment(attachment))
    }

    pub fn remove_attachment(&mut self, id: &str, name: &str) -> CodeLibResult<usize> {
        self.update(id, |s| s.remove_attachment(name))
    }

    pub fn touch(&mut self, id: &str) -> CodeLibResult<()> {
        self.update(id, Snippet::touch)
    }

    /// Merge `incoming` by id.
    ///
    /// For a shared id the snippet with the later `update_time` survives; a
    /// missing time loses to a present one, the incoming snippet wins a tie
    /// and the existing one wins when neither has a time.
    pub fn import_merge(&mut self, incoming: impl IntoIterator<Item = Snippet>) -> MergeReport {
        let mut by_id: HashMap<String, usize> = self
            .snippets
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id().to_string(), i))
            .collect();
        let mut report = MergeReport::default();

        for snippet in incoming {
            match by_id.get(snippet.id()) {
                Some(&index) => {
                    if incoming_wins(&self.snippets[index], &snippet) {
                        self.snippets[index] = Arc::new(snippet);
                        report.replaced += 1;
                    } else {
                        report.kept += 1;
                    }
                }
                None => {
                    by_id.insert(snippet.id().to_string(), self.snippets.len());
                    self.snippets.push(Arc::new(snippet));
                    report.added += 1;
                }
            }
        }

        self.reorder();
        if report.added + report.replaced > 0 {
            self.mark_modified();
        }
        info!(
            "event=import_merge module=store status=ok added={} replaced={} kept={}",
            report.added, report.replaced, report.kept
        );
        report
    }

    /// Import plain files and library files.
    ///
    /// A library file (`.zcl2`) contributes its snippets; any other file
    /// becomes one snippet keyed `"<ext>, <stem>"` holding the file bytes.
    /// Every path is read before anything is merged.
    pub fn import_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> CodeLibResult<MergeReport> {
        let mut incoming = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            if file_extension(&name).as_deref() == Some(LIBRARY_EXTENSION) {
                incoming.extend(persistence::load(path)?.snippets);
            } else {
                incoming.push(snippet_from_file(path)?);
            }
        }
        Ok(self.import_merge(incoming))
    }

    /// Merge another library file into this one.
    pub fn merge_library(&mut self, path: impl AsRef<Path>) -> CodeLibResult<MergeReport> {
        let loaded = persistence::load(path)?;
        Ok(self.import_merge(loaded.snippets))
    }

    /// Stable re-sort by normalised keywords.
    pub fn reorder(&mut self) {
        self.snippets.sort_by(|a, b| a.keywords().cmp(b.keywords()));
    }

    fn index_of(&self, id: &str) -> CodeLibResult<usize> {
        self.snippets
            .iter()
            .position(|s| s.id() == id)
            .ok_or_else(|| CodeLibError::NotFound(id.to_string()))
    }

    fn mark_modified(&mut self) {
        if self.state != SaveState::Modified {
            debug!("event=save_state module=store status=modified");
        }
        self.state = SaveState::Modified;
    }
}

fn incoming_wins(existing: &Snippet, incoming: &Snippet) -> bool {
    match (existing.update_time(), incoming.update_time()) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(old), Some(new)) => new >= old,
    }
}

fn snippet_from_file(path: &Path) -> CodeLibResult<Snippet> {
    let content = fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = file_extension(&name).unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Snippet::with_text(&format!("{ext}, {stem}"), content))
}

/// Default location for a library named `name` inside `dir`.
pub fn library_path(dir: impl AsRef<Path>, name: &str) -> PathBuf {
    dir.as_ref().join(format!("{name}.{LIBRARY_EXTENSION}"))
}
