//! Core data models for CodeLib
//!
//! A [`Snippet`] is the unit of search and persistence. Fields are private so
//! every mutation goes through a method that keeps the keyword normalisation
//! and timestamp invariants.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::content_detection::{ContentType, ContentTypeTable};

/// Stands in for "no keywords". Keywords are never empty.
pub const DEFAULT_KEYWORDS: &str = " ";

/// Charset of snippet content and of query needles.
pub const DEFAULT_CHARSET: &str = "UTF-8";

const KEYWORD_SEPARATOR: &str = ", ";

/// Normalise a raw keyword string: split on commas, trim each part, drop empty
/// parts and re-join with `", "`. Nothing left yields [`DEFAULT_KEYWORDS`].
pub fn normalize_keywords(raw: &str) -> String {
    let joined = raw
        .trim()
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .collect::<Vec<_>>()
        .join(KEYWORD_SEPARATOR);

    if joined.is_empty() {
        DEFAULT_KEYWORDS.to_string()
    } else {
        joined
    }
}

fn default_keywords() -> String {
    DEFAULT_KEYWORDS.to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// ATTACHMENT
// ─────────────────────────────────────────────────────────────────────────────

/// A named binary blob attached to a snippet.
///
/// The content type is derived on first access and cached; it is never written
/// to disk so that new extension tables apply to old files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    name: String,
    #[serde(default)]
    binary_content: Vec<u8>,
    #[serde(skip)]
    content_type: OnceLock<ContentType>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, binary_content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            binary_content,
            content_type: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.content_type = OnceLock::new();
    }

    pub fn binary_content(&self) -> &[u8] {
        &self.binary_content
    }

    pub fn set_binary_content(&mut self, binary_content: Vec<u8>) {
        self.binary_content = binary_content;
        self.content_type = OnceLock::new();
    }

    /// Cached content type, detected with `table` on first access.
    pub fn content_type(&self, table: &ContentTypeTable) -> ContentType {
        *self
            .content_type
            .get_or_init(|| table.classify(&self.name, &self.binary_content))
    }

    /// Drop the cached content type and detect it again.
    pub fn recheck_content_type(&mut self, table: &ContentTypeTable) -> ContentType {
        self.content_type = OnceLock::new();
        self.content_type(table)
    }

    /// Content decoded as text, `None` for binary and image attachments.
    pub fn decoded_text(&self, table: &ContentTypeTable) -> Option<String> {
        let encoding = self.content_type(table).text_encoding()?;
        let (text, _, _) = encoding.decode(&self.binary_content);
        Some(text.into_owned())
    }
}

impl PartialEq for Attachment {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.binary_content == other.binary_content
    }
}

impl Eq for Attachment {}

impl fmt::Display for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SNIPPET
// ─────────────────────────────────────────────────────────────────────────────

/// A stored code snippet.
///
/// Timestamps are optional on the wire because the oldest file versions did
/// not carry them; snippets created in-process always have both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    #[serde(default)]
    id: String,
    #[serde(default = "default_keywords")]
    keywords: String,
    #[serde(default)]
    content: Vec<u8>,
    #[serde(default)]
    attachments: Option<Vec<Attachment>>,
    #[serde(default)]
    create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    deleted: bool,
}

impl Default for Snippet {
    fn default() -> Self {
        Self::new()
    }
}

impl Snippet {
    /// Empty snippet with a fresh id and both timestamps set to now.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            keywords: default_keywords(),
            content: Vec::new(),
            attachments: None,
            create_time: Some(now),
            update_time: Some(now),
            deleted: false,
        }
    }

    /// Snippet with normalised `keywords` and the given content.
    pub fn with_text(keywords: &str, content: impl Into<Vec<u8>>) -> Self {
        let mut snippet = Self::new();
        snippet.keywords = normalize_keywords(keywords);
        snippet.content = content.into();
        snippet
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replace the id. Uniqueness is the caller's responsibility.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn keywords(&self) -> &str {
        &self.keywords
    }

    pub fn set_keywords(&mut self, raw: &str) {
        self.keywords = normalize_keywords(raw);
        self.touch();
    }

    pub fn first_keyword(&self) -> &str {
        self.keywords.split(',').next().unwrap_or(DEFAULT_KEYWORDS)
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn set_content(&mut self, content: Vec<u8>) {
        self.content = content;
        self.touch();
    }

    pub fn attachments(&self) -> Option<&[Attachment]> {
        self.attachments.as_deref()
    }

    pub fn has_attachments(&self) -> bool {
        self.attachments.as_ref().is_some_and(|a| !a.is_empty())
    }

    /// Replace all attachments; they are kept ordered by name.
    pub fn set_attachments(&mut self, attachments: Option<Vec<Attachment>>) {
        self.attachments = attachments.map(|mut list| {
            list.sort_by(|a, b| a.name.cmp(&b.name));
            list
        });
        self.touch();
    }

    pub fn add_attachment(&mut self, attachment: Attachment) {
        let list = self.attachments.get_or_insert_with(Vec::new);
        let pos = list.partition_point(|a| a.name <= attachment.name);
        list.insert(pos, attachment);
        self.touch();
    }

    /// Remove attachments called `name`, returning how many were removed.
    pub fn remove_attachment(&mut self, name: &str) -> usize {
        let Some(list) = self.attachments.as_mut() else {
            return 0;
        };
        let before = list.len();
        list.retain(|a| a.name != name);
        let removed = before - list.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }

    pub fn create_time(&self) -> Option<DateTime<Utc>> {
        self.create_time
    }

    pub fn set_create_time(&mut self, time: Option<DateTime<Utc>>) {
        self.create_time = time;
    }

    pub fn update_time(&self) -> Option<DateTime<Utc>> {
        self.update_time
    }

    /// Set the update time verbatim (imports, tests). Mutators use [`Self::touch`].
    pub fn set_update_time(&mut self, time: Option<DateTime<Utc>>) {
        self.update_time = time;
    }

    /// Advance `update_time` to now. Never moves it backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.update_time = Some(match self.update_time {
            Some(prev) if prev > now => prev,
            _ => now,
        });
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Tombstone: keep the id, clear the payload.
    pub fn delete(&mut self) {
        self.deleted = true;
        self.keywords = default_keywords();
        self.content = Vec::new();
        self.attachments = None;
        self.touch();
    }

    /// Approximate payload size in bytes.
    pub fn size(&self) -> usize {
        let attachments: usize = self
            .attachments
            .iter()
            .flatten()
            .map(|a| a.binary_content.len())
            .sum();
        self.keywords.len() + self.content.len() + attachments
    }

    /// Creation and modification times in local time, one per line.
    pub fn info(&self) -> String {
        let fmt_time = |t: Option<DateTime<Utc>>| {
            t.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        format!(
            "Created: {}\nModified: {}",
            fmt_time(self.create_time),
            fmt_time(self.update_time)
        )
    }

    /// Fix up a freshly decoded snippet: assign an id when blank and normalise
    /// keywords. Returns `true` when an id was assigned.
    pub(crate) fn repair(&mut self) -> bool {
        self.keywords = normalize_keywords(&self.keywords);
        if self.id.trim().is_empty() {
            self.id = new_id();
            true
        } else {
            false
        }
    }
}

impl fmt::Display for Snippet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_attachments() {
            write!(f, "{} [+]", self.keywords)
        } else {
            f.write_str(&self.keywords)
        }
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_normalize_keywords() {
        assert_eq!(normalize_keywords("java, gui"), "java, gui");
        assert_eq!(normalize_keywords("  java ,gui,, ,swing "), "java, gui, swing");
        assert_eq!(normalize_keywords(""), DEFAULT_KEYWORDS);
        assert_eq!(normalize_keywords(" , ,"), DEFAULT_KEYWORDS);
        assert_eq!(normalize_keywords("two words, x"), "two words, x");
    }

    #[test]
    fn test_normalize_keywords_idempotent() {
        for raw in ["", " ", ",", "a", " a ,b", "a,,b,", "x y, z", "中文, 关键字 ,", ", , a , "] {
            let once = normalize_keywords(raw);
            assert_eq!(normalize_keywords(&once), once, "input {:?}", raw);
        }
    }

    #[test]
    fn test_new_snippet_defaults() {
        let s = Snippet::new();
        assert!(!s.id().is_empty());
        assert_eq!(s.keywords(), DEFAULT_KEYWORDS);
        assert!(s.content().is_empty());
        assert!(s.attachments().is_none());
        assert_eq!(s.create_time(), s.update_time());
        assert!(!s.is_deleted());
        assert_ne!(Snippet::new().id(), s.id());
    }

    #[test]
    fn test_update_time_never_decreases() {
        let mut s = Snippet::with_text("k", "c");
        let future = Utc::now() + Duration::hours(1);
        s.set_update_time(Some(future));
        s.set_content(b"changed".to_vec());
        assert_eq!(s.update_time(), Some(future));

        let past = Utc::now() - Duration::hours(1);
        s.set_update_time(Some(past));
        s.set_keywords("other");
        assert!(s.update_time().unwrap() > past);
    }

    #[test]
    fn test_delete_tombstones() {
        let mut s = Snippet::with_text("java", "class A {}");
        s.add_attachment(Attachment::new("a.txt", b"x".to_vec()));
        let id = s.id().to_string();
        s.delete();
        assert!(s.is_deleted());
        assert_eq!(s.id(), id);
        assert_eq!(s.keywords(), DEFAULT_KEYWORDS);
        assert!(s.content().is_empty());
        assert!(s.attachments().is_none());
    }

    #[test]
    fn test_attachments_kept_sorted() {
        let mut s = Snippet::new();
        s.add_attachment(Attachment::new("b.txt", b"b".to_vec()));
        s.add_attachment(Attachment::new("a.txt", b"a".to_vec()));
        s.add_attachment(Attachment::new("c.txt", b"c".to_vec()));
        let names: Vec<&str> = s.attachments().unwrap().iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);

        assert_eq!(s.remove_attachment("b.txt"), 1);
        assert_eq!(s.remove_attachment("missing"), 0);
        assert_eq!(s.attachments().unwrap().len(), 2);
        assert!(s.to_string().ends_with("[+]"));
    }

    #[test]
    fn test_attachment_content_type_cached_and_rechecked() {
        let table = ContentTypeTable::default();
        let mut a = Attachment::new("a.txt", b"plain".to_vec());
        assert_eq!(a.content_type(&table), ContentType::Utf8Text);

        // Cached value survives a different table until rechecked.
        let empty = ContentTypeTable::new(Vec::<String>::new(), Vec::<String>::new());
        assert_eq!(a.content_type(&empty), ContentType::Utf8Text);
        assert_eq!(a.recheck_content_type(&empty), ContentType::Binary);

        a.set_name("a.png");
        assert_eq!(a.content_type(&table), ContentType::Image);
        assert!(a.decoded_text(&table).is_none());
    }

    #[test]
    fn test_attachment_decoded_gbk_text() {
        let table = ContentTypeTable::default();
        let (gbk, _, _) = encoding_rs::GBK.encode("数据库连接");
        let a = Attachment::new("db.sql", gbk.into_owned());
        assert_eq!(a.content_type(&table), ContentType::NonUtf8Text);
        assert_eq!(a.decoded_text(&table).as_deref(), Some("数据库连接"));
    }

    #[derive(Debug)]
    struct AlwaysLegacy;

    impl crate::content_detection::TextEncodingDetector for AlwaysLegacy {
        fn is_utf8(&self, _bytes: &[u8]) -> bool {
            false
        }
    }

    #[test]
    fn test_attachment_uses_table_detector() {
        let table = ContentTypeTable::default().with_detector(std::sync::Arc::new(AlwaysLegacy));
        let a = Attachment::new("notes.txt", b"ascii only".to_vec());
        assert_eq!(a.content_type(&table), ContentType::NonUtf8Text);
        assert_eq!(a.decoded_text(&table).as_deref(), Some("ascii only"));
    }

    #[test]
    fn test_attachment_equality_ignores_cache() {
        let table = ContentTypeTable::default();
        let a = Attachment::new("x.txt", b"x".to_vec());
        let b = Attachment::new("x.txt", b"x".to_vec());
        a.content_type(&table);
        assert_eq!(a, b);
    }

    #[test]
    fn test_repair_assigns_missing_id() {
        let mut s = Snippet::with_text("a", "b");
        s.set_id("  ");
        s.keywords = " a,, b ".to_string();
        assert!(s.repair());
        assert!(!s.id().trim().is_empty());
        assert_eq!(s.keywords(), "a, b");
        assert!(!s.repair());
    }

    #[test]
    fn test_size_and_first_keyword() {
        let mut s = Snippet::with_text("java, gui", "1234");
        s.add_attachment(Attachment::new("a.bin", vec![0; 10]));
        assert_eq!(s.size(), "java, gui".len() + 4 + 10);
        assert_eq!(s.first_keyword(), "java");
    }
}
