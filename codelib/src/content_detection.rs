//! Content type detection for attachments
//!
//! An attachment's type comes from its file extension, refined by sniffing the
//! bytes for valid UTF-8. The extension tables are plain data handed in by the
//! caller (usually from [`crate::config::ContentTypesConfig`]).

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use encoding_rs::Encoding;

/// Extensions treated as text when no table is configured.
pub const DEFAULT_TEXT_EXTENSIONS: &[&str] = &[
    "as", "asm", "asp", "bat", "bbcode", "c", "clj", "clojure", "cpp", "cs", "css", "d", "f",
    "for", "fortran", "groovy", "gsp", "h", "htm", "html", "ini", "java", "js", "jsp", "lisp",
    "log", "lua", "mq4", "mq5", "mqh", "mx", "mxml", "pas", "php", "pl", "properties", "py", "r",
    "rb", "reg", "ruby", "sas", "scala", "scheme", "scm", "sh", "sql", "ss", "tcl", "txt", "vb",
    "vbs", "xml", "xsd", "xsl",
];

/// Extensions treated as images when no table is configured.
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "gif", "png", "bmp", "svg", "jp2"];

/// Attachment content category. Never persisted; always derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Binary,
    Utf8Text,
    /// Text that is not valid UTF-8, read as GBK.
    NonUtf8Text,
    Image,
}

impl ContentType {
    /// Encoding used to decode the bytes as text, `None` when not text.
    pub fn text_encoding(&self) -> Option<&'static Encoding> {
        match self {
            ContentType::Utf8Text => Some(encoding_rs::UTF_8),
            ContentType::NonUtf8Text => Some(encoding_rs::GBK),
            ContentType::Binary | ContentType::Image => None,
        }
    }

    pub fn is_text(&self) -> bool {
        self.text_encoding().is_some()
    }
}

/// Decides whether a byte buffer is UTF-8 text.
pub trait TextEncodingDetector: fmt::Debug + Send + Sync {
    fn is_utf8(&self, bytes: &[u8]) -> bool;
}

/// Strict validator: the whole buffer must be valid UTF-8.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Validator;

impl TextEncodingDetector for Utf8Validator {
    fn is_utf8(&self, bytes: &[u8]) -> bool {
        Encoding::utf8_valid_up_to(bytes) == bytes.len()
    }
}

/// Extension lookup tables plus the text-encoding detector used by
/// [`ContentTypeTable::classify`].
#[derive(Debug, Clone)]
pub struct ContentTypeTable {
    text_extensions: HashSet<String>,
    image_extensions: HashSet<String>,
    detector: Arc<dyn TextEncodingDetector>,
}

impl Default for ContentTypeTable {
    fn default() -> Self {
        Self::new(
            DEFAULT_TEXT_EXTENSIONS.iter().copied(),
            DEFAULT_IMAGE_EXTENSIONS.iter().copied(),
        )
    }
}

impl ContentTypeTable {
    /// Build a table; extensions are matched case-insensitively, without the dot.
    pub fn new<T, I>(text_extensions: T, image_extensions: I) -> Self
    where
        T: IntoIterator,
        T::Item: AsRef<str>,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let normalize = |ext: &str| ext.trim().trim_start_matches('.').to_lowercase();
        Self {
            text_extensions: text_extensions
                .into_iter()
                .map(|e| normalize(e.as_ref()))
                .collect(),
            image_extensions: image_extensions
                .into_iter()
                .map(|e| normalize(e.as_ref()))
                .collect(),
            detector: Arc::new(Utf8Validator),
        }
    }

    /// Replace the default [`Utf8Validator`].
    pub fn with_detector(mut self, detector: Arc<dyn TextEncodingDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn detector(&self) -> &dyn TextEncodingDetector {
        self.detector.as_ref()
    }

    /// [`Self::detect`] with this table's own detector.
    pub fn classify(&self, name: &str, bytes: &[u8]) -> ContentType {
        self.detect(name, bytes, self.detector())
    }

    /// Detect the content type of an attachment.
    ///
    /// Empty content, an empty name, or a name without a usable extension is
    /// always `Binary`.
    pub fn detect(&self, name: &str, bytes: &[u8], detector: &dyn TextEncodingDetector) -> ContentType {
        if bytes.is_empty() {
            return ContentType::Binary;
        }
        let Some(ext) = file_extension(name) else {
            return ContentType::Binary;
        };

        if self.text_extensions.contains(&ext) {
            if detector.is_utf8(bytes) {
                ContentType::Utf8Text
            } else {
                ContentType::NonUtf8Text
            }
        } else if self.image_extensions.contains(&ext) {
            ContentType::Image
        } else {
            ContentType::Binary
        }
    }
}

/// Lowercased extension after the last dot; `None` when missing or trailing.
pub fn file_extension(name: &str) -> Option<String> {
    let pos = name.rfind('.')?;
    let ext = &name[pos + 1..];
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(name: &str, bytes: &[u8]) -> ContentType {
        ContentTypeTable::default().detect(name, bytes, &Utf8Validator)
    }

    #[test]
    fn test_text_extension_utf8() {
        assert_eq!(detect("Main.java", b"class Main {}"), ContentType::Utf8Text);
        assert_eq!(detect("notes.TXT", "你好".as_bytes()), ContentType::Utf8Text);
    }

    #[test]
    fn test_text_extension_non_utf8() {
        let (gbk, _, _) = encoding_rs::GBK.encode("你好");
        assert_eq!(detect("readme.txt", &gbk), ContentType::NonUtf8Text);
    }

    #[test]
    fn test_image_and_binary() {
        assert_eq!(detect("logo.PNG", &[0x89, b'P', b'N', b'G']), ContentType::Image);
        assert_eq!(detect("archive.tar", b"data"), ContentType::Binary);
        assert_eq!(detect("Makefile", b"all:"), ContentType::Binary);
        assert_eq!(detect("trailing.", b"x"), ContentType::Binary);
        assert_eq!(detect("empty.txt", b""), ContentType::Binary);
    }

    #[test]
    fn test_custom_table() {
        let table = ContentTypeTable::new([".rs", "TOML"], ["webp"]);
        assert_eq!(table.detect("lib.rs", b"fn x() {}", &Utf8Validator), ContentType::Utf8Text);
        assert_eq!(table.detect("Cargo.toml", b"[package]", &Utf8Validator), ContentType::Utf8Text);
        assert_eq!(table.detect("a.webp", b"RIFF", &Utf8Validator), ContentType::Image);
        assert_eq!(table.detect("a.java", b"class A", &Utf8Validator), ContentType::Binary);
    }

    /// Treats everything as legacy-encoded text.
    #[derive(Debug)]
    struct NeverUtf8;

    impl TextEncodingDetector for NeverUtf8 {
        fn is_utf8(&self, _bytes: &[u8]) -> bool {
            false
        }
    }

    #[test]
    fn test_classify_uses_configured_detector() {
        let table = ContentTypeTable::default();
        assert_eq!(table.classify("a.txt", b"plain"), ContentType::Utf8Text);

        let table = table.with_detector(Arc::new(NeverUtf8));
        assert_eq!(table.classify("a.txt", b"plain"), ContentType::NonUtf8Text);
        assert_eq!(table.classify("a.png", b"plain"), ContentType::Image);
    }

    #[test]
    fn test_text_encoding() {
        assert_eq!(ContentType::Utf8Text.text_encoding(), Some(encoding_rs::UTF_8));
        assert_eq!(ContentType::NonUtf8Text.text_encoding(), Some(encoding_rs::GBK));
        assert!(ContentType::Image.text_encoding().is_none());
        assert!(!ContentType::Binary.is_text());
    }
}
