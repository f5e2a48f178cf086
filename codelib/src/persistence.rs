//! Library file codec.
//!
//! A library file is `[header][payload]`. The header is the format version as
//! a 4-byte big-endian `i32`; there is no magic number and no length prefix,
//! so the version alone selects the decoder.
//!
//! | version | framing                | serializer  |
//! |---------|------------------------|-------------|
//! | 0, 2    | single-entry ZIP       | object      |
//! | 3       | single-entry ZIP       | compact     |
//! | 4       | single-entry ZIP       | canonical   |
//! | 5       | gzip stream            | canonical   |
//!
//! Only version 5 is ever written. Version 1 never existed and is rejected
//! like any other unknown value.

use std::borrow::Borrow;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::{info, warn};
use serde::ser::{Serialize, Serializer as _};
use thiserror::Error;

use crate::compression::{Compressor, GzipStream, ZipContainer, DEFAULT_BUFFER_SIZE};
use crate::models::Snippet;
use crate::serializer::{CanonicalSerializer, CompactSerializer, ObjectSerializer, Serializer};

/// Version written by [`save`].
pub const CURRENT_VERSION: i32 = 5;

/// Entry name of the payload inside its compressed framing.
pub const PAYLOAD_ENTRY_NAME: &str = "codelib.data";

/// Default file extension of library files.
pub const LIBRARY_EXTENSION: &str = "zcl2";

const HEADER_LEN: usize = 4;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unknown data version: {0}")]
    UnknownVersion(i32),
    #[error("Malformed library file: {0}")]
    Format(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// File header. Describes how the payload that follows is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    version: i32,
}

impl Default for DataHeader {
    fn default() -> Self {
        Self::current()
    }
}

impl DataHeader {
    pub fn current() -> Self {
        Self::new(CURRENT_VERSION)
    }

    pub fn new(version: i32) -> Self {
        Self { version }
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        self.version.to_be_bytes()
    }

    pub fn read_from(reader: &mut dyn Read) -> CodecResult<Self> {
        let mut buf = [0u8; HEADER_LEN];
        reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => CodecError::Format("truncated header".to_string()),
            _ => CodecError::Io(e),
        })?;
        Ok(Self::new(i32::from_be_bytes(buf)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DECODE
// ─────────────────────────────────────────────────────────────────────────────

/// Undecoded payload bytes, tagged with the format that produced them.
///
/// Each variant has its own decode function; supporting a new version adds a
/// variant without touching the existing ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    V0V2(Vec<u8>),
    V3(Vec<u8>),
    V4(Vec<u8>),
    V5(Vec<u8>),
}

impl Payload {
    pub fn select(header: DataHeader, bytes: Vec<u8>) -> CodecResult<Self> {
        match header.version() {
            0 | 2 => Ok(Payload::V0V2(bytes)),
            3 => Ok(Payload::V3(bytes)),
            4 => Ok(Payload::V4(bytes)),
            5 => Ok(Payload::V5(bytes)),
            other => Err(CodecError::UnknownVersion(other)),
        }
    }

    pub fn decode(&self) -> CodecResult<Vec<Snippet>> {
        match self {
            Payload::V0V2(bytes) => decode_v0_v2(bytes),
            Payload::V3(bytes) => decode_v3(bytes),
            Payload::V4(bytes) => decode_v4(bytes),
            Payload::V5(bytes) => decode_v5(bytes),
        }
    }
}

fn decode_v0_v2(bytes: &[u8]) -> CodecResult<Vec<Snippet>> {
    ObjectSerializer.deserialize(&single_zip_entry(bytes)?)
}

fn decode_v3(bytes: &[u8]) -> CodecResult<Vec<Snippet>> {
    CompactSerializer.deserialize(&single_zip_entry(bytes)?)
}

fn decode_v4(bytes: &[u8]) -> CodecResult<Vec<Snippet>> {
    CanonicalSerializer.deserialize(&single_zip_entry(bytes)?)
}

fn decode_v5(bytes: &[u8]) -> CodecResult<Vec<Snippet>> {
    let mut data = Vec::new();
    GzipStream::default().decompress(&mut &bytes[..], &mut |_name: &str, stream: &mut dyn Read| {
        read_entry(stream, &mut data)
    })?;
    CanonicalSerializer.deserialize(&data)
}

/// The one entry of a ZIP container. Zero or several entries is malformed.
fn single_zip_entry(bytes: &[u8]) -> CodecResult<Vec<u8>> {
    let mut entries: Vec<Vec<u8>> = Vec::with_capacity(1);
    ZipContainer.decompress(&mut &bytes[..], &mut |_name: &str, stream: &mut dyn Read| {
        let mut data = Vec::new();
        read_entry(stream, &mut data)?;
        entries.push(data);
        Ok(())
    })?;

    match entries.len() {
        1 => Ok(entries.remove(0)),
        n => Err(CodecError::Format(format!(
            "expected exactly one container entry, found {n}"
        ))),
    }
}

fn read_entry(stream: &mut dyn Read, out: &mut Vec<u8>) -> CodecResult<()> {
    stream
        .read_to_end(out)
        .map_err(|e| CodecError::Compression(format!("corrupt payload: {e}")))?;
    Ok(())
}

/// Result of a successful load.
#[derive(Debug)]
pub struct LoadedLibrary {
    pub header: DataHeader,
    pub snippets: Vec<Snippet>,
    /// Snippets that had no id and were assigned a fresh one.
    pub repaired_ids: usize,
}

/// Decode a whole library from `reader`. Nothing is returned unless every
/// byte decoded.
pub fn read_from(reader: &mut dyn Read) -> CodecResult<LoadedLibrary> {
    let header = DataHeader::read_from(reader)?;
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    let mut snippets = Payload::select(header, bytes)?.decode()?;
    let repaired_ids = snippets.iter_mut().map(Snippet::repair).filter(|r| *r).count();

    Ok(LoadedLibrary {
        header,
        snippets,
        repaired_ids,
    })
}

/// Load the library file at `path`.
pub fn load(path: impl AsRef<Path>) -> CodecResult<LoadedLibrary> {
    let path = path.as_ref();
    let mut reader = BufReader::new(File::open(path)?);
    match read_from(&mut reader) {
        Ok(loaded) => {
            info!(
                "event=library_load module=persistence status=ok version={} snippets={} repaired_ids={}",
                loaded.header.version(),
                loaded.snippets.len(),
                loaded.repaired_ids
            );
            Ok(loaded)
        }
        Err(e) => {
            warn!(
                "event=library_load module=persistence status=error path={} error={}",
                path.display(),
                e
            );
            Err(e)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ENCODE
// ─────────────────────────────────────────────────────────────────────────────

/// Serializes a slice of owned or shared snippets as a plain sequence.
pub(crate) struct SnippetSeq<'a, S>(pub(crate) &'a [S]);

impl<S: Borrow<Snippet>> Serialize for SnippetSeq<'_, S> {
    fn serialize<Ser: serde::Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        serializer.collect_seq(self.0.iter().map(Borrow::borrow))
    }
}

/// Write header and current-version payload to `out`.
pub fn write_to<S: Borrow<Snippet>>(out: &mut dyn Write, snippets: &[S]) -> CodecResult<()> {
    let payload = CanonicalSerializer.serialize(&SnippetSeq(snippets))?;

    out.write_all(&DataHeader::current().encode())?;
    GzipStream::default().compress(
        PAYLOAD_ENTRY_NAME,
        &mut &payload[..],
        None,
        out,
        DEFAULT_BUFFER_SIZE,
    )
}

/// Save `snippets` to `path` in the current version.
///
/// The file is written to a temporary sibling and renamed over `path` only
/// after everything succeeded; on failure the previous file is untouched.
pub fn save<S: Borrow<Snippet>>(path: impl AsRef<Path>, snippets: &[S]) -> CodecResult<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".codelib-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        write_to(&mut out, snippets)?;
        out.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CodecError::Io(e.error))?;

    info!(
        "event=library_save module=persistence status=ok version={} snippets={} path={}",
        CURRENT_VERSION,
        snippets.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Snippet> {
        vec![
            Snippet::with_text("java, gui", "public class A{}"),
            Snippet::with_text("python", "def f(): pass"),
        ]
    }

    fn zip_framed(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        ZipContainer
            .compress(PAYLOAD_ENTRY_NAME, &mut &payload[..], None, &mut out, 0)
            .unwrap();
        out
    }

    fn file_bytes(version: i32, payload: Vec<u8>) -> Vec<u8> {
        let mut bytes = DataHeader::new(version).encode().to_vec();
        bytes.extend(payload);
        bytes
    }

    #[test]
    fn test_header_big_endian() {
        assert_eq!(DataHeader::new(5).encode(), [0, 0, 0, 5]);
        assert_eq!(DataHeader::read_from(&mut &[0u8, 0, 1, 0][..]).unwrap().version(), 256);
        assert!(matches!(
            DataHeader::read_from(&mut &[0u8, 0][..]),
            Err(CodecError::Format(_))
        ));
    }

    #[test]
    fn test_write_read_current() {
        let snippets = sample();
        let mut bytes = Vec::new();
        write_to(&mut bytes, &snippets).unwrap();
        assert_eq!(&bytes[..4], &[0, 0, 0, 5]);

        let loaded = read_from(&mut &bytes[..]).unwrap();
        assert_eq!(loaded.header.version(), CURRENT_VERSION);
        assert_eq!(loaded.snippets, snippets);
        assert_eq!(loaded.repaired_ids, 0);
    }

    #[test]
    fn test_payload_variants_selected_by_version() {
        let select = |v| Payload::select(DataHeader::new(v), Vec::new());
        assert!(matches!(select(0), Ok(Payload::V0V2(_))));
        assert!(matches!(select(2), Ok(Payload::V0V2(_))));
        assert!(matches!(select(3), Ok(Payload::V3(_))));
        assert!(matches!(select(4), Ok(Payload::V4(_))));
        assert!(matches!(select(5), Ok(Payload::V5(_))));
        assert!(matches!(select(1), Err(CodecError::UnknownVersion(1))));
        assert!(matches!(select(6), Err(CodecError::UnknownVersion(6))));
        assert!(matches!(select(-1), Err(CodecError::UnknownVersion(-1))));
    }

    #[test]
    fn test_each_legacy_version_decodes() {
        let snippets = sample();
        let object = ObjectSerializer.serialize(&snippets).unwrap();
        let compact = CompactSerializer.serialize(&snippets).unwrap();
        let canonical = CanonicalSerializer.serialize(&snippets).unwrap();

        for (version, payload) in [
            (0, zip_framed(&object)),
            (2, zip_framed(&object)),
            (3, zip_framed(&compact)),
            (4, zip_framed(&canonical)),
        ] {
            let loaded = read_from(&mut &file_bytes(version, payload)[..]).unwrap();
            assert_eq!(loaded.header.version(), version);
            assert_eq!(loaded.snippets, snippets, "version {version}");
        }
    }

    #[test]
    fn test_missing_ids_repaired() {
        let json = br#"[{"keywords":"a","content":[]},{"id":"keep","keywords":"b ,, c","content":[]}]"#;
        let loaded = read_from(&mut &file_bytes(2, zip_framed(json))[..]).unwrap();
        assert_eq!(loaded.repaired_ids, 1);
        assert!(!loaded.snippets[0].id().is_empty());
        assert_eq!(loaded.snippets[1].id(), "keep");
        assert_eq!(loaded.snippets[1].keywords(), "b, c");
    }

    #[test]
    fn test_container_must_hold_one_entry() {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for name in ["a", "b"] {
            zip.start_file(name, options).unwrap();
            zip.write_all(b"[]").unwrap();
        }
        let archive = zip.finish().unwrap().into_inner();
        assert!(matches!(
            read_from(&mut &file_bytes(2, archive)[..]),
            Err(CodecError::Format(_))
        ));
    }

    #[test]
    fn test_wrong_serializer_for_version_fails() {
        let object = ObjectSerializer.serialize(&sample()).unwrap();
        assert!(read_from(&mut &file_bytes(4, zip_framed(&object))[..]).is_err());
    }

    #[test]
    fn test_truncated_payload_fails() {
        let mut bytes = Vec::new();
        write_to(&mut bytes, &sample()).unwrap();
        bytes.truncate(bytes.len() - 10);
        assert!(read_from(&mut &bytes[..]).is_err());
        assert!(read_from(&mut &bytes[..4]).is_err());
    }

    fn gzip_framed(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzipStream::default()
            .compress(PAYLOAD_ENTRY_NAME, &mut &payload[..], None, &mut out, 0)
            .unwrap();
        out
    }

    #[test]
    fn test_huge_declared_length_fails_cleanly() {
        // One snippet whose id claims 2^46 bytes.
        let mut payload = vec![1u8, 253];
        payload.extend_from_slice(&(1u64 << 46).to_le_bytes());
        payload.extend_from_slice(b"abc");

        let bytes = file_bytes(5, gzip_framed(&payload));
        assert!(matches!(
            read_from(&mut &bytes[..]),
            Err(CodecError::Serialization(_))
        ));
    }

    #[test]
    fn test_bytes_after_current_payload_fail() {
        let mut bytes = Vec::new();
        write_to(&mut bytes, &sample()).unwrap();
        bytes.extend_from_slice(b"JUNK-AFTER-STREAM");
        assert!(matches!(read_from(&mut &bytes[..]), Err(CodecError::Format(_))));
    }

    #[test]
    fn test_save_replaces_file_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("lib.zcl2");
        save(&path, &sample()).unwrap();
        save(&path, &sample()[..1]).unwrap();

        assert_eq!(load(&path).unwrap().snippets.len(), 1);
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
