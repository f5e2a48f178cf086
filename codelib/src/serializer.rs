//! Serializer adapters for library payloads.
//!
//! Three encodings have been used over the file format's history:
//!
//! - [`ObjectSerializer`]: self-describing JSON, versions 0 and 2
//! - [`CompactSerializer`]: bincode, fixed-width integers, version 3
//! - [`CanonicalSerializer`]: bincode, variable-width integers, versions 4 and 5

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::persistence::{CodecError, CodecResult};

/// Upper bound on the bytes a bincode payload may claim while decoding.
///
/// Every length prefix is charged against it before anything is allocated,
/// so a corrupt prefix fails with an error instead of a huge allocation.
pub const MAX_DECODE_BYTES: usize = 1 << 30;

/// Deterministic value <-> bytes conversion.
pub trait Serializer {
    fn name(&self) -> &'static str;

    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> CodecResult<Vec<u8>>;

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectSerializer;

impl Serializer for ObjectSerializer {
    fn name(&self) -> &'static str {
        "object"
    }

    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> CodecResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CodecError::Serialization(format!("{}: {e}", self.name())))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Serialization(format!("{}: {e}", self.name())))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CompactSerializer;

impl Serializer for CompactSerializer {
    fn name(&self) -> &'static str {
        "compact"
    }

    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> CodecResult<Vec<u8>> {
        bincode::serde::encode_to_vec(value, bincode::config::legacy())
            .map_err(|e| CodecError::Serialization(format!("{}: {e}", self.name())))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        let (value, read) = bincode::serde::decode_from_slice(
            bytes,
            bincode::config::legacy().with_limit::<MAX_DECODE_BYTES>(),
        )
            .map_err(|e| CodecError::Serialization(format!("{}: {e}", self.name())))?;
        ensure_consumed(self.name(), read, bytes.len())?;
        Ok(value)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CanonicalSerializer;

impl Serializer for CanonicalSerializer {
    fn name(&self) -> &'static str {
        "canonical"
    }

    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> CodecResult<Vec<u8>> {
        bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| CodecError::Serialization(format!("{}: {e}", self.name())))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        let (value, read) = bincode::serde::decode_from_slice(
            bytes,
            bincode::config::standard().with_limit::<MAX_DECODE_BYTES>(),
        )
            .map_err(|e| CodecError::Serialization(format!("{}: {e}", self.name())))?;
        ensure_consumed(self.name(), read, bytes.len())?;
        Ok(value)
    }
}

fn ensure_consumed(name: &str, read: usize, len: usize) -> CodecResult<()> {
    if read == len {
        Ok(())
    } else {
        Err(CodecError::Format(format!(
            "{name}: {} trailing bytes after payload",
            len - read
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attachment, Snippet};

    fn sample() -> Vec<Snippet> {
        let mut a = Snippet::with_text("java, gui", "public class A {}");
        a.add_attachment(Attachment::new("A.java", b"class A".to_vec()));
        let mut b = Snippet::with_text("python", "def f(): pass");
        b.set_update_time(None);
        vec![a, b]
    }

    #[test]
    fn test_all_serializers_preserve_snippets() {
        let snippets = sample();
        let object = ObjectSerializer.serialize(&snippets).unwrap();
        let compact = CompactSerializer.serialize(&snippets).unwrap();
        let canonical = CanonicalSerializer.serialize(&snippets).unwrap();

        assert_eq!(ObjectSerializer.deserialize::<Vec<Snippet>>(&object).unwrap(), snippets);
        assert_eq!(CompactSerializer.deserialize::<Vec<Snippet>>(&compact).unwrap(), snippets);
        assert_eq!(CanonicalSerializer.deserialize::<Vec<Snippet>>(&canonical).unwrap(), snippets);
        assert!(canonical.len() < compact.len());
    }

    #[test]
    fn test_object_format_uses_field_names() {
        let json = String::from_utf8(ObjectSerializer.serialize(&sample()).unwrap()).unwrap();
        assert!(json.contains("\"keywords\":\"java, gui\""));
        assert!(json.contains("\"binaryContent\""));
        assert!(json.contains("\"updateTime\":null"));
    }

    #[test]
    fn test_object_format_tolerates_missing_fields() {
        let json = br#"[{"keywords":"legacy","content":[104,105]}]"#;
        let snippets: Vec<Snippet> = ObjectSerializer.deserialize(json).unwrap();
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].id(), "");
        assert_eq!(snippets[0].content(), b"hi");
        assert!(snippets[0].update_time().is_none());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = CanonicalSerializer.serialize(&sample()).unwrap();
        bytes.push(0);
        assert!(matches!(
            CanonicalSerializer.deserialize::<Vec<Snippet>>(&bytes),
            Err(CodecError::Format(_))
        ));
    }

    /// Sequence of one snippet whose id claims 2^46 bytes.
    fn oversized_id(varint: bool) -> Vec<u8> {
        let claimed: u64 = 1 << 46;
        let mut bytes = Vec::new();
        if varint {
            bytes.push(1);
            bytes.push(253);
        } else {
            bytes.extend_from_slice(&1u64.to_le_bytes());
        }
        bytes.extend_from_slice(&claimed.to_le_bytes());
        bytes.extend_from_slice(b"abc");
        bytes
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        assert!(matches!(
            CanonicalSerializer.deserialize::<Vec<Snippet>>(&oversized_id(true)),
            Err(CodecError::Serialization(_))
        ));
        assert!(matches!(
            CompactSerializer.deserialize::<Vec<Snippet>>(&oversized_id(false)),
            Err(CodecError::Serialization(_))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(CanonicalSerializer.deserialize::<Vec<Snippet>>(&[0xff; 7]).is_err());
        assert!(ObjectSerializer.deserialize::<Vec<Snippet>>(b"not json").is_err());
    }
}
