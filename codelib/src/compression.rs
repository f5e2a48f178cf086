//! Compressor adapters for library payloads.
//!
//! Versions 0 through 4 wrap the payload in a single-entry ZIP container
//! ([`ZipContainer`]); version 5 writes a bare gzip stream ([`GzipStream`])
//! whose header carries the entry name.

use std::io::{self, BufRead, BufReader, Cursor, ErrorKind, Read, Write};

use flate2::bufread::GzDecoder;
use flate2::{Compression, GzBuilder};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::persistence::{CodecError, CodecResult};

/// Copy buffer size used when the caller passes no useful hint.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

const MIN_BUFFER_SIZE: usize = 4 * 1024;

/// Callback receiving each decompressed entry as `(name, stream)`.
pub type EntryHandler<'a> = dyn FnMut(&str, &mut dyn Read) -> CodecResult<()> + 'a;

/// Byte-level compressor.
pub trait Compressor {
    /// Compress everything readable from `source` as entry `entry_name` into
    /// `dest`. Fails when more than `size_limit` bytes are read.
    fn compress(
        &self,
        entry_name: &str,
        source: &mut dyn Read,
        size_limit: Option<u64>,
        dest: &mut dyn Write,
        buffer_hint: usize,
    ) -> CodecResult<()>;

    /// Feed every entry of `source` to `on_entry`, in order.
    fn decompress(&self, source: &mut dyn Read, on_entry: &mut EntryHandler<'_>) -> CodecResult<()>;
}

/// Multi-entry ZIP archive, deflate-compressed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipContainer;

impl Compressor for ZipContainer {
    fn compress(
        &self,
        entry_name: &str,
        source: &mut dyn Read,
        size_limit: Option<u64>,
        dest: &mut dyn Write,
        buffer_hint: usize,
    ) -> CodecResult<()> {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(size_limit.map_or(true, |limit| limit > u64::from(u32::MAX)));

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(entry_name, options).map_err(zip_error)?;
        copy_limited(source, &mut zip, size_limit, buffer_hint)?;
        let archive = zip.finish().map_err(zip_error)?.into_inner();

        dest.write_all(&archive)?;
        Ok(())
    }

    fn decompress(&self, source: &mut dyn Read, on_entry: &mut EntryHandler<'_>) -> CodecResult<()> {
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes)?;

        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(zip_error)?;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(zip_error)?;
            let name = entry.name().to_string();
            on_entry(&name, &mut entry)?;
        }
        Ok(())
    }
}

/// Single-entry gzip stream.
#[derive(Debug, Clone, Copy)]
pub struct GzipStream {
    level: Compression,
}

impl Default for GzipStream {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl GzipStream {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Compressor for GzipStream {
    fn compress(
        &self,
        entry_name: &str,
        source: &mut dyn Read,
        size_limit: Option<u64>,
        dest: &mut dyn Write,
        buffer_hint: usize,
    ) -> CodecResult<()> {
        let mut encoder = GzBuilder::new().filename(entry_name).write(dest, self.level);
        copy_limited(source, &mut encoder, size_limit, buffer_hint)?;
        encoder.finish()?;
        Ok(())
    }

    /// The stream must hold exactly one gzip member and nothing after it.
    fn decompress(&self, source: &mut dyn Read, on_entry: &mut EntryHandler<'_>) -> CodecResult<()> {
        let mut decoder = GzDecoder::new(BufReader::new(source));
        let name = decoder
            .header()
            .and_then(|h| h.filename())
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .unwrap_or_default();
        on_entry(&name, &mut decoder)?;

        // Finish the member (trailer included) if the handler stopped early.
        io::copy(&mut decoder, &mut io::sink())
            .map_err(|e| CodecError::Compression(format!("gzip: {e}")))?;
        let mut rest = decoder.into_inner();
        let trailing = rest.fill_buf()?.len();
        if trailing > 0 {
            return Err(CodecError::Format(format!(
                "unexpected bytes after gzip stream (at least {trailing})"
            )));
        }
        Ok(())
    }
}

fn copy_limited(
    source: &mut dyn Read,
    dest: &mut dyn Write,
    size_limit: Option<u64>,
    buffer_hint: usize,
) -> CodecResult<u64> {
    let mut buf = vec![0u8; buffer_hint.max(MIN_BUFFER_SIZE)];
    let mut total = 0u64;

    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        total += n as u64;
        if let Some(limit) = size_limit {
            if total > limit {
                return Err(CodecError::Compression(format!(
                    "entry exceeds size limit of {limit} bytes"
                )));
            }
        }
        dest.write_all(&buf[..n])?;
    }

    Ok(total)
}

fn zip_error(e: zip::result::ZipError) -> CodecError {
    CodecError::Compression(format!("zip: {e}"))
}
