//! Compression registry for chunk payloads.
//!
//! # Identity rules
//! A chunk container names its compression with a 32-bit little-endian
//! `compression_type` field.  The mapping is frozen:
//!
//! | raw | kind  |
//! |-----|-------|
//! | 0   | none  |
//! | 1   | zstd  |
//! | 2   | xz    |
//! | 3   | gzip  |
//!
//! Any other value decodes to [`Compression::Unknown`] so the container can
//! still be inspected and re-encoded byte-exactly.  Only decompression fails
//! for it, with [`CodecError::UnsupportedCompression`].

use std::io::{self, Read, Write};

use thiserror::Error;

pub const RAW_NONE: u32 = 0;
pub const RAW_ZSTD: u32 = 1;
pub const RAW_XZ:   u32 = 2;
pub const RAW_GZIP: u32 = 3;

// ── Compression ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    None,
    Zstd,
    Xz,
    Gzip,
    /// Representable but not decodable by this build.
    Unknown(u32),
}

impl Compression {
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            RAW_NONE => Compression::None,
            RAW_ZSTD => Compression::Zstd,
            RAW_XZ   => Compression::Xz,
            RAW_GZIP => Compression::Gzip,
            other    => Compression::Unknown(other),
        }
    }

    #[inline]
    pub fn to_raw(self) -> u32 {
        match self {
            Compression::None       => RAW_NONE,
            Compression::Zstd       => RAW_ZSTD,
            Compression::Xz         => RAW_XZ,
            Compression::Gzip       => RAW_GZIP,
            Compression::Unknown(r) => r,
        }
    }

    /// Human-readable name (diagnostics only).
    pub fn name(self) -> &'static str {
        match self {
            Compression::None       => "none",
            Compression::Zstd       => "zstd",
            Compression::Xz         => "xz",
            Compression::Gzip       => "gzip",
            Compression::Unknown(_) => "unknown",
        }
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    /// The container names a compression this build cannot decode.
    #[error("Unsupported compression type {0}")]
    UnsupportedCompression(u32),
    #[error("Decompressed to {actual} bytes, container declares {expected}")]
    LengthMismatch { expected: u64, actual: u64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn compression(&self) -> Compression;
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError>;
    /// Decompress `data`.  Output is capped one byte past `size_hint` so a
    /// hostile payload cannot expand without bound; the caller checks the
    /// exact length.
    fn decompress(&self, data: &[u8], size_hint: usize) -> Result<Vec<u8>, CodecError>;
}

fn read_capped<R: Read>(reader: R, size_hint: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(size_hint);
    reader
        .take(size_hint as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Decompression(e.to_string()))?;
    Ok(out)
}

/// `Write` sink that keeps at most `limit` bytes and silently drops the rest,
/// for decoders that push output instead of being pulled.
struct CappedWriter {
    out:   Vec<u8>,
    limit: usize,
}

impl Write for CappedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.limit.saturating_sub(self.out.len());
        self.out.extend_from_slice(&buf[..buf.len().min(room)]);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn compression(&self) -> Compression { Compression::None }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8], _: usize) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn compression(&self) -> Compression { Compression::Zstd }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        zstd::encode_all(data, level).map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8], size_hint: usize) -> Result<Vec<u8>, CodecError> {
        let decoder = zstd::stream::read::Decoder::new(data)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        read_capped(decoder, size_hint)
    }
}

pub struct XzCodec;
impl Codec for XzCodec {
    fn compression(&self) -> Compression { Compression::Xz }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::xz_compress(&mut io::Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        Ok(out)
    }
    fn decompress(&self, data: &[u8], size_hint: usize) -> Result<Vec<u8>, CodecError> {
        let mut sink = CappedWriter { out: Vec::with_capacity(size_hint), limit: size_hint.saturating_add(1) };
        lzma_rs::xz_decompress(&mut io::Cursor::new(data), &mut sink)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(sink.out)
    }
}

pub struct GzipCodec;
impl Codec for GzipCodec {
    fn compression(&self) -> Compression { Compression::Gzip }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        let level = flate2::Compression::new(level.clamp(0, 9) as u32);
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), level);
        enc.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8], size_hint: usize) -> Result<Vec<u8>, CodecError> {
        read_capped(flate2::read::GzDecoder::new(data), size_hint)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a compression kind to a built-in codec.
///
/// `Unknown` kinds fail with `UnsupportedCompression`; there is no fallback.
pub fn get_codec(compression: Compression) -> Result<Box<dyn Codec>, CodecError> {
    match compression {
        Compression::None         => Ok(Box::new(NoneCodec)),
        Compression::Zstd         => Ok(Box::new(ZstdCodec)),
        Compression::Xz           => Ok(Box::new(XzCodec)),
        Compression::Gzip         => Ok(Box::new(GzipCodec)),
        Compression::Unknown(raw) => Err(CodecError::UnsupportedCompression(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"the quick brown fox jumps over the lazy dog, again and again and again";

    #[test]
    fn raw_mapping_is_frozen() {
        assert_eq!(Compression::from_raw(0), Compression::None);
        assert_eq!(Compression::from_raw(1), Compression::Zstd);
        assert_eq!(Compression::from_raw(2), Compression::Xz);
        assert_eq!(Compression::from_raw(3), Compression::Gzip);
        assert_eq!(Compression::from_raw(9), Compression::Unknown(9));
        assert_eq!(Compression::Unknown(9).to_raw(), 9);
    }

    #[test]
    fn every_builtin_roundtrips() {
        for c in [Compression::None, Compression::Zstd, Compression::Xz, Compression::Gzip] {
            let codec = get_codec(c).unwrap();
            assert_eq!(codec.compression(), c);
            let packed = codec.compress(SAMPLE, 3).unwrap();
            let unpacked = codec.decompress(&packed, SAMPLE.len()).unwrap();
            assert_eq!(unpacked, SAMPLE, "{} roundtrip", c.name());
        }
    }

    #[test]
    fn unknown_is_unsupported() {
        assert!(matches!(
            get_codec(Compression::Unknown(42)),
            Err(CodecError::UnsupportedCompression(42))
        ));
    }

    #[test]
    fn zstd_output_is_capped() {
        let big = vec![7u8; 64 * 1024];
        let packed = ZstdCodec.compress(&big, 3).unwrap();
        let out = ZstdCodec.decompress(&packed, 100).unwrap();
        assert_eq!(out.len(), 101);

        let packed = XzCodec.compress(&big, 6).unwrap();
        assert_eq!(XzCodec.decompress(&packed, 100).unwrap().len(), 101);
    }

    #[test]
    fn garbage_fails_to_decompress() {
        assert!(ZstdCodec.decompress(b"definitely not zstd", 16).is_err());
        assert!(GzipCodec.decompress(b"definitely not gzip", 16).is_err());
        assert!(XzCodec.decompress(b"definitely not xz", 16).is_err());
    }
}
