//! Chunk container: one compressed payload behind a 16-byte header.
//!
//! ```text
//! offset  size  field
//! 0       3     magic              CA C4 4E
//! 3       4     compressed_size    u32 LE
//! 7       4     uncompressed_size  u32 LE
//! 11      4     compression_type   u32 LE  (see codec::Compression)
//! 15      4     flags              u32 LE
//! 19      ..    payload            compressed_size bytes
//! ```

use std::io::{self, Cursor, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use thiserror::Error;

use crate::codec::{get_codec, CodecError, Compression};
use crate::format::{detect, FormatTag, UnknownFormat, CHUNK_MAGIC, MAGIC_LEN};
use crate::mode::Mode;

pub const CHUNK_HEADER_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error(transparent)]
    UnknownFormat(#[from] UnknownFormat),
    #[error("Expected a chunk container, found {0:?}")]
    WrongFormat(FormatTag),
    #[error("Truncated chunk header: {available} of {CHUNK_HEADER_LEN} bytes")]
    TruncatedHeader { available: usize },
    #[error("Truncated chunk payload: header declares {declared} bytes, {available} present")]
    TruncatedPayload { declared: u32, available: usize },
    #[error("{0} trailing bytes after chunk payload")]
    TrailingBytes(usize),
    #[error("Uncompressed chunk declares compressed_size {compressed} != uncompressed_size {uncompressed}")]
    StoredSizeMismatch { compressed: u32, uncompressed: u32 },
    #[error("Chunk payload of {0} bytes does not fit a 32-bit size field")]
    PayloadTooLarge(usize),
    #[error("compressed_size is {declared} but the payload holds {actual} bytes")]
    PayloadLengthMismatch { declared: u32, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkContainer {
    pub compression:       Compression,
    pub compressed_size:   u32,
    pub uncompressed_size: u32,
    pub flags:             u32,
    pub payload:           Vec<u8>,
}

impl ChunkContainer {
    /// Compress raw chunk bytes into a container.
    pub fn compress(data: &[u8], compression: Compression, level: i32) -> Result<Self, CodecError> {
        let uncompressed_size = u32::try_from(data.len())
            .map_err(|_| CodecError::Compression(format!("chunk of {} bytes is too large", data.len())))?;
        let payload = get_codec(compression)?.compress(data, level)?;
        let compressed_size = u32::try_from(payload.len())
            .map_err(|_| CodecError::Compression(format!("payload of {} bytes is too large", payload.len())))?;
        Ok(Self {
            compression,
            compressed_size,
            uncompressed_size,
            flags: 0,
            payload,
        })
    }

    /// Decompress the payload, requiring exactly `uncompressed_size` bytes.
    pub fn decompress(&self) -> Result<Vec<u8>, CodecError> {
        let expected = self.uncompressed_size as usize;
        let out = get_codec(self.compression)?.decompress(&self.payload, expected)?;
        if out.len() != expected {
            return Err(CodecError::LengthMismatch {
                expected: expected as u64,
                actual:   out.len() as u64,
            });
        }
        Ok(out)
    }

    pub fn encoded_len(&self) -> usize {
        MAGIC_LEN + CHUNK_HEADER_LEN + self.payload.len()
    }

    pub fn header_bytes(&self) -> [u8; CHUNK_HEADER_LEN] {
        let mut hdr = [0u8; CHUNK_HEADER_LEN];
        LittleEndian::write_u32(&mut hdr[0..4], self.compressed_size);
        LittleEndian::write_u32(&mut hdr[4..8], self.uncompressed_size);
        LittleEndian::write_u32(&mut hdr[8..12], self.compression.to_raw());
        LittleEndian::write_u32(&mut hdr[12..16], self.flags);
        hdr
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&CHUNK_MAGIC)?;
        writer.write_all(&self.header_bytes())?;
        writer.write_all(&self.payload)?;
        Ok(())
    }
}

/// Decode a chunk container, ignoring trailing bytes.
pub fn decode_chunk(bytes: &[u8]) -> Result<ChunkContainer, ChunkError> {
    decode_chunk_with(bytes, Mode::Lenient)
}

pub fn decode_chunk_with(bytes: &[u8], mode: Mode) -> Result<ChunkContainer, ChunkError> {
    match detect(bytes)? {
        FormatTag::Chunk => {}
        other => return Err(ChunkError::WrongFormat(other)),
    }
    let body = &bytes[MAGIC_LEN..];
    if body.len() < CHUNK_HEADER_LEN {
        return Err(ChunkError::TruncatedHeader { available: body.len() });
    }

    let mut cur = Cursor::new(&body[..CHUNK_HEADER_LEN]);
    let (compressed_size, uncompressed_size, raw_compression, flags) = read_header(&mut cur)
        .map_err(|_| ChunkError::TruncatedHeader { available: body.len() })?;

    let rest = &body[CHUNK_HEADER_LEN..];
    let declared = compressed_size as usize;
    if rest.len() < declared {
        return Err(ChunkError::TruncatedPayload { declared: compressed_size, available: rest.len() });
    }
    let compression = Compression::from_raw(raw_compression);
    if mode.is_strict() {
        if rest.len() > declared {
            return Err(ChunkError::TrailingBytes(rest.len() - declared));
        }
        if compression == Compression::None && compressed_size != uncompressed_size {
            return Err(ChunkError::StoredSizeMismatch {
                compressed:   compressed_size,
                uncompressed: uncompressed_size,
            });
        }
    }

    Ok(ChunkContainer {
        compression,
        compressed_size,
        uncompressed_size,
        flags,
        payload: rest[..declared].to_vec(),
    })
}

fn read_header(cur: &mut Cursor<&[u8]>) -> io::Result<(u32, u32, u32, u32)> {
    Ok((
        cur.read_u32::<LittleEndian>()?,
        cur.read_u32::<LittleEndian>()?,
        cur.read_u32::<LittleEndian>()?,
        cur.read_u32::<LittleEndian>()?,
    ))
}

/// Encode a container byte-exactly.
///
/// `compressed_size` must describe the payload; a container whose payload
/// length disagrees would not decode back to itself.
pub fn encode_chunk(chunk: &ChunkContainer) -> Result<Vec<u8>, ChunkError> {
    if u32::try_from(chunk.payload.len()).is_err() {
        return Err(ChunkError::PayloadTooLarge(chunk.payload.len()));
    }
    if chunk.payload.len() != chunk.compressed_size as usize {
        return Err(ChunkError::PayloadLengthMismatch {
            declared: chunk.compressed_size,
            actual:   chunk.payload.len(),
        });
    }
    let mut out = Vec::with_capacity(chunk.encoded_len());
    out.extend_from_slice(&CHUNK_MAGIC);
    out.extend_from_slice(&chunk.header_bytes());
    out.extend_from_slice(&chunk.payload);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn zstd_fixture() -> Vec<u8> {
        let mut bytes = CHUNK_MAGIC.to_vec();
        bytes.extend_from_slice(&hex!("0a000000 14000000 01000000 00000000"));
        bytes.extend_from_slice(b"0123456789");
        bytes
    }

    #[test]
    fn zstd_header_roundtrips_byte_exact() {
        let bytes = zstd_fixture();
        let chunk = decode_chunk(&bytes).unwrap();
        assert_eq!(chunk.compression, Compression::Zstd);
        assert_eq!(chunk.compressed_size, 10);
        assert_eq!(chunk.uncompressed_size, 20);
        assert_eq!(chunk.flags, 0);
        assert_eq!(chunk.payload, b"0123456789");
        assert_eq!(encode_chunk(&chunk).unwrap(), bytes);
    }

    #[test]
    fn unknown_compression_is_representable() {
        let mut bytes = CHUNK_MAGIC.to_vec();
        bytes.extend_from_slice(&hex!("02000000 02000000 63000000 07000000"));
        bytes.extend_from_slice(b"hi");
        let chunk = decode_chunk(&bytes).unwrap();
        assert_eq!(chunk.compression, Compression::Unknown(99));
        assert_eq!(chunk.flags, 7);
        assert_eq!(encode_chunk(&chunk).unwrap(), bytes);
        assert!(matches!(chunk.decompress(), Err(CodecError::UnsupportedCompression(99))));
    }

    #[test]
    fn trailing_bytes_depend_on_mode() {
        let mut bytes = zstd_fixture();
        bytes.extend_from_slice(b"xyz");
        assert_eq!(decode_chunk(&bytes).unwrap().payload, b"0123456789");
        assert_eq!(decode_chunk_with(&bytes, Mode::Strict), Err(ChunkError::TrailingBytes(3)));
    }

    #[test]
    fn truncation_is_always_an_error() {
        let bytes = zstd_fixture();
        assert_eq!(
            decode_chunk(&bytes[..10]),
            Err(ChunkError::TruncatedHeader { available: 7 })
        );
        assert_eq!(
            decode_chunk(&bytes[..bytes.len() - 1]),
            Err(ChunkError::TruncatedPayload { declared: 10, available: 9 })
        );
    }

    #[test]
    fn wrong_magic() {
        let mut bytes = zstd_fixture();
        bytes[..3].copy_from_slice(&crate::format::ARCHIVE_MAGIC);
        assert_eq!(decode_chunk(&bytes), Err(ChunkError::WrongFormat(FormatTag::Archive)));
        assert_eq!(decode_chunk(b"no"), Err(ChunkError::UnknownFormat(UnknownFormat)));
    }

    #[test]
    fn strict_rejects_inconsistent_stored_chunk() {
        let mut bytes = CHUNK_MAGIC.to_vec();
        bytes.extend_from_slice(&hex!("02000000 05000000 00000000 00000000"));
        bytes.extend_from_slice(b"ab");
        assert!(decode_chunk(&bytes).is_ok());
        assert_eq!(
            decode_chunk_with(&bytes, Mode::Strict),
            Err(ChunkError::StoredSizeMismatch { compressed: 2, uncompressed: 5 })
        );
    }

    #[test]
    fn compress_then_decompress() {
        let data = b"abcabcabcabcabcabcabcabcabcabc".repeat(20);
        for c in [Compression::None, Compression::Zstd, Compression::Xz, Compression::Gzip] {
            let chunk = ChunkContainer::compress(&data, c, 3).unwrap();
            assert_eq!(chunk.uncompressed_size as usize, data.len());
            let decoded = decode_chunk_with(&encode_chunk(&chunk).unwrap(), Mode::Strict).unwrap();
            assert_eq!(decoded, chunk);
            assert_eq!(decoded.decompress().unwrap(), data);
        }
    }

    #[test]
    fn decompress_checks_declared_length() {
        let mut chunk = ChunkContainer::compress(b"twelve bytes", Compression::Zstd, 3).unwrap();
        chunk.uncompressed_size = 20;
        assert!(matches!(
            chunk.decompress(),
            Err(CodecError::LengthMismatch { expected: 20, actual: 12 })
        ));
    }

    #[test]
    fn encode_refuses_size_disagreement() {
        let chunk = ChunkContainer {
            compression:       Compression::None,
            compressed_size:   4,
            uncompressed_size: 4,
            flags:             0,
            payload:           b"abc".to_vec(),
        };
        assert_eq!(
            encode_chunk(&chunk),
            Err(ChunkError::PayloadLengthMismatch { declared: 4, actual: 3 })
        );
    }
}
