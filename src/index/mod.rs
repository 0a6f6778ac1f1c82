//! Blob and directory index codec.
//!
//! An index lists, in offset order, the chunks that reconstruct one logical
//! byte stream.  Blob and directory indexes share the layout and differ only
//! in their magic.
//!
//! ```text
//! magic        3   CA 1B 5C (blob) | CA 1D 5C (directory)
//! version      4   u32 LE
//! total_size   8   u64 LE
//! chunk_count  4   u32 LE
//! reserved     4   u32 LE, preserved verbatim
//! entries      chunk_count x 48:
//!   chunk_hash 32
//!   offset      8  u64 LE
//!   size        4  u32 LE
//!   flags       4  u32 LE
//! ```
//!
//! # Decode
//! Decoding mirrors the file: the header is returned as written, even when
//! it disagrees with the entries that follow.  Lenient decode drops a final
//! partial entry; strict decode reports it and validates the layout.
//!
//! # Encode
//! Strict encode (the default) refuses an index whose header disagrees
//! with its entries.  Lenient encode rewrites `chunk_count` from the entry
//! list and leaves every other field alone.

use std::io::{self, Cursor, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use thiserror::Error;

use crate::format::{detect, FormatTag, UnknownFormat, MAGIC_LEN};
use crate::hash::{ChunkHash, HASH_LEN};
use crate::mode::Mode;

pub const INDEX_HEADER_LEN: usize = 20;
pub const CHUNK_ENTRY_LEN:  usize = 48;
pub const INDEX_VERSION:    u32   = 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error(transparent)]
    UnknownFormat(#[from] UnknownFormat),
    #[error("Expected a blob or directory index, found {0:?}")]
    WrongFormat(FormatTag),
    #[error("Truncated index header: {available} of {INDEX_HEADER_LEN} bytes")]
    TruncatedHeader { available: usize },
    #[error("Truncated chunk entry #{index}: {available} of {CHUNK_ENTRY_LEN} bytes")]
    TruncatedEntry { index: usize, available: usize },
    #[error("{0} trailing bytes after the last chunk entry")]
    TrailingBytes(usize),
    #[error("Header declares {declared} chunks, {actual} entries present")]
    ChunkCountMismatch { declared: u32, actual: usize },
    #[error("Chunk entry #{index} starts at {found}, expected {expected}")]
    NonContiguous { index: usize, expected: u64, found: u64 },
    #[error("Header declares total_size {declared}, entries cover {actual} bytes")]
    TotalSizeMismatch { declared: u64, actual: u64 },
    #[error("{0} entries do not fit a 32-bit chunk count")]
    TooManyEntries(usize),
}

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Blob,
    Directory,
}

impl IndexKind {
    pub fn format(self) -> FormatTag {
        match self {
            IndexKind::Blob      => FormatTag::BlobIndex,
            IndexKind::Directory => FormatTag::DirectoryIndex,
        }
    }

    pub fn from_format(tag: FormatTag) -> Option<Self> {
        match tag {
            FormatTag::BlobIndex      => Some(IndexKind::Blob),
            FormatTag::DirectoryIndex => Some(IndexKind::Directory),
            _                         => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexHeader {
    pub version:     u32,
    pub total_size:  u64,
    pub chunk_count: u32,
    /// No semantics; round-trips verbatim.
    pub reserved:    u32,
}

impl IndexHeader {
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            version:     reader.read_u32::<LittleEndian>()?,
            total_size:  reader.read_u64::<LittleEndian>()?,
            chunk_count: reader.read_u32::<LittleEndian>()?,
            reserved:    reader.read_u32::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; INDEX_HEADER_LEN] {
        let mut buf = [0u8; INDEX_HEADER_LEN];
        LittleEndian::write_u32(&mut buf[0..4], self.version);
        LittleEndian::write_u64(&mut buf[4..12], self.total_size);
        LittleEndian::write_u32(&mut buf[12..16], self.chunk_count);
        LittleEndian::write_u32(&mut buf[16..20], self.reserved);
        buf
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEntry {
    /// Hash of the decompressed chunk; also its key in the chunk store.
    pub chunk_hash: ChunkHash,
    pub offset:     u64,
    pub size:       u32,
    pub flags:      u32,
}

impl ChunkEntry {
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut hash = [0u8; HASH_LEN];
        reader.read_exact(&mut hash)?;
        Ok(Self {
            chunk_hash: ChunkHash::new(hash),
            offset:     reader.read_u64::<LittleEndian>()?,
            size:       reader.read_u32::<LittleEndian>()?,
            flags:      reader.read_u32::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; CHUNK_ENTRY_LEN] {
        let mut buf = [0u8; CHUNK_ENTRY_LEN];
        buf[..HASH_LEN].copy_from_slice(self.chunk_hash.as_bytes());
        LittleEndian::write_u64(&mut buf[32..40], self.offset);
        LittleEndian::write_u32(&mut buf[40..44], self.size);
        LittleEndian::write_u32(&mut buf[44..48], self.flags);
        buf
    }

    /// One past the last byte this chunk covers.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size as u64)
    }
}

/// An immutable index value.  Changes produce a new `IndexFile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFile {
    pub kind:    IndexKind,
    pub header:  IndexHeader,
    pub entries: Vec<ChunkEntry>,
}

impl IndexFile {
    /// Check the layout invariants: entry count matches the header, entries
    /// are contiguous from 0, and they cover exactly `total_size` bytes.
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.entries.len() != self.header.chunk_count as usize {
            return Err(IndexError::ChunkCountMismatch {
                declared: self.header.chunk_count,
                actual:   self.entries.len(),
            });
        }
        let mut expected = 0u64;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.offset != expected {
                return Err(IndexError::NonContiguous { index, expected, found: entry.offset });
            }
            expected = expected.saturating_add(entry.size as u64);
        }
        if expected != self.header.total_size {
            return Err(IndexError::TotalSizeMismatch {
                declared: self.header.total_size,
                actual:   expected,
            });
        }
        Ok(())
    }

    pub fn total_size(&self) -> u64 {
        self.header.total_size
    }

    /// Find the entry covering byte `offset` of the logical stream.
    ///
    /// Assumes a validated, contiguous layout.
    pub fn locate(&self, offset: u64) -> Option<(usize, &ChunkEntry)> {
        let idx = self.entries.partition_point(|e| e.end() <= offset);
        self.entries
            .get(idx)
            .filter(|e| e.offset <= offset && offset < e.end())
            .map(|e| (idx, e))
    }

    pub fn encoded_len(&self) -> usize {
        MAGIC_LEN + INDEX_HEADER_LEN + self.entries.len() * CHUNK_ENTRY_LEN
    }
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Assembles a consistent `IndexFile` from chunks in stream order.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    kind:    IndexKind,
    version: u32,
    entries: Vec<ChunkEntry>,
    offset:  u64,
}

impl IndexBuilder {
    pub fn new(kind: IndexKind) -> Self {
        Self { kind, version: INDEX_VERSION, entries: Vec::new(), offset: 0 }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn push(&mut self, chunk_hash: ChunkHash, size: u32) -> &mut Self {
        self.push_with_flags(chunk_hash, size, 0)
    }

    pub fn push_with_flags(&mut self, chunk_hash: ChunkHash, size: u32, flags: u32) -> &mut Self {
        self.entries.push(ChunkEntry { chunk_hash, offset: self.offset, size, flags });
        self.offset += size as u64;
        self
    }

    pub fn build(self) -> Result<IndexFile, IndexError> {
        let chunk_count = u32::try_from(self.entries.len())
            .map_err(|_| IndexError::TooManyEntries(self.entries.len()))?;
        Ok(IndexFile {
            kind:    self.kind,
            header:  IndexHeader {
                version:    self.version,
                total_size: self.offset,
                chunk_count,
                reserved:   0,
            },
            entries: self.entries,
        })
    }
}

// ── Decode ───────────────────────────────────────────────────────────────────

/// Decode an index, tolerating a partially written final entry.
pub fn decode_index(bytes: &[u8]) -> Result<IndexFile, IndexError> {
    decode_index_with(bytes, Mode::Lenient)
}

pub fn decode_index_with(bytes: &[u8], mode: Mode) -> Result<IndexFile, IndexError> {
    let tag = detect(bytes)?;
    let kind = IndexKind::from_format(tag).ok_or(IndexError::WrongFormat(tag))?;

    let body = &bytes[MAGIC_LEN..];
    if body.len() < INDEX_HEADER_LEN {
        return Err(IndexError::TruncatedHeader { available: body.len() });
    }
    let header = IndexHeader::read(Cursor::new(&body[..INDEX_HEADER_LEN]))
        .map_err(|_| IndexError::TruncatedHeader { available: body.len() })?;

    let records = &body[INDEX_HEADER_LEN..];
    let declared = header.chunk_count as usize;
    let complete = records.len() / CHUNK_ENTRY_LEN;
    let count = declared.min(complete);

    if mode.is_strict() {
        if complete < declared {
            let partial = records.len() % CHUNK_ENTRY_LEN;
            if partial != 0 {
                return Err(IndexError::TruncatedEntry { index: complete, available: partial });
            }
            return Err(IndexError::ChunkCountMismatch { declared: header.chunk_count, actual: complete });
        }
        let used = declared * CHUNK_ENTRY_LEN;
        if records.len() > used {
            return Err(IndexError::TrailingBytes(records.len() - used));
        }
    }

    let mut cur = Cursor::new(records);
    let mut entries = Vec::with_capacity(count);
    for index in 0..count {
        let entry = ChunkEntry::read(&mut cur).map_err(|_| IndexError::TruncatedEntry {
            index,
            available: records.len() - index * CHUNK_ENTRY_LEN,
        })?;
        entries.push(entry);
    }

    let index = IndexFile { kind, header, entries };
    if mode.is_strict() {
        index.validate()?;
    }
    Ok(index)
}

// ── Encode ───────────────────────────────────────────────────────────────────

/// Encode an index, refusing one whose header disagrees with its entries.
pub fn encode_index(index: &IndexFile) -> Result<Vec<u8>, IndexError> {
    encode_index_with(index, Mode::Strict)
}

pub fn encode_index_with(index: &IndexFile, mode: Mode) -> Result<Vec<u8>, IndexError> {
    let header = match mode {
        Mode::Strict => {
            index.validate()?;
            index.header
        }
        Mode::Lenient => IndexHeader {
            chunk_count: u32::try_from(index.entries.len())
                .map_err(|_| IndexError::TooManyEntries(index.entries.len()))?,
            ..index.header
        },
    };

    let mut out = Vec::with_capacity(index.encoded_len());
    out.extend_from_slice(&index.kind.format().magic());
    out.extend_from_slice(&header.to_bytes());
    for entry in &index.entries {
        out.extend_from_slice(&entry.to_bytes());
    }
    Ok(out)
}
