//! Magic prefixes and format detection.
//!
//! Every container starts with a fixed 3-byte magic.  These values are a
//! compatibility contract with third-party tools and must never change.

use thiserror::Error;

pub const MAGIC_LEN: usize = 3;

pub const BLOB_INDEX_MAGIC:      [u8; MAGIC_LEN] = [0xCA, 0x1B, 0x5C];
pub const DIRECTORY_INDEX_MAGIC: [u8; MAGIC_LEN] = [0xCA, 0x1D, 0x5C];
pub const CHUNK_MAGIC:           [u8; MAGIC_LEN] = [0xCA, 0xC4, 0x4E];
pub const ARCHIVE_MAGIC:         [u8; MAGIC_LEN] = [0xCA, 0x1A, 0x52];

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Unknown format: input does not start with a recognised magic")]
pub struct UnknownFormat;

/// The four container kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatTag {
    BlobIndex,
    DirectoryIndex,
    Chunk,
    Archive,
}

impl FormatTag {
    pub const ALL: [FormatTag; 4] = [
        FormatTag::BlobIndex,
        FormatTag::DirectoryIndex,
        FormatTag::Chunk,
        FormatTag::Archive,
    ];

    #[inline]
    pub fn magic(self) -> [u8; MAGIC_LEN] {
        match self {
            FormatTag::BlobIndex      => BLOB_INDEX_MAGIC,
            FormatTag::DirectoryIndex => DIRECTORY_INDEX_MAGIC,
            FormatTag::Chunk          => CHUNK_MAGIC,
            FormatTag::Archive        => ARCHIVE_MAGIC,
        }
    }

    /// Conventional file extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            FormatTag::BlobIndex      => "caibx",
            FormatTag::DirectoryIndex => "caidx",
            FormatTag::Chunk          => "cacnk",
            FormatTag::Archive        => "catar",
        }
    }

    pub fn from_magic(magic: &[u8; MAGIC_LEN]) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| &tag.magic() == magic)
    }
}

/// Identify a buffer by its first three bytes.
///
/// Never reads past index 2 and never panics; anything shorter than the
/// magic is [`UnknownFormat`].
pub fn detect(bytes: &[u8]) -> Result<FormatTag, UnknownFormat> {
    let magic: &[u8; MAGIC_LEN] = bytes
        .get(..MAGIC_LEN)
        .and_then(|m| m.try_into().ok())
        .ok_or(UnknownFormat)?;
    FormatTag::from_magic(magic).ok_or(UnknownFormat)
}
