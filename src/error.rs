//! Crate-wide error and its coarse classification.

use std::io;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::chunk::ChunkError;
use crate::codec::CodecError;
use crate::format::UnknownFormat;
use crate::hash::HashMismatch;
use crate::index::IndexError;
use crate::reconstruct::{ChunkFailure, ReconstructError};
use crate::store::StoreError;

/// Broad category of a failure, for callers that only need to decide what
/// to tell the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Input is not in a format this crate reads.
    Unrecognized,
    /// Input claims to be valid but fails a consistency or integrity check.
    Inconsistent,
    /// The chunk store lacks required content.
    Missing,
    Io,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] UnknownFormat),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Hash(#[from] HashMismatch),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Reconstruct(#[from] ReconstructError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Format(_) => ErrorClass::Unrecognized,
            Error::Index(e) => e.class(),
            Error::Chunk(e) => e.class(),
            Error::Codec(e) => e.class(),
            Error::Hash(_) => ErrorClass::Inconsistent,
            Error::Store(e) => e.class(),
            Error::Archive(e) => e.class(),
            Error::Reconstruct(e) => e.class(),
            Error::Io(_) => ErrorClass::Io,
        }
    }
}

impl IndexError {
    pub fn class(&self) -> ErrorClass {
        match self {
            IndexError::UnknownFormat(_) | IndexError::WrongFormat(_) => ErrorClass::Unrecognized,
            _ => ErrorClass::Inconsistent,
        }
    }
}

impl ChunkError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ChunkError::UnknownFormat(_) | ChunkError::WrongFormat(_) => ErrorClass::Unrecognized,
            _ => ErrorClass::Inconsistent,
        }
    }
}

impl ArchiveError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ArchiveError::UnknownFormat(_) | ArchiveError::WrongFormat(_) => ErrorClass::Unrecognized,
            _ => ErrorClass::Inconsistent,
        }
    }
}

impl CodecError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CodecError::UnsupportedCompression(_) => ErrorClass::Unrecognized,
            CodecError::Io(_) => ErrorClass::Io,
            _ => ErrorClass::Inconsistent,
        }
    }
}

impl StoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::NotFound(_) => ErrorClass::Missing,
            StoreError::Io(_) => ErrorClass::Io,
            // A stored file that is not a chunk is damage, not a foreign format.
            StoreError::Conflict(_) | StoreError::Corrupt { .. } | StoreError::InvalidChunk(_) => {
                ErrorClass::Inconsistent
            }
        }
    }
}

impl ReconstructError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ReconstructError::Chunk { failure, .. } => match failure {
                ChunkFailure::Store(e) => e.class(),
                ChunkFailure::Codec(e) => e.class(),
                ChunkFailure::Length { .. } | ChunkFailure::Hash(_) => ErrorClass::Inconsistent,
            },
            ReconstructError::Layout(_) | ReconstructError::TooLarge(_) => ErrorClass::Inconsistent,
            ReconstructError::Pool(_) | ReconstructError::Io(_) => ErrorClass::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatTag;
    use crate::hash::ChunkHash;

    #[test]
    fn classification() {
        let hash = ChunkHash::new([3; 32]);
        let cases: Vec<(Error, ErrorClass)> = vec![
            (UnknownFormat.into(), ErrorClass::Unrecognized),
            (IndexError::WrongFormat(FormatTag::Chunk).into(), ErrorClass::Unrecognized),
            (IndexError::TrailingBytes(4).into(), ErrorClass::Inconsistent),
            (ChunkError::TrailingBytes(1).into(), ErrorClass::Inconsistent),
            (CodecError::UnsupportedCompression(9).into(), ErrorClass::Unrecognized),
            (HashMismatch { expected: hash, actual: ChunkHash::new([4; 32]) }.into(), ErrorClass::Inconsistent),
            (StoreError::NotFound(hash).into(), ErrorClass::Missing),
            (StoreError::Conflict(hash).into(), ErrorClass::Inconsistent),
            (ArchiveError::TrailingBytes(2).into(), ErrorClass::Inconsistent),
            (io::Error::new(io::ErrorKind::Other, "disk").into(), ErrorClass::Io),
            (
                ReconstructError::Chunk {
                    index:   2,
                    offset:  10,
                    hash,
                    failure: ChunkFailure::Store(StoreError::NotFound(hash)),
                }
                .into(),
                ErrorClass::Missing,
            ),
        ];
        for (err, class) in cases {
            assert_eq!(err.class(), class, "{err}");
        }
    }
}
