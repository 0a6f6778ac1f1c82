//! Chunk identity and integrity verification.
//!
//! A chunk is identified by the 32-byte hash of its *decompressed* payload.
//! The hash algorithm is a property of the whole store: it is fixed when a
//! [`Verifier`] is constructed and never chosen per call.  The default is
//! SHA-512/256, with plain SHA-256 available for stores produced with it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512_256};
use thiserror::Error;

pub const HASH_LEN: usize = 32;

/// Number of hex characters used as the store's shard directory name.
pub const SHARD_PREFIX_LEN: usize = 4;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChunkHash([u8; HASH_LEN]);

impl ChunkHash {
    #[inline]
    pub const fn new(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First four hex characters; the store's shard directory.
    pub fn shard(&self) -> String {
        hex::encode(&self.0[..SHARD_PREFIX_LEN / 2])
    }
}

impl From<[u8; HASH_LEN]> for ChunkHash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<ChunkHash> for [u8; HASH_LEN] {
    fn from(hash: ChunkHash) -> Self {
        hash.0
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({})", self.to_hex())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseHashError {
    #[error("Invalid hex in chunk hash: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("Chunk hash must be {HASH_LEN} bytes, got {0}")]
    Length(usize),
}

impl FromStr for ChunkHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s)?;
        let bytes: [u8; HASH_LEN] = raw
            .as_slice()
            .try_into()
            .map_err(|_| ParseHashError::Length(raw.len()))?;
        Ok(Self(bytes))
    }
}

// ── Verifier ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgorithm {
    #[default]
    Sha512_256,
    Sha256,
}

impl HashAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha512_256 => "sha512-256",
            HashAlgorithm::Sha256     => "sha256",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Hash mismatch: expected {expected}, content hashes to {actual}")]
pub struct HashMismatch {
    pub expected: ChunkHash,
    pub actual:   ChunkHash,
}

/// Recomputes content hashes with one pinned algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verifier {
    algorithm: HashAlgorithm,
}

impl Verifier {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hash `data` with this verifier's algorithm.
    pub fn digest(&self, data: &[u8]) -> ChunkHash {
        let mut out = [0u8; HASH_LEN];
        match self.algorithm {
            HashAlgorithm::Sha512_256 => out.copy_from_slice(&Sha512_256::digest(data)),
            HashAlgorithm::Sha256     => out.copy_from_slice(&Sha256::digest(data)),
        }
        ChunkHash(out)
    }

    /// Confirm that `decompressed` hashes to `expected`.
    ///
    /// Not constant-time; this is an integrity check, not a secret comparison.
    pub fn verify(&self, expected: &ChunkHash, decompressed: &[u8]) -> Result<(), HashMismatch> {
        let actual = self.digest(decompressed);
        if &actual == expected {
            Ok(())
        } else {
            Err(HashMismatch { expected: *expected, actual })
        }
    }
}
