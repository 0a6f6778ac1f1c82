//! Content-addressed chunk store.
//!
//! # Layout
//! ```text
//! <root>/<hex(hash)[0..4]>/<hex(hash)>.cacnk
//! ```
//! Each file holds one encoded chunk container.  The four-character shard
//! directory only bounds directory fan-out; it is always recomputed from the
//! hash and never stored anywhere.
//!
//! # Write discipline
//! A hash's content never legitimately changes.  [`ChunkStore::put`] is a
//! no-op when the stored bytes are identical and fails with
//! [`StoreError::Conflict`] when they differ; it never overwrites.
//!
//! Writers for the same hash are serialised in-process through lock stripes
//! keyed by the first hash byte.  Content is staged in a temporary file in
//! the shard directory and published with a no-clobber rename, so a reader
//! never observes a partial file and a concurrent writer in another process
//! loses the race cleanly.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use crate::chunk::{decode_chunk_with, encode_chunk, ChunkContainer, ChunkError};
use crate::format::FormatTag;
use crate::hash::{ChunkHash, SHARD_PREFIX_LEN};
use crate::mode::Mode;

mod memory;

pub use memory::MemoryChunkStore;

const LOCK_STRIPES: usize = 256;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Chunk {0} not found in store")]
    NotFound(ChunkHash),
    /// Same hash, different bytes: a hash collision or a corrupted store.
    #[error("Chunk {0} already stored with different content")]
    Conflict(ChunkHash),
    #[error("Stored chunk {hash} is corrupt: {source}")]
    Corrupt {
        hash:   ChunkHash,
        #[source]
        source: ChunkError,
    },
    #[error("Refusing to store malformed chunk container: {0}")]
    InvalidChunk(#[source] ChunkError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Read access to chunks by hash.  The reconstructor only needs this.
pub trait ChunkSource: Send + Sync {
    fn get(&self, hash: &ChunkHash) -> Result<ChunkContainer, StoreError>;
    fn contains(&self, hash: &ChunkHash) -> bool;
}

impl<T: ChunkSource + ?Sized> ChunkSource for &T {
    fn get(&self, hash: &ChunkHash) -> Result<ChunkContainer, StoreError> {
        (**self).get(hash)
    }
    fn contains(&self, hash: &ChunkHash) -> bool {
        (**self).contains(hash)
    }
}

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub root: PathBuf,
    /// fsync each chunk before publishing it.
    #[serde(default = "default_sync")]
    pub sync: bool,
    /// How stored containers are decoded on `get`.
    #[serde(default)]
    pub mode: Mode,
}

fn default_sync() -> bool {
    true
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), sync: default_sync(), mode: Mode::default() }
    }
}

// ── Filesystem store ─────────────────────────────────────────────────────────

pub struct ChunkStore {
    root:  PathBuf,
    sync:  bool,
    mode:  Mode,
    locks: Vec<Mutex<()>>,
}

impl ChunkStore {
    /// Open (creating if needed) a store rooted at `root` with default settings.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::with_config(&StoreConfig::new(root.as_ref()))
    }

    pub fn with_config(config: &StoreConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.root)?;
        Ok(Self {
            root:  config.root.clone(),
            sync:  config.sync,
            mode:  config.mode,
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard_dir(&self, hash: &ChunkHash) -> PathBuf {
        self.root.join(hash.shard())
    }

    /// Where `hash` lives (or would live) on disk.
    pub fn path_for(&self, hash: &ChunkHash) -> PathBuf {
        self.shard_dir(hash)
            .join(format!("{}.{}", hash, FormatTag::Chunk.extension()))
    }

    /// Store `chunk` under `hash`.
    ///
    /// The hash is the caller's assertion; it is not recomputed here.
    #[instrument(skip_all, fields(chunk.hash = %hash))]
    pub fn put(&self, hash: &ChunkHash, chunk: &ChunkContainer) -> Result<(), StoreError> {
        let encoded = encode_for_store(chunk)?;
        let path = self.path_for(hash);

        let stripe = &self.locks[hash.as_bytes()[0] as usize % LOCK_STRIPES];
        let _guard = stripe.lock().unwrap_or_else(PoisonError::into_inner);

        match fs::read(&path) {
            Ok(existing) => return compare_existing(hash, &existing, &encoded),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let shard = self.shard_dir(hash);
        fs::create_dir_all(&shard)?;
        let mut tmp = NamedTempFile::new_in(&shard)?;
        tmp.write_all(&encoded)?;
        if self.sync {
            tmp.as_file().sync_all()?;
        }

        match tmp.persist_noclobber(&path) {
            Ok(_) => {
                debug!(bytes = encoded.len(), "stored chunk");
                Ok(())
            }
            // Another process published the same hash first.
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                compare_existing(hash, &fs::read(&path)?, &encoded)
            }
            Err(e) => Err(e.error.into()),
        }
    }

    #[instrument(skip_all, fields(chunk.hash = %hash))]
    pub fn get(&self, hash: &ChunkHash) -> Result<ChunkContainer, StoreError> {
        let bytes = match fs::read(self.path_for(hash)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("chunk not in store");
                return Err(StoreError::NotFound(*hash));
            }
            Err(e) => return Err(e.into()),
        };
        trace!(bytes = bytes.len(), "read chunk");
        decode_chunk_with(&bytes, self.mode)
            .map_err(|source| StoreError::Corrupt { hash: *hash, source })
    }

    pub fn contains(&self, hash: &ChunkHash) -> bool {
        self.path_for(hash).is_file()
    }

    /// Every hash currently stored, sorted.  Files that do not follow the
    /// layout (temporaries, strays in the wrong shard) are skipped.
    pub fn hashes(&self) -> Result<Vec<ChunkHash>, StoreError> {
        let suffix = format!(".{}", FormatTag::Chunk.extension());
        let mut out = Vec::new();

        for shard in fs::read_dir(&self.root)? {
            let shard = shard?;
            let shard_name = shard.file_name().to_string_lossy().into_owned();
            if shard_name.len() != SHARD_PREFIX_LEN || !shard.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(shard.path())? {
                let name = file?.file_name().to_string_lossy().into_owned();
                let Some(stem) = name.strip_suffix(&suffix) else { continue };
                match stem.parse::<ChunkHash>() {
                    Ok(hash) if hash.shard() == shard_name => out.push(hash),
                    Ok(_) => warn!(file = %name, shard = %shard_name, "chunk in wrong shard"),
                    Err(_) => trace!(file = %name, "skipping non-chunk file"),
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

impl ChunkSource for ChunkStore {
    fn get(&self, hash: &ChunkHash) -> Result<ChunkContainer, StoreError> {
        ChunkStore::get(self, hash)
    }
    fn contains(&self, hash: &ChunkHash) -> bool {
        ChunkStore::contains(self, hash)
    }
}

/// Encode `chunk` for storage, refusing any container that would not
/// decode back strictly, so every store can read back what it accepted.
pub(crate) fn encode_for_store(chunk: &ChunkContainer) -> Result<Vec<u8>, StoreError> {
    let encoded = encode_chunk(chunk).map_err(StoreError::InvalidChunk)?;
    decode_chunk_with(&encoded, Mode::Strict).map_err(StoreError::InvalidChunk)?;
    Ok(encoded)
}

fn compare_existing(hash: &ChunkHash, existing: &[u8], incoming: &[u8]) -> Result<(), StoreError> {
    if existing == incoming {
        trace!("chunk already stored");
        Ok(())
    } else {
        warn!(chunk.hash = %hash, "conflicting content for stored chunk");
        Err(StoreError::Conflict(*hash))
    }
}
