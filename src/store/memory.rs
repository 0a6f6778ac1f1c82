use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::warn;

use super::{encode_for_store, ChunkSource, StoreError};
use crate::chunk::{decode_chunk_with, ChunkContainer};
use crate::hash::ChunkHash;
use crate::mode::Mode;

/// Process-local store with the same put/get contract as the on-disk one.
/// Chunks are kept encoded so conflicts compare exact container bytes.
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: RwLock<HashMap<ChunkHash, Vec<u8>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, hash: &ChunkHash, chunk: &ChunkContainer) -> Result<(), StoreError> {
        let encoded = encode_for_store(chunk)?;
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        match chunks.entry(*hash) {
            Entry::Occupied(existing) if existing.get() == &encoded => Ok(()),
            Entry::Occupied(_) => {
                warn!(chunk.hash = %hash, "conflicting content for stored chunk");
                Err(StoreError::Conflict(*hash))
            }
            Entry::Vacant(slot) => {
                slot.insert(encoded);
                Ok(())
            }
        }
    }

    pub fn get(&self, hash: &ChunkHash) -> Result<ChunkContainer, StoreError> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let bytes = chunks.get(hash).ok_or(StoreError::NotFound(*hash))?;
        decode_chunk_with(bytes, Mode::Strict)
            .map_err(|source| StoreError::Corrupt { hash: *hash, source })
    }

    pub fn contains(&self, hash: &ChunkHash) -> bool {
        self.chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.chunks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChunkSource for MemoryChunkStore {
    fn get(&self, hash: &ChunkHash) -> Result<ChunkContainer, StoreError> {
        MemoryChunkStore::get(self, hash)
    }
    fn contains(&self, hash: &ChunkHash) -> bool {
        MemoryChunkStore::contains(self, hash)
    }
}
