//! Stream reconstruction: index + chunk source → the original byte stream.
//!
//! Every entry is fetched, decoded, decompressed, length-checked and hash
//! verified before its bytes are written at the entry's offset.  Output is
//! only returned when every entry succeeded.
//!
//! # Parallelism
//!
//! With the `parallel` feature, entries are processed on a dedicated Rayon
//! pool of [`ReconstructOptions::parallelism`] threads.  The output buffer is
//! preallocated and split into one disjoint slice per entry, so workers
//! never share a write target.
//!
//! Failure reporting does not depend on scheduling: once entry `i` fails, no
//! entry above `i` is started, entries below it run to completion, and the
//! error for the lowest failing index wins.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, trace};

use crate::codec::CodecError;
use crate::hash::{ChunkHash, HashAlgorithm, HashMismatch, Verifier};
use crate::index::{ChunkEntry, IndexError, IndexFile};
use crate::store::{ChunkSource, StoreError};

// ── Options ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructOptions {
    /// Worker threads.  0 and 1 both mean sequential.
    pub parallelism:    usize,
    /// Must match the algorithm the chunk hashes were produced with.
    pub hash_algorithm: HashAlgorithm,
}

impl Default for ReconstructOptions {
    fn default() -> Self {
        Self {
            parallelism:    std::thread::available_parallelism().map_or(1, |n| n.get()),
            hash_algorithm: HashAlgorithm::default(),
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// What went wrong with a single chunk.
#[derive(Error, Debug)]
pub enum ChunkFailure {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("chunk holds {actual} bytes, index entry declares {expected}")]
    Length { expected: u32, actual: u32 },
    #[error(transparent)]
    Hash(#[from] HashMismatch),
}

#[derive(Error, Debug)]
pub enum ReconstructError {
    #[error("Invalid index layout: {0}")]
    Layout(#[from] IndexError),
    #[error("Stream of {0} bytes cannot be buffered")]
    TooLarge(u64),
    #[error("Chunk #{index} ({hash}) at offset {offset}: {failure}")]
    Chunk {
        index:   usize,
        offset:  u64,
        hash:    ChunkHash,
        #[source]
        failure: ChunkFailure,
    },
    #[error("Worker pool error: {0}")]
    Pool(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ReconstructError {
    fn chunk(index: usize, entry: &ChunkEntry, failure: ChunkFailure) -> Self {
        Self::Chunk { index, offset: entry.offset, hash: entry.chunk_hash, failure }
    }

    /// Index of the entry that failed, if the failure was chunk-specific.
    pub fn chunk_index(&self) -> Option<usize> {
        match self {
            Self::Chunk { index, .. } => Some(*index),
            _ => None,
        }
    }
}

// ── Per-entry work ───────────────────────────────────────────────────────────

fn fetch_entry<S: ChunkSource + ?Sized>(
    source:   &S,
    verifier: &Verifier,
    entry:    &ChunkEntry,
) -> Result<Vec<u8>, ChunkFailure> {
    let chunk = source.get(&entry.chunk_hash)?;
    if chunk.uncompressed_size != entry.size {
        return Err(ChunkFailure::Length {
            expected: entry.size,
            actual:   chunk.uncompressed_size,
        });
    }
    let data = chunk.decompress()?;
    verifier.verify(&entry.chunk_hash, &data)?;
    trace!(chunk.hash = %entry.chunk_hash, offset = entry.offset, size = entry.size, "chunk verified");
    Ok(data)
}

struct Job<'a> {
    index: usize,
    entry: &'a ChunkEntry,
    out:   &'a mut [u8],
}

impl Job<'_> {
    fn run<S: ChunkSource + ?Sized>(self, source: &S, verifier: &Verifier) -> Result<(), ReconstructError> {
        let data = fetch_entry(source, verifier, self.entry)
            .map_err(|failure| ReconstructError::chunk(self.index, self.entry, failure))?;
        // Length already matches entry.size, which is out.len().
        self.out.copy_from_slice(&data);
        Ok(())
    }
}

/// Split `out` into one slice per entry.  The layout must be validated.
fn split_jobs<'a>(entries: &'a [ChunkEntry], mut rest: &'a mut [u8]) -> Vec<Job<'a>> {
    let mut jobs = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let (out, tail) = std::mem::take(&mut rest).split_at_mut(entry.size as usize);
        jobs.push(Job { index, entry, out });
        rest = tail;
    }
    jobs
}

fn run_jobs<S: ChunkSource + ?Sized>(
    jobs:     Vec<Job<'_>>,
    source:   &S,
    verifier: Verifier,
    threads:  usize,
) -> Result<(), ReconstructError> {
    #[cfg(feature = "parallel")]
    {
        if threads > 1 && jobs.len() > 1 {
            return run_parallel(jobs, source, verifier, threads);
        }
    }
    #[cfg(not(feature = "parallel"))]
    {
        let _ = threads;
    }

    for job in jobs {
        job.run(source, &verifier)?;
    }
    Ok(())
}

#[cfg(feature = "parallel")]
fn run_parallel<S: ChunkSource + ?Sized>(
    jobs:     Vec<Job<'_>>,
    source:   &S,
    verifier: Verifier,
    threads:  usize,
) -> Result<(), ReconstructError> {
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| ReconstructError::Pool(e.to_string()))?;

    let earliest = AtomicUsize::new(usize::MAX);
    let failure: Mutex<Option<(usize, ReconstructError)>> = Mutex::new(None);

    pool.install(|| {
        jobs.into_par_iter().for_each(|job| {
            let index = job.index;
            if index > earliest.load(Ordering::Acquire) {
                return;
            }
            if let Err(err) = job.run(source, &verifier) {
                earliest.fetch_min(index, Ordering::AcqRel);
                let mut slot = failure.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.as_ref().map_or(true, |(current, _)| index < *current) {
                    *slot = Some((index, err));
                }
            }
        });
    });

    match failure.into_inner().unwrap_or_else(PoisonError::into_inner) {
        Some((_, err)) => Err(err),
        None => Ok(()),
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Rebuild the stream described by `index` with default options.
pub fn reconstruct<S: ChunkSource + ?Sized>(index: &IndexFile, source: &S) -> Result<Vec<u8>, ReconstructError> {
    reconstruct_with(index, source, &ReconstructOptions::default())
}

#[instrument(skip_all, fields(chunks = index.entries.len(), total_size = index.header.total_size, parallelism = options.parallelism))]
pub fn reconstruct_with<S: ChunkSource + ?Sized>(
    index:   &IndexFile,
    source:  &S,
    options: &ReconstructOptions,
) -> Result<Vec<u8>, ReconstructError> {
    index.validate()?;
    let total = index.total_size();
    let len = usize::try_from(total).map_err(|_| ReconstructError::TooLarge(total))?;

    let mut out = Vec::new();
    out.try_reserve_exact(len).map_err(|_| ReconstructError::TooLarge(total))?;
    out.resize(len, 0);

    let jobs = split_jobs(&index.entries, &mut out);
    run_jobs(jobs, source, Verifier::new(options.hash_algorithm), options.parallelism.max(1))?;

    debug!(bytes = len, "stream reconstructed");
    Ok(out)
}

/// Reconstruct and write the stream to `writer`.  Nothing is written unless
/// every chunk verified.  Returns the number of bytes written.
pub fn reconstruct_to<W: Write, S: ChunkSource + ?Sized>(
    mut writer: W,
    index:      &IndexFile,
    source:     &S,
    options:    &ReconstructOptions,
) -> Result<u64, ReconstructError> {
    let bytes = reconstruct_with(index, source, options)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(bytes.len() as u64)
}

/// Read `len` bytes of the logical stream starting at `offset`, fetching
/// only the chunks that cover the range.  Reads past the end are clipped.
#[instrument(skip_all, fields(offset = offset, len = len))]
pub fn read_range<S: ChunkSource + ?Sized>(
    index:   &IndexFile,
    source:  &S,
    offset:  u64,
    len:     usize,
    options: &ReconstructOptions,
) -> Result<Vec<u8>, ReconstructError> {
    index.validate()?;
    let end = offset.saturating_add(len as u64).min(index.total_size());
    let Some((first, _)) = index.locate(offset) else {
        return Ok(Vec::new());
    };

    let verifier = Verifier::new(options.hash_algorithm);
    let mut out = Vec::with_capacity((end - offset) as usize);
    for (i, entry) in index.entries.iter().enumerate().skip(first) {
        if entry.offset >= end {
            break;
        }
        let data = fetch_entry(source, &verifier, entry)
            .map_err(|failure| ReconstructError::chunk(i, entry, failure))?;
        let from = (offset.max(entry.offset) - entry.offset) as usize;
        let to = (end.min(entry.end()) - entry.offset) as usize;
        out.extend_from_slice(&data[from..to]);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkContainer;
    use crate::codec::Compression;
    use crate::index::{IndexBuilder, IndexKind};
    use crate::store::MemoryChunkStore;

    fn build(chunks: &[&[u8]]) -> (IndexFile, MemoryChunkStore) {
        let store = MemoryChunkStore::new();
        let verifier = Verifier::default();
        let mut builder = IndexBuilder::new(IndexKind::Blob);
        for data in chunks {
            let hash = verifier.digest(data);
            store.put(&hash, &ChunkContainer::compress(data, Compression::Zstd, 1).unwrap()).unwrap();
            builder.push(hash, data.len() as u32);
        }
        (builder.build().unwrap(), store)
    }

    fn opts(parallelism: usize) -> ReconstructOptions {
        ReconstructOptions { parallelism, ..Default::default() }
    }

    #[test]
    fn concatenates_chunks_in_order() {
        let (index, store) = build(&[b"hello, ", b"chunked ", b"world"]);
        assert_eq!(reconstruct(&index, &store).unwrap(), b"hello, chunked world");
    }

    #[test]
    fn empty_index_gives_empty_stream() {
        let (index, store) = build(&[]);
        assert!(reconstruct_with(&index, &store, &opts(4)).unwrap().is_empty());
    }

    #[test]
    fn invalid_layout_is_rejected_before_fetching() {
        let (mut index, store) = build(&[b"aaaa", b"bbbb"]);
        index.entries[1].offset = 5;
        assert!(matches!(
            reconstruct(&index, &store),
            Err(ReconstructError::Layout(IndexError::NonContiguous { index: 1, .. }))
        ));
    }

    #[test]
    fn missing_chunk_names_entry() {
        let (index, _) = build(&[b"first", b"second"]);
        let (_, partial) = build(&[b"first"]);
        let err = reconstruct_with(&index, &partial, &opts(1)).unwrap_err();
        match err {
            ReconstructError::Chunk { index: 1, offset: 5, hash, failure: ChunkFailure::Store(StoreError::NotFound(h)) } => {
                assert_eq!(hash, h);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn entry_size_must_match_chunk() {
        let (mut index, store) = build(&[b"abcdef"]);
        index.entries[0].size = 5;
        index.header.total_size = 5;
        assert!(matches!(
            reconstruct(&index, &store),
            Err(ReconstructError::Chunk { failure: ChunkFailure::Length { expected: 5, actual: 6 }, .. })
        ));
    }

    #[test]
    fn wrong_algorithm_fails_verification() {
        let (index, store) = build(&[b"payload"]);
        let options = ReconstructOptions { parallelism: 1, hash_algorithm: HashAlgorithm::Sha256 };
        assert!(matches!(
            reconstruct_with(&index, &store, &options),
            Err(ReconstructError::Chunk { index: 0, failure: ChunkFailure::Hash(_), .. })
        ));
    }

    #[test]
    fn read_range_spans_chunks() {
        let (index, store) = build(&[b"0123", b"4567", b"89"]);
        let o = opts(1);
        assert_eq!(read_range(&index, &store, 2, 5, &o).unwrap(), b"23456");
        assert_eq!(read_range(&index, &store, 8, 100, &o).unwrap(), b"89");
        assert_eq!(read_range(&index, &store, 4, 4, &o).unwrap(), b"4567");
        assert!(read_range(&index, &store, 10, 3, &o).unwrap().is_empty());
    }

    #[test]
    fn reconstruct_to_writer() {
        let (index, store) = build(&[b"abc", b"def"]);
        let mut sink = Vec::new();
        assert_eq!(reconstruct_to(&mut sink, &index, &store, &opts(2)).unwrap(), 6);
        assert_eq!(sink, b"abcdef");
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let o: ReconstructOptions = serde_json::from_str(r#"{"parallelism":3}"#).unwrap();
        assert_eq!(o.parallelism, 3);
        assert_eq!(o.hash_algorithm, HashAlgorithm::Sha512_256);
    }
}
