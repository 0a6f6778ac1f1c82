pub mod mode;
pub mod format;
pub mod hash;
pub mod codec;
pub mod chunk;
pub mod index;
pub mod archive;
pub mod store;
pub mod reconstruct;
pub mod error;

pub use mode::Mode;
pub use format::{detect, FormatTag, UnknownFormat};
pub use hash::{ChunkHash, HashAlgorithm, HashMismatch, Verifier};
pub use codec::{get_codec, Codec, CodecError, Compression};
pub use chunk::{decode_chunk, decode_chunk_with, encode_chunk, ChunkContainer, ChunkError};
pub use index::{
    decode_index, decode_index_with, encode_index, encode_index_with, ChunkEntry, IndexBuilder,
    IndexError, IndexFile, IndexHeader, IndexKind,
};
pub use archive::{
    decode_archive, decode_archive_with, encode_archive, ArchiveEntry, ArchiveError, EntryKind,
    Listing, Metadata, Node,
};
pub use store::{ChunkSource, ChunkStore, MemoryChunkStore, StoreConfig, StoreError};
pub use reconstruct::{
    read_range, reconstruct, reconstruct_to, reconstruct_with, ReconstructError,
    ReconstructOptions,
};
pub use error::{Error, ErrorClass, Result};
