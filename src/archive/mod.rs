//! Archive container: a directory tree with POSIX metadata.
//!
//! Entries are written depth-first, pre-order.  Every entry is a 32-byte
//! record header, a 32-byte metadata block, then `size` payload bytes:
//!
//! ```text
//! record header   size u64 | type_code u64 | flags u64 | padding u64
//! metadata        mode u64 | uid u64       | gid u64   | mtime u64
//! payload         file content, symlink target, device number (u64),
//!                 nothing for fifos and sockets, or - for directories -
//!                 the children's records, exactly `size` bytes in total
//! ```
//!
//! There is no end-of-directory marker: a directory ends where its declared
//! `size` ends.  Decoding therefore checks that each child fits inside its
//! parent and that the children consume the parent exactly; any other
//! outcome is [`ArchiveError::SizeMismatch`].
//!
//! The whole container is the archive magic followed by one root entry.

use std::io::{self, Cursor, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use serde::Serialize;
use thiserror::Error;

use crate::format::{detect, FormatTag, UnknownFormat, ARCHIVE_MAGIC, MAGIC_LEN};
use crate::mode::Mode;

pub mod listing;

pub use listing::{Listing, ListingEntry};

pub const RECORD_HEADER_LEN: usize = 32;
pub const METADATA_LEN:      usize = 32;
/// Fixed bytes every entry occupies before its payload.
pub const ENTRY_OVERHEAD:    usize = RECORD_HEADER_LEN + METADATA_LEN;
/// Deepest directory nesting the decoder accepts.
pub const MAX_DEPTH:         usize = 256;

const DEVICE_PAYLOAD_LEN: u64 = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    #[error(transparent)]
    UnknownFormat(#[from] UnknownFormat),
    #[error("Expected an archive container, found {0:?}")]
    WrongFormat(FormatTag),
    #[error("Truncated entry record at offset {offset}: {available} of {ENTRY_OVERHEAD} bytes")]
    TruncatedRecord { offset: usize, available: usize },
    #[error("Entry at offset {offset} declares {declared} bytes, enclosing entry leaves {available}")]
    SizeMismatch { offset: usize, declared: u64, available: u64 },
    #[error("Unknown entry type {code} at offset {offset}")]
    UnknownEntryType { offset: usize, code: u64 },
    #[error("{kind:?} entry at offset {offset} carries {size} payload bytes")]
    UnexpectedPayload { offset: usize, kind: EntryKind, size: u64 },
    #[error("Directory nesting exceeds {MAX_DEPTH} levels at offset {offset}")]
    TooDeep { offset: usize },
    #[error("Non-zero record padding at offset {offset}")]
    NonZeroPadding { offset: usize },
    #[error("{0} trailing bytes after the root entry")]
    TrailingBytes(usize),
}

// ── Entry model ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Device,
    Fifo,
    Socket,
}

impl EntryKind {
    pub fn code(self) -> u64 {
        match self {
            EntryKind::File      => 1,
            EntryKind::Directory => 2,
            EntryKind::Symlink   => 3,
            EntryKind::Device    => 4,
            EntryKind::Fifo      => 5,
            EntryKind::Socket    => 6,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(EntryKind::File),
            2 => Some(EntryKind::Directory),
            3 => Some(EntryKind::Symlink),
            4 => Some(EntryKind::Device),
            5 => Some(EntryKind::Fifo),
            6 => Some(EntryKind::Socket),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Metadata {
    pub mode:  u64,
    pub uid:   u64,
    pub gid:   u64,
    pub mtime: u64,
}

impl Metadata {
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            mode:  reader.read_u64::<LittleEndian>()?,
            uid:   reader.read_u64::<LittleEndian>()?,
            gid:   reader.read_u64::<LittleEndian>()?,
            mtime: reader.read_u64::<LittleEndian>()?,
        })
    }

    fn write_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], self.mode);
        LittleEndian::write_u64(&mut buf[8..16], self.uid);
        LittleEndian::write_u64(&mut buf[16..24], self.gid);
        LittleEndian::write_u64(&mut buf[24..32], self.mtime);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordHeader {
    size:      u64,
    type_code: u64,
    flags:     u64,
    padding:   u64,
}

impl RecordHeader {
    fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            size:      reader.read_u64::<LittleEndian>()?,
            type_code: reader.read_u64::<LittleEndian>()?,
            flags:     reader.read_u64::<LittleEndian>()?,
            padding:   reader.read_u64::<LittleEndian>()?,
        })
    }

    fn write_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], self.size);
        LittleEndian::write_u64(&mut buf[8..16], self.type_code);
        LittleEndian::write_u64(&mut buf[16..24], self.flags);
        LittleEndian::write_u64(&mut buf[24..32], self.padding);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    File(Vec<u8>),
    Directory(Vec<ArchiveEntry>),
    Symlink(Vec<u8>),
    Device { rdev: u64 },
    Fifo,
    Socket,
}

/// One node of the tree.  A directory owns its children; the tree cannot
/// hold back-references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub flags:    u64,
    pub metadata: Metadata,
    pub node:     Node,
}

impl ArchiveEntry {
    pub fn new(metadata: Metadata, node: Node) -> Self {
        Self { flags: 0, metadata, node }
    }

    pub fn file(metadata: Metadata, content: impl Into<Vec<u8>>) -> Self {
        Self::new(metadata, Node::File(content.into()))
    }

    pub fn directory(metadata: Metadata, children: Vec<ArchiveEntry>) -> Self {
        Self::new(metadata, Node::Directory(children))
    }

    pub fn symlink(metadata: Metadata, target: impl Into<Vec<u8>>) -> Self {
        Self::new(metadata, Node::Symlink(target.into()))
    }

    pub fn kind(&self) -> EntryKind {
        match self.node {
            Node::File(_)       => EntryKind::File,
            Node::Directory(_)  => EntryKind::Directory,
            Node::Symlink(_)    => EntryKind::Symlink,
            Node::Device { .. } => EntryKind::Device,
            Node::Fifo          => EntryKind::Fifo,
            Node::Socket        => EntryKind::Socket,
        }
    }

    /// Payload bytes following this entry's metadata block.
    pub fn size(&self) -> u64 {
        match &self.node {
            Node::File(data) | Node::Symlink(data) => data.len() as u64,
            Node::Directory(children) => children.iter().map(ArchiveEntry::encoded_len).sum(),
            Node::Device { .. } => DEVICE_PAYLOAD_LEN,
            Node::Fifo | Node::Socket => 0,
        }
    }

    /// Bytes this entry occupies in the container, record header included.
    pub fn encoded_len(&self) -> u64 {
        ENTRY_OVERHEAD as u64 + self.size()
    }

    pub fn content(&self) -> Option<&[u8]> {
        match &self.node {
            Node::File(data) => Some(data),
            _ => None,
        }
    }

    pub fn children(&self) -> &[ArchiveEntry] {
        match &self.node {
            Node::Directory(children) => children,
            _ => &[],
        }
    }

    /// Depth-first, pre-order traversal.  Each item carries the child
    /// indices leading from the root to the entry.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![(Vec::new(), self)] }
    }
}

pub struct Walk<'a> {
    stack: Vec<(Vec<usize>, &'a ArchiveEntry)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (Vec<usize>, &'a ArchiveEntry);

    fn next(&mut self) -> Option<Self::Item> {
        let (path, entry) = self.stack.pop()?;
        for (i, child) in entry.children().iter().enumerate().rev() {
            let mut child_path = path.clone();
            child_path.push(i);
            self.stack.push((child_path, child));
        }
        Some((path, entry))
    }
}

// ── Decode ───────────────────────────────────────────────────────────────────

pub fn decode_archive(bytes: &[u8]) -> Result<ArchiveEntry, ArchiveError> {
    decode_archive_with(bytes, Mode::Lenient)
}

pub fn decode_archive_with(bytes: &[u8], mode: Mode) -> Result<ArchiveEntry, ArchiveError> {
    match detect(bytes)? {
        FormatTag::Archive => {}
        other => return Err(ArchiveError::WrongFormat(other)),
    }
    let decoder = Decoder { buf: bytes, mode };
    let (root, end) = decoder.entry(MAGIC_LEN, bytes.len(), 0, false)?;
    if mode.is_strict() && end < bytes.len() {
        return Err(ArchiveError::TrailingBytes(bytes.len() - end));
    }
    Ok(root)
}

struct Decoder<'a> {
    buf:  &'a [u8],
    mode: Mode,
}

impl Decoder<'_> {
    /// Decode the entry at `pos`, which must end by `limit`.  Returns the
    /// entry and the offset just past it.
    fn entry(
        &self,
        pos:    usize,
        limit:  usize,
        depth:  usize,
        nested: bool,
    ) -> Result<(ArchiveEntry, usize), ArchiveError> {
        let available = limit - pos;
        if available < ENTRY_OVERHEAD {
            return Err(if nested {
                ArchiveError::SizeMismatch {
                    offset:    pos,
                    declared:  ENTRY_OVERHEAD as u64,
                    available: available as u64,
                }
            } else {
                ArchiveError::TruncatedRecord { offset: pos, available }
            });
        }

        let mut cur = Cursor::new(&self.buf[pos..pos + ENTRY_OVERHEAD]);
        let truncated = |_| ArchiveError::TruncatedRecord { offset: pos, available };
        let header = RecordHeader::read(&mut cur).map_err(truncated)?;
        let metadata = Metadata::read(&mut cur).map_err(truncated)?;

        let body_start = pos + ENTRY_OVERHEAD;
        let body_available = (limit - body_start) as u64;
        if header.size > body_available {
            return Err(ArchiveError::SizeMismatch {
                offset:    pos,
                declared:  header.size,
                available: body_available,
            });
        }
        let body_end = body_start + header.size as usize;
        let body = &self.buf[body_start..body_end];

        let kind = EntryKind::from_code(header.type_code)
            .ok_or(ArchiveError::UnknownEntryType { offset: pos, code: header.type_code })?;
        if self.mode.is_strict() && header.padding != 0 {
            return Err(ArchiveError::NonZeroPadding { offset: pos });
        }

        let unexpected = ArchiveError::UnexpectedPayload { offset: pos, kind, size: header.size };
        let node = match kind {
            EntryKind::File    => Node::File(body.to_vec()),
            EntryKind::Symlink => Node::Symlink(body.to_vec()),
            EntryKind::Device  => {
                if header.size != DEVICE_PAYLOAD_LEN {
                    return Err(unexpected);
                }
                Node::Device { rdev: LittleEndian::read_u64(body) }
            }
            EntryKind::Fifo | EntryKind::Socket => {
                if header.size != 0 {
                    return Err(unexpected);
                }
                if kind == EntryKind::Fifo { Node::Fifo } else { Node::Socket }
            }
            EntryKind::Directory => {
                if depth >= MAX_DEPTH {
                    return Err(ArchiveError::TooDeep { offset: pos });
                }
                let mut children = Vec::new();
                let mut next = body_start;
                while next < body_end {
                    let (child, child_end) = self.entry(next, body_end, depth + 1, true)?;
                    children.push(child);
                    next = child_end;
                }
                Node::Directory(children)
            }
        };

        Ok((ArchiveEntry { flags: header.flags, metadata, node }, body_end))
    }
}

// ── Encode ───────────────────────────────────────────────────────────────────

/// Encode a tree.  Fails with [`ArchiveError::TooDeep`] for trees the
/// decoder would refuse, so every encoded archive decodes back.
pub fn encode_archive(root: &ArchiveEntry) -> Result<Vec<u8>, ArchiveError> {
    let mut out = Vec::with_capacity(MAGIC_LEN + root.encoded_len() as usize);
    out.extend_from_slice(&ARCHIVE_MAGIC);
    write_entry(root, &mut out, 0)?;
    Ok(out)
}

/// Appends the entry, back-patching its header once the payload length is
/// known so directory sizes are computed in a single pass.
fn write_entry(entry: &ArchiveEntry, out: &mut Vec<u8>, depth: usize) -> Result<(), ArchiveError> {
    let start = out.len();
    out.resize(start + ENTRY_OVERHEAD, 0);

    match &entry.node {
        Node::File(data) | Node::Symlink(data) => out.extend_from_slice(data),
        Node::Directory(children) => {
            if depth >= MAX_DEPTH {
                return Err(ArchiveError::TooDeep { offset: start });
            }
            for child in children {
                write_entry(child, out, depth + 1)?;
            }
        }
        Node::Device { rdev } => {
            let mut buf = [0u8; DEVICE_PAYLOAD_LEN as usize];
            LittleEndian::write_u64(&mut buf, *rdev);
            out.extend_from_slice(&buf);
        }
        Node::Fifo | Node::Socket => {}
    }

    let header = RecordHeader {
        size:      (out.len() - start - ENTRY_OVERHEAD) as u64,
        type_code: entry.kind().code(),
        flags:     entry.flags,
        padding:   0,
    };
    header.write_into(&mut out[start..start + RECORD_HEADER_LEN]);
    entry.metadata.write_into(&mut out[start + RECORD_HEADER_LEN..start + ENTRY_OVERHEAD]);
    Ok(())
}
