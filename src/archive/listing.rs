//! Flat, serialisable view of an archive tree.
//!
//! Records carry no names, so each entry is addressed by the child indices
//! leading to it from the root: the root is `""`, its second child `"1"`,
//! that child's first child `"1/0"`.

use serde::Serialize;

use super::{ArchiveEntry, EntryKind, Node};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingEntry {
    pub path:  String,
    pub kind:  EntryKind,
    pub size:  u64,
    pub flags: u64,
    pub mode:  u64,
    pub uid:   u64,
    pub gid:   u64,
    pub mtime: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rdev:   Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Listing {
    pub entries: Vec<ListingEntry>,
}

impl Listing {
    pub fn from_archive(root: &ArchiveEntry) -> Self {
        let entries = root
            .walk()
            .map(|(path, entry)| ListingEntry {
                path:   path.iter().map(usize::to_string).collect::<Vec<_>>().join("/"),
                kind:   entry.kind(),
                size:   entry.size(),
                flags:  entry.flags,
                mode:   entry.metadata.mode,
                uid:    entry.metadata.uid,
                gid:    entry.metadata.gid,
                mtime:  entry.metadata.mtime,
                target: match &entry.node {
                    Node::Symlink(t) => Some(String::from_utf8_lossy(t).into_owned()),
                    _ => None,
                },
                rdev: match entry.node {
                    Node::Device { rdev } => Some(rdev),
                    _ => None,
                },
            })
            .collect();
        Self { entries }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Metadata;

    #[test]
    fn listing_paths_and_fields() {
        let meta = Metadata { mode: 0o100644, uid: 1000, gid: 100, mtime: 1_700_000_000 };
        let tree = ArchiveEntry::directory(
            Metadata { mode: 0o040755, ..meta },
            vec![
                ArchiveEntry::file(meta, b"hello".to_vec()),
                ArchiveEntry::directory(meta, vec![ArchiveEntry::symlink(meta, "../x")]),
            ],
        );

        let listing = Listing::from_archive(&tree);
        let paths: Vec<&str> = listing.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["", "0", "1", "1/0"]);
        assert_eq!(listing.entries[1].size, 5);
        assert_eq!(listing.entries[3].target.as_deref(), Some("../x"));

        let json = listing.to_json().unwrap();
        assert!(json.contains(r#""kind":"symlink""#));
        assert!(json.contains(r#""target":"../x""#));
        assert!(!json.contains(r#""rdev""#));
    }
}
