//! Tree representation for revision snapshots
//!
//! A tree is a flat mapping from normalized relative paths (forward-slash
//! separated) to file entries. Directories are implicit.

use crate::error::{Error, Result};
use crate::hash::{hash_bytes, Digest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entry in a tree: a regular file's content address plus metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Digest of the blob holding this file's content
    pub digest: Digest,
    /// Content length in bytes
    pub size: u64,
    /// Unix permission bits
    pub mode: u32,
    /// Modification time (Unix milliseconds) when the content was recorded
    pub mtime_ms: u64,
}

impl Entry {
    /// Create a new file entry with default permissions
    pub fn file(digest: Digest, size: u64) -> Self {
        Self {
            digest,
            size,
            mode: 0o644,
            mtime_ms: 0,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_mtime(mut self, mtime_ms: u64) -> Self {
        self.mtime_ms = mtime_ms;
        self
    }

    /// Content equality; metadata is not compared
    pub fn same_content(&self, other: &Entry) -> bool {
        self.digest == other.digest
    }
}

/// Join an offset and a workdir-relative path into a full tree path
pub fn join_offset(offset: &str, rel: &str) -> String {
    if offset.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", offset, rel)
    }
}

/// Strip an offset from a full tree path. `None` if the path lies outside it.
pub fn strip_offset<'a>(offset: &str, path: &'a str) -> Option<&'a str> {
    if offset.is_empty() {
        return Some(path);
    }
    path.strip_prefix(offset)?.strip_prefix('/')
}

/// A tree represents a complete snapshot at one revision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    entries: BTreeMap<String, Entry>,
}

impl Tree {
    const MAGIC: &'static [u8] = b"CTR1";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, entry: Entry) {
        self.entries.insert(path.into(), entry);
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    pub fn remove(&mut self, path: &str) -> Option<Entry> {
        self.entries.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(path, entry)| (path.as_str(), entry))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Total content bytes referenced by this tree
    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }

    /// The part of this tree under `offset`, with the prefix stripped
    pub fn subtree(&self, offset: &str) -> Tree {
        let entries = self
            .entries
            .iter()
            .filter_map(|(path, entry)| {
                strip_offset(offset, path).map(|rel| (rel.to_string(), entry.clone()))
            })
            .collect();
        Tree { entries }
    }

    /// Apply a batch of changes; `None` removes the path
    pub fn apply<I, P>(&mut self, changes: I)
    where
        I: IntoIterator<Item = (P, Option<Entry>)>,
        P: Into<String>,
    {
        for (path, entry) in changes {
            let path = path.into();
            match entry {
                Some(entry) => {
                    self.entries.insert(path, entry);
                }
                None => {
                    self.entries.remove(&path);
                }
            }
        }
    }

    /// Serialize the tree to bytes (TreeV1 format)
    ///
    /// Format:
    /// - magic: "CTR1" (4 bytes)
    /// - entry_count: u32
    /// - entries (sorted by path):
    ///   - path_len: u16
    ///   - path_bytes: [u8; path_len] (UTF-8)
    ///   - mode: u32
    ///   - size: u64
    ///   - mtime_ms: u64
    ///   - digest: [u8; 32]
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + self.entries.len() * 80);
        bytes.extend_from_slice(Self::MAGIC);
        bytes.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());

        // BTreeMap iteration is already sorted, keeping the encoding deterministic
        for (path, entry) in &self.entries {
            bytes.extend_from_slice(&(path.len() as u16).to_le_bytes());
            bytes.extend_from_slice(path.as_bytes());
            bytes.extend_from_slice(&entry.mode.to_le_bytes());
            bytes.extend_from_slice(&entry.size.to_le_bytes());
            bytes.extend_from_slice(&entry.mtime_ms.to_le_bytes());
            bytes.extend_from_slice(entry.digest.as_bytes());
        }

        bytes
    }

    /// Deserialize a tree from bytes (TreeV1 format)
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);

        if reader.take(4)? != Self::MAGIC {
            return Err(Error::corrupt("invalid tree magic bytes"));
        }

        let entry_count = reader.u32()? as usize;
        let mut entries = BTreeMap::new();

        for _ in 0..entry_count {
            let path_len = reader.u16()? as usize;
            let path = std::str::from_utf8(reader.take(path_len)?)
                .map_err(|_| Error::corrupt("tree path is not valid UTF-8"))?
                .to_string();
            let mode = reader.u32()?;
            let size = reader.u64()?;
            let mtime_ms = reader.u64()?;
            let digest = reader.digest()?;

            entries.insert(
                path,
                Entry {
                    digest,
                    size,
                    mode,
                    mtime_ms,
                },
            );
        }

        if !reader.is_empty() {
            return Err(Error::corrupt("trailing bytes after tree entries"));
        }

        Ok(Self { entries })
    }

    /// Deterministic content hash of this tree
    pub fn hash(&self) -> Digest {
        hash_bytes(&self.serialize())
    }
}

impl FromIterator<(String, Entry)> for Tree {
    fn from_iter<I: IntoIterator<Item = (String, Entry)>>(iter: I) -> Self {
        Tree {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Bounds-checked little-endian reader over a byte slice
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| Error::corrupt(format!("truncated record at offset {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn digest(&mut self) -> Result<Digest> {
        let mut buf = [0u8; 32];
        buf.copy_from_slice(self.take(Digest::LEN)?);
        Ok(Digest::from_bytes(buf))
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

/// Content differences between two trees
#[derive(Debug, Clone, Default)]
pub struct TreeDiff {
    /// Entries only in the new tree
    pub added: Vec<(String, Entry)>,
    /// Entries only in the old tree
    pub removed: Vec<(String, Entry)>,
    /// Entries whose content changed (old, new)
    pub modified: Vec<(String, Entry, Entry)>,
}

impl TreeDiff {
    pub fn diff(old: &Tree, new: &Tree) -> Self {
        let mut diff = TreeDiff::default();

        for (path, new_entry) in &new.entries {
            match old.entries.get(path) {
                Some(old_entry) if !old_entry.same_content(new_entry) => {
                    diff.modified
                        .push((path.clone(), old_entry.clone(), new_entry.clone()));
                }
                Some(_) => {}
                None => diff.added.push((path.clone(), new_entry.clone())),
            }
        }

        for (path, old_entry) in &old.entries {
            if !new.entries.contains_key(path) {
                diff.removed.push((path.clone(), old_entry.clone()));
            }
        }

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn files_changed(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    /// Bytes of content introduced by the new tree
    pub fn bytes_added(&self) -> u64 {
        self.added.iter().map(|(_, e)| e.size).sum::<u64>()
            + self.modified.iter().map(|(_, _, new)| new.size).sum::<u64>()
    }

    /// Bytes of content dropped from the old tree
    pub fn bytes_removed(&self) -> u64 {
        self.removed.iter().map(|(_, e)| e.size).sum::<u64>()
            + self.modified.iter().map(|(_, old, _)| old.size).sum::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(content: &[u8]) -> Entry {
        Entry::file(hash_bytes(content), content.len() as u64)
    }

    fn sample_tree() -> Tree {
        let mut tree = Tree::new();
        tree.insert("file.txt", entry(b"fc1"));
        tree.insert("subdir1/subdirfile1.txt", entry(b"fc2"));
        tree.insert("subdir1/nested/deep.txt", entry(b"fc3"));
        tree.insert("subdir10/other.txt", entry(b"fc4"));
        tree
    }

    #[test]
    fn test_serialize_roundtrip_is_deterministic() {
        let tree = sample_tree();
        let bytes = tree.serialize();
        let parsed = Tree::deserialize(&bytes).unwrap();
        assert_eq!(parsed, tree);
        assert_eq!(parsed.hash(), tree.hash());
    }

    #[test]
    fn test_non_ascii_paths_survive() {
        let mut tree = Tree::new();
        tree.insert("Tjosan_räk smörgås.txt", entry(b"x"));
        let parsed = Tree::deserialize(&tree.serialize()).unwrap();
        assert!(parsed.contains("Tjosan_räk smörgås.txt"));
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(Tree::deserialize(b"").is_err());
        assert!(Tree::deserialize(b"XXXX\0\0\0\0").is_err());

        let bytes = sample_tree().serialize();
        assert!(Tree::deserialize(&bytes[..bytes.len() - 1]).is_err());

        let mut padded = bytes.clone();
        padded.push(0);
        assert!(Tree::deserialize(&padded).is_err());
    }

    #[test]
    fn test_hash_ignores_insertion_order() {
        let mut a = Tree::new();
        a.insert("b.txt", entry(b"b"));
        a.insert("a.txt", entry(b"a"));
        let mut b = Tree::new();
        b.insert("a.txt", entry(b"a"));
        b.insert("b.txt", entry(b"b"));
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_subtree_strips_offset() {
        let sub = sample_tree().subtree("subdir1");
        let paths: Vec<_> = sub.paths().collect();
        assert_eq!(paths, vec!["nested/deep.txt", "subdirfile1.txt"]);

        // Prefix match must respect component boundaries
        assert!(!sub.contains("other.txt"));
        assert_eq!(sample_tree().subtree("").len(), 4);
        assert!(sample_tree().subtree("missing").is_empty());
    }

    #[test]
    fn test_offset_helpers() {
        assert_eq!(join_offset("", "a.txt"), "a.txt");
        assert_eq!(join_offset("sub/dir", "a.txt"), "sub/dir/a.txt");
        assert_eq!(strip_offset("sub", "sub/a.txt"), Some("a.txt"));
        assert_eq!(strip_offset("sub", "subway/a.txt"), None);
        assert_eq!(strip_offset("sub", "sub"), None);
        assert_eq!(strip_offset("", "x/y"), Some("x/y"));
    }

    #[test]
    fn test_apply_changes() {
        let mut tree = sample_tree();
        tree.apply(vec![
            ("file.txt", None),
            ("added.txt", Some(entry(b"new"))),
        ]);
        assert!(!tree.contains("file.txt"));
        assert!(tree.contains("added.txt"));
    }

    #[test]
    fn test_tree_diff() {
        let mut old = Tree::new();
        old.insert("file1.txt", entry(b"content1"));
        old.insert("file2.txt", entry(b"content2"));

        let mut new = Tree::new();
        new.insert("file1.txt", entry(b"modified"));
        new.insert("file3.txt", entry(b"content1"));

        let diff = TreeDiff::diff(&old, &new);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.files_changed(), 3);
        assert_eq!(diff.bytes_added(), 8 + 8);
        assert_eq!(diff.bytes_removed(), 8 + 8);
    }

    #[test]
    fn test_tree_diff_ignores_metadata_only_changes() {
        let mut old = Tree::new();
        old.insert("f.txt", entry(b"same"));
        let mut new = Tree::new();
        new.insert("f.txt", entry(b"same").with_mtime(42).with_mode(0o755));
        assert!(TreeDiff::diff(&old, &new).is_empty());
    }
}
