//! Revision records

use cairn_core::{Digest, Error, Result, RevisionId, TreeDiff};
use serde::{Deserialize, Serialize};

/// An immutable snapshot of a session at one point in its history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Session-local id, starting at 1
    pub id: RevisionId,
    /// Name of the owning session
    pub session: String,
    /// Parent revision (None for the first revision of a session)
    pub parent: Option<RevisionId>,
    /// Digest of the tree object holding the path mapping
    pub root_tree: Digest,
    /// Timestamp (Unix milliseconds)
    pub ts_unix_ms: u64,
    pub stats: RevisionStats,
}

/// Change statistics relative to the parent revision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionStats {
    /// Number of files added, removed or modified
    pub files_changed: u32,
    /// Bytes added
    pub bytes_added: u64,
    /// Bytes removed
    pub bytes_removed: u64,
    /// Files in the full tree
    pub file_count: u64,
    /// Content bytes in the full tree
    pub total_size: u64,
}

impl RevisionStats {
    pub fn from_diff(diff: &TreeDiff, file_count: usize, total_size: u64) -> Self {
        Self {
            files_changed: diff.files_changed() as u32,
            bytes_added: diff.bytes_added(),
            bytes_removed: diff.bytes_removed(),
            file_count: file_count as u64,
            total_size,
        }
    }
}

impl Revision {
    pub fn new(
        id: RevisionId,
        session: &str,
        parent: Option<RevisionId>,
        root_tree: Digest,
        stats: RevisionStats,
    ) -> Self {
        Self {
            id,
            session: session.to_string(),
            parent,
            root_tree,
            ts_unix_ms: current_timestamp_ms(),
            stats,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| Error::corrupt(format!("failed to serialize revision {}: {}", self.id, e)))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| Error::corrupt(format!("malformed revision record: {}", e)))
    }
}

pub(crate) fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
