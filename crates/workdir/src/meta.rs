//! Workdir baseline metadata under `.meta/`
//!
//! - `info`: JSON [`WorkdirInfo`]
//! - `baseline`: binary [`Baseline`], tagged with the same revision id
//!
//! Saving stages the new baseline as `baseline.pending`, then replaces
//! `info`, then renames the pending baseline into place. The `info` rename
//! is the commit point: a reader takes the pending baseline when it matches
//! `info`, otherwise the settled one.

use crate::ignore::META_DIR;
use cairn_core::store::atomic_write;
use cairn_core::tree::ByteReader;
use cairn_core::{Error, Result, RevisionId, Tree};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const INFO_FILE: &str = "info";
const BASELINE_FILE: &str = "baseline";
const PENDING_FILE: &str = "baseline.pending";

/// Where a workdir came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkdirInfo {
    pub repo_location: String,
    pub session: String,
    pub offset: String,
    pub revision: RevisionId,
}

/// Reference tree for future diffs (paths relative to the workdir root)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baseline {
    pub revision: RevisionId,
    pub tree: Tree,
}

impl Baseline {
    const MAGIC: &'static [u8] = b"CBL1";

    pub fn new(revision: RevisionId, tree: Tree) -> Self {
        Self { revision, tree }
    }

    /// Serialize (CBL1 format)
    ///
    /// Format:
    /// - magic: "CBL1" (4 bytes)
    /// - revision: u64
    /// - tree: CTR1 tree encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        let tree = self.tree.serialize();
        let mut bytes = Vec::with_capacity(12 + tree.len());
        bytes.extend_from_slice(Self::MAGIC);
        bytes.extend_from_slice(&self.revision.to_le_bytes());
        bytes.extend_from_slice(&tree);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        if reader.take(4)? != Self::MAGIC {
            return Err(Error::corrupt("baseline has wrong magic"));
        }
        let revision = reader.u64()?;
        let tree = Tree::deserialize(&bytes[12..])?;
        Ok(Self { revision, tree })
    }
}

/// The `.meta` directory of one workdir
#[derive(Debug, Clone)]
pub struct MetaDir {
    dir: PathBuf,
}

impl MetaDir {
    pub fn new(workdir_root: &Path) -> Self {
        Self {
            dir: workdir_root.join(META_DIR),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Whether metadata has been written
    pub fn exists(&self) -> bool {
        self.dir.join(INFO_FILE).is_file()
    }

    pub fn load(&self) -> Result<(WorkdirInfo, Baseline)> {
        let info_bytes = match fs::read(self.dir.join(INFO_FILE)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!(
                    "no workdir metadata in {}",
                    self.dir.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let info: WorkdirInfo = serde_json::from_slice(&info_bytes)
            .map_err(|e| Error::corrupt(format!("malformed workdir info: {}", e)))?;

        let baseline = match self.read_baseline(PENDING_FILE)? {
            Some(pending) if pending.revision == info.revision => pending,
            _ => self
                .read_baseline(BASELINE_FILE)?
                .ok_or_else(|| Error::corrupt("workdir info present but baseline missing"))?,
        };

        if baseline.revision != info.revision {
            return Err(Error::corrupt(format!(
                "baseline is for revision {} but info says {}",
                baseline.revision, info.revision
            )));
        }
        Ok((info, baseline))
    }

    /// Persist a new info/baseline pair; readers see the old pair or the new one
    pub fn save(&self, info: &WorkdirInfo, baseline: &Baseline) -> Result<()> {
        debug_assert_eq!(info.revision, baseline.revision);
        fs::create_dir_all(&self.dir)?;

        self.stage_baseline(baseline)?;
        self.write_info(info)?;
        fs::rename(self.dir.join(PENDING_FILE), self.dir.join(BASELINE_FILE))?;

        tracing::debug!(dir = %self.dir.display(), revision = info.revision, "saved workdir metadata");
        Ok(())
    }

    fn stage_baseline(&self, baseline: &Baseline) -> Result<()> {
        atomic_write(&self.dir, &self.dir.join(PENDING_FILE), &baseline.to_bytes())
    }

    fn write_info(&self, info: &WorkdirInfo) -> Result<()> {
        let json = serde_json::to_vec_pretty(info)
            .map_err(|e| Error::corrupt(format!("failed to encode workdir info: {}", e)))?;
        atomic_write(&self.dir, &self.dir.join(INFO_FILE), &json)
    }

    fn read_baseline(&self, name: &str) -> Result<Option<Baseline>> {
        match fs::read(self.dir.join(name)) {
            Ok(bytes) => Ok(Some(Baseline::from_bytes(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
