//! On-disk object store: repository layout, tree objects and atomic writes

use crate::blob::BlobStore;
use crate::error::{Error, Result};
use crate::hash::Digest;
use crate::tree::Tree;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Repository configuration, stored as `config.toml` at the repository root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub store: StoreSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// On-disk format version
    pub version: u32,
    /// Blobs larger than this (bytes) are considered for compression
    pub compression_threshold: usize,
    /// zstd level used for blob compression
    pub compression_level: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store: StoreSection::default(),
        }
    }
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            compression_threshold: 4096, // 4KB
            compression_level: 3,
        }
    }
}

impl StoreConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StoreConfig = toml::from_str(&content)
            .map_err(|e| Error::corrupt(format!("invalid {}: {}", path.display(), e)))?;
        if config.store.version != FORMAT_VERSION {
            return Err(Error::user(format!(
                "unsupported repository format version {} (expected {})",
                config.store.version, FORMAT_VERSION
            )));
        }
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::corrupt(format!("failed to serialize config: {}", e)))
    }
}

/// Object store for a cairn repository
///
/// Manages the repository directory structure:
/// ```text
/// <repo>/
///   config.toml
///   locks/
///   objects/
///     blobs/
///     trees/
///   sessions/
///   tmp/
///     ingest/
/// ```
pub struct ObjectStore {
    root: PathBuf,
    config: StoreConfig,
    blob_store: BlobStore,
    /// Tree cache (digest -> tree)
    tree_cache: DashMap<Digest, Arc<Tree>>,
}

const REQUIRED_DIRS: [&str; 6] = [
    "locks",
    "objects/blobs",
    "objects/trees",
    "sessions",
    "tmp",
    "tmp/ingest",
];

impl ObjectStore {
    /// Initialize a new, empty store at `root`
    pub fn init(root: &Path) -> Result<Self> {
        Self::init_with_config(root, StoreConfig::default())
    }

    pub fn init_with_config(root: &Path, config: StoreConfig) -> Result<Self> {
        use std::fs;

        if Self::is_store(root) {
            return Err(Error::AlreadyExists(format!(
                "repository already initialized at {}",
                root.display()
            )));
        }
        if root.exists() && fs::read_dir(root)?.next().is_some() {
            return Err(Error::user(format!(
                "cannot create repository in non-empty directory {}",
                root.display()
            )));
        }

        fs::create_dir_all(root)?;
        for dir in REQUIRED_DIRS {
            fs::create_dir_all(root.join(dir))?;
        }

        // config.toml goes last: its presence marks a complete repository
        atomic_write(&root.join("tmp"), &root.join("config.toml"), config.to_toml()?.as_bytes())?;

        tracing::info!(path = %root.display(), "created repository");
        Ok(Self::with_config(root, config))
    }

    /// Open an existing store
    pub fn open(root: &Path) -> Result<Self> {
        if !Self::is_store(root) {
            return Err(Error::not_found(format!(
                "no repository at {}",
                root.display()
            )));
        }

        for dir in REQUIRED_DIRS {
            if !root.join(dir).is_dir() {
                return Err(Error::corrupt(format!("missing required directory: {}", dir)));
            }
        }

        let config = StoreConfig::load(&root.join("config.toml"))?;
        Ok(Self::with_config(root, config))
    }

    /// Whether `root` holds a repository
    pub fn is_store(root: &Path) -> bool {
        root.join("config.toml").is_file()
    }

    fn with_config(root: &Path, config: StoreConfig) -> Self {
        let blob_store = BlobStore::new(root.to_path_buf()).with_compression(
            config.store.compression_threshold,
            config.store.compression_level,
        );
        Self {
            root: root.to_path_buf(),
            config,
            blob_store,
            tree_cache: DashMap::new(),
        }
    }

    /// Write a tree object, returning its digest (idempotent)
    pub fn write_tree(&self, tree: &Tree) -> Result<Digest> {
        let digest = tree.hash();
        let tree_path = self.tree_path(&digest);

        if !tree_path.exists() {
            atomic_write(&self.tmp_dir(), &tree_path, &tree.serialize())?;
        }

        self.tree_cache.insert(digest, Arc::new(tree.clone()));
        Ok(digest)
    }

    /// Read a tree object, verifying its digest
    pub fn read_tree(&self, digest: &Digest) -> Result<Arc<Tree>> {
        if let Some(cached) = self.tree_cache.get(digest) {
            return Ok(Arc::clone(&cached));
        }

        let serialized = match std::fs::read(self.tree_path(digest)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!("tree {}", digest)));
            }
            Err(e) => return Err(e.into()),
        };

        let tree = Tree::deserialize(&serialized)?;
        let computed = tree.hash();
        if computed != *digest {
            return Err(Error::corrupt(format!(
                "tree hash mismatch: expected {}, got {}",
                digest, computed
            )));
        }

        let tree = Arc::new(tree);
        self.tree_cache.insert(*digest, Arc::clone(&tree));
        Ok(tree)
    }

    fn tree_path(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        let (prefix, suffix) = hex.split_at(2);
        self.root.join("objects/trees").join(prefix).join(suffix)
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.blob_store
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Scratch directory for atomic writes (same filesystem as the store)
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp").join("ingest")
    }
}

/// Atomic write helper
///
/// Writes data to a temporary file, fsyncs it, then renames it to the target path.
pub fn atomic_write(tmp_dir: &Path, target: &Path, data: &[u8]) -> Result<()> {
    use std::fs;
    use std::io::Write;

    fs::create_dir_all(tmp_dir)?;
    let temp_path = tmp_dir.join(format!("{}", uuid::Uuid::new_v4()));

    let write = || -> std::io::Result<()> {
        let mut temp_file = fs::File::create(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        drop(temp_file);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&temp_path, target)
    };

    if let Err(e) = write() {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    // Fsync parent directory for durability
    if let Some(parent) = target.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

/// Longest path the tree encoding can carry
pub const MAX_PATH_LEN: usize = u16::MAX as usize;

/// Normalize a relative path for storage
///
/// - Converts `\` to `/` on Windows; elsewhere `\` is an ordinary file name byte
/// - Rejects paths longer than [`MAX_PATH_LEN`] bytes
/// - Drops `.` and empty components (`./a//b/` -> `a/b`)
/// - Rejects `..` and absolute paths
///
/// The empty string normalizes to itself (the tree root).
pub fn normalize_path(path: &str) -> Result<String> {
    if path.len() > MAX_PATH_LEN {
        return Err(Error::user(format!("path longer than {} bytes", MAX_PATH_LEN)));
    }

    #[cfg(windows)]
    let unified = path.replace('\\', "/");
    #[cfg(not(windows))]
    let unified = path.to_string();

    if unified.starts_with('/') {
        return Err(Error::user(format!("absolute paths not allowed: {}", path)));
    }

    let mut components = Vec::new();
    for component in unified.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                return Err(Error::user(format!("path traversal not allowed: {}", path)));
            }
            other => components.push(other),
        }
    }

    Ok(components.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::tree::Entry;

    #[test]
    fn test_store_init() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path().join("repo");

        let store = ObjectStore::init(&root)?;
        for dir in REQUIRED_DIRS {
            assert!(store.root().join(dir).is_dir(), "missing {}", dir);
        }
        assert!(root.join("config.toml").exists());
        assert_eq!(store.config(), &StoreConfig::default());
        Ok(())
    }

    #[test]
    fn test_store_init_already_initialized() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        ObjectStore::init(temp_dir.path())?;

        let result = ObjectStore::init(temp_dir.path());
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
        Ok(())
    }

    #[test]
    fn test_store_init_rejects_non_empty_dir() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::write(temp_dir.path().join("stray.txt"), b"x")?;

        let result = ObjectStore::init(temp_dir.path());
        assert!(matches!(result, Err(Error::UserError(_))));
        Ok(())
    }

    #[test]
    fn test_store_open_not_initialized() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = ObjectStore::open(temp_dir.path());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_store_open_reads_config() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mut config = StoreConfig::default();
        config.store.compression_threshold = 128;
        ObjectStore::init_with_config(temp_dir.path(), config.clone())?;

        let store = ObjectStore::open(temp_dir.path())?;
        assert_eq!(store.config(), &config);
        Ok(())
    }

    #[test]
    fn test_store_rejects_unknown_version() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        ObjectStore::init(temp_dir.path())?;
        std::fs::write(temp_dir.path().join("config.toml"), "[store]\nversion = 99\n")?;

        assert!(matches!(
            ObjectStore::open(temp_dir.path()),
            Err(Error::UserError(_))
        ));
        Ok(())
    }

    #[test]
    fn test_write_read_tree() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = ObjectStore::init(temp_dir.path())?;

        let mut tree = Tree::new();
        tree.insert("file1.txt", Entry::file(hash_bytes(b"content1"), 8));
        tree.insert("src/file2.txt", Entry::file(hash_bytes(b"content2"), 8));

        let digest = store.write_tree(&tree)?;
        assert_eq!(store.write_tree(&tree)?, digest);

        // A fresh store has an empty cache and reads from disk
        let reopened = ObjectStore::open(temp_dir.path())?;
        let read = reopened.read_tree(&digest)?;
        assert_eq!(*read, tree);
        Ok(())
    }

    #[test]
    fn test_read_missing_tree() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = ObjectStore::init(temp_dir.path())?;
        let result = store.read_tree(&Digest::from_bytes([7; 32]));
        assert!(matches!(result, Err(Error::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let tmp_dir = temp_dir.path().join("tmp");
        let target = temp_dir.path().join("a").join("b").join("file.txt");

        atomic_write(&tmp_dir, &target, b"nested")?;
        assert_eq!(std::fs::read(&target)?, b"nested");
        assert_eq!(std::fs::read_dir(&tmp_dir)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_normalize_path() -> anyhow::Result<()> {
        assert_eq!(normalize_path("src/main.rs")?, "src/main.rs");
        assert_eq!(normalize_path("./file.txt")?, "file.txt");
        assert_eq!(normalize_path("subdir1/")?, "subdir1");
        assert_eq!(normalize_path("a//b/./c")?, "a/b/c");
        assert_eq!(normalize_path("")?, "");
        Ok(())
    }

    #[test]
    #[cfg(not(windows))]
    fn test_normalize_path_keeps_backslash() -> anyhow::Result<()> {
        assert_eq!(normalize_path("a\\b.txt")?, "a\\b.txt");
        assert_eq!(normalize_path("dir/x\\y")?, "dir/x\\y");
        Ok(())
    }

    #[test]
    fn test_normalize_path_rejects_oversized() -> anyhow::Result<()> {
        let long = "d/".repeat(MAX_PATH_LEN / 2) + "file";
        assert!(normalize_path(&long).is_err());
        let fits = "x".repeat(MAX_PATH_LEN);
        assert_eq!(normalize_path(&fits)?, fits);
        Ok(())
    }

    #[test]
    fn test_normalize_path_rejects_escapes() {
        assert!(normalize_path("../secret.txt").is_err());
        assert!(normalize_path("src/../../etc/passwd").is_err());
        assert!(normalize_path("/etc/passwd").is_err());
    }
}
